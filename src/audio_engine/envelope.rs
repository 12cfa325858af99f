use serde::{Deserialize, Serialize};

/// Attack/decay/sustain shaping shared by every voice. One process-wide
/// instance lives on the control side; each voice captures a copy at trigger
/// time, so edits never bend a note that is already sounding.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub struct EnvelopeSettings {
    pub attack_ms: u32,
    pub decay_ms: u32,
    pub sustain_percent: u8,
}

impl Default for EnvelopeSettings {
    fn default() -> Self {
        // Default is "play as is".
        Self {
            attack_ms: 0,
            decay_ms: 0,
            sustain_percent: 100,
        }
    }
}

impl EnvelopeSettings {
    pub fn clamped(self) -> Self {
        Self {
            attack_ms: self.attack_ms,
            decay_ms: self.decay_ms,
            sustain_percent: self.sustain_percent.min(100),
        }
    }

    pub fn sustain_level(&self) -> f32 {
        self.sustain_percent.min(100) as f32 / 100.0
    }
}

#[derive(PartialEq, Clone, Copy, Debug)]
pub enum EnvelopeStage {
    Attack,
    Decay,
    Sustain,
    Released,
    Finished,
}

/// Per-voice gain runner. Ramps are linear, computed per sample from the
/// captured settings, so two voices triggered with the same settings produce
/// identical gain sequences block for block.
#[derive(Clone, Copy, Debug)]
pub struct Envelope {
    stage: EnvelopeStage,
    level: f32,
    attack_rate: f32,
    decay_rate: f32,
    sustain_level: f32,
}

impl Envelope {
    pub fn new(settings: EnvelopeSettings, sample_rate: f32) -> Self {
        let settings = settings.clamped();
        let sustain_level = settings.sustain_level();
        let attack_rate = if settings.attack_ms > 0 {
            1.0 / (settings.attack_ms as f32 / 1000.0 * sample_rate)
        } else {
            0.0
        };
        let decay_rate = if settings.decay_ms > 0 {
            (1.0 - sustain_level) / (settings.decay_ms as f32 / 1000.0 * sample_rate)
        } else {
            0.0
        };
        Self {
            stage: EnvelopeStage::Attack,
            level: 0.0,
            attack_rate,
            decay_rate,
            sustain_level,
        }
    }

    pub fn stage(&self) -> EnvelopeStage {
        self.stage
    }

    pub fn is_finished(&self) -> bool {
        self.stage == EnvelopeStage::Finished
    }

    /// The cursor ran out of frames. No release tail is modeled, so this
    /// collapses to `Finished` on the next processed sample.
    pub fn release(&mut self) {
        if self.stage != EnvelopeStage::Finished {
            self.stage = EnvelopeStage::Released;
        }
    }

    /// Stop or retrigger: the voice dies immediately, click and all.
    pub fn kill(&mut self) {
        self.stage = EnvelopeStage::Finished;
        self.level = 0.0;
    }

    pub fn process(&mut self) -> f32 {
        match self.stage {
            EnvelopeStage::Attack => {
                if self.attack_rate > 0.0 {
                    self.level += self.attack_rate;
                } else {
                    self.level = 1.0;
                }
                if self.level >= 1.0 {
                    self.level = 1.0;
                    self.stage = EnvelopeStage::Decay;
                }
                self.level
            }
            EnvelopeStage::Decay => {
                if self.decay_rate > 0.0 {
                    self.level -= self.decay_rate;
                } else {
                    self.level = self.sustain_level;
                }
                if self.level <= self.sustain_level {
                    self.level = self.sustain_level;
                    self.stage = EnvelopeStage::Sustain;
                }
                self.level
            }
            EnvelopeStage::Sustain => self.sustain_level,
            EnvelopeStage::Released | EnvelopeStage::Finished => {
                self.stage = EnvelopeStage::Finished;
                self.level = 0.0;
                0.0
            }
        }
    }
}
