use std::f32::consts::FRAC_PI_4;
use std::sync::Arc;

use crate::audio_engine::envelope::{Envelope, EnvelopeSettings};
use crate::sample_store::DecodedSample;

#[inline]
fn lerp(a: f32, b: f32, t: f32) -> f32 {
    a + t * (b - a)
}

/// One in-flight playback of a pad's sample. The cursor walks the SOURCE
/// buffer with a fractional stride of `source_rate / output_rate`, so a
/// 22.05 kHz sample plays at the right speed on a 48 kHz bus without any
/// resampling pass. Trim region and envelope are captured at trigger time.
#[derive(Clone, Debug)]
pub struct Voice {
    pub pad_id: usize,
    sample: Arc<DecodedSample>,
    cursor: f64,
    stride: f64,
    trim_start: f64,
    trim_end: f64,
    envelope: Envelope,
    gain: f32,
    pan_l: f32,
    pan_r: f32,
}

impl Voice {
    pub fn new(
        pad_id: usize,
        sample: Arc<DecodedSample>,
        trim_start: f32,
        trim_end: f32,
        gain: f32,
        pan: f32,
        envelope: EnvelopeSettings,
        output_rate: f32,
    ) -> Self {
        let frames = sample.frames() as f64;
        let trim_start = (trim_start as f64 * frames).clamp(0.0, frames);
        let trim_end = (trim_end as f64 * frames).clamp(trim_start, frames);
        let stride = if output_rate > 0.0 {
            sample.sample_rate as f64 / output_rate as f64
        } else {
            1.0
        };
        // Equal-power pan, -1 = hard left, +1 = hard right.
        let angle = (pan.clamp(-1.0, 1.0) + 1.0) * FRAC_PI_4;
        let mut envelope = Envelope::new(envelope, output_rate);
        if trim_end - trim_start < 1.0 {
            // Nothing playable inside the trim region.
            envelope.kill();
        }
        Self {
            pad_id,
            sample,
            cursor: trim_start,
            stride,
            trim_start,
            trim_end,
            envelope,
            gain: gain.max(0.0),
            pan_l: angle.cos(),
            pan_r: angle.sin(),
        }
    }

    pub fn is_finished(&self) -> bool {
        self.envelope.is_finished()
    }

    /// Stop / retrigger: no fade, the voice just ends.
    pub fn kill(&mut self) {
        self.envelope.kill();
    }

    /// How much of the trim region has been consumed, in [0, 1].
    pub fn elapsed_fraction(&self) -> f32 {
        let span = self.trim_end - self.trim_start;
        if span <= 0.0 {
            return 1.0;
        }
        (((self.cursor - self.trim_start) / span) as f32).clamp(0.0, 1.0)
    }

    /// Renders one output frame and advances the cursor. Past the trim end
    /// the voice releases and produces silence; reads never leave the
    /// buffer.
    pub fn next_frame(&mut self) -> (f32, f32) {
        if self.is_finished() {
            return (0.0, 0.0);
        }
        if self.cursor >= self.trim_end {
            self.envelope.release();
        }

        let env_gain = self.envelope.process();
        if self.is_finished() {
            return (0.0, 0.0);
        }

        let data = &self.sample.pcm;
        let index = self.cursor.floor();
        let frac = (self.cursor - index) as f32;
        let index = index as usize;
        let s0 = data[index];
        let s1 = if index + 1 < data.len() {
            data[index + 1]
        } else {
            0.0
        };
        let value = lerp(s0, s1, frac) * env_gain * self.gain;

        self.cursor += self.stride;

        (value * self.pan_l, value * self.pan_r)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sample_store::compute_peaks;

    fn sample_of(frames: usize, value: f32, sample_rate: u32) -> Arc<DecodedSample> {
        let pcm = vec![value; frames];
        Arc::new(DecodedSample {
            duration: frames as f32 / sample_rate as f32,
            peaks: compute_peaks(&pcm),
            pcm,
            sample_rate,
        })
    }

    fn flat_envelope() -> EnvelopeSettings {
        EnvelopeSettings {
            attack_ms: 0,
            decay_ms: 0,
            sustain_percent: 100,
        }
    }

    #[test]
    fn full_gain_from_the_first_frame_with_instant_envelope() {
        let mut voice = Voice::new(
            0,
            sample_of(100, 0.5, 44_100),
            0.0,
            1.0,
            1.0,
            0.0,
            flat_envelope(),
            44_100.0,
        );
        let (l, r) = voice.next_frame();
        // Center pan splits equal power: l == r, combined magnitude 0.5.
        assert!((l - r).abs() < 1e-6);
        assert!((l - 0.5 * FRAC_PI_4.cos()).abs() < 1e-6);
    }

    #[test]
    fn voice_finishes_exactly_at_trim_end() {
        let mut voice = Voice::new(
            0,
            sample_of(100, 0.5, 44_100),
            0.0,
            1.0,
            1.0,
            0.0,
            flat_envelope(),
            44_100.0,
        );
        for _ in 0..100 {
            assert!(!voice.is_finished());
            voice.next_frame();
        }
        voice.next_frame();
        assert!(voice.is_finished());
        assert_eq!(voice.elapsed_fraction(), 1.0);
    }

    #[test]
    fn mismatched_source_rate_stretches_playback() {
        // 100 frames at 22.05k played on a 44.1k bus last ~200 output frames.
        let mut voice = Voice::new(
            0,
            sample_of(100, 0.5, 22_050),
            0.0,
            1.0,
            1.0,
            0.0,
            flat_envelope(),
            44_100.0,
        );
        let mut rendered = 0;
        while !voice.is_finished() && rendered < 1000 {
            voice.next_frame();
            rendered += 1;
        }
        assert!((199..=201).contains(&rendered), "rendered {rendered}");
    }

    #[test]
    fn trim_region_bounds_the_cursor() {
        let mut voice = Voice::new(
            0,
            sample_of(100, 0.5, 44_100),
            0.25,
            0.5,
            1.0,
            0.0,
            flat_envelope(),
            44_100.0,
        );
        assert_eq!(voice.elapsed_fraction(), 0.0);
        let mut rendered = 0;
        while !voice.is_finished() && rendered < 1000 {
            voice.next_frame();
            rendered += 1;
        }
        assert!((25..=27).contains(&rendered), "rendered {rendered}");
    }

    #[test]
    fn killed_voice_renders_silence() {
        let mut voice = Voice::new(
            0,
            sample_of(100, 0.5, 44_100),
            0.0,
            1.0,
            1.0,
            0.0,
            flat_envelope(),
            44_100.0,
        );
        voice.next_frame();
        voice.kill();
        assert!(voice.is_finished());
        assert_eq!(voice.next_frame(), (0.0, 0.0));
    }

    #[test]
    fn empty_trim_region_finishes_immediately() {
        let mut voice = Voice::new(
            0,
            sample_of(2, 0.5, 44_100),
            0.4,
            0.6,
            1.0,
            0.0,
            flat_envelope(),
            44_100.0,
        );
        assert_eq!(voice.next_frame(), (0.0, 0.0));
        assert!(voice.is_finished());
    }
}
