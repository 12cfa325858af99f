pub mod command;
pub mod envelope;
pub mod voice;

use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;

use ringbuf::{HeapConsumer, HeapProducer};

use crate::pads::NUM_PADS;
use crate::sample_store::DecodedSample;
pub use command::{EngineCommand, EngineEvent};
pub use envelope::{Envelope, EnvelopeSettings, EnvelopeStage};
pub use voice::Voice;

/// Fixed-point scale for f32 values carried in atomics.
pub const PARAM_SCALER: f32 = 1_000_000.0;

/// Soft-clip knee. Below it the bus passes through untouched; above it a
/// tanh segment saturates toward (but never reaches) 1.0.
const CLIP_KNEE: f32 = 0.95;

#[inline]
pub fn soft_clip(x: f32) -> f32 {
    let mag = x.abs();
    if mag <= CLIP_KNEE {
        x
    } else {
        x.signum() * (CLIP_KNEE + (1.0 - CLIP_KNEE) * ((mag - CLIP_KNEE) / (1.0 - CLIP_KNEE)).tanh())
    }
}

/// State shared between the control context and the audio callback. Single
/// writer per cell; reads are atomic snapshots, so the callback never sees a
/// torn value and never takes a lock.
pub struct EngineShared {
    /// Master volume, applied after the limiter. Scaled by `PARAM_SCALER`.
    pub master_volume: AtomicU32,
    /// Per-pad elapsed fraction of the live voice, scaled by `PARAM_SCALER`.
    /// Latest value wins, which coalesces progress reporting by construction.
    pub progress: [AtomicU32; NUM_PADS],
    /// Bit mask of pads with a live voice.
    pub playing_pads: AtomicU32,
    /// Callback time / block time, scaled by 1000.
    pub load_factor: AtomicU32,
    /// Bumped by the command relay whenever the ring is full and a command
    /// had to be dropped.
    pub overload_count: AtomicUsize,
}

impl EngineShared {
    pub fn new() -> Self {
        Self {
            master_volume: AtomicU32::new(PARAM_SCALER as u32),
            progress: std::array::from_fn(|_| AtomicU32::new(0)),
            playing_pads: AtomicU32::new(0),
            load_factor: AtomicU32::new(0),
            overload_count: AtomicUsize::new(0),
        }
    }

    pub fn set_master_volume(&self, volume: f32) {
        self.master_volume
            .store((volume.clamp(0.0, 1.0) * PARAM_SCALER) as u32, Ordering::Relaxed);
    }

    pub fn master_volume(&self) -> f32 {
        self.master_volume.load(Ordering::Relaxed) as f32 / PARAM_SCALER
    }

    pub fn progress_of(&self, pad_id: usize) -> f32 {
        self.progress[pad_id].load(Ordering::Relaxed) as f32 / PARAM_SCALER
    }

    pub fn is_playing(&self, pad_id: usize) -> bool {
        self.playing_pads.load(Ordering::Relaxed) & (1 << pad_id) != 0
    }
}

impl Default for EngineShared {
    fn default() -> Self {
        Self::new()
    }
}

/// Audio-side state of one pad: the sample reference, the mix flags the
/// callback needs each block, and the single live voice (retrigger replaces
/// it, so a pad is monophonic by construction).
struct PadSlot {
    sample: Option<Arc<DecodedSample>>,
    trim_start: f32,
    trim_end: f32,
    muted: bool,
    solo: bool,
    voice: Option<Voice>,
}

impl PadSlot {
    fn empty() -> Self {
        Self {
            sample: None,
            trim_start: 0.0,
            trim_end: 1.0,
            muted: false,
            solo: false,
            voice: None,
        }
    }
}

/// The real-time half of the sampler. Lives inside the output callback:
/// drains the command ring, renders and retires voices, soft-clips the bus
/// and applies master volume. No allocation, no locks, no I/O on this path.
pub struct AudioEngine {
    command_consumer: HeapConsumer<EngineCommand>,
    event_producer: HeapProducer<EngineEvent>,
    pads: Vec<PadSlot>,
    shared: Arc<EngineShared>,
    sample_rate: f32,
}

impl AudioEngine {
    pub fn new(
        command_consumer: HeapConsumer<EngineCommand>,
        event_producer: HeapProducer<EngineEvent>,
        shared: Arc<EngineShared>,
        sample_rate: f32,
    ) -> Self {
        Self {
            command_consumer,
            event_producer,
            pads: (0..NUM_PADS).map(|_| PadSlot::empty()).collect(),
            shared,
            sample_rate,
        }
    }

    fn handle_command(&mut self, command: EngineCommand) {
        match command {
            EngineCommand::LoadPad { pad_id, sample } => {
                if let Some(slot) = self.pads.get_mut(pad_id) {
                    if let Some(voice) = &mut slot.voice {
                        voice.kill();
                    }
                    slot.sample = Some(sample);
                    slot.trim_start = 0.0;
                    slot.trim_end = 1.0;
                }
            }
            EngineCommand::ClearPad { pad_id } => {
                if let Some(slot) = self.pads.get_mut(pad_id) {
                    if let Some(voice) = &mut slot.voice {
                        voice.kill();
                    }
                    slot.sample = None;
                }
            }
            EngineCommand::Play {
                pad_id,
                gain,
                pan,
                envelope,
            } => {
                let sample_rate = self.sample_rate;
                if let Some(slot) = self.pads.get_mut(pad_id) {
                    if let Some(sample) = slot.sample.clone() {
                        // Retrigger replaces the old voice outright; exactly
                        // one voice per pad, always.
                        slot.voice = Some(Voice::new(
                            pad_id,
                            sample,
                            slot.trim_start,
                            slot.trim_end,
                            gain,
                            pan,
                            envelope,
                            sample_rate,
                        ));
                    }
                }
            }
            EngineCommand::Stop { pad_id } => {
                if let Some(slot) = self.pads.get_mut(pad_id) {
                    if let Some(voice) = &mut slot.voice {
                        voice.kill();
                    }
                }
            }
            EngineCommand::StopAll => {
                for slot in &mut self.pads {
                    if let Some(voice) = &mut slot.voice {
                        voice.kill();
                    }
                }
            }
            EngineCommand::SetTrim { pad_id, start, end } => {
                // Validated on the control side; a live voice keeps its
                // captured region, the change applies at the next trigger.
                if let Some(slot) = self.pads.get_mut(pad_id) {
                    slot.trim_start = start;
                    slot.trim_end = end;
                }
            }
            EngineCommand::SetMute { pad_id, muted } => {
                if let Some(slot) = self.pads.get_mut(pad_id) {
                    slot.muted = muted;
                }
            }
            EngineCommand::SetSolo { pad_id, solo } => {
                if let Some(slot) = self.pads.get_mut(pad_id) {
                    slot.solo = solo;
                }
            }
        }
    }

    /// One processing block over an interleaved stereo buffer. Invoked by
    /// the output callback; also driven directly by tests.
    pub fn process_block(&mut self, out: &mut [f32]) {
        let start_time = Instant::now();

        while let Some(command) = self.command_consumer.pop() {
            self.handle_command(command);
        }

        out.fill(0.0);
        let frames = out.len() / 2;
        let any_solo = self.pads.iter().any(|p| p.solo);

        for slot in &mut self.pads {
            let Some(voice) = slot.voice.as_mut() else {
                continue;
            };
            let audible = if any_solo { slot.solo } else { !slot.muted };
            for frame in 0..frames {
                let (l, r) = voice.next_frame();
                if audible {
                    out[frame * 2] += l;
                    out[frame * 2 + 1] += r;
                }
                if voice.is_finished() {
                    break;
                }
            }
        }

        let master = self.shared.master_volume.load(Ordering::Relaxed) as f32 / PARAM_SCALER;
        for sample in out.iter_mut() {
            *sample = soft_clip(*sample) * master;
        }

        // Retire finished voices and publish progress at the block boundary.
        let mut mask = 0u32;
        for (pad_id, slot) in self.pads.iter_mut().enumerate() {
            if let Some(voice) = &slot.voice {
                self.shared.progress[pad_id].store(
                    (voice.elapsed_fraction() * PARAM_SCALER) as u32,
                    Ordering::Relaxed,
                );
                if voice.is_finished() {
                    slot.voice = None;
                    let _ = self.event_producer.push(EngineEvent::VoiceFinished { pad_id });
                } else {
                    mask |= 1 << pad_id;
                }
            }
        }
        self.shared.playing_pads.store(mask, Ordering::Relaxed);

        if frames > 0 {
            let block_duration = frames as f32 / self.sample_rate;
            let load_ratio = start_time.elapsed().as_secs_f32() / block_duration;
            self.shared
                .load_factor
                .store((load_ratio * 1000.0) as u32, Ordering::Relaxed);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sample_store::compute_peaks;
    use ringbuf::HeapRb;

    const SR: f32 = 44_100.0;
    const BLOCK_FRAMES: usize = 512;

    struct Rig {
        engine: AudioEngine,
        commands: HeapProducer<EngineCommand>,
        events: HeapConsumer<EngineEvent>,
        shared: Arc<EngineShared>,
    }

    fn rig() -> Rig {
        let (commands, command_consumer) = HeapRb::<EngineCommand>::new(256).split();
        let (event_producer, events) = HeapRb::<EngineEvent>::new(256).split();
        let shared = Arc::new(EngineShared::new());
        let engine = AudioEngine::new(command_consumer, event_producer, shared.clone(), SR);
        Rig {
            engine,
            commands,
            events,
            shared,
        }
    }

    fn constant_sample(frames: usize, value: f32) -> Arc<DecodedSample> {
        let pcm = vec![value; frames];
        Arc::new(DecodedSample {
            duration: frames as f32 / SR,
            peaks: compute_peaks(&pcm),
            pcm,
            sample_rate: SR as u32,
        })
    }

    fn flat() -> EnvelopeSettings {
        EnvelopeSettings {
            attack_ms: 0,
            decay_ms: 0,
            sustain_percent: 100,
        }
    }

    fn play(rig: &mut Rig, pad_id: usize) {
        rig.commands
            .push(EngineCommand::Play {
                pad_id,
                gain: 1.0,
                pan: 0.0,
                envelope: flat(),
            })
            .unwrap();
    }

    fn block(rig: &mut Rig) -> Vec<f32> {
        let mut out = vec![0.0f32; BLOCK_FRAMES * 2];
        rig.engine.process_block(&mut out);
        out
    }

    #[test]
    fn soft_clip_is_identity_below_the_knee() {
        for x in [-0.9f32, -0.5, 0.0, 0.3, 0.9] {
            assert_eq!(soft_clip(x), x);
        }
    }

    #[test]
    fn soft_clip_bounds_any_input() {
        for x in [1.0f32, 1.5, 4.0, 32.0, 1e6, -2.0, -1e6] {
            let y = soft_clip(x);
            assert!(y.abs() <= 1.0, "soft_clip({x}) = {y} escaped the bound");
            assert_eq!(y.signum(), x.signum());
        }
    }

    #[test]
    fn empty_pad_play_is_a_no_op() {
        let mut r = rig();
        play(&mut r, 0);
        let out = block(&mut r);
        assert!(out.iter().all(|&s| s == 0.0));
        assert_eq!(r.shared.playing_pads.load(Ordering::Relaxed), 0);
    }

    #[test]
    fn retrigger_leaves_exactly_one_live_voice() {
        let mut r = rig();
        r.commands
            .push(EngineCommand::LoadPad {
                pad_id: 0,
                sample: constant_sample(SR as usize, 0.5),
            })
            .unwrap();
        play(&mut r, 0);
        play(&mut r, 0);
        let out = block(&mut r);
        // Two stacked voices would sum to ~1.0 per channel before the pan
        // split; one voice at 0.5 stays well under it.
        let peak = out.iter().fold(0.0f32, |a, &b| a.max(b.abs()));
        assert!((peak - 0.5 * std::f32::consts::FRAC_PI_4.cos()).abs() < 1e-3);
        assert_eq!(
            r.shared.playing_pads.load(Ordering::Relaxed).count_ones(),
            1
        );
    }

    #[test]
    fn limiter_bounds_32_full_gain_voices() {
        let mut r = rig();
        for pad_id in 0..NUM_PADS {
            r.commands
                .push(EngineCommand::LoadPad {
                    pad_id,
                    sample: constant_sample(SR as usize, 1.0),
                })
                .unwrap();
            play(&mut r, pad_id);
        }
        let out = block(&mut r);
        assert!(out.iter().all(|&s| s.abs() <= 1.0));
        // And the bus is actually hot, not silent.
        assert!(out.iter().any(|&s| s.abs() > 0.9));
    }

    #[test]
    fn master_volume_is_applied_after_the_limiter() {
        let mut r = rig();
        r.shared.set_master_volume(0.5);
        assert_eq!(r.shared.master_volume(), 0.5);
        for pad_id in 0..4 {
            r.commands
                .push(EngineCommand::LoadPad {
                    pad_id,
                    sample: constant_sample(SR as usize, 1.0),
                })
                .unwrap();
            play(&mut r, pad_id);
        }
        let out = block(&mut r);
        // Limited bus tops out just under 1.0; half volume lands near 0.5.
        let peak = out.iter().fold(0.0f32, |a, &b| a.max(b.abs()));
        assert!(peak <= 0.5);
        assert!(peak > 0.45);
    }

    #[test]
    fn muted_pad_is_silent_but_still_progresses() {
        let mut r = rig();
        r.commands
            .push(EngineCommand::LoadPad {
                pad_id: 2,
                sample: constant_sample(SR as usize, 0.5),
            })
            .unwrap();
        r.commands
            .push(EngineCommand::SetMute {
                pad_id: 2,
                muted: true,
            })
            .unwrap();
        play(&mut r, 2);
        let out = block(&mut r);
        assert!(out.iter().all(|&s| s == 0.0));
        assert!(r.shared.is_playing(2));
        assert!(r.shared.progress_of(2) > 0.0);
    }

    #[test]
    fn solo_silences_non_soloed_pads_and_overrides_mute() {
        let mut r = rig();
        for pad_id in [0, 1] {
            r.commands
                .push(EngineCommand::LoadPad {
                    pad_id,
                    sample: constant_sample(SR as usize, 0.5),
                })
                .unwrap();
        }
        // Pad 0 is muted AND soloed; pad 1 is a plain unmuted pad.
        r.commands
            .push(EngineCommand::SetMute {
                pad_id: 0,
                muted: true,
            })
            .unwrap();
        r.commands
            .push(EngineCommand::SetSolo {
                pad_id: 0,
                solo: true,
            })
            .unwrap();
        play(&mut r, 0);
        play(&mut r, 1);
        let out = block(&mut r);
        // Only the soloed pad sounds, mute flag notwithstanding; amplitude
        // matches a single voice.
        let peak = out.iter().fold(0.0f32, |a, &b| a.max(b.abs()));
        assert!((peak - 0.5 * std::f32::consts::FRAC_PI_4.cos()).abs() < 1e-3);
    }

    #[test]
    fn finished_voice_is_retired_with_an_event_and_full_progress() {
        let mut r = rig();
        let frames = BLOCK_FRAMES / 2;
        r.commands
            .push(EngineCommand::LoadPad {
                pad_id: 5,
                sample: constant_sample(frames, 0.5),
            })
            .unwrap();
        play(&mut r, 5);
        block(&mut r);
        assert!(!r.shared.is_playing(5));
        assert_eq!(r.shared.progress_of(5), 1.0);
        assert_eq!(r.events.pop(), Some(EngineEvent::VoiceFinished { pad_id: 5 }));
        // Nothing further once the voice is gone.
        block(&mut r);
        assert_eq!(r.events.pop(), None);
    }

    #[test]
    fn stop_kills_the_voice_on_the_next_block() {
        let mut r = rig();
        r.commands
            .push(EngineCommand::LoadPad {
                pad_id: 0,
                sample: constant_sample(SR as usize, 0.5),
            })
            .unwrap();
        play(&mut r, 0);
        block(&mut r);
        assert!(r.shared.is_playing(0));
        r.commands.push(EngineCommand::Stop { pad_id: 0 }).unwrap();
        let out = block(&mut r);
        assert!(out.iter().all(|&s| s == 0.0));
        assert!(!r.shared.is_playing(0));
        assert_eq!(r.events.pop(), Some(EngineEvent::VoiceFinished { pad_id: 0 }));
    }

    #[test]
    fn one_second_sample_finishes_after_one_second_of_blocks() {
        let mut r = rig();
        r.commands
            .push(EngineCommand::LoadPad {
                pad_id: 0,
                sample: constant_sample(SR as usize, 0.5),
            })
            .unwrap();
        play(&mut r, 0);

        let blocks_per_second = (SR as usize).div_ceil(BLOCK_FRAMES);
        let mut finished_after = None;
        let mut last_progress = 0.0f32;
        for n in 1..=blocks_per_second + 2 {
            block(&mut r);
            let progress = r.shared.progress_of(0);
            assert!(progress >= last_progress);
            last_progress = progress;
            if !r.shared.is_playing(0) {
                finished_after = Some(n);
                break;
            }
        }
        assert_eq!(finished_after, Some(blocks_per_second));
        assert_eq!(r.shared.progress_of(0), 1.0);
    }

    #[test]
    fn trim_change_applies_to_the_next_trigger_only() {
        let mut r = rig();
        r.commands
            .push(EngineCommand::LoadPad {
                pad_id: 0,
                sample: constant_sample(SR as usize, 0.5),
            })
            .unwrap();
        play(&mut r, 0);
        block(&mut r);
        let before = r.shared.progress_of(0);
        r.commands
            .push(EngineCommand::SetTrim {
                pad_id: 0,
                start: 0.9,
                end: 1.0,
            })
            .unwrap();
        block(&mut r);
        // The live voice kept its full-region capture.
        assert!(r.shared.progress_of(0) > before);
        assert!(r.shared.progress_of(0) < 0.5);

        play(&mut r, 0);
        block(&mut r);
        // The retriggered voice starts inside the new region, so one block
        // covers a visible chunk of the short span.
        assert!(r.shared.progress_of(0) > 0.05);
    }
}
