use std::fs;
use std::path::PathBuf;
use std::sync::atomic::Ordering;
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::Arc;
use std::thread;

use ringbuf::{HeapConsumer, HeapProducer, HeapRb};
use tracing::{info, warn};

use crate::audio_device;
use crate::audio_engine::{
    AudioEngine, EngineCommand, EngineEvent, EngineShared, EnvelopeSettings,
};
use crate::audio_io;
use crate::error::{EngineErrorKind, LoadError, LoadFailReason};
use crate::pads::{PadRegistry, NUM_PADS};
use crate::sample_store::{decode_bytes, DecodedSample, SampleStore, SourceKey};
use crate::settings::AppSettings;
use crate::transport::{Command, Event};

pub const COMMAND_QUEUE_CAP: usize = 256;
pub const EVENT_QUEUE_CAP: usize = 256;
const DEFAULT_SAMPLE_RATE: u32 = 48_000;

struct DecodeOutcome {
    pad_id: usize,
    key: SourceKey,
    source: PathBuf,
    result: Result<DecodedSample, LoadError>,
}

/// The control half of the sampler. Owns the pad registry, the sample
/// store and the envelope/master state; validates surface commands, hands
/// finished data to the audio thread over the SPSC ring, and turns the
/// engine's atomics and event ring back into protocol events.
///
/// May block and may allocate — everything time-unbounded (decoding above
/// all) happens here or on a worker thread, never on the audio thread.
pub struct EngineController {
    registry: PadRegistry,
    store: SampleStore,
    envelope: EnvelopeSettings,
    shared: Arc<EngineShared>,
    command_producer: HeapProducer<EngineCommand>,
    engine_events: HeapConsumer<EngineEvent>,
    decode_tx: Sender<DecodeOutcome>,
    decode_rx: Receiver<DecodeOutcome>,
    stream_error_tx: Sender<String>,
    stream_error_rx: Receiver<String>,
    pending_events: Vec<Event>,
    overloads_seen: usize,
    sample_rate: u32,
    host_name: Option<String>,
    output_device: Option<String>,
    buffer_size: Option<u32>,
    output_stream: Option<cpal::Stream>,
    exit_requested: bool,
}

impl EngineController {
    /// Builds the controller together with its audio-side counterpart. The
    /// engine is handed to the output stream by `start_audio`; tests drive
    /// its `process_block` directly instead.
    pub fn new(settings: &AppSettings) -> (Self, AudioEngine) {
        let sample_rate = settings.sample_rate.unwrap_or(DEFAULT_SAMPLE_RATE);
        let shared = Arc::new(EngineShared::new());
        shared.set_master_volume(settings.master_volume);

        let (command_producer, command_consumer) =
            HeapRb::<EngineCommand>::new(COMMAND_QUEUE_CAP).split();
        let (event_producer, engine_events) = HeapRb::<EngineEvent>::new(EVENT_QUEUE_CAP).split();
        let (decode_tx, decode_rx) = mpsc::channel();
        let (stream_error_tx, stream_error_rx) = mpsc::channel();

        let engine = AudioEngine::new(
            command_consumer,
            event_producer,
            shared.clone(),
            sample_rate as f32,
        );

        let controller = Self {
            registry: PadRegistry::new(),
            store: SampleStore::new(),
            envelope: settings.envelope.clamped(),
            shared,
            command_producer,
            engine_events,
            decode_tx,
            decode_rx,
            stream_error_tx,
            stream_error_rx,
            pending_events: Vec::new(),
            overloads_seen: 0,
            sample_rate,
            host_name: settings.host_name.clone(),
            output_device: settings.output_device.clone(),
            buffer_size: settings.buffer_size,
            output_stream: None,
            exit_requested: false,
        };
        (controller, engine)
    }

    pub fn registry(&self) -> &PadRegistry {
        &self.registry
    }

    pub fn shared(&self) -> &Arc<EngineShared> {
        &self.shared
    }

    pub fn envelope(&self) -> EnvelopeSettings {
        self.envelope
    }

    pub fn should_exit(&self) -> bool {
        self.exit_requested
    }

    pub fn start_audio(&mut self, engine: AudioEngine) -> anyhow::Result<()> {
        let host_id = audio_device::select_host(self.host_name.as_deref());
        let (stream, active_sr, active_bs) = audio_io::init_and_run_output(
            host_id,
            self.output_device.clone(),
            Some(self.sample_rate),
            self.buffer_size,
            engine,
            self.stream_error_tx.clone(),
        )?;
        info!(
            sample_rate = active_sr,
            buffer_size = active_bs,
            "audio stream started"
        );
        self.output_stream = Some(stream);
        Ok(())
    }

    pub fn stop_audio(&mut self) {
        if self.output_stream.take().is_some() {
            info!("audio stream stopped");
        }
    }

    /// Host environments that support drag-and-drop report drops here; the
    /// surface hears about them as a `FileDropped` broadcast and decides
    /// which pad to load.
    pub fn notify_file_drop(&mut self, path: PathBuf, x: f64, y: f64) {
        self.pending_events.push(Event::FileDropped { path, x, y });
    }

    pub fn handle_command(&mut self, command: Command) {
        match command {
            Command::Play { pad_id, gain, pan } => {
                let Some(pad) = self.registry.get(pad_id) else {
                    return self.reject(format!("Play: pad id {pad_id} out of range"));
                };
                if !gain.is_finite() || !pan.is_finite() {
                    return self.reject("Play: non-finite gain or pan".to_string());
                }
                // Empty pad, or muted without a solo override: silent no-op.
                if !pad.has_sample() || (pad.is_muted && !pad.is_solo) {
                    return;
                }
                let envelope = self.envelope;
                self.send(EngineCommand::Play {
                    pad_id,
                    gain: gain.max(0.0),
                    pan: pan.clamp(-1.0, 1.0),
                    envelope,
                });
            }
            Command::Stop { pad_id } => {
                if pad_id >= NUM_PADS {
                    return self.reject(format!("Stop: pad id {pad_id} out of range"));
                }
                self.send(EngineCommand::Stop { pad_id });
            }
            Command::StopAll => self.send(EngineCommand::StopAll),
            Command::Load { pad_id, path } => {
                if pad_id >= NUM_PADS {
                    return self.reject(format!("Load: pad id {pad_id} out of range"));
                }
                let key = SourceKey::for_path(&path);
                if let Some(hit) = self.store.get(&key) {
                    info!(pad_id, path = %path.display(), "sample cache hit");
                    self.finish_load(pad_id, path, hit);
                    return;
                }
                // Decode time is unbounded, so the load returns immediately
                // and the result arrives through poll_events.
                let tx = self.decode_tx.clone();
                thread::spawn(move || {
                    let result = fs::read(&path)
                        .map_err(LoadError::from)
                        .and_then(|bytes| decode_bytes(path.to_str(), &bytes));
                    let _ = tx.send(DecodeOutcome {
                        pad_id,
                        key,
                        source: path,
                        result,
                    });
                });
            }
            Command::ClearPad { pad_id } => {
                if pad_id >= NUM_PADS {
                    return self.reject(format!("ClearPad: pad id {pad_id} out of range"));
                }
                self.registry.clear(pad_id);
                self.send(EngineCommand::ClearPad { pad_id });
            }
            Command::SetMasterVolume { volume } => {
                if !volume.is_finite() {
                    return self.reject("SetMasterVolume: non-finite volume".to_string());
                }
                self.shared.set_master_volume(volume);
            }
            Command::SetEnvelope {
                attack_ms,
                decay_ms,
                sustain_percent,
            } => {
                self.envelope = EnvelopeSettings {
                    attack_ms: attack_ms.clamp(0, u32::MAX as i64) as u32,
                    decay_ms: decay_ms.clamp(0, u32::MAX as i64) as u32,
                    sustain_percent: sustain_percent.clamp(0, 100) as u8,
                };
            }
            Command::SetTrim { pad_id, start, end } => {
                if pad_id >= NUM_PADS {
                    return self.reject(format!("SetTrim: pad id {pad_id} out of range"));
                }
                // An inverted or out-of-range region is rejected silently;
                // the previous trim stays in force.
                if self.registry.set_trim(pad_id, start, end) {
                    self.send(EngineCommand::SetTrim { pad_id, start, end });
                }
            }
            Command::SetMute { pad_id, muted } => {
                if pad_id >= NUM_PADS {
                    return self.reject(format!("SetMute: pad id {pad_id} out of range"));
                }
                self.registry.set_mute(pad_id, muted);
                self.send(EngineCommand::SetMute { pad_id, muted });
            }
            Command::SetSolo { pad_id, solo } => {
                if pad_id >= NUM_PADS {
                    return self.reject(format!("SetSolo: pad id {pad_id} out of range"));
                }
                self.registry.set_solo(pad_id, solo);
                self.send(EngineCommand::SetSolo { pad_id, solo });
            }
            Command::ConfirmExit => {
                info!("exit confirmed; releasing audio resources");
                self.send(EngineCommand::StopAll);
                self.stop_audio();
                self.exit_requested = true;
            }
        }
    }

    /// Drains everything that accumulated since the last poll: decode
    /// results, finished-voice notifications, live progress (latest value
    /// per pad), queue overloads and stream errors. Called at the surface's
    /// frame rate.
    pub fn poll_events(&mut self) -> Vec<Event> {
        let mut events = std::mem::take(&mut self.pending_events);

        while let Ok(outcome) = self.decode_rx.try_recv() {
            match outcome.result {
                Ok(decoded) => {
                    let sample = Arc::new(decoded);
                    self.store.insert(outcome.key, sample.clone());
                    info!(
                        pad_id = outcome.pad_id,
                        path = %outcome.source.display(),
                        duration = sample.duration,
                        "sample loaded"
                    );
                    self.registry
                        .assign(outcome.pad_id, sample.clone(), outcome.source);
                    self.send(EngineCommand::LoadPad {
                        pad_id: outcome.pad_id,
                        sample: sample.clone(),
                    });
                    events.push(Event::WaveformReady {
                        pad_id: outcome.pad_id,
                        peaks: sample.peaks.clone(),
                        duration: sample.duration,
                    });
                }
                Err(err) => {
                    warn!(
                        pad_id = outcome.pad_id,
                        path = %outcome.source.display(),
                        error = %err,
                        "sample load failed"
                    );
                    events.push(Event::LoadFailed {
                        pad_id: outcome.pad_id,
                        reason: LoadFailReason::from(&err),
                    });
                }
            }
        }

        // Voices that ended since the last poll get one final progress
        // report (1.0 after a natural end, last position after a stop).
        while let Some(engine_event) = self.engine_events.pop() {
            match engine_event {
                EngineEvent::VoiceFinished { pad_id } => {
                    events.push(Event::VoiceProgress {
                        pad_id,
                        elapsed_fraction: self.shared.progress_of(pad_id),
                    });
                }
            }
        }

        let mask = self.shared.playing_pads.load(Ordering::Relaxed);
        for pad_id in 0..NUM_PADS {
            if mask & (1 << pad_id) != 0 {
                events.push(Event::VoiceProgress {
                    pad_id,
                    elapsed_fraction: self.shared.progress_of(pad_id),
                });
            }
        }

        let overloads = self.shared.overload_count.load(Ordering::Relaxed);
        if overloads > self.overloads_seen {
            let dropped = overloads - self.overloads_seen;
            self.overloads_seen = overloads;
            events.push(Event::EngineError {
                kind: EngineErrorKind::Overload,
                detail: format!("{dropped} command(s) dropped, queue saturated"),
            });
        }

        while let Ok(detail) = self.stream_error_rx.try_recv() {
            events.push(Event::EngineError {
                kind: EngineErrorKind::DeviceUnavailable,
                detail,
            });
        }

        events
    }

    fn finish_load(&mut self, pad_id: usize, source: PathBuf, sample: Arc<DecodedSample>) {
        self.registry.assign(pad_id, sample.clone(), source);
        self.send(EngineCommand::LoadPad {
            pad_id,
            sample: sample.clone(),
        });
        self.pending_events.push(Event::WaveformReady {
            pad_id,
            peaks: sample.peaks.clone(),
            duration: sample.duration,
        });
    }

    fn reject(&mut self, detail: String) {
        warn!(%detail, "command rejected");
        self.pending_events.push(Event::EngineError {
            kind: EngineErrorKind::InvalidCommand,
            detail,
        });
    }

    fn send(&mut self, command: EngineCommand) {
        if self.command_producer.push(command).is_err() {
            self.shared.overload_count.fetch_add(1, Ordering::Relaxed);
            warn!("engine command queue full, command dropped");
        }
    }
}
