use std::sync::Arc;

use crate::audio_engine::envelope::EnvelopeSettings;
use crate::sample_store::DecodedSample;

/// Commands consumed by the audio thread, one ring-buffer pop at a time.
/// Anything heavy (decoding, validation, path handling) already happened on
/// the control side; these carry finished data only.
#[derive(Debug)]
pub enum EngineCommand {
    LoadPad {
        pad_id: usize,
        sample: Arc<DecodedSample>,
    },
    ClearPad {
        pad_id: usize,
    },
    Play {
        pad_id: usize,
        gain: f32,
        pan: f32,
        /// Captured by value at trigger time; later SetEnvelope edits do not
        /// bend voices already in flight.
        envelope: EnvelopeSettings,
    },
    Stop {
        pad_id: usize,
    },
    StopAll,
    SetTrim {
        pad_id: usize,
        start: f32,
        end: f32,
    },
    SetMute {
        pad_id: usize,
        muted: bool,
    },
    SetSolo {
        pad_id: usize,
        solo: bool,
    },
}

/// Discrete notifications pushed from the audio thread. `Copy`, so pushing
/// into the event ring never allocates in the callback.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EngineEvent {
    VoiceFinished { pad_id: usize },
}
