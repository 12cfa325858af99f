use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::error::{EngineErrorKind, LoadFailReason};

/// Commands accepted from the control surface. The wire shape is a tagged
/// envelope: `{"command": "Play", "payload": {...}}`. Every command is
/// validated at the boundary before anything happens; caller-supplied ids
/// and ranges are never trusted.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(tag = "command", content = "payload")]
pub enum Command {
    Play {
        pad_id: usize,
        gain: f32,
        pan: f32,
    },
    Stop {
        pad_id: usize,
    },
    StopAll,
    Load {
        pad_id: usize,
        path: PathBuf,
    },
    ClearPad {
        pad_id: usize,
    },
    SetMasterVolume {
        volume: f32,
    },
    SetEnvelope {
        attack_ms: i64,
        decay_ms: i64,
        sustain_percent: i64,
    },
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
    ConfirmExit,
}

/// Events broadcast to the control surface, mirrored envelope:
/// `{"event": "WaveformReady", "payload": {...}}`. Each carries enough data
/// to update UI state without querying the engine back.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(tag = "event", content = "payload")]
pub enum Event {
    FileDropped {
        path: PathBuf,
        x: f64,
        y: f64,
    },
    WaveformReady {
        pad_id: usize,
        peaks: Vec<f32>,
        duration: f32,
    },
    LoadFailed {
        pad_id: usize,
        reason: LoadFailReason,
    },
    VoiceProgress {
        pad_id: usize,
        elapsed_fraction: f32,
    },
    EngineError {
        kind: EngineErrorKind,
        detail: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn commands_use_the_tagged_envelope() {
        let value = serde_json::to_value(Command::Play {
            pad_id: 3,
            gain: 1.0,
            pan: 0.0,
        })
        .unwrap();
        assert_eq!(
            value,
            json!({
                "command": "Play",
                "payload": { "pad_id": 3, "gain": 1.0, "pan": 0.0 }
            })
        );
    }

    #[test]
    fn unit_commands_need_no_payload() {
        let value = serde_json::to_value(Command::ConfirmExit).unwrap();
        assert_eq!(value, json!({ "command": "ConfirmExit" }));
    }

    #[test]
    fn commands_parse_from_surface_json() {
        let parsed: Command = serde_json::from_str(
            r#"{"command": "Load", "payload": {"pad_id": 0, "path": "kick.wav"}}"#,
        )
        .unwrap();
        assert_eq!(
            parsed,
            Command::Load {
                pad_id: 0,
                path: PathBuf::from("kick.wav"),
            }
        );
    }

    #[test]
    fn events_use_the_tagged_envelope() {
        let value = serde_json::to_value(Event::WaveformReady {
            pad_id: 0,
            peaks: vec![0.5, 0.25],
            duration: 1.0,
        })
        .unwrap();
        assert_eq!(
            value,
            json!({
                "event": "WaveformReady",
                "payload": { "pad_id": 0, "peaks": [0.5, 0.25], "duration": 1.0 }
            })
        );
    }

    #[test]
    fn load_failure_reasons_round_trip() {
        let event = Event::LoadFailed {
            pad_id: 7,
            reason: LoadFailReason::CorruptHeader,
        };
        let text = serde_json::to_string(&event).unwrap();
        let back: Event = serde_json::from_str(&text).unwrap();
        assert_eq!(event, back);
        assert!(text.contains("CorruptHeader"));
    }

    #[test]
    fn engine_errors_round_trip() {
        let event = Event::EngineError {
            kind: EngineErrorKind::Overload,
            detail: "command queue full".into(),
        };
        let back: Event = serde_json::from_str(&serde_json::to_string(&event).unwrap()).unwrap();
        assert_eq!(event, back);
    }
}
