use serde::{Deserialize, Serialize};

/// Why a sample failed to load. Decode failures are local to the one load:
/// the pad keeps whatever it had before.
#[derive(Debug, thiserror::Error)]
pub enum LoadError {
    #[error("unsupported container format")]
    UnsupportedFormat,

    #[error("corrupt header: {0}")]
    CorruptHeader(String),

    #[error("payload shorter than header declares")]
    Truncated,

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Wire-level load failure reason, carried by the `LoadFailed` event.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadFailReason {
    UnsupportedFormat,
    CorruptHeader,
    Truncated,
    Io,
}

impl From<&LoadError> for LoadFailReason {
    fn from(err: &LoadError) -> Self {
        match err {
            LoadError::UnsupportedFormat => LoadFailReason::UnsupportedFormat,
            LoadError::CorruptHeader(_) => LoadFailReason::CorruptHeader,
            LoadError::Truncated => LoadFailReason::Truncated,
            LoadError::Io(_) => LoadFailReason::Io,
        }
    }
}

/// Engine-level error classes surfaced through the `EngineError` event.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineErrorKind {
    /// The output device could not be opened, or died mid-stream.
    DeviceUnavailable,
    /// The command or event queue saturated and something was dropped.
    Overload,
    /// A command failed validation at the transport boundary.
    InvalidCommand,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn load_error_maps_to_wire_reason() {
        assert_eq!(
            LoadFailReason::from(&LoadError::UnsupportedFormat),
            LoadFailReason::UnsupportedFormat
        );
        assert_eq!(
            LoadFailReason::from(&LoadError::CorruptHeader("bad fmt chunk".into())),
            LoadFailReason::CorruptHeader
        );
        assert_eq!(
            LoadFailReason::from(&LoadError::Truncated),
            LoadFailReason::Truncated
        );
    }
}
