use serde::Serialize;
use std::path::PathBuf;
use thiserror::Error;

use super::state::SessionState;
use crate::audio::DeviceError;
use crate::storage::StorageError;

/// Reasons a start command did not produce a recording session
///
/// Every variant except `AlreadyActive` ends the session in `Failed` with the
/// capture device released.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("a recording session is already {0}")]
    AlreadyActive(SessionState),

    #[error("capture configuration failed: {0}")]
    ConfigurationFailure(#[source] DeviceError),

    #[error("storage unavailable: {0}")]
    StorageUnavailable(#[source] StorageError),

    #[error("capture prepare failed: {0}")]
    PrepareFailure(#[source] DeviceError),

    #[error("capture start failed: {0}")]
    StartFailure(#[source] DeviceError),
}

impl SessionError {
    /// Stable category name, used as the log tag detail
    pub fn kind(&self) -> &'static str {
        match self {
            SessionError::AlreadyActive(_) => "AlreadyActive",
            SessionError::ConfigurationFailure(_) => "ConfigurationFailure",
            SessionError::StorageUnavailable(_) => "StorageUnavailable",
            SessionError::PrepareFailure(_) => "PrepareFailure",
            SessionError::StartFailure(_) => "StartFailure",
        }
    }

    /// Whether the failure aborted a session (as opposed to being rejected up front)
    pub fn is_fatal(&self) -> bool {
        !matches!(self, SessionError::AlreadyActive(_))
    }
}

/// Non-fatal problems met while stopping; cleanup runs regardless
#[derive(Debug, Clone, Error, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "detail")]
pub enum StopWarning {
    /// The device refused to stop, typically because it was already stopped externally
    #[error("capture device stop failed: {0}")]
    StopFailure(String),

    #[error("output file missing after stop: {}", .0.display())]
    FileMissingAfterStop(PathBuf),

    #[error("output file is empty: {}", .0.display())]
    EmptyFile(PathBuf),
}

impl StopWarning {
    pub fn kind(&self) -> &'static str {
        match self {
            StopWarning::StopFailure(_) => "StopFailure",
            StopWarning::FileMissingAfterStop(_) => "FileMissingAfterStop",
            StopWarning::EmptyFile(_) => "EmptyFile",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::DeviceStep;

    #[test]
    fn test_kind_names() {
        let err = SessionError::PrepareFailure(DeviceError::new(DeviceStep::Prepare, "busy"));
        assert_eq!(err.kind(), "PrepareFailure");
        assert!(err.is_fatal());
        assert!(!SessionError::AlreadyActive(SessionState::Recording).is_fatal());
    }

    #[test]
    fn test_already_active_message() {
        let err = SessionError::AlreadyActive(SessionState::Recording);
        assert_eq!(err.to_string(), "a recording session is already Recording");
    }
}
