use chrono::{DateTime, Utc};
use serde::Serialize;
use std::path::PathBuf;
use uuid::Uuid;

use super::error::StopWarning;
use super::state::SessionState;

/// How a finished session ended
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum SessionOutcome {
    /// Stopped normally; `bytes` is the output size if the file was found
    Completed { bytes: Option<u64> },
    /// Aborted while establishing capture
    Failed { kind: String, error: String },
}

/// Archived record of one finished session
#[derive(Debug, Clone, Serialize)]
pub struct SessionRecord {
    pub id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub output_path: Option<PathBuf>,
    pub outcome: SessionOutcome,
}

/// Result of a stop that actually ended a recording
#[derive(Debug, Clone, Serialize)]
pub struct StopReport {
    pub session_id: Uuid,
    pub output_path: PathBuf,
    /// Output size on storage, `None` if the file was missing
    pub bytes: Option<u64>,
    /// Recording duration in seconds
    pub duration_secs: f64,
    pub warnings: Vec<StopWarning>,
}

impl StopReport {
    /// Size in KiB, rounded to two decimals
    pub fn kibibytes(&self) -> Option<f64> {
        self.bytes.map(|b| (b as f64 / 1024.0 * 100.0).round() / 100.0)
    }

    pub fn is_clean(&self) -> bool {
        self.warnings.is_empty()
    }
}

/// Point-in-time view of the state machine
#[derive(Debug, Clone, Serialize)]
pub struct SessionStatus {
    pub state: SessionState,
    pub session_id: Option<Uuid>,
    pub output_path: Option<PathBuf>,
    pub started_at: Option<DateTime<Utc>>,
    /// Seconds since the current session started, while it is active
    pub elapsed_secs: Option<f64>,
    pub sessions_finished: usize,
}
