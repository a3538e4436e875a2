//! Recording session management
//!
//! This module provides the `SessionStateMachine` that manages:
//! - The capture device lifecycle (configure → prepare → record → stop → release)
//! - Rejection of overlapping sessions
//! - Device release on every exit path
//! - The ordered lifecycle event log

mod config;
pub mod events;
mod error;
mod machine;
mod outcome;
mod state;

pub use config::{default_storage_dir, SessionConfig, DEFAULT_HISTORY_CAPACITY};
pub use error::{SessionError, StopWarning};
pub use events::{
    ChannelSink, EventSink, EventTag, FanOutSink, LifecycleEvent, MemorySink, TracingSink,
};
pub use machine::SessionStateMachine;
pub use outcome::{SessionOutcome, SessionRecord, SessionStatus, StopReport};
pub use state::SessionState;
