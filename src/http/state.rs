use crate::controller::SessionController;
use crate::session::MemorySink;

/// Shared application state for HTTP handlers
#[derive(Clone)]
pub struct AppState {
    /// Command surface of the recording state machine
    pub controller: SessionController,

    /// Lifecycle event log served by `GET /recording/events`
    pub events: MemorySink,
}

impl AppState {
    pub fn new(controller: SessionController, events: MemorySink) -> Self {
        Self { controller, events }
    }
}
