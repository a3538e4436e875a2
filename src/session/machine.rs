use chrono::{DateTime, Utc};
use std::collections::VecDeque;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::config::SessionConfig;
use super::error::{SessionError, StopWarning};
use super::events::{EventSink, EventTag, LifecycleEvent};
use super::outcome::{SessionOutcome, SessionRecord, SessionStatus, StopReport};
use super::state::SessionState;
use crate::audio::{DeviceFactory, DeviceHandle, DeviceStep, EncodingProfile};
use crate::storage::OutputPathAllocator;

/// The single logical recording attempt
struct Session {
    id: Uuid,
    started_at: DateTime<Utc>,
    state: SessionState,
    output_path: Option<PathBuf>,
    device: Option<DeviceHandle>,
}

impl Session {
    fn new() -> Self {
        Self {
            id: Uuid::new_v4(),
            started_at: Utc::now(),
            state: SessionState::Idle,
            output_path: None,
            device: None,
        }
    }
}

/// Owns the capture device for at most one session at a time
///
/// Commands are not synchronized internally; callers serialize them (see
/// [`crate::controller::SessionController`]). Device calls block the calling thread.
pub struct SessionStateMachine {
    profile: EncodingProfile,
    allocator: OutputPathAllocator,
    factory: Box<dyn DeviceFactory>,
    sink: Arc<dyn EventSink>,
    /// Current session, or the last finished one
    session: Option<Session>,
    /// Most recent finished sessions, oldest first
    history: VecDeque<SessionRecord>,
    history_capacity: usize,
    sessions_finished: usize,
}

impl SessionStateMachine {
    pub fn new(
        config: SessionConfig,
        factory: impl DeviceFactory + 'static,
        sink: Arc<dyn EventSink>,
    ) -> Self {
        Self {
            profile: config.profile,
            allocator: config.allocator(),
            factory: Box::new(factory),
            sink,
            session: None,
            history: VecDeque::with_capacity(config.history_capacity.min(64)),
            history_capacity: config.history_capacity.max(1),
            sessions_finished: 0,
        }
    }

    pub fn state(&self) -> SessionState {
        self.session
            .as_ref()
            .map(|s| s.state)
            .unwrap_or(SessionState::Idle)
    }

    /// Output path of the current or last session
    pub fn output_path(&self) -> Option<&Path> {
        self.session.as_ref().and_then(|s| s.output_path.as_deref())
    }

    pub fn has_device(&self) -> bool {
        self.session.as_ref().is_some_and(|s| s.device.is_some())
    }

    /// Finished sessions, oldest first; only the newest `history_capacity` are kept
    pub fn history(&self) -> Vec<SessionRecord> {
        self.history.iter().cloned().collect()
    }

    fn archive(&mut self, record: SessionRecord) {
        if self.history.len() == self.history_capacity {
            self.history.pop_front();
        }
        self.history.push_back(record);
        self.sessions_finished += 1;
    }

    pub fn profile(&self) -> &EncodingProfile {
        &self.profile
    }

    /// The sink this machine reports to
    pub fn sink(&self) -> Arc<dyn EventSink> {
        Arc::clone(&self.sink)
    }

    pub fn status(&self) -> SessionStatus {
        let state = self.state();
        let current = self.session.as_ref();
        SessionStatus {
            state,
            session_id: current.map(|s| s.id),
            output_path: current.and_then(|s| s.output_path.clone()),
            started_at: current.map(|s| s.started_at),
            elapsed_secs: current
                .filter(|s| s.state.is_active())
                .map(|s| elapsed_secs(s.started_at)),
            sessions_finished: self.sessions_finished,
        }
    }

    fn emit(&self, tag: EventTag, message: impl Into<String>) {
        let event = LifecycleEvent::new(tag, message);
        debug!("lifecycle event: {}", event);
        self.sink.emit(event);
    }

    fn transition(&self, session: &mut Session, next: SessionState, message: impl Into<String>) {
        debug_assert!(
            session.state.can_transition_to(next),
            "illegal transition {} -> {}",
            session.state,
            next
        );
        debug!("session {}: {} -> {}", session.id, session.state, next);
        session.state = next;
        self.emit(EventTag::State(next), message);
    }

    /// Begin a new recording session
    ///
    /// On success the session is `Recording` with its output path fixed. A failure
    /// while establishing capture leaves the session `Failed` with the device released.
    pub fn start(&mut self) -> Result<(), SessionError> {
        if let Some(current) = &self.session {
            if current.state.is_active() {
                let err = SessionError::AlreadyActive(current.state);
                self.emit(
                    EventTag::Warn,
                    format!("{}: start ignored, session {} is {}", err.kind(), current.id, current.state),
                );
                return Err(err);
            }
        }

        let mut session = Session::new();
        info!("Starting recording session {}", session.id);
        self.sink.emit(LifecycleEvent::separator());
        self.emit(EventTag::Action, format!("Starting recording session {}", session.id));

        self.transition(&mut session, SessionState::Configuring, "Allocating capture device...");
        let device = match self.factory.construct(&self.profile) {
            Ok(device) => device,
            Err(e) => {
                let err = SessionError::ConfigurationFailure(e);
                self.abort(session, None, &err);
                return Err(err);
            }
        };
        let mut handle = DeviceHandle::new(device);
        self.emit(
            EventTag::State(SessionState::Configuring),
            format!("Capture device {} allocated", handle.name()),
        );

        match self.establish(&mut session, &mut handle) {
            Ok(()) => {
                session.device = Some(handle);
                info!(
                    "Recording session {} started: {}",
                    session.id,
                    session.output_path.as_deref().map(|p| p.display().to_string()).unwrap_or_default()
                );
                self.session = Some(session);
                Ok(())
            }
            Err(err) => {
                self.abort(session, Some(handle), &err);
                Err(err)
            }
        }
    }

    /// Configure → allocate path → prepare → start
    fn establish(&self, session: &mut Session, handle: &mut DeviceHandle) -> Result<(), SessionError> {
        let profile = self.profile;

        self.emit(EventTag::Action, format!("Setting audio source to {:?}...", profile.source));
        handle
            .set_audio_source(profile.source)
            .map_err(SessionError::ConfigurationFailure)?;

        self.emit(EventTag::Action, format!("Setting output format to {:?}...", profile.format));
        handle
            .set_output_format(profile.format)
            .map_err(SessionError::ConfigurationFailure)?;

        self.emit(EventTag::Action, format!("Setting audio encoder to {:?}...", profile.encoder));
        handle
            .set_audio_encoder(profile.encoder)
            .map_err(SessionError::ConfigurationFailure)?;

        let path = self
            .allocator
            .allocate(self.sink.as_ref())
            .map_err(SessionError::StorageUnavailable)?;
        self.emit(EventTag::FileIo, format!("Output file: {}", path.display()));

        handle
            .set_output_file(&path)
            .map_err(SessionError::ConfigurationFailure)?;
        session.output_path = Some(path);

        self.emit(EventTag::State(SessionState::Configuring), "Preparing capture device...");
        handle.prepare().map_err(SessionError::PrepareFailure)?;
        self.transition(session, SessionState::Prepared, "Capture device prepared");

        self.emit(EventTag::State(SessionState::Prepared), "Starting capture...");
        handle.start().map_err(SessionError::StartFailure)?;
        self.transition(session, SessionState::Recording, "Recording started");

        Ok(())
    }

    /// Fatal establishment failure: release, mark Failed, archive
    fn abort(&mut self, mut session: Session, handle: Option<DeviceHandle>, err: &SessionError) {
        warn!("Recording session {} failed: {}", session.id, err);
        self.emit(EventTag::Error, format!("{}: {}", err.kind(), err));

        if let Some(mut handle) = handle {
            self.emit(EventTag::State(session.state), "Releasing capture device...");
            handle.release();
        }

        session.device = None;
        self.transition(&mut session, SessionState::Failed, "Session aborted, capture device released");

        if let Some(path) = &session.output_path {
            if let Ok(meta) = fs::metadata(path) {
                self.emit(
                    EventTag::Warn,
                    format!(
                        "Failed session left a file behind: {} ({} bytes)",
                        path.display(),
                        meta.len()
                    ),
                );
            }
        }

        self.archive(SessionRecord {
            id: session.id,
            started_at: session.started_at,
            finished_at: Utc::now(),
            output_path: session.output_path.clone(),
            outcome: SessionOutcome::Failed {
                kind: err.kind().to_string(),
                error: err.to_string(),
            },
        });
        self.session = Some(session);
    }

    /// End the active recording
    ///
    /// A no-op returning `None` unless the session is `Recording`. Device stop
    /// failures and a missing or empty output file are reported as warnings;
    /// the device is released on every path.
    pub fn stop(&mut self) -> Option<StopReport> {
        if self.state() != SessionState::Recording {
            self.emit(
                EventTag::Info,
                format!("Not recording ({}), stop skipped", self.state()),
            );
            return None;
        }
        let mut session = self.session.take()?;
        let mut warnings = Vec::new();

        info!("Stopping recording session {}", session.id);
        self.sink.emit(LifecycleEvent::separator());
        self.emit(EventTag::Action, "Stopping recording...");
        self.transition(&mut session, SessionState::Stopping, "Stopping capture device...");

        let mut handle = session.device.take();
        match handle.as_mut().map(|h| h.stop()) {
            Some(Ok(())) => self.emit(EventTag::State(SessionState::Stopping), "Capture stopped"),
            Some(Err(e)) => {
                let warning = StopWarning::StopFailure(e.to_string());
                self.emit(
                    EventTag::Warn,
                    format!("{}: {}", warning.kind(), e),
                );
                warnings.push(warning);
            }
            None => {
                let warning = StopWarning::StopFailure(format!(
                    "{} skipped: no capture device held",
                    DeviceStep::Stop
                ));
                self.emit(EventTag::Warn, format!("{}: {}", warning.kind(), warning));
                warnings.push(warning);
            }
        }

        let path = session.output_path.clone().unwrap_or_default();
        let bytes = self.inspect_output(&path, &mut warnings);

        self.emit(EventTag::State(SessionState::Stopping), "Releasing capture device...");
        if let Some(mut handle) = handle.take() {
            handle.release();
        }
        self.transition(&mut session, SessionState::Released, "Capture device released");

        let duration_secs = elapsed_secs(session.started_at);
        self.emit(
            EventTag::Lifecycle,
            format!("Recording completed, file saved: {}", path.display()),
        );
        info!(
            "Recording session {} complete: {} ({:.1}s)",
            session.id,
            path.display(),
            duration_secs
        );

        self.archive(SessionRecord {
            id: session.id,
            started_at: session.started_at,
            finished_at: Utc::now(),
            output_path: Some(path.clone()),
            outcome: SessionOutcome::Completed { bytes },
        });

        let report = StopReport {
            session_id: session.id,
            output_path: path,
            bytes,
            duration_secs,
            warnings,
        };
        self.session = Some(session);
        Some(report)
    }

    fn inspect_output(&self, path: &Path, warnings: &mut Vec<StopWarning>) -> Option<u64> {
        match fs::metadata(path) {
            Ok(meta) if meta.is_file() => {
                let bytes = meta.len();
                self.emit(EventTag::FileIo, "Output file saved");
                self.emit(
                    EventTag::FileInfo,
                    format!(
                        "File size: {} bytes ({:.2} KB)",
                        group_thousands(bytes),
                        bytes as f64 / 1024.0
                    ),
                );
                if bytes == 0 {
                    let warning = StopWarning::EmptyFile(path.to_path_buf());
                    self.emit(EventTag::Warn, format!("{}: {}", warning.kind(), warning));
                    warnings.push(warning);
                }
                Some(bytes)
            }
            _ => {
                let warning = StopWarning::FileMissingAfterStop(path.to_path_buf());
                self.emit(EventTag::Warn, format!("{}: {}", warning.kind(), warning));
                warnings.push(warning);
                None
            }
        }
    }

    /// Teardown of the hosting process: stop if recording, otherwise nothing
    pub fn forced_teardown(&mut self) -> Option<StopReport> {
        if self.state() != SessionState::Recording {
            return None;
        }
        self.emit(EventTag::Lifecycle, "Forced teardown while recording");
        self.stop()
    }
}

impl Drop for SessionStateMachine {
    fn drop(&mut self) {
        if self.state() == SessionState::Recording {
            warn!("Session state machine dropped while recording; tearing down");
            self.forced_teardown();
        }
    }
}

fn elapsed_secs(since: DateTime<Utc>) -> f64 {
    Utc::now().signed_duration_since(since).num_milliseconds() as f64 / 1000.0
}

/// `1234567` → `"1,234,567"`
fn group_thousands(n: u64) -> String {
    let digits = n.to_string();
    let mut out = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, c) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(c);
    }
    out
}
