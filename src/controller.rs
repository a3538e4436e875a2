//! External command surface for the recording state machine
//!
//! Commands from any number of callers are queued and executed one at a time on a
//! single blocking worker, so the state machine never sees concurrent start/stop.

use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::session::{
    EventSink, EventTag, LifecycleEvent, SessionError, SessionRecord, SessionState,
    SessionStateMachine, SessionStatus, StopReport,
};

const COMMAND_QUEUE_DEPTH: usize = 32;

#[derive(Debug, Error)]
pub enum ControllerError {
    #[error(transparent)]
    Session(#[from] SessionError),

    #[error("session controller is no longer running")]
    Closed,
}

enum Command {
    Start(oneshot::Sender<Result<SessionStatus, SessionError>>),
    Stop(oneshot::Sender<Option<StopReport>>),
    Status(oneshot::Sender<SessionStatus>),
    History(oneshot::Sender<Vec<SessionRecord>>),
    Shutdown(oneshot::Sender<Option<StopReport>>),
}

/// Cloneable handle to the command worker
#[derive(Clone)]
pub struct SessionController {
    tx: mpsc::Sender<Command>,
}

impl SessionController {
    /// Move the state machine onto a blocking worker and return a handle to it
    ///
    /// Must be called from within a tokio runtime. The worker ends after
    /// [`shutdown`](Self::shutdown) or once every handle is dropped; either way an
    /// active recording is torn down first.
    pub fn spawn(machine: SessionStateMachine) -> (Self, JoinHandle<()>) {
        let (tx, rx) = mpsc::channel(COMMAND_QUEUE_DEPTH);
        let worker = tokio::task::spawn_blocking(move || Worker::new(machine).run(rx));
        (Self { tx }, worker)
    }

    async fn request<T>(&self, make: impl FnOnce(oneshot::Sender<T>) -> Command) -> Result<T, ControllerError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(make(reply_tx))
            .await
            .map_err(|_| ControllerError::Closed)?;
        reply_rx.await.map_err(|_| ControllerError::Closed)
    }

    /// START: begin a new session
    pub async fn start(&self) -> Result<SessionStatus, ControllerError> {
        Ok(self.request(Command::Start).await??)
    }

    /// STOP: end the active session; `None` if nothing was recording
    pub async fn stop(&self) -> Result<Option<StopReport>, ControllerError> {
        self.request(Command::Stop).await
    }

    pub async fn status(&self) -> Result<SessionStatus, ControllerError> {
        self.request(Command::Status).await
    }

    pub async fn history(&self) -> Result<Vec<SessionRecord>, ControllerError> {
        self.request(Command::History).await
    }

    /// Host process is going away: tear down any recording and stop the worker
    pub async fn shutdown(&self) -> Result<Option<StopReport>, ControllerError> {
        self.request(Command::Shutdown).await
    }
}

struct Worker {
    machine: SessionStateMachine,
    sink: Arc<dyn EventSink>,
    keep_alive: bool,
}

impl Worker {
    fn new(machine: SessionStateMachine) -> Self {
        let sink = machine.sink();
        Self {
            machine,
            sink,
            keep_alive: false,
        }
    }

    fn emit(&self, tag: EventTag, message: &str) {
        self.sink.emit(LifecycleEvent::new(tag, message));
    }

    fn run(mut self, mut rx: mpsc::Receiver<Command>) {
        info!("Session controller started");
        self.emit(EventTag::Lifecycle, "Session controller started");

        while let Some(command) = rx.blocking_recv() {
            match command {
                Command::Start(reply) => {
                    self.emit(EventTag::Lifecycle, "Start command received");
                    let result = self.machine.start().map(|()| self.machine.status());
                    self.sync_keep_alive();
                    let _ = reply.send(result);
                }
                Command::Stop(reply) => {
                    self.emit(EventTag::Lifecycle, "Stop command received");
                    let report = self.machine.stop();
                    self.sync_keep_alive();
                    let _ = reply.send(report);
                }
                Command::Status(reply) => {
                    let _ = reply.send(self.machine.status());
                }
                Command::History(reply) => {
                    let _ = reply.send(self.machine.history());
                }
                Command::Shutdown(reply) => {
                    let report = self.teardown();
                    let _ = reply.send(report);
                    return;
                }
            }
        }

        debug!("All controller handles dropped");
        self.teardown();
    }

    fn teardown(&mut self) -> Option<StopReport> {
        self.sink.emit(LifecycleEvent::separator());
        self.emit(EventTag::Lifecycle, "Session controller shutting down");
        let report = self.machine.forced_teardown();
        self.sync_keep_alive();
        self.emit(EventTag::Lifecycle, "Session controller stopped");
        info!("Session controller stopped");
        report
    }

    /// Keep the process alive exactly while a session is recording
    fn sync_keep_alive(&mut self) {
        let recording = self.machine.state() == SessionState::Recording;
        if recording && !self.keep_alive {
            self.keep_alive = true;
            self.emit(EventTag::System, "Keep-alive engaged: recording in background");
        } else if !recording && self.keep_alive {
            self.keep_alive = false;
            self.emit(EventTag::System, "Keep-alive released");
        }
    }
}
