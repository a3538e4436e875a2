//! Lifecycle events and the sinks that deliver them
//!
//! Events are human-readable, ordered log lines. The tag keeps them greppable
//! (`FILE_INFO:`, `[State: Recording]`, ...); the message is free text.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use super::state::SessionState;

/// Category of a lifecycle event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "state")]
pub enum EventTag {
    Lifecycle,
    Action,
    FileIo,
    FileInfo,
    Error,
    Warn,
    Info,
    System,
    State(SessionState),
    /// Visual divider between sessions
    Separator,
}

impl fmt::Display for EventTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EventTag::Lifecycle => f.write_str("LIFECYCLE:"),
            EventTag::Action => f.write_str("ACTION:"),
            EventTag::FileIo => f.write_str("FILE_IO:"),
            EventTag::FileInfo => f.write_str("FILE_INFO:"),
            EventTag::Error => f.write_str("ERROR:"),
            EventTag::Warn => f.write_str("WARN:"),
            EventTag::Info => f.write_str("INFO:"),
            EventTag::System => f.write_str("SYSTEM:"),
            EventTag::State(state) => write!(f, "[State: {}]", state),
            EventTag::Separator => f.write_str("--------------------"),
        }
    }
}

/// One entry of the lifecycle log
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LifecycleEvent {
    pub timestamp: DateTime<Utc>,
    pub tag: EventTag,
    pub message: String,
}

impl LifecycleEvent {
    pub fn new(tag: EventTag, message: impl Into<String>) -> Self {
        Self {
            timestamp: Utc::now(),
            tag,
            message: message.into(),
        }
    }

    pub fn separator() -> Self {
        Self::new(EventTag::Separator, "")
    }
}

impl fmt::Display for LifecycleEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.message.is_empty() {
            write!(f, "{}", self.tag)
        } else {
            write!(f, "{} {}", self.tag, self.message)
        }
    }
}

/// Receiver of lifecycle events
pub trait EventSink: Send + Sync {
    fn emit(&self, event: LifecycleEvent);
}

impl<S: EventSink + ?Sized> EventSink for Arc<S> {
    fn emit(&self, event: LifecycleEvent) {
        (**self).emit(event)
    }
}

/// Forwards events to `tracing`
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl EventSink for TracingSink {
    fn emit(&self, event: LifecycleEvent) {
        match event.tag {
            EventTag::Error => error!(target: "loqa_recorder::events", "{}", event),
            EventTag::Warn => warn!(target: "loqa_recorder::events", "{}", event),
            EventTag::Separator => debug!(target: "loqa_recorder::events", "{}", event),
            _ => info!(target: "loqa_recorder::events", "{}", event),
        }
    }
}

/// Keeps events in memory, bounded to the most recent `capacity` entries
#[derive(Debug, Clone)]
pub struct MemorySink {
    events: Arc<Mutex<Vec<LifecycleEvent>>>,
    capacity: usize,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::with_capacity(usize::MAX)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            events: Arc::new(Mutex::new(Vec::new())),
            capacity: capacity.max(1),
        }
    }

    pub fn snapshot(&self) -> Vec<LifecycleEvent> {
        match self.events.lock() {
            Ok(events) => events.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    /// Rendered lines, oldest first
    pub fn lines(&self) -> Vec<String> {
        self.snapshot().iter().map(|e| e.to_string()).collect()
    }

    pub fn clear(&self) {
        if let Ok(mut events) = self.events.lock() {
            events.clear();
        }
    }

    pub fn len(&self) -> usize {
        self.events.lock().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for MemorySink {
    fn default() -> Self {
        Self::new()
    }
}

impl EventSink for MemorySink {
    fn emit(&self, event: LifecycleEvent) {
        let mut events = match self.events.lock() {
            Ok(events) => events,
            Err(poisoned) => poisoned.into_inner(),
        };
        if events.len() >= self.capacity {
            let overflow = events.len() + 1 - self.capacity;
            events.drain(..overflow);
        }
        events.push(event);
    }
}

/// One-directional transport to a UI or other consumer
#[derive(Debug, Clone)]
pub struct ChannelSink {
    tx: mpsc::UnboundedSender<LifecycleEvent>,
}

impl ChannelSink {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<LifecycleEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl EventSink for ChannelSink {
    fn emit(&self, event: LifecycleEvent) {
        // A closed receiver just means nobody is listening anymore
        if self.tx.send(event).is_err() {
            debug!("Lifecycle event dropped: receiver closed");
        }
    }
}

/// Delivers every event to each inner sink, in order
#[derive(Default, Clone)]
pub struct FanOutSink {
    sinks: Vec<Arc<dyn EventSink>>,
}

impl FanOutSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, sink: impl EventSink + 'static) -> Self {
        self.sinks.push(Arc::new(sink));
        self
    }

    pub fn push(&mut self, sink: Arc<dyn EventSink>) {
        self.sinks.push(sink);
    }
}

impl EventSink for FanOutSink {
    fn emit(&self, event: LifecycleEvent) {
        if let Some((last, rest)) = self.sinks.split_last() {
            for sink in rest {
                sink.emit(event.clone());
            }
            last.emit(event);
        }
    }
}
