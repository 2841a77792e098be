//! Lifecycle and audit events
//!
//! Every session broadcasts what happens to it. Subscribers that fall
//! behind lose the oldest events; the session itself never waits on them.

use crate::db::link::Notification;
use std::time::Duration;
use tokio::sync::broadcast;

/// Events buffered per subscriber before the oldest are dropped
pub const EVENT_CAPACITY: usize = 256;

#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    /// A connect attempt started (password redacted)
    Connecting { url: String },
    /// The link is live and queued work has been released
    Connected { url: String, server_version: Option<String> },
    /// Resolving the target or opening the link failed
    ConnectFailed { url: Option<String>, message: String },
    QueryStarted { sql: String },
    QuerySucceeded { sql: String, elapsed: Duration },
    QueryFailed { sql: String, message: String },
    /// The server dropped the link; callers may offer to reconnect
    ConnectionLost { message: String },
    /// The server pushed a notification
    Notification(Notification),
    /// The session released its link
    Closed,
}

/// Sender half shared by the session and its background tasks
#[derive(Debug, Clone)]
pub struct EventSink {
    tx: broadcast::Sender<SessionEvent>,
}

impl EventSink {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(EVENT_CAPACITY);
        Self { tx }
    }

    pub fn emit(&self, event: SessionEvent) {
        // No subscribers is fine
        let _ = self.tx.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.tx.subscribe()
    }
}

impl Default for EventSink {
    fn default() -> Self {
        Self::new()
    }
}
