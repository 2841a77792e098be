//! Physical link interfaces
//!
//! A [`Connector`] opens links; a [`Link`] is one live server connection.
//! Sessions only ever talk to the server through these two traits, which
//! keeps the state machine testable with in-memory implementations.

use crate::config::SessionOptions;
use crate::db::types::QueryResults;
use crate::db::version::ServerVersion;
use async_trait::async_trait;
use serde::Serialize;
use std::fmt;
use tokio::sync::mpsc;

/// Asynchronous server push message (LISTEN/NOTIFY)
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Notification {
    /// Backend process that sent the notification
    pub process_id: i32,
    /// Channel name
    pub channel: String,
    /// Payload (empty when none was given)
    pub payload: String,
}

/// Out-of-band events produced by a live link
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkEvent {
    /// The server pushed a notification
    Notification(Notification),
    /// The link's driver stopped; `Some` carries the failure
    Closed(Option<String>),
}

/// Error reported by a connector or link
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkError {
    pub message: String,
}

impl LinkError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl fmt::Display for LinkError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

impl std::error::Error for LinkError {}

/// A freshly opened link and its event stream
pub struct LinkParts {
    pub link: Box<dyn Link>,
    pub events: mpsc::UnboundedReceiver<LinkEvent>,
}

/// Opens physical links to a server
#[async_trait]
pub trait Connector: Send + Sync {
    /// Establish a new link for fully resolved options
    ///
    /// # Errors
    /// Returns the driver's message when the server cannot be reached
    /// or refuses the login
    async fn connect(&self, options: &SessionOptions) -> Result<LinkParts, LinkError>;

    /// Whether links from this connector can report the server version
    /// without running SQL
    fn supports_native_version(&self) -> bool {
        false
    }
}

/// One live server connection
///
/// Callers must not overlap `query` calls; sessions guarantee this by
/// funnelling every statement through a single worker.
#[async_trait]
pub trait Link: Send + Sync {
    /// Run one SQL statement (or simple-protocol script)
    async fn query(&self, sql: &str) -> Result<QueryResults, LinkError>;

    /// Gracefully terminate the link
    async fn end(self: Box<Self>);

    /// Server version learned during startup, if the driver exposes it
    fn native_version(&self) -> Option<ServerVersion> {
        None
    }
}
