//! Session state machine
//!
//! A [`Session`] owns one logical connection: the resolved options, at most
//! one physical link, the readiness gate holding work submitted before the
//! link is live, the query history and the notification listeners.
//!
//! ```text
//! Disconnected --connect--> Connecting --ok--> Connected
//!      ^                        |                  |
//!      +-------failed-----------+   reconnect / switch_database
//!      +-----------------close------------------- (any)
//! ```
//!
//! Every statement goes through the gate and then through a single worker
//! task that owns the link, so statements run one at a time in the order
//! they were submitted.

pub mod batch;
pub mod events;
mod executor;
pub mod gate;
pub mod loss;
pub mod notify;
pub mod registry;

use crate::config::{ConnectTarget, SessionOptions, Settings};
use crate::db::link::{Connector, Notification};
use crate::db::postgres::PostgresConnector;
use crate::db::types::QueryResults;
use crate::db::version::{ServerVersion, VersionProbe};
use crate::error::{SessionError, SessionResult};
use crate::history::QueryRecord;
use crate::sql::template;
use events::{EventSink, SessionEvent};
use executor::{Executor, LinkHandle, LinkTicket};
use gate::ReadinessGate;
use notify::NotificationRelay;
use parking_lot::Mutex;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::{broadcast, oneshot};
use uuid::Uuid;

/// Where a session is in its connection lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Disconnected,
    Connecting,
    Connected,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Phase::Disconnected => "disconnected",
            Phase::Connecting => "connecting",
            Phase::Connected => "connected",
        };
        f.write_str(name)
    }
}

/// Handle to a session; clones share the same connection
#[derive(Clone)]
pub struct Session {
    pub(crate) inner: Arc<SessionInner>,
}

pub(crate) struct SessionInner {
    id: Uuid,
    connector: Arc<dyn Connector>,
    probe: VersionProbe,
    state: Mutex<SessionState>,
    gate: ReadinessGate<LinkTicket>,
    relay: Arc<NotificationRelay>,
    events: EventSink,
    executor: Executor,
    maintenance_database: Mutex<String>,
}

struct SessionState {
    phase: Phase,
    options: Option<SessionOptions>,
    /// Bumped by every connect and close; a connect that sees a newer
    /// value has been superseded
    generation: u64,
    link: Option<LinkHandle>,
    server_version: Option<ServerVersion>,
}

impl Session {
    /// Create a disconnected session that opens links through `connector`
    pub fn new(connector: Arc<dyn Connector>) -> Self {
        let id = Uuid::new_v4();
        let events = EventSink::new();
        let probe = VersionProbe::for_native_support(connector.supports_native_version());
        let session = Session {
            inner: Arc::new(SessionInner {
                id,
                connector,
                probe,
                state: Mutex::new(SessionState {
                    phase: Phase::Disconnected,
                    options: None,
                    generation: 0,
                    link: None,
                    server_version: None,
                }),
                gate: ReadinessGate::new(),
                relay: Arc::new(NotificationRelay::new()),
                executor: Executor::new(id, events.clone()),
                events,
                maintenance_database: Mutex::new(Settings::default().maintenance_database),
            }),
        };
        registry::register(&session);
        tracing::debug!(session_id = %id, probe = ?probe, "Session created");
        session
    }

    /// Session backed by tokio-postgres
    pub fn postgres() -> Self {
        Self::new(Arc::new(PostgresConnector::new()))
    }

    /// Create a session and connect it
    pub async fn open(
        connector: Arc<dyn Connector>,
        target: impl Into<ConnectTarget>,
    ) -> SessionResult<Self> {
        let session = Self::new(connector);
        session.connect(target).await?;
        Ok(session)
    }

    /// Apply logging and maintenance-database preferences
    pub fn apply_settings(&self, settings: &Settings) {
        self.set_logging(settings.log_sql);
        *self.inner.maintenance_database.lock() = settings.maintenance_database.clone();
    }

    pub fn id(&self) -> Uuid {
        self.inner.id
    }

    pub fn phase(&self) -> Phase {
        self.inner.state.lock().phase
    }

    pub fn is_connected(&self) -> bool {
        self.phase() == Phase::Connected
    }

    /// Options of the current or last connect
    pub fn options(&self) -> Option<SessionOptions> {
        self.inner.state.lock().options.clone()
    }

    /// Database used for cluster-level DDL
    pub fn maintenance_database(&self) -> String {
        self.inner.maintenance_database.lock().clone()
    }

    /// Operations waiting for the next successful connect
    pub fn pending_operations(&self) -> usize {
        self.inner.gate.pending_len()
    }

    /// Connect to `target`, replacing any existing link.
    ///
    /// The previous link is ended gracefully before the new one is opened.
    /// On success the server version is probed and then every operation
    /// queued while disconnected is released in submission order. On
    /// failure queued operations stay queued for the next attempt.
    ///
    /// # Errors
    /// - [`SessionError::Config`] when the target cannot be resolved
    /// - [`SessionError::ConnectFailed`] when the link cannot be opened
    /// - [`SessionError::Superseded`] when a later connect or close won
    pub async fn connect(&self, target: impl Into<ConnectTarget>) -> SessionResult<()> {
        let inner = &self.inner;
        let options = match target.into().resolve() {
            Ok(options) => options,
            Err(e) => {
                tracing::warn!(session_id = %inner.id, error = %e, "Invalid connection target");
                inner.events.emit(SessionEvent::ConnectFailed {
                    url: None,
                    message: e.to_string(),
                });
                return Err(e.into());
            }
        };
        let url = options.redacted_url();
        tracing::info!(session_id = %inner.id, url = %url, "Connecting");
        inner.events.emit(SessionEvent::Connecting { url: url.clone() });

        let (generation, epoch, previous) = {
            let mut state = inner.state.lock();
            state.generation += 1;
            state.phase = Phase::Connecting;
            if state
                .options
                .as_ref()
                .is_some_and(|old| !old.same_endpoint(&options))
            {
                state.server_version = None;
            }
            state.options = Some(options.clone());
            inner.gate.shut();
            (state.generation, inner.gate.epoch(), state.link.take())
        };

        if let Some(previous) = previous {
            tracing::debug!(session_id = %inner.id, "Ending previous link");
            previous.shutdown().await;
        }

        let parts = match inner.connector.connect(&options).await {
            Ok(parts) => parts,
            Err(e) => {
                {
                    let mut state = inner.state.lock();
                    if state.generation == generation {
                        state.phase = Phase::Disconnected;
                    }
                }
                tracing::warn!(session_id = %inner.id, url = %url, error = %e, "Connection failed");
                inner.events.emit(SessionEvent::ConnectFailed {
                    url: Some(url),
                    message: e.message.clone(),
                });
                return Err(SessionError::ConnectFailed(e.message));
            }
        };

        let handle = inner.executor.start(parts.link);
        let ticket = handle.ticket();
        let stale = {
            let mut state = inner.state.lock();
            if state.generation == generation {
                state.link = Some(handle);
                None
            } else {
                Some(handle)
            }
        };
        if let Some(stale) = stale {
            tracing::debug!(session_id = %inner.id, "Connect superseded, dropping new link");
            stale.shutdown().await;
            return Err(SessionError::Superseded);
        }
        tokio::spawn(notify::forward(
            parts.events,
            inner.relay.clone(),
            inner.events.clone(),
        ));

        let version = match self.probe_on(&ticket).await {
            Ok(version) => Some(version),
            Err(e) => {
                tracing::warn!(session_id = %inner.id, error = %e, "Server version probe failed");
                None
            }
        };

        {
            // Registered under the lock: a close either fails the check above
            // or deregisters after us
            let mut state = inner.state.lock();
            if state.generation != generation {
                return Err(SessionError::Superseded);
            }
            state.phase = Phase::Connected;
            registry::register(self);
            inner.events.emit(SessionEvent::Connected {
                url: url.clone(),
                server_version: version.as_ref().map(|v| v.to_string()),
            });
        }
        let Some(released) = inner.gate.open(epoch, ticket) else {
            tracing::debug!(session_id = %inner.id, "Closed while releasing queued work");
            return Err(SessionError::Superseded);
        };
        tracing::info!(
            session_id = %inner.id,
            url = %url,
            server_version = version.as_ref().map(|v| v.raw.as_str()).unwrap_or("unknown"),
            released,
            "Connected"
        );
        Ok(())
    }

    /// Close, then connect again with the last options
    ///
    /// # Errors
    /// Fails like [`connect`](Self::connect), or with
    /// [`SessionError::ConnectFailed`] when the session never had options.
    pub async fn reconnect(&self) -> SessionResult<()> {
        let options = self.options().ok_or_else(|| {
            SessionError::ConnectFailed("no previous connection to reconnect".to_string())
        })?;
        self.close().await;
        self.connect(options).await
    }

    /// Reconnect to another database on the same server
    pub async fn switch_database(&self, name: &str) -> SessionResult<()> {
        let mut options = self.options().ok_or_else(|| {
            SessionError::ConnectFailed("no previous connection to switch from".to_string())
        })?;
        tracing::info!(session_id = %self.inner.id, database = name, "Switching database");
        options.database = Some(name.to_string());
        self.connect(options).await
    }

    /// End the link and leave the registry. Safe to call repeatedly.
    ///
    /// Statements already handed to the link finish first; operations still
    /// waiting at the gate stay queued for a later connect.
    pub async fn close(&self) {
        let inner = &self.inner;
        let link = {
            let mut state = inner.state.lock();
            state.generation += 1;
            state.phase = Phase::Disconnected;
            inner.gate.shut();
            state.link.take()
        };
        if let Some(link) = link {
            link.shutdown().await;
            tracing::info!(session_id = %inner.id, "Session closed");
        }
        registry::deregister(inner.id);
        inner.events.emit(SessionEvent::Closed);
    }

    /// Run `op` once the session is connected; immediately if it already is
    pub fn when_ready<F>(&self, op: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.inner.gate.when_ready(move |_| op());
    }

    /// Run one statement.
    ///
    /// The statement is recorded in the history and queued when this is
    /// called, not when the returned future is first polled, so calls keep
    /// their order even if their futures are awaited out of order. Dropping the future does not
    /// cancel the statement.
    ///
    /// # Errors
    /// [`SessionError::QueryFailed`] or [`SessionError::ConnectionLost`]
    /// carrying the failing SQL, or [`SessionError::Closed`] when the link
    /// went away before the statement could run.
    pub fn execute<S: Into<String>>(
        &self,
        sql: S,
    ) -> impl Future<Output = SessionResult<QueryResults>> + Send + use<S> {
        let submission = self.inner.executor.record(sql.into());
        let (tx, rx) = oneshot::channel();
        self.inner
            .gate
            .when_ready(move |ticket: LinkTicket| ticket.submit(submission, tx));
        async move { rx.await.map_err(|_| SessionError::Closed)? }
    }

    /// Build a statement from `template` and run it.
    ///
    /// No quoting is applied to `args`; see [`crate::sql::template`].
    pub fn q(
        &self,
        template: &str,
        args: &[&dyn fmt::Display],
    ) -> impl Future<Output = SessionResult<QueryResults>> + Send + use<> {
        let submitted = template::build(template, args).map(|sql| self.execute::<String>(sql));
        async move { submitted?.await }
    }

    /// Register a listener for server push notifications
    pub fn on_notification<F>(&self, listener: F)
    where
        F: Fn(&Notification) + Send + Sync + 'static,
    {
        self.inner.relay.register(listener);
    }

    /// Subscribe to lifecycle and audit events
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.inner.events.subscribe()
    }

    pub fn set_logging(&self, enabled: bool) {
        self.inner.executor.set_logging(enabled);
    }

    pub fn logging(&self) -> bool {
        self.inner.executor.logging()
    }

    /// Snapshot of every statement run so far
    pub fn history(&self) -> Vec<QueryRecord> {
        self.inner.executor.history().lock().records().to_vec()
    }

    pub fn history_json(&self) -> serde_json::Result<String> {
        self.inner.executor.history().lock().to_json()
    }

    /// Version probed at the last connect, if any
    pub fn cached_server_version(&self) -> Option<ServerVersion> {
        self.inner.state.lock().server_version.clone()
    }

    /// Server version, probing once when not cached
    pub async fn server_version(&self) -> SessionResult<ServerVersion> {
        if let Some(version) = self.cached_server_version() {
            return Ok(version);
        }
        let ticket = self.ready_ticket().await?;
        self.probe_on(&ticket).await
    }

    /// Materialized views need 9.3 or later
    pub fn supports_materialized_views(&self) -> bool {
        self.cached_server_version()
            .is_some_and(|v| v.supports_materialized_views())
    }

    fn ready_ticket(&self) -> impl Future<Output = SessionResult<LinkTicket>> + Send + use<> {
        let (tx, rx) = oneshot::channel();
        self.inner.gate.when_ready(move |ticket: LinkTicket| {
            let _ = tx.send(ticket);
        });
        async move { rx.await.map_err(|_| SessionError::Closed) }
    }

    async fn probe_on(&self, ticket: &LinkTicket) -> SessionResult<ServerVersion> {
        if let Some(version) = self.cached_server_version() {
            return Ok(version);
        }
        let version = match (self.inner.probe, ticket.native_version()) {
            (VersionProbe::Native, Some(version)) => version,
            _ => probe_sql(ticket).await?,
        };
        tracing::debug!(session_id = %self.inner.id, version = %version, "Server version");
        self.inner.state.lock().server_version = Some(version.clone());
        Ok(version)
    }
}

async fn probe_sql(ticket: &LinkTicket) -> SessionResult<ServerVersion> {
    let results = ticket.run(VersionProbe::VERSION_QUERY).await?;
    let banner = results
        .first_text()
        .ok_or_else(|| SessionError::UnexpectedResult("version() returned no rows".to_string()))?;
    ServerVersion::from_version_banner(banner).ok_or_else(|| {
        SessionError::UnexpectedResult(format!("Unrecognised version string: {}", banner))
    })
}

impl Drop for SessionInner {
    fn drop(&mut self) {
        registry::deregister(self.id);
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.inner.id)
            .field("phase", &self.phase())
            .finish()
    }
}
