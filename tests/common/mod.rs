//! Common test utilities and helpers
//!
//! An in-memory [`Connector`] that records everything the session does to
//! it, so state-machine properties can be checked without a server.

#![allow(dead_code)]

use async_trait::async_trait;
use parking_lot::Mutex;
use pgsession::config::SessionOptions;
use pgsession::db::link::{Connector, Link, LinkError, LinkEvent, LinkParts, Notification};
use pgsession::db::types::{CellValue, ColumnDef, DataType, QueryResults, Row};
use pgsession::db::version::ServerVersion;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::mpsc;

/// Shared view of everything the mock server saw
#[derive(Default)]
pub struct MockState {
    pub connects: AtomicUsize,
    pub live_links: AtomicUsize,
    pub max_live_links: AtomicUsize,
    pub in_flight: AtomicUsize,
    pub max_in_flight: AtomicUsize,
    executed: Mutex<Vec<String>>,
    connected_to: Mutex<Vec<SessionOptions>>,
    failures: Mutex<Vec<(String, String)>>,
    responses: Mutex<Vec<(String, QueryResults)>>,
    failing_connects: AtomicUsize,
    banner: Mutex<String>,
    native_version: Mutex<Option<ServerVersion>>,
    query_delay: Mutex<Duration>,
    connect_delay: Mutex<Duration>,
    events: Mutex<Option<mpsc::UnboundedSender<LinkEvent>>>,
}

impl MockState {
    /// Statements that reached a link, in execution order
    pub fn executed(&self) -> Vec<String> {
        self.executed.lock().clone()
    }

    /// Options of every successful connect
    pub fn connected_to(&self) -> Vec<SessionOptions> {
        self.connected_to.lock().clone()
    }

    /// Databases of every successful connect
    pub fn databases(&self) -> Vec<String> {
        self.connected_to()
            .iter()
            .map(|o| o.database().to_string())
            .collect()
    }

    pub fn live_links(&self) -> usize {
        self.live_links.load(Ordering::SeqCst)
    }

    pub fn max_live_links(&self) -> usize {
        self.max_live_links.load(Ordering::SeqCst)
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    pub fn connects(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    /// Statements containing `pattern` fail with `message`
    pub fn fail_sql(&self, pattern: &str, message: &str) {
        self.failures
            .lock()
            .push((pattern.to_string(), message.to_string()));
    }

    /// Statements containing `pattern` return `results`
    pub fn respond(&self, pattern: &str, results: QueryResults) {
        self.responses.lock().push((pattern.to_string(), results));
    }

    /// The next `count` connect attempts fail
    pub fn fail_connects(&self, count: usize) {
        self.failing_connects.store(count, Ordering::SeqCst);
    }

    /// Banner returned by `SELECT version()`
    pub fn set_banner(&self, banner: &str) {
        *self.banner.lock() = banner.to_string();
    }

    pub fn set_native_version(&self, version: Option<&str>) {
        *self.native_version.lock() = version.and_then(ServerVersion::parse);
    }

    pub fn set_query_delay(&self, delay: Duration) {
        *self.query_delay.lock() = delay;
    }

    pub fn set_connect_delay(&self, delay: Duration) {
        *self.connect_delay.lock() = delay;
    }

    /// Push a notification on the current link
    pub fn notify(&self, channel: &str, payload: &str) -> bool {
        self.send_event(LinkEvent::Notification(Notification {
            process_id: 4242,
            channel: channel.to_string(),
            payload: payload.to_string(),
        }))
    }

    /// Simulate the server dropping the current link
    pub fn drop_link(&self, reason: &str) -> bool {
        self.send_event(LinkEvent::Closed(Some(reason.to_string())))
    }

    fn send_event(&self, event: LinkEvent) -> bool {
        self.events
            .lock()
            .as_ref()
            .is_some_and(|tx| tx.send(event).is_ok())
    }
}

/// Connector handing out [`MockLink`]s
pub struct MockConnector {
    state: Arc<MockState>,
    native: bool,
}

impl MockConnector {
    /// Connector whose links report no native version
    pub fn sql_probe() -> (Arc<Self>, Arc<MockState>) {
        Self::build(false)
    }

    /// Connector whose links report version 16.2 at startup
    pub fn native() -> (Arc<Self>, Arc<MockState>) {
        let (connector, state) = Self::build(true);
        state.set_native_version(Some("16.2"));
        (connector, state)
    }

    fn build(native: bool) -> (Arc<Self>, Arc<MockState>) {
        let state = Arc::new(MockState::default());
        state.set_banner("PostgreSQL 16.2 on x86_64-pc-linux-gnu, compiled by gcc, 64-bit");
        (
            Arc::new(Self {
                state: state.clone(),
                native,
            }),
            state,
        )
    }
}

#[async_trait]
impl Connector for MockConnector {
    async fn connect(&self, options: &SessionOptions) -> Result<LinkParts, LinkError> {
        let delay = *self.state.connect_delay.lock();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        let failing = self.state.failing_connects.load(Ordering::SeqCst);
        if failing > 0 {
            self.state
                .failing_connects
                .store(failing - 1, Ordering::SeqCst);
            return Err(LinkError::new(format!(
                "connection refused: {}:{}",
                options.host(),
                options.port()
            )));
        }

        self.state.connects.fetch_add(1, Ordering::SeqCst);
        let live = self.state.live_links.fetch_add(1, Ordering::SeqCst) + 1;
        self.state.max_live_links.fetch_max(live, Ordering::SeqCst);
        self.state.connected_to.lock().push(options.clone());

        let (tx, events) = mpsc::unbounded_channel();
        *self.state.events.lock() = Some(tx);
        Ok(LinkParts {
            link: Box::new(MockLink {
                state: self.state.clone(),
                native: self.native,
            }),
            events,
        })
    }

    fn supports_native_version(&self) -> bool {
        self.native
    }
}

pub struct MockLink {
    state: Arc<MockState>,
    native: bool,
}

#[async_trait]
impl Link for MockLink {
    async fn query(&self, sql: &str) -> Result<QueryResults, LinkError> {
        let state = &self.state;
        let now = state.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        state.max_in_flight.fetch_max(now, Ordering::SeqCst);
        state.executed.lock().push(sql.to_string());

        let delay = *state.query_delay.lock();
        if delay.is_zero() {
            tokio::task::yield_now().await;
        } else {
            tokio::time::sleep(delay).await;
        }
        state.in_flight.fetch_sub(1, Ordering::SeqCst);

        let failure = state
            .failures
            .lock()
            .iter()
            .find(|(pattern, _)| sql.contains(pattern.as_str()))
            .map(|(_, message)| message.clone());
        if let Some(message) = failure {
            return Err(LinkError::new(message));
        }
        if sql == "SELECT version()" {
            let banner = state.banner.lock().clone();
            return Ok(text_results("version", &[Some(banner.as_str())]));
        }
        let response = state
            .responses
            .lock()
            .iter()
            .find(|(pattern, _)| sql.contains(pattern.as_str()))
            .map(|(_, results)| results.clone());
        Ok(response.unwrap_or_else(QueryResults::empty))
    }

    async fn end(self: Box<Self>) {
        self.state.live_links.fetch_sub(1, Ordering::SeqCst);
        self.state.events.lock().take();
    }

    fn native_version(&self) -> Option<ServerVersion> {
        if self.native {
            self.state.native_version.lock().clone()
        } else {
            None
        }
    }
}

/// Single text column results
pub fn text_results(column: &str, values: &[Option<&str>]) -> QueryResults {
    let rows = values
        .iter()
        .map(|v| Row {
            values: vec![match v {
                Some(s) => CellValue::Text(s.to_string()),
                None => CellValue::Null,
            }],
        })
        .collect();
    QueryResults::new(
        vec![ColumnDef {
            name: column.to_string(),
            data_type: DataType::Text,
        }],
        rows,
        Duration::ZERO,
    )
}

/// Options for a local test database
pub fn test_options(database: &str) -> SessionOptions {
    SessionOptions {
        user: Some("tester".to_string()),
        password: Some("secret".to_string()),
        database: Some(database.to_string()),
        ..Default::default()
    }
}
