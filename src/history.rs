//! Query history
//!
//! Append-only log of every statement a session ran. Records are added
//! when a statement is submitted and updated in place when it finishes;
//! the elapsed time includes any wait in the queue. Nothing is ever
//! pruned, so long sessions grow without bound.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::time::Duration;

/// Lifecycle of a recorded statement
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum QueryState {
    Running,
    Success,
    Failed,
}

/// One executed statement
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QueryRecord {
    pub sql: String,
    pub submitted_at: DateTime<Utc>,
    pub state: QueryState,
    /// Set once the statement finishes
    pub elapsed: Option<Duration>,
    /// Error text when the statement failed
    pub error: Option<String>,
}

/// Handle to a record returned by [`QueryHistory::begin`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordId(usize);

#[derive(Debug, Default)]
pub struct QueryHistory {
    records: Vec<QueryRecord>,
}

impl QueryHistory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a running record for `sql`
    pub fn begin(&mut self, sql: &str) -> RecordId {
        self.records.push(QueryRecord {
            sql: sql.to_string(),
            submitted_at: Utc::now(),
            state: QueryState::Running,
            elapsed: None,
            error: None,
        });
        RecordId(self.records.len() - 1)
    }

    /// Mark a record successful
    pub fn succeed(&mut self, id: RecordId, elapsed: Duration) {
        if let Some(record) = self.records.get_mut(id.0) {
            record.state = QueryState::Success;
            record.elapsed = Some(elapsed);
        }
    }

    /// Mark a record failed
    pub fn fail(&mut self, id: RecordId, elapsed: Duration, error: &str) {
        if let Some(record) = self.records.get_mut(id.0) {
            record.state = QueryState::Failed;
            record.elapsed = Some(elapsed);
            record.error = Some(error.to_string());
        }
    }

    pub fn get(&self, id: RecordId) -> Option<&QueryRecord> {
        self.records.get(id.0)
    }

    pub fn records(&self) -> &[QueryRecord] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Serialize all records as pretty JSON
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(&self.records)
    }
}
