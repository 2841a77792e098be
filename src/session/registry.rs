//! Process-wide session registry
//!
//! Tracks every live session for app-wide actions (reconnect prompts,
//! shutdown). Entries hold weak references so the registry never keeps a
//! session alive; each mutation is a single append or remove-by-identity.

use super::{Session, SessionInner};
use parking_lot::Mutex;
use std::sync::{LazyLock, Weak};
use uuid::Uuid;

static REGISTRY: LazyLock<Mutex<Vec<Entry>>> = LazyLock::new(|| Mutex::new(Vec::new()));

struct Entry {
    id: Uuid,
    session: Weak<SessionInner>,
}

/// Add the session unless it is already registered
pub(super) fn register(session: &Session) {
    let mut entries = REGISTRY.lock();
    entries.retain(|e| e.session.strong_count() > 0);
    if !entries.iter().any(|e| e.id == session.id()) {
        entries.push(Entry {
            id: session.id(),
            session: std::sync::Arc::downgrade(&session.inner),
        });
        tracing::debug!(session_id = %session.id(), "Session registered");
    }
}

/// Remove the session; no-op when absent
pub(super) fn deregister(id: Uuid) {
    let mut entries = REGISTRY.lock();
    let before = entries.len();
    entries.retain(|e| e.id != id);
    if entries.len() != before {
        tracing::debug!(session_id = %id, "Session deregistered");
    }
}

/// All registered sessions that are still alive
pub fn sessions() -> Vec<Session> {
    let mut entries = REGISTRY.lock();
    entries.retain(|e| e.session.strong_count() > 0);
    entries
        .iter()
        .filter_map(|e| e.session.upgrade())
        .map(|inner| Session { inner })
        .collect()
}

/// Number of live registry entries for `id` (0 or 1)
pub fn entries_for(id: Uuid) -> usize {
    REGISTRY
        .lock()
        .iter()
        .filter(|e| e.id == id && e.session.strong_count() > 0)
        .count()
}

pub fn contains(id: Uuid) -> bool {
    entries_for(id) > 0
}
