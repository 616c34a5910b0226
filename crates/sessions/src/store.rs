//! In-memory session table.
//!
//! Sessions live only in process memory; the transcript store is the
//! durable record.  Every mutation runs inside one short write-lock critical
//! section and the lock is never held across an `.await`.

use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};
use parking_lot::RwLock;

use hd_domain::chat::Session;
use hd_domain::error::{Error, Result};
use hd_domain::trace::TraceEvent;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Session store
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Gateway-owned session table keyed by session id.
#[derive(Default)]
pub struct SessionStore {
    sessions: RwLock<HashMap<String, Session>>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Look up a session by id.  Returns a snapshot.
    pub fn get(&self, session_id: &str) -> Option<Session> {
        self.sessions.read().get(session_id).cloned()
    }

    /// Insert `session` unless its id is already taken.
    ///
    /// Returns `(stored, is_new)`: the existing session is returned
    /// unchanged when the id is already present.
    pub fn insert_if_absent(&self, session: Session) -> (Session, bool) {
        // Fast path: session already exists.
        {
            let sessions = self.sessions.read();
            if let Some(existing) = sessions.get(&session.session_id) {
                return (existing.clone(), false);
            }
        }

        let mut sessions = self.sessions.write();
        // Re-check under the write lock; another request may have won.
        if let Some(existing) = sessions.get(&session.session_id) {
            return (existing.clone(), false);
        }
        sessions.insert(session.session_id.clone(), session.clone());
        (session, true)
    }

    /// Run `f` against the stored session under the write lock.
    ///
    /// `f` must check its preconditions before mutating: when it returns
    /// `Err` the session is expected to be untouched.
    pub fn update<R>(
        &self,
        session_id: &str,
        f: impl FnOnce(&mut Session) -> Result<R>,
    ) -> Result<R> {
        let mut sessions = self.sessions.write();
        let session = sessions
            .get_mut(session_id)
            .ok_or_else(|| Error::SessionNotFound(session_id.to_owned()))?;
        f(session)
    }

    pub fn len(&self) -> usize {
        self.sessions.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.read().is_empty()
    }

    /// List all sessions.
    pub fn list(&self) -> Vec<Session> {
        self.sessions.read().values().cloned().collect()
    }

    /// Drop sessions whose last update is older than `max_idle` at `now`.
    ///
    /// Returns the removed session ids so callers can release per-session
    /// resources tied to them.
    pub fn collect_idle(&self, max_idle: Duration, now: DateTime<Utc>) -> Vec<String> {
        let cutoff = now - max_idle;
        let mut sessions = self.sessions.write();
        let removed: Vec<String> = sessions
            .iter()
            .filter(|(_, s)| s.updated_at < cutoff)
            .map(|(id, _)| id.clone())
            .collect();
        for id in &removed {
            sessions.remove(id);
        }
        let remaining = sessions.len();
        drop(sessions);

        if !removed.is_empty() {
            TraceEvent::SessionsCollected {
                removed: removed.len(),
                remaining,
            }
            .emit();
        }
        removed
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
