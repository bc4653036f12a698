use std::collections::HashMap;

use chrono::{DateTime, Utc};

/// Open voice sessions, keyed by user id. Held in memory only; sessions
/// still open when the process stops are discarded.
#[derive(Debug, Default)]
pub struct SessionTracker {
    open: HashMap<String, DateTime<Utc>>,
}

impl SessionTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Opens a session at `at` unless one is already open; a duplicate
    /// join keeps the original start time.
    pub fn begin_session(&mut self, user_id: &str, at: DateTime<Utc>) {
        self.open.entry(user_id.to_string()).or_insert(at);
    }

    /// Closes the open session and returns its length in whole seconds,
    /// or `None` for a leave without a matching join.
    pub fn end_session(&mut self, user_id: &str, at: DateTime<Utc>) -> Option<i64> {
        let started = self.open.remove(user_id)?;
        Some((at - started).num_seconds())
    }

    pub fn is_open(&self, user_id: &str) -> bool {
        self.open.contains_key(user_id)
    }
}
