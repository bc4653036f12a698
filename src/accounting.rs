use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Accumulated voice time for one user.
///
/// `total_seconds` always equals the sum of the `history` buckets; both
/// are only ever updated together, through [`AccountingSnapshot::credit`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserTimeRecord {
    /// Display name as of the last credited session; informational only.
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub total_seconds: u64,
    /// Seconds accumulated per UTC calendar day, keyed `YYYY-MM-DD`.
    #[serde(default)]
    pub history: BTreeMap<String, u64>,
}

/// All users' time records, keyed by user id. Loaded, mutated and saved
/// as one document.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AccountingSnapshot {
    records: BTreeMap<String, UserTimeRecord>,
}

impl AccountingSnapshot {
    pub fn record(&self, user_id: &str) -> Option<&UserTimeRecord> {
        self.records.get(user_id)
    }

    /// Adds `seconds` to the user's total and to the given day bucket,
    /// creating the record on first credit. An empty `username` leaves
    /// the stored name untouched.
    pub fn credit(&mut self, user_id: &str, username: &str, day: &str, seconds: u64) {
        let record = self.records.entry(user_id.to_string()).or_default();
        if !username.is_empty() {
            record.username = username.to_string();
        }
        record.total_seconds += seconds;
        *record.history.entry(day.to_string()).or_insert(0) += seconds;
    }
}

/// UTC calendar-day key (`YYYY-MM-DD`) for an instant.
pub fn day_key(at: DateTime<Utc>) -> String {
    at.format("%Y-%m-%d").to_string()
}

/// `YYYY-MM-` prefix shared by the day keys of the instant's month.
pub fn month_prefix(at: DateTime<Utc>) -> String {
    at.format("%Y-%m-").to_string()
}
