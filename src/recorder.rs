use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::accounting::{AccountingSnapshot, day_key};
use crate::session::SessionTracker;
use crate::store::{AccountingStore, StoreError};

/// Sessions lasting this many seconds or fewer are treated as accidental
/// connects and never credited.
pub const MIN_SESSION_SECONDS: i64 = 10;

/// How long a single store call may run before it is written off as a
/// store failure.
pub const DEFAULT_STORE_TIMEOUT: Duration = Duration::from_secs(10);

/// A voice-state change as delivered by the gateway.
#[derive(Debug, Clone)]
pub struct VoiceTransition {
    pub user_id: String,
    pub username: String,
    pub old_channel: Option<u64>,
    pub new_channel: Option<u64>,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransitionKind {
    /// Entered voice from outside.
    Joined,
    /// Disconnected from voice entirely.
    Left,
    /// Switched between two channels; the session keeps running.
    Moved,
    /// Same channel on both sides (mute, deafen, stream toggles).
    Unchanged,
}

impl VoiceTransition {
    pub fn kind(&self) -> TransitionKind {
        match (self.old_channel, self.new_channel) {
            (None, Some(_)) => TransitionKind::Joined,
            (_, None) => TransitionKind::Left,
            (Some(old), Some(new)) if old == new => TransitionKind::Unchanged,
            (Some(_), Some(_)) => TransitionKind::Moved,
        }
    }
}

/// What applying one transition did, including any store failures met
/// along the way. Store failures are logged and absorbed; they never
/// escape as errors.
#[derive(Debug)]
pub enum TransitionOutcome {
    SessionStarted,
    /// Duplicate join; the running session keeps its start time.
    SessionAlreadyOpen,
    /// Channel move or state-only update; nothing to account.
    Ignored,
    /// Leave without a matching join.
    NoOpenSession,
    /// Session at or under [`MIN_SESSION_SECONDS`], dropped.
    BelowMinimum { seconds: i64 },
    /// Session credited to the user's daily bucket and persisted.
    Credited {
        seconds: u64,
        day: String,
        load_error: Option<StoreError>,
        save_error: Option<StoreError>,
    },
}

/// Turns join/leave transitions into persisted per-user, per-day time
/// buckets.
pub struct TimeRecorder {
    store: Arc<dyn AccountingStore>,
    sessions: Mutex<SessionTracker>,
    // Credits are serialized: the store only supports whole-document
    // overwrite, so concurrent load-mutate-save sequences would lose
    // updates.
    store_guard: Mutex<()>,
    store_timeout: Duration,
}

impl TimeRecorder {
    pub fn new(store: Arc<dyn AccountingStore>) -> Self {
        Self {
            store,
            sessions: Mutex::new(SessionTracker::new()),
            store_guard: Mutex::new(()),
            store_timeout: DEFAULT_STORE_TIMEOUT,
        }
    }

    pub fn with_store_timeout(mut self, timeout: Duration) -> Self {
        self.store_timeout = timeout;
        self
    }

    /// Applies one voice transition. Never fails: store trouble is
    /// logged, reported in the outcome and otherwise swallowed.
    pub async fn apply(&self, transition: VoiceTransition) -> TransitionOutcome {
        match transition.kind() {
            TransitionKind::Joined => {
                let mut sessions = self.sessions.lock().await;
                if sessions.is_open(&transition.user_id) {
                    return TransitionOutcome::SessionAlreadyOpen;
                }
                sessions.begin_session(&transition.user_id, transition.at);
                TransitionOutcome::SessionStarted
            }
            TransitionKind::Moved | TransitionKind::Unchanged => TransitionOutcome::Ignored,
            TransitionKind::Left => {
                let seconds = {
                    let mut sessions = self.sessions.lock().await;
                    match sessions.end_session(&transition.user_id, transition.at) {
                        Some(seconds) => seconds,
                        None => return TransitionOutcome::NoOpenSession,
                    }
                };
                if seconds <= MIN_SESSION_SECONDS {
                    debug!(
                        user = %transition.user_id,
                        seconds,
                        "session under the minimum duration, dropped"
                    );
                    return TransitionOutcome::BelowMinimum { seconds };
                }
                self.credit(&transition, seconds as u64).await
            }
        }
    }

    /// Loads the current snapshot for reporting; a failure comes back as
    /// an empty snapshot plus the error.
    pub async fn snapshot(&self) -> (AccountingSnapshot, Option<StoreError>) {
        match self.load_bounded().await {
            Ok(snapshot) => (snapshot, None),
            Err(e) => {
                warn!(error = %e, "loading the accounting snapshot failed");
                (AccountingSnapshot::default(), Some(e))
            }
        }
    }

    async fn credit(&self, transition: &VoiceTransition, seconds: u64) -> TransitionOutcome {
        let _guard = self.store_guard.lock().await;

        let (mut snapshot, load_error) = match self.load_bounded().await {
            Ok(snapshot) => (snapshot, None),
            Err(e) => {
                warn!(error = %e, "loading the accounting snapshot failed, starting from empty");
                (AccountingSnapshot::default(), Some(e))
            }
        };

        let day = day_key(transition.at);
        snapshot.credit(&transition.user_id, &transition.username, &day, seconds);

        let save_error = match self.save_bounded(&snapshot).await {
            Ok(()) => None,
            Err(e) => {
                warn!(error = %e, "saving the accounting snapshot failed, write dropped");
                Some(e)
            }
        };

        TransitionOutcome::Credited {
            seconds,
            day,
            load_error,
            save_error,
        }
    }

    async fn load_bounded(&self) -> Result<AccountingSnapshot, StoreError> {
        match tokio::time::timeout(self.store_timeout, self.store.load()).await {
            Ok(result) => result,
            Err(_) => Err(StoreError::Timeout(self.store_timeout)),
        }
    }

    async fn save_bounded(&self, snapshot: &AccountingSnapshot) -> Result<(), StoreError> {
        match tokio::time::timeout(self.store_timeout, self.store.save(snapshot)).await {
            Ok(result) => result,
            Err(_) => Err(StoreError::Timeout(self.store_timeout)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use async_trait::async_trait;
    use chrono::TimeZone;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Store double with switchable load/save failures; successful saves
    /// are kept so tests can inspect them.
    #[derive(Default)]
    struct FlakyStore {
        fail_load: bool,
        fail_save: bool,
        saved: std::sync::Mutex<Option<AccountingSnapshot>>,
        load_calls: AtomicUsize,
        save_calls: AtomicUsize,
    }

    #[async_trait]
    impl AccountingStore for FlakyStore {
        async fn load(&self) -> Result<AccountingSnapshot, StoreError> {
            self.load_calls.fetch_add(1, Ordering::SeqCst);
            if self.fail_load {
                return Err(StoreError::Io(std::io::Error::other("load refused")));
            }
            Ok(self.saved.lock().unwrap().clone().unwrap_or_default())
        }

        async fn save(&self, snapshot: &AccountingSnapshot) -> Result<(), StoreError> {
            self.save_calls.fetch_add(1, Ordering::SeqCst);
            if self.fail_save {
                return Err(StoreError::Io(std::io::Error::other("save refused")));
            }
            *self.saved.lock().unwrap() = Some(snapshot.clone());
            Ok(())
        }
    }

    /// Store double that never completes a call.
    struct HangingStore;

    #[async_trait]
    impl AccountingStore for HangingStore {
        async fn load(&self) -> Result<AccountingSnapshot, StoreError> {
            std::future::pending().await
        }

        async fn save(&self, _snapshot: &AccountingSnapshot) -> Result<(), StoreError> {
            std::future::pending().await
        }
    }

    fn at(h: u32, m: u32, s: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 1, 29, h, m, s).unwrap()
    }

    fn join(user: &str, at: DateTime<Utc>) -> VoiceTransition {
        VoiceTransition {
            user_id: user.to_string(),
            username: format!("{user}-name"),
            old_channel: None,
            new_channel: Some(1),
            at,
        }
    }

    fn leave(user: &str, at: DateTime<Utc>) -> VoiceTransition {
        VoiceTransition {
            user_id: user.to_string(),
            username: format!("{user}-name"),
            old_channel: Some(1),
            new_channel: None,
            at,
        }
    }

    fn recorder_with_memory() -> (Arc<MemoryStore>, TimeRecorder) {
        let store = Arc::new(MemoryStore::new());
        let recorder = TimeRecorder::new(store.clone());
        (store, recorder)
    }

    #[test]
    fn classifies_channel_presence() {
        let transition = |old, new| VoiceTransition {
            user_id: "42".to_string(),
            username: String::new(),
            old_channel: old,
            new_channel: new,
            at: at(10, 0, 0),
        };
        assert_eq!(transition(None, Some(1)).kind(), TransitionKind::Joined);
        assert_eq!(transition(Some(1), None).kind(), TransitionKind::Left);
        assert_eq!(transition(None, None).kind(), TransitionKind::Left);
        assert_eq!(transition(Some(1), Some(2)).kind(), TransitionKind::Moved);
        assert_eq!(transition(Some(1), Some(1)).kind(), TransitionKind::Unchanged);
    }

    #[tokio::test]
    async fn five_minute_session_is_credited() {
        let (store, recorder) = recorder_with_memory();

        recorder.apply(join("42", at(10, 0, 0))).await;
        let outcome = recorder.apply(leave("42", at(10, 5, 0))).await;

        match outcome {
            TransitionOutcome::Credited {
                seconds,
                day,
                load_error,
                save_error,
            } => {
                assert_eq!(seconds, 300);
                assert_eq!(day, "2025-01-29");
                assert!(load_error.is_none());
                assert!(save_error.is_none());
            }
            other => panic!("expected a credit, got {other:?}"),
        }

        let snapshot = store.load().await.unwrap();
        let record = snapshot.record("42").unwrap();
        assert_eq!(record.username, "42-name");
        assert_eq!(record.total_seconds, 300);
        assert_eq!(record.history.get("2025-01-29"), Some(&300));
    }

    #[tokio::test]
    async fn short_session_is_discarded_without_creating_a_record() {
        let (store, recorder) = recorder_with_memory();

        recorder.apply(join("42", at(10, 0, 0))).await;
        let outcome = recorder.apply(leave("42", at(10, 0, 5))).await;

        assert!(matches!(
            outcome,
            TransitionOutcome::BelowMinimum { seconds: 5 }
        ));
        assert_eq!(store.load().await.unwrap(), AccountingSnapshot::default());
    }

    #[tokio::test]
    async fn exactly_ten_seconds_is_still_discarded() {
        let (store, recorder) = recorder_with_memory();

        recorder.apply(join("42", at(10, 0, 0))).await;
        let outcome = recorder.apply(leave("42", at(10, 0, 10))).await;

        assert!(matches!(
            outcome,
            TransitionOutcome::BelowMinimum { seconds: 10 }
        ));
        assert_eq!(store.load().await.unwrap(), AccountingSnapshot::default());
    }

    #[tokio::test]
    async fn eleven_seconds_is_credited() {
        let (store, recorder) = recorder_with_memory();

        recorder.apply(join("42", at(10, 0, 0))).await;
        let outcome = recorder.apply(leave("42", at(10, 0, 11))).await;

        assert!(matches!(
            outcome,
            TransitionOutcome::Credited { seconds: 11, .. }
        ));
        assert_eq!(
            store.load().await.unwrap().record("42").unwrap().total_seconds,
            11
        );
    }

    #[tokio::test]
    async fn duplicate_join_keeps_the_first_start_time() {
        let (store, recorder) = recorder_with_memory();

        recorder.apply(join("42", at(10, 0, 0))).await;
        let second = recorder.apply(join("42", at(10, 1, 0))).await;
        assert!(matches!(second, TransitionOutcome::SessionAlreadyOpen));

        let outcome = recorder.apply(leave("42", at(10, 5, 0))).await;
        assert!(matches!(
            outcome,
            TransitionOutcome::Credited { seconds: 300, .. }
        ));
        assert_eq!(
            store.load().await.unwrap().record("42").unwrap().total_seconds,
            300
        );
    }

    #[tokio::test]
    async fn leave_without_a_join_changes_nothing() {
        let (store, recorder) = recorder_with_memory();

        let outcome = recorder.apply(leave("42", at(10, 0, 0))).await;

        assert!(matches!(outcome, TransitionOutcome::NoOpenSession));
        assert_eq!(store.load().await.unwrap(), AccountingSnapshot::default());
    }

    #[tokio::test]
    async fn channel_move_does_not_split_the_session() {
        let (store, recorder) = recorder_with_memory();

        recorder.apply(join("42", at(10, 0, 0))).await;
        let moved = recorder
            .apply(VoiceTransition {
                user_id: "42".to_string(),
                username: "42-name".to_string(),
                old_channel: Some(1),
                new_channel: Some(2),
                at: at(10, 2, 0),
            })
            .await;
        assert!(matches!(moved, TransitionOutcome::Ignored));

        let outcome = recorder.apply(leave("42", at(10, 5, 0))).await;
        assert!(matches!(
            outcome,
            TransitionOutcome::Credited { seconds: 300, .. }
        ));
        assert_eq!(
            store.load().await.unwrap().record("42").unwrap().total_seconds,
            300
        );
    }

    #[tokio::test]
    async fn sessions_accumulate_across_the_day() {
        let (store, recorder) = recorder_with_memory();

        recorder.apply(join("42", at(10, 0, 0))).await;
        recorder.apply(leave("42", at(10, 5, 0))).await;
        recorder.apply(join("42", at(11, 0, 0))).await;
        recorder.apply(leave("42", at(11, 0, 45))).await;

        let snapshot = store.load().await.unwrap();
        let record = snapshot.record("42").unwrap();
        assert_eq!(record.total_seconds, 345);
        assert_eq!(record.history.get("2025-01-29"), Some(&345));
        assert_eq!(record.history.values().sum::<u64>(), record.total_seconds);
    }

    #[tokio::test]
    async fn a_session_is_bucketed_under_its_leave_day() {
        let (store, recorder) = recorder_with_memory();

        let joined = Utc.with_ymd_and_hms(2025, 1, 29, 23, 59, 0).unwrap();
        let left = Utc.with_ymd_and_hms(2025, 1, 30, 0, 4, 0).unwrap();
        recorder.apply(join("42", joined)).await;
        recorder.apply(leave("42", left)).await;

        let snapshot = store.load().await.unwrap();
        let record = snapshot.record("42").unwrap();
        assert_eq!(record.history.get("2025-01-30"), Some(&300));
        assert!(record.history.get("2025-01-29").is_none());
    }

    #[tokio::test]
    async fn only_a_qualifying_leave_writes_to_the_store() {
        let store = Arc::new(FlakyStore::default());
        let recorder = TimeRecorder::new(store.clone());

        recorder.apply(join("42", at(10, 0, 0))).await;
        assert_eq!(store.load_calls.load(Ordering::SeqCst), 0);
        assert_eq!(store.save_calls.load(Ordering::SeqCst), 0);

        recorder.apply(leave("42", at(10, 0, 5))).await;
        assert_eq!(store.load_calls.load(Ordering::SeqCst), 0);
        assert_eq!(store.save_calls.load(Ordering::SeqCst), 0);

        recorder.apply(join("42", at(11, 0, 0))).await;
        recorder.apply(leave("42", at(11, 5, 0))).await;
        assert_eq!(store.save_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn load_failure_credits_into_an_empty_snapshot() {
        let store = Arc::new(FlakyStore {
            fail_load: true,
            ..Default::default()
        });
        let recorder = TimeRecorder::new(store.clone());

        recorder.apply(join("42", at(10, 0, 0))).await;
        let outcome = recorder.apply(leave("42", at(10, 5, 0))).await;

        match outcome {
            TransitionOutcome::Credited {
                load_error,
                save_error,
                ..
            } => {
                assert!(load_error.is_some());
                assert!(save_error.is_none());
            }
            other => panic!("expected a credit, got {other:?}"),
        }

        let saved = store.saved.lock().unwrap().clone().unwrap();
        assert_eq!(saved.record("42").unwrap().total_seconds, 300);
    }

    #[tokio::test]
    async fn save_failure_is_reported_but_not_fatal() {
        let store = Arc::new(FlakyStore {
            fail_save: true,
            ..Default::default()
        });
        let recorder = TimeRecorder::new(store);

        recorder.apply(join("42", at(10, 0, 0))).await;
        let outcome = recorder.apply(leave("42", at(10, 5, 0))).await;

        match outcome {
            TransitionOutcome::Credited { save_error, .. } => assert!(save_error.is_some()),
            other => panic!("expected a credit, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn hung_store_calls_time_out() {
        let recorder = TimeRecorder::new(Arc::new(HangingStore))
            .with_store_timeout(Duration::from_millis(20));

        recorder.apply(join("42", at(10, 0, 0))).await;
        let outcome = recorder.apply(leave("42", at(10, 5, 0))).await;

        match outcome {
            TransitionOutcome::Credited {
                load_error,
                save_error,
                ..
            } => {
                assert!(matches!(load_error, Some(StoreError::Timeout(_))));
                assert!(matches!(save_error, Some(StoreError::Timeout(_))));
            }
            other => panic!("expected a credit, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn snapshot_reports_failures_alongside_an_empty_fallback() {
        let recorder = TimeRecorder::new(Arc::new(FlakyStore {
            fail_load: true,
            ..Default::default()
        }));

        let (snapshot, error) = recorder.snapshot().await;
        assert_eq!(snapshot, AccountingSnapshot::default());
        assert!(error.is_some());
    }
}
