use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::watch;

use crate::errors::DeviceError;
use crate::models::Snapshot;

/// Health of one pipeline as seen by readers
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PollStatus {
    /// First refresh has committed a snapshot
    pub ready: bool,
    pub last_poll_succeeded: bool,
    pub last_error: Option<String>,
    pub last_error_kind: Option<&'static str>,
    /// Set by an authentication failure, cleared by the next successful poll
    pub reauth_required: bool,
    pub consecutive_failures: u32,
    pub last_attempt_at: Option<DateTime<Utc>>,
    pub last_success_at: Option<DateTime<Utc>>,
}

#[derive(Debug)]
struct StoreState<T> {
    snapshot: Option<Arc<Snapshot<T>>>,
    status: PollStatus,
}

/// Last successful snapshot of one pipeline plus its status.
///
/// Both halves live in one watch value that is swapped as a unit, so a reader
/// never pairs a snapshot with the status of a different poll.
#[derive(Debug)]
pub struct SnapshotStore<T> {
    tx: watch::Sender<StoreState<T>>,
}

impl<T> Default for SnapshotStore<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> SnapshotStore<T> {
    pub fn new() -> Self {
        Self {
            tx: watch::Sender::new(StoreState {
                snapshot: None,
                status: PollStatus::default(),
            }),
        }
    }

    /// Publish the payload of a successful poll
    pub fn commit(&self, payload: T) -> Arc<Snapshot<T>> {
        let snapshot = Arc::new(Snapshot::committed(payload));
        let published = snapshot.clone();
        self.tx.send_modify(move |state| {
            *state = StoreState {
                status: PollStatus {
                    ready: true,
                    last_poll_succeeded: true,
                    last_error: None,
                    last_error_kind: None,
                    reauth_required: false,
                    consecutive_failures: 0,
                    last_attempt_at: Some(published.fetched_at),
                    last_success_at: Some(published.fetched_at),
                },
                snapshot: Some(published),
            };
        });
        snapshot
    }

    /// Record a failed poll, the current snapshot stays in place
    pub fn record_failure(&self, error: &DeviceError) {
        let now = Utc::now();
        self.tx.send_modify(|state| {
            let status = &mut state.status;
            status.last_poll_succeeded = false;
            status.last_error = Some(error.to_string());
            status.last_error_kind = Some(error.kind());
            status.reauth_required |= error.is_auth_failure();
            status.consecutive_failures = status.consecutive_failures.saturating_add(1);
            status.last_attempt_at = Some(now);
        });
    }

    pub fn is_ready(&self) -> bool {
        self.tx.borrow().status.ready
    }

    pub fn reader(&self) -> CoordinatorReader<T> {
        CoordinatorReader {
            rx: self.tx.subscribe(),
        }
    }
}

/// Read handle given to downstream consumers
#[derive(Debug)]
pub struct CoordinatorReader<T> {
    rx: watch::Receiver<StoreState<T>>,
}

impl<T> Clone for CoordinatorReader<T> {
    fn clone(&self) -> Self {
        Self {
            rx: self.rx.clone(),
        }
    }
}

impl<T> CoordinatorReader<T> {
    /// Last good snapshot and whether the most recent poll succeeded.
    ///
    /// `None` until the first refresh has committed.
    pub fn current(&self) -> Option<(Arc<Snapshot<T>>, bool)> {
        let state = self.rx.borrow();
        state
            .snapshot
            .clone()
            .map(|snapshot| (snapshot, state.status.last_poll_succeeded))
    }

    pub fn status(&self) -> PollStatus {
        self.rx.borrow().status.clone()
    }

    pub fn is_ready(&self) -> bool {
        self.rx.borrow().status.ready
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_nothing_before_first_commit() {
        let store: SnapshotStore<u32> = SnapshotStore::new();
        let reader = store.reader();
        assert!(reader.current().is_none());
        assert!(!reader.is_ready());

        store.record_failure(&DeviceError::timeout("/api/v1/system/info"));
        assert!(reader.current().is_none());
        assert_eq!(reader.status().consecutive_failures, 1);
    }

    #[test]
    fn test_failure_keeps_last_snapshot() {
        let store = SnapshotStore::new();
        let reader = store.reader();
        store.commit(7u32);
        store.record_failure(&DeviceError::timeout("/api/v1/ade7953/meter-values"));

        let (snapshot, succeeded) = reader.current().unwrap();
        assert_eq!(snapshot.payload, 7);
        assert!(!succeeded);
        assert_eq!(reader.status().last_error_kind, Some("timeout"));
        assert!(reader.status().ready);
    }

    #[test]
    fn test_reauth_flag_clears_on_success() {
        let store = SnapshotStore::new();
        let reader = store.reader();
        store.commit(1u32);
        store.record_failure(&DeviceError::auth_failed("/api/v1/ade7953/channel"));
        store.record_failure(&DeviceError::timeout("/api/v1/ade7953/channel"));
        let status = reader.status();
        assert!(status.reauth_required);
        assert_eq!(status.consecutive_failures, 2);

        store.commit(2u32);
        let status = reader.status();
        assert!(!status.reauth_required);
        assert_eq!(status.consecutive_failures, 0);
        assert_eq!(status.last_error, None);
        assert_eq!(reader.current().map(|(s, ok)| (s.payload, ok)), Some((2, true)));
    }
}
