//! Job Tracker collaborator (spec §4.6).
//!
//! Exposes a snapshot of all currently known jobs plus a broadcast of
//! `(job_id, snapshot)` change events. Modeled as a `tokio::sync::broadcast`
//! channel over a `DashMap` snapshot, the same shape as the teacher's
//! `WebSocketServer` (a `DashMap` registry plus fan-out sends) — broadcast
//! is the right primitive here specifically because it never blocks a slow
//! subscriber's notifier: a lagging receiver drops the oldest buffered
//! events rather than stalling the sender.

use std::collections::HashMap;

use dashmap::DashMap;
use tokio::sync::broadcast;

use crate::model::{JobId, JobStatusSnapshot};

const CHANGE_CHANNEL_CAPACITY: usize = 1024;

pub trait JobTracker: Send + Sync + 'static {
    /// Snapshot of every job currently known to the tracker.
    fn get_all_job_status(&self) -> HashMap<JobId, JobStatusSnapshot>;

    /// Subscribe to future `(job_id, snapshot)` changes. Each call gets an
    /// independent receiver; dropping it unsubscribes.
    fn subscribe_changes(&self) -> broadcast::Receiver<(JobId, JobStatusSnapshot)>;
}

/// In-process job tracker: the only kind this crate needs, since
/// multi-process fan-out is an explicit non-goal (spec §1).
pub struct InProcessJobTracker {
    jobs: DashMap<JobId, JobStatusSnapshot>,
    changes: broadcast::Sender<(JobId, JobStatusSnapshot)>,
}

impl InProcessJobTracker {
    pub fn new() -> Self {
        let (changes, _rx) = broadcast::channel(CHANGE_CHANNEL_CAPACITY);
        Self {
            jobs: DashMap::new(),
            changes,
        }
    }

    /// Record a status change and notify subscribers. Never blocks: a
    /// broadcast send with no receivers, or only lagging ones, still
    /// succeeds or fails cheaply without waiting on anyone.
    pub fn publish(&self, job_id: JobId, snapshot: JobStatusSnapshot) {
        self.jobs.insert(job_id, snapshot.clone());
        let _ = self.changes.send((job_id, snapshot));
    }

    pub fn remove(&self, job_id: JobId) {
        self.jobs.remove(&job_id);
    }
}

impl Default for InProcessJobTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl JobTracker for InProcessJobTracker {
    fn get_all_job_status(&self) -> HashMap<JobId, JobStatusSnapshot> {
        self.jobs
            .iter()
            .map(|entry| (*entry.key(), entry.value().clone()))
            .collect()
    }

    fn subscribe_changes(&self) -> broadcast::Receiver<(JobId, JobStatusSnapshot)> {
        self.changes.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use std::collections::HashMap as Map;

    fn snapshot(item_count: i64) -> JobStatusSnapshot {
        JobStatusSnapshot {
            name: "job".into(),
            run_state: crate::model::RunState::Running,
            started_at: Utc::now(),
            completed_at: None,
            item_count,
            http_success_count: 0,
            http_error_count: 0,
            exception_count: 0,
            http_status_counts: Map::new(),
        }
    }

    #[test]
    fn publish_updates_snapshot() {
        let tracker = InProcessJobTracker::new();
        let job_id = JobId(uuid::Uuid::from_bytes([1; 16]));
        tracker.publish(job_id, snapshot(1));
        tracker.publish(job_id, snapshot(2));

        let all = tracker.get_all_job_status();
        assert_eq!(all.get(&job_id).unwrap().item_count, 2);
    }

    #[tokio::test]
    async fn subscribers_receive_published_changes() {
        let tracker = InProcessJobTracker::new();
        let mut rx = tracker.subscribe_changes();
        let job_id = JobId(uuid::Uuid::from_bytes([2; 16]));

        tracker.publish(job_id, snapshot(5));

        let (received_id, received_snapshot) = rx.recv().await.unwrap();
        assert_eq!(received_id, job_id);
        assert_eq!(received_snapshot.item_count, 5);
    }
}
