//! Job Status Subscription (spec §4.5): a coalescing, delta-encoded
//! broadcast of job progress.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use bytestring::ByteString;
use tokio::sync::{Mutex, Notify, broadcast};
use tokio_util::sync::CancellationToken;

use crate::errors::subscription::SubscriptionError;
use crate::message::{Event, EventMessage, JobDelta};
use crate::model::{JobId, JobStatusSnapshot};
use crate::sequence::SubscriptionId;
use crate::socket::{Socket, SocketKey};
use crate::tracker::JobTracker;

use super::SubscriptionTask;

pub struct JobStatusSubscription {
    id: SubscriptionId,
    tracker: Arc<dyn JobTracker>,
    socket: Arc<dyn Socket>,
    min_interval: Duration,
}

impl JobStatusSubscription {
    pub fn new(
        id: SubscriptionId,
        tracker: Arc<dyn JobTracker>,
        socket: Arc<dyn Socket>,
        min_interval: Duration,
    ) -> Self {
        Self {
            id,
            tracker,
            socket,
            min_interval,
        }
    }
}

/// Wake signal plus the set of jobs whose snapshot has changed since the
/// last emission (spec §4.5 "State": `pending` / `changed`).
struct Pending {
    jobs: Mutex<HashMap<JobId, JobStatusSnapshot>>,
    notify: Notify,
}

async fn listen_for_changes(
    mut changes: broadcast::Receiver<(JobId, JobStatusSnapshot)>,
    pending: Arc<Pending>,
) {
    loop {
        match changes.recv().await {
            Ok((job_id, snapshot)) => {
                pending.jobs.lock().await.insert(job_id, snapshot);
                pending.notify.notify_one();
            }
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                tracing::warn!(skipped, "job status subscription lagged, resyncing pending set");
                pending.notify.notify_one();
            }
            Err(broadcast::error::RecvError::Closed) => return,
        }
    }
}

/// Compare `new` against `old` (empty if absent) and return only the
/// scalar fields that differ, plus only the `http_status_counts` entries
/// whose count changed (spec §4.5 "Delta encoding").
fn delta_for(job_id: JobId, new: &JobStatusSnapshot, old: Option<&JobStatusSnapshot>) -> JobDelta {
    let mut delta = JobDelta {
        job_id,
        ..Default::default()
    };

    if old.map(|o| o.name != new.name).unwrap_or(true) {
        delta.name = Some(new.name.clone());
    }
    if old.map(|o| o.run_state != new.run_state).unwrap_or(true) {
        delta.run_state = Some(new.run_state);
    }
    if old.map(|o| o.started_at != new.started_at).unwrap_or(true) {
        delta.started_at = Some(new.started_at);
    }
    if old.map(|o| o.completed_at != new.completed_at).unwrap_or(true) {
        delta.completed_at = Some(new.completed_at);
    }
    if old.map(|o| o.item_count != new.item_count).unwrap_or(true) {
        delta.item_count = Some(new.item_count);
    }
    if old
        .map(|o| o.http_success_count != new.http_success_count)
        .unwrap_or(true)
    {
        delta.http_success_count = Some(new.http_success_count);
    }
    if old
        .map(|o| o.http_error_count != new.http_error_count)
        .unwrap_or(true)
    {
        delta.http_error_count = Some(new.http_error_count);
    }
    if old
        .map(|o| o.exception_count != new.exception_count)
        .unwrap_or(true)
    {
        delta.exception_count = Some(new.exception_count);
    }

    let old_counts = old.map(|o| &o.http_status_counts);
    for (status_code, count) in &new.http_status_counts {
        let unchanged = old_counts
            .and_then(|counts| counts.get(status_code))
            .is_some_and(|prior| prior == count);
        if !unchanged {
            delta.http_status_counts.insert(*status_code, *count);
        }
    }

    delta
}

fn build_deltas(
    pending: &mut HashMap<JobId, JobStatusSnapshot>,
    last_sent: &mut HashMap<JobId, JobStatusSnapshot>,
) -> Vec<JobDelta> {
    let mut deltas = Vec::with_capacity(pending.len());
    for (job_id, new) in pending.drain() {
        let delta = delta_for(job_id, &new, last_sent.get(&job_id));
        deltas.push(delta);
        last_sent.insert(job_id, new);
    }
    deltas
}

impl JobStatusSubscription {
    async fn run_inner(self, cancel: CancellationToken) {
        let pending = Arc::new(Pending {
            jobs: Mutex::new(self.tracker.get_all_job_status()),
            notify: Notify::new(),
        });
        let changes = self.tracker.subscribe_changes();
        let listener = tokio::spawn(listen_for_changes(changes, pending.clone()));

        let mut last_sent: HashMap<JobId, JobStatusSnapshot> = HashMap::new();

        if self.emit(&pending, &mut last_sent).await.is_err() {
            listener.abort();
            return;
        }

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                _ = wait_for_next_emission(self.min_interval, &pending) => {}
            }

            if self.emit(&pending, &mut last_sent).await.is_err() {
                break;
            }
        }

        listener.abort();
    }

    async fn emit(
        &self,
        pending: &Pending,
        last_sent: &mut HashMap<JobId, JobStatusSnapshot>,
    ) -> Result<(), SubscriptionError> {
        let deltas = {
            let mut jobs = pending.jobs.lock().await;
            build_deltas(&mut jobs, last_sent)
        };

        // A stray wake can outlive the change it signalled (draining and the
        // `notify_one` permit race independently); skip the send rather than
        // emit an empty `job_list`.
        if deltas.is_empty() {
            return Ok(());
        }

        let message = EventMessage {
            subscription_id: self.id,
            event: Event::JobList { jobs: deltas },
        };
        let payload = serde_json::to_string(&message).expect("event message is always valid json");
        self.socket
            .send(ByteString::from(payload))
            .await
            .map_err(SubscriptionError::from)
    }
}

async fn wait_for_next_emission(min_interval: Duration, pending: &Pending) {
    tokio::join!(tokio::time::sleep(min_interval), pending.notify.notified());
}

#[async_trait::async_trait]
impl SubscriptionTask for JobStatusSubscription {
    fn id(&self) -> SubscriptionId {
        self.id
    }

    fn socket_key(&self) -> SocketKey {
        self.socket.key()
    }

    async fn run(self: Box<Self>, cancel: CancellationToken) {
        (*self).run_inner(cancel).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn snapshot(item_count: i64, http_status_counts: HashMap<i32, i64>) -> JobStatusSnapshot {
        JobStatusSnapshot {
            name: "job".into(),
            run_state: crate::model::RunState::Running,
            started_at: Utc::now(),
            completed_at: None,
            item_count,
            http_success_count: 0,
            http_error_count: 0,
            exception_count: 0,
            http_status_counts,
        }
    }

    #[test]
    fn first_delta_carries_full_state() {
        let job_id = JobId(uuid::Uuid::from_bytes([9; 16]));
        let new = snapshot(3, HashMap::from([(200, 3)]));
        let delta = delta_for(job_id, &new, None);

        assert_eq!(delta.item_count, Some(3));
        assert_eq!(delta.name, Some("job".into()));
        assert_eq!(delta.http_status_counts.get(&200), Some(&3));
    }

    #[test]
    fn delta_omits_unchanged_fields_and_unchanged_status_counts() {
        let job_id = JobId(uuid::Uuid::from_bytes([9; 16]));
        let old = snapshot(3, HashMap::from([(200, 3), (404, 1)]));
        let mut new = old.clone();
        new.item_count = 5;
        new.http_status_counts.insert(200, 4); // changed
        // 404 entry unchanged

        let delta = delta_for(job_id, &new, Some(&old));

        assert_eq!(delta.item_count, Some(5));
        assert_eq!(delta.name, None);
        assert_eq!(delta.http_status_counts.get(&200), Some(&4));
        assert_eq!(delta.http_status_counts.get(&404), None);
    }

    #[test]
    fn delta_never_carries_deleted_status_counts() {
        let job_id = JobId(uuid::Uuid::from_bytes([1; 16]));
        let old = snapshot(1, HashMap::from([(500, 2)]));
        let mut new = old.clone();
        new.http_status_counts.remove(&500);

        let delta = delta_for(job_id, &new, Some(&old));
        assert!(delta.http_status_counts.is_empty());
    }

    #[test]
    fn merge_of_all_deltas_equals_last_snapshot() {
        let job_id = JobId(uuid::Uuid::from_bytes([2; 16]));
        let mut last_sent = HashMap::new();
        let mut pending = HashMap::new();

        let first = snapshot(1, HashMap::from([(200, 1)]));
        pending.insert(job_id, first.clone());
        let deltas1 = build_deltas(&mut pending, &mut last_sent);

        let mut second = first.clone();
        second.item_count = 2;
        second.http_status_counts.insert(200, 2);
        pending.insert(job_id, second.clone());
        let deltas2 = build_deltas(&mut pending, &mut last_sent);

        // merge deltas in order
        let mut merged = JobStatusSnapshotPatch::default();
        for delta in deltas1.into_iter().chain(deltas2) {
            merged.apply(&delta);
        }

        assert_eq!(merged.item_count, Some(second.item_count));
        assert_eq!(
            merged.http_status_counts.get(&200),
            Some(&*second.http_status_counts.get(&200).unwrap())
        );
        assert_eq!(last_sent.get(&job_id).unwrap(), &second);
    }

    #[derive(Default)]
    struct JobStatusSnapshotPatch {
        item_count: Option<i64>,
        http_status_counts: HashMap<i32, i64>,
    }

    impl JobStatusSnapshotPatch {
        fn apply(&mut self, delta: &JobDelta) {
            if let Some(item_count) = delta.item_count {
                self.item_count = Some(item_count);
            }
            for (code, count) in &delta.http_status_counts {
                self.http_status_counts.insert(*code, *count);
            }
        }
    }
}
