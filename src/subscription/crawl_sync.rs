//! Crawl Sync Subscription (spec §4.4): an ordered, resumable replay of one
//! job's crawl items.

use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Duration;

use bytestring::ByteString;
use futures_util::StreamExt;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

use crate::database::DatabaseGateway;
use crate::errors::ProtocolError;
use crate::errors::subscription::SubscriptionError;
use crate::message::{Event, EventMessage, SubscriptionClosedReason};
use crate::model::{JobId, JobStatusSnapshot, RunState};
use crate::sequence::SubscriptionId;
use crate::socket::{Socket, SocketKey};
use crate::token;
use crate::tracker::JobTracker;

use super::SubscriptionTask;

/// Poll interval between replay passes once the cursor has drained (spec
/// §4.4 step 2e).
const POLL_INTERVAL: Duration = Duration::from_secs(1);

pub struct CrawlSyncSubscription {
    id: SubscriptionId,
    tracker: Arc<dyn JobTracker>,
    db: Arc<dyn DatabaseGateway>,
    socket: Arc<dyn Socket>,
    job_id: JobId,
    compression_ok: bool,
    /// Next expected `insert_sequence`. Shared with nothing else; owned
    /// exclusively by the producer loop.
    sequence: u32,
}

impl CrawlSyncSubscription {
    /// Decode an optional resume token and build the subscription.
    /// Existence of `job_id` is the caller's responsibility to check first
    /// (spec §7: an unknown job_id never opens a subscription) — this
    /// constructor only validates the token, per spec §4.2.
    pub fn new(
        id: SubscriptionId,
        tracker: Arc<dyn JobTracker>,
        db: Arc<dyn DatabaseGateway>,
        socket: Arc<dyn Socket>,
        job_id: JobId,
        compression_ok: bool,
        resume_token: Option<&[u8]>,
    ) -> Result<Self, ProtocolError> {
        let sequence = match resume_token {
            Some(bytes) => token::decode(bytes)?,
            None => 0,
        };

        Ok(Self {
            id,
            tracker,
            db,
            socket,
            job_id,
            compression_ok,
            sequence,
        })
    }
}

/// Shared mutable view of the job's current status, updated by the tracker
/// listener and read by the completion predicate (spec §4.4 step 1).
struct TrackedStatus {
    run_state: std::sync::atomic::AtomicU8,
    item_count: AtomicI64,
}

impl TrackedStatus {
    fn new(run_state: RunState, item_count: i64) -> Self {
        Self {
            run_state: std::sync::atomic::AtomicU8::new(run_state as u8),
            item_count: AtomicI64::new(item_count),
        }
    }

    fn update(&self, snapshot: &JobStatusSnapshot) {
        self.run_state
            .store(snapshot.run_state as u8, Ordering::Release);
        self.item_count
            .store(snapshot.item_count, Ordering::Release);
    }

    fn run_state(&self) -> RunState {
        match self.run_state.load(Ordering::Acquire) {
            0 => RunState::Running,
            1 => RunState::Paused,
            2 => RunState::Completed,
            _ => RunState::Cancelled,
        }
    }

    fn item_count(&self) -> i64 {
        self.item_count.load(Ordering::Acquire)
    }
}

fn sync_is_complete(sequence: u32, status: &TrackedStatus) -> bool {
    sequence as i64 >= status.item_count() - 1 && status.run_state().is_terminal()
}

async fn listen_for_status(
    job_id: JobId,
    mut changes: broadcast::Receiver<(JobId, JobStatusSnapshot)>,
    status: Arc<TrackedStatus>,
) {
    loop {
        match changes.recv().await {
            Ok((changed_job, snapshot)) if changed_job == job_id => status.update(&snapshot),
            Ok(_) => {}
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                tracing::warn!(%job_id, skipped, "job status listener lagged, resyncing on next update");
            }
            Err(broadcast::error::RecvError::Closed) => return,
        }
    }
}

impl CrawlSyncSubscription {
    async fn run_inner(mut self, cancel: CancellationToken) {
        let job_id = self.job_id;

        // Step 1: initial status fetch + tracker listener registration.
        let initial = tokio::select! {
            _ = cancel.cancelled() => return,
            result = self.db.fetch_job_status(job_id) => result,
        };
        let initial = match initial {
            Ok(Some(row)) => row,
            Ok(None) => {
                tracing::warn!(%job_id, "crawl sync job disappeared before producer started");
                return;
            }
            Err(err) => {
                tracing::error!(%job_id, error = %err, "crawl sync initial status fetch failed");
                return;
            }
        };

        let status = Arc::new(TrackedStatus::new(initial.run_state, initial.item_count));
        let changes = self.tracker.subscribe_changes();
        let listener = tokio::spawn(listen_for_status(job_id, changes, status.clone()));

        tracing::info!(%job_id, subscription_id = self.id, "syncing items from job");

        let result = self.replay_loop(&cancel, &status).await;

        listener.abort();

        match result {
            Ok(Completion::Cancelled) => {
                // Silent shutdown: no END event (spec §4.4 "Cancellation").
            }
            Ok(Completion::Done) => {
                tracing::info!(%job_id, subscription_id = self.id, "item sync complete");
                let closing = EventMessage {
                    subscription_id: self.id,
                    event: Event::SubscriptionClosed {
                        reason: SubscriptionClosedReason::End,
                    },
                };
                let _ = self.send(&closing).await;
            }
            Err(err) => {
                tracing::error!(%job_id, subscription_id = self.id, error = %err, "crawl sync aborted");
            }
        }

        tracing::info!(%job_id, subscription_id = self.id, "stopped syncing items from job");
    }

    async fn replay_loop(
        &mut self,
        cancel: &CancellationToken,
        status: &TrackedStatus,
    ) -> Result<Completion, SubscriptionError> {
        loop {
            {
                let mut stream = self.db.scan_responses(self.job_id, self.sequence as i64);

                loop {
                    let next = tokio::select! {
                        biased;
                        _ = cancel.cancelled() => return Ok(Completion::Cancelled),
                        item = stream.next() => item,
                    };

                    let (row, body) = match next {
                        Some(item) => item?,
                        None => break,
                    };

                    if row.insert_sequence != self.sequence as i64 {
                        tracing::warn!(
                            job_id = %self.job_id,
                            expected = self.sequence,
                            found = row.insert_sequence,
                            "crawl sync item is out-of-order, resyncing"
                        );
                        self.sequence = row.insert_sequence as u32;
                    }

                    self.sequence += 1;

                    if row.is_success {
                        let sent = tokio::select! {
                            biased;
                            _ = cancel.cancelled() => return Ok(Completion::Cancelled),
                            sent = self.emit_item(row, body) => sent,
                        };
                        sent?;
                    }
                }
                // `stream` drops here, closing the cursor deterministically.
            }

            if sync_is_complete(self.sequence, status) {
                return Ok(Completion::Done);
            }

            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Ok(Completion::Cancelled),
                _ = tokio::time::sleep(POLL_INTERVAL) => {}
            }
        }
    }

    async fn emit_item(
        &self,
        row: crate::model::ResponseRow,
        body: crate::model::ResponseBodyRow,
    ) -> Result<(), SubscriptionError> {
        let (body_bytes, is_body_compressed) = match body.body {
            Some(bytes) if body.is_compressed && !self.compression_ok => {
                let decompressed = decompress_gzip(&bytes);
                (Some(decompressed), false)
            }
            Some(bytes) => (Some(bytes), body.is_compressed),
            None => (None, false),
        };

        let headers = match row.headers {
            serde_json::Value::Object(map) => map
                .into_iter()
                .map(|(k, v)| {
                    let value = match v {
                        serde_json::Value::String(s) => Some(s),
                        serde_json::Value::Null => None,
                        other => Some(other.to_string()),
                    };
                    (k, value)
                })
                .collect(),
            _ => Default::default(),
        };

        let item = crate::model::CrawlItem {
            url: row.url,
            canonical_url: row.canonical_url,
            job_id: row.job_id,
            started_at: row.started_at,
            completed_at: row.completed_at,
            duration: row.duration,
            status_code: row.status_code,
            content_type: row.content_type,
            charset: row.charset,
            cost: row.cost,
            body: body_bytes,
            is_body_compressed,
            is_success: row.is_success,
            headers,
        };

        // Token encodes the post-increment sequence: the value a client
        // resumes from after this item (spec §4.4.1).
        let message = EventMessage {
            subscription_id: self.id,
            event: Event::SyncItem {
                item: item.into(),
                token: token::encode(self.sequence).to_vec(),
            },
        };

        self.send(&message).await
    }

    async fn send(&self, message: &EventMessage) -> Result<(), SubscriptionError> {
        let payload = serde_json::to_string(message).expect("event message is always valid json");
        self.socket
            .send(ByteString::from(payload))
            .await
            .map_err(SubscriptionError::from)
    }
}

fn decompress_gzip(bytes: &[u8]) -> Vec<u8> {
    use std::io::Read;
    let mut decoder = flate2::read::GzDecoder::new(bytes);
    let mut out = Vec::new();
    if let Err(err) = decoder.read_to_end(&mut out) {
        tracing::error!(error = %err, "failed to decompress crawl item body, sending as-is");
        return bytes.to_vec();
    }
    out
}

enum Completion {
    Done,
    Cancelled,
}

#[async_trait::async_trait]
impl SubscriptionTask for CrawlSyncSubscription {
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
