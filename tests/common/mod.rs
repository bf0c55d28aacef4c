//! Fake collaborators for exercising the subscription engine without a real
//! Postgres instance or real socket.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use bytestring::ByteString;
use chrono::{DateTime, Utc};
use futures_util::future::BoxFuture;
use futures_util::stream::{self, BoxStream, StreamExt};
use uuid::Uuid;

use starbelly_subs::database::{DatabaseError, DatabaseGateway, ScanItem};
use starbelly_subs::model::{JobId, JobRow, JobStatusSnapshot, ResponseBodyRow, ResponseRow, RunState};
use starbelly_subs::{Socket, SocketError, SocketKey};

pub fn job_id(byte: u8) -> JobId {
    JobId(Uuid::from_bytes([byte; 16]))
}

pub fn job_snapshot(run_state: RunState, item_count: i64) -> JobStatusSnapshot {
    JobStatusSnapshot {
        name: "job".into(),
        run_state,
        started_at: DateTime::from_timestamp(0, 0).unwrap(),
        completed_at: None,
        item_count,
        http_success_count: 0,
        http_error_count: 0,
        exception_count: 0,
        http_status_counts: HashMap::new(),
    }
}

pub fn response_row(job: JobId, insert_sequence: i64, is_success: bool) -> ResponseRow {
    let now: DateTime<Utc> = DateTime::from_timestamp(0, 0).unwrap();
    ResponseRow {
        job_id: job,
        insert_sequence,
        body_id: insert_sequence,
        url: format!("http://example.test/{insert_sequence}"),
        canonical_url: format!("http://example.test/{insert_sequence}"),
        started_at: now,
        completed_at: now,
        duration: 0.1,
        status_code: if is_success { 200 } else { 500 },
        content_type: "text/html".into(),
        charset: Some("utf-8".into()),
        cost: 1.0,
        is_success,
        headers: serde_json::json!({ "content-length": "0" }),
    }
}

pub fn response_body() -> ResponseBodyRow {
    ResponseBodyRow {
        body: Some(b"hello".to_vec()),
        is_compressed: false,
    }
}

/// An in-memory [`DatabaseGateway`]: a job table and a response table, both
/// guarded by a plain `std::sync::Mutex` since every access is a quick
/// synchronous copy, never held across an `.await`.
#[derive(Clone, Default)]
pub struct FakeDatabase {
    inner: Arc<Mutex<FakeDatabaseState>>,
}

#[derive(Default)]
struct FakeDatabaseState {
    jobs: HashMap<JobId, JobRow>,
    rows: Vec<(ResponseRow, ResponseBodyRow)>,
}

impl FakeDatabase {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_job(&self, job: JobId, run_state: RunState, item_count: i64) {
        self.inner
            .lock()
            .unwrap()
            .jobs
            .insert(job, JobRow { run_state, item_count });
    }

    pub fn push_row(&self, row: ResponseRow, body: ResponseBodyRow) {
        self.inner.lock().unwrap().rows.push((row, body));
    }
}

impl DatabaseGateway for FakeDatabase {
    fn fetch_job_status<'a>(
        &'a self,
        job_id: JobId,
    ) -> BoxFuture<'a, Result<Option<JobRow>, DatabaseError>> {
        let row = self.inner.lock().unwrap().jobs.get(&job_id).cloned();
        Box::pin(async move { Ok(row) })
    }

    fn scan_responses<'a>(&'a self, job_id: JobId, from_sequence: i64) -> BoxStream<'a, ScanItem> {
        let items: Vec<ScanItem> = self
            .inner
            .lock()
            .unwrap()
            .rows
            .iter()
            .filter(|(row, _)| row.job_id == job_id && row.insert_sequence >= from_sequence)
            .cloned()
            .map(Ok)
            .collect();

        stream::iter(items).boxed()
    }
}

/// A socket that records every outgoing payload instead of writing to a
/// real connection.
pub struct FakeSocket {
    key: SocketKey,
    pub sent: Mutex<Vec<String>>,
}

impl FakeSocket {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            key: SocketKey::new(Uuid::new_v4()),
            sent: Mutex::new(Vec::new()),
        })
    }

    pub fn messages(&self) -> Vec<serde_json::Value> {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .map(|s| serde_json::from_str(s).unwrap())
            .collect()
    }
}

#[async_trait]
impl Socket for FakeSocket {
    fn key(&self) -> SocketKey {
        self.key
    }

    fn remote_address(&self) -> SocketAddr {
        SocketAddr::from(([127, 0, 0, 1], 0))
    }

    async fn send(&self, payload: ByteString) -> Result<(), SocketError> {
        self.sent.lock().unwrap().push(payload.to_string());
        Ok(())
    }
}
