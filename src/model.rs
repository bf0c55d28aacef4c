//! Data transferred between the collaborators and the subscription engine
//! (spec §3).

use std::collections::HashMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A job's 16-byte binary identifier, the same way the original treats
/// `job_id` as a UUID. Stored as `bytea`; bound to queries as a byte slice
/// and decoded by hand (see `database::pg`) since sqlx has no built-in codec
/// for `Uuid` over a raw `bytea` column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct JobId(pub Uuid);

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("job_id column was {0} bytes, expected 16")]
pub struct JobIdLengthError(pub usize);

impl TryFrom<&[u8]> for JobId {
    type Error = JobIdLengthError;

    fn try_from(value: &[u8]) -> Result<Self, Self::Error> {
        Uuid::from_slice(value)
            .map(JobId)
            .map_err(|_| JobIdLengthError(value.len()))
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

/// Lifecycle of a crawl, as reported by the job tracker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "run_state", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum RunState {
    Running,
    Paused,
    Completed,
    Cancelled,
}

impl RunState {
    /// True for the terminal states that, combined with the item-count
    /// catching up to `sequence`, end a crawl sync (spec §4.4 "Completion
    /// predicate").
    pub fn is_terminal(self) -> bool {
        matches!(self, RunState::Completed | RunState::Cancelled)
    }
}

/// A persisted crawl item, replayed by the Crawl Sync Subscription.
#[derive(Debug, Clone, PartialEq)]
pub struct CrawlItem {
    pub url: String,
    pub canonical_url: String,
    pub job_id: JobId,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
    pub duration: f64,
    pub status_code: i32,
    pub content_type: String,
    pub charset: Option<String>,
    pub cost: f64,
    pub body: Option<Vec<u8>>,
    pub is_body_compressed: bool,
    pub is_success: bool,
    pub headers: HashMap<String, Option<String>>,
}

/// One row from the `response` table, prior to being joined with its body
/// (spec §4.4 step 2a: "a plain equi-join that reshuffles is forbidden").
/// `job_id` is decoded by hand in `database::pg` (see [`JobId`]), so this
/// does not derive `sqlx::FromRow`.
#[derive(Debug, Clone)]
pub struct ResponseRow {
    pub job_id: JobId,
    pub insert_sequence: i64,
    pub body_id: i64,
    pub url: String,
    pub canonical_url: String,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
    pub duration: f64,
    pub status_code: i32,
    pub content_type: String,
    pub charset: Option<String>,
    pub cost: f64,
    pub is_success: bool,
    pub headers: serde_json::Value,
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct ResponseBodyRow {
    pub body: Option<Vec<u8>>,
    pub is_compressed: bool,
}

/// The `job` table row consumed by the initial status fetch (spec §4.4
/// step 1).
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct JobRow {
    pub run_state: RunState,
    pub item_count: i64,
}

/// Status of one job, as exposed by the job tracker and delta-encoded by
/// the Job Status Subscription.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobStatusSnapshot {
    pub name: String,
    pub run_state: RunState,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub item_count: i64,
    pub http_success_count: i64,
    pub http_error_count: i64,
    pub exception_count: i64,
    pub http_status_counts: HashMap<i32, i64>,
}
