//! The server-to-client message envelope (spec §6).
//!
//! The exact wire codec is out of scope (spec §1): the original protocol
//! encodes these as protobuf, this crate represents the same shapes as
//! plain Rust types serialized with `serde_json`, the way the teacher
//! serializes `WebSocketMessage` before writing it to a socket. Swapping the
//! codec is a matter of changing how a `ServerMessage` is turned into
//! bytes, not how the subscription engine builds one.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::model::{CrawlItem, JobId};
use crate::sequence::SubscriptionId;

/// A close reason for a `subscription_closed` event. Only `End` is ever
/// emitted by this crate (spec §6); the others exist for protocol
/// completeness (open question in spec §9: whether clients require them).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SubscriptionClosedReason {
    End,
    Cancelled,
    Error,
}

#[derive(Debug, Clone, Serialize)]
pub struct CrawlItemJson {
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
    #[serde(skip_serializing_if = "Option::is_none")]
    pub body: Option<Vec<u8>>,
    pub is_body_compressed: bool,
    pub is_success: bool,
    pub headers: HashMap<String, String>,
}

impl From<CrawlItem> for CrawlItemJson {
    fn from(item: CrawlItem) -> Self {
        // Null header values are normalised to empty strings (spec §4.4.1).
        let headers = item
            .headers
            .into_iter()
            .map(|(k, v)| (k, v.unwrap_or_default()))
            .collect();

        Self {
            url: item.url,
            canonical_url: item.canonical_url,
            job_id: item.job_id,
            started_at: item.started_at,
            completed_at: item.completed_at,
            duration: item.duration,
            status_code: item.status_code,
            content_type: item.content_type,
            charset: item.charset,
            cost: item.cost,
            body: item.body,
            is_body_compressed: item.is_body_compressed,
            is_success: item.is_success,
            headers,
        }
    }
}

/// A single job's delta-encoded status update (spec §4.5 "Delta encoding").
/// Every field but `job_id` is omitted from the wire message when it hasn't
/// changed since the last transmission for that job.
#[derive(Debug, Clone, Default, Serialize)]
pub struct JobDelta {
    pub job_id: JobId,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub run_state: Option<crate::model::RunState>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<Option<DateTime<Utc>>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub item_count: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub http_success_count: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub http_error_count: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exception_count: Option<i64>,
    #[serde(skip_serializing_if = "HashMap::is_empty")]
    pub http_status_counts: HashMap<i32, i64>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum Event {
    SyncItem {
        item: CrawlItemJson,
        /// The post-increment sequence number a client resumes from,
        /// encoded per spec §4.2.
        token: Vec<u8>,
    },
    JobList {
        jobs: Vec<JobDelta>,
    },
    SubscriptionClosed {
        reason: SubscriptionClosedReason,
    },
}

/// One outgoing event, addressed to the subscription that produced it.
#[derive(Debug, Clone, Serialize)]
pub struct EventMessage {
    pub subscription_id: SubscriptionId,
    #[serde(flatten)]
    pub event: Event,
}

/// A reply to a client request that never opened a subscription (spec §7:
/// protocol errors, not-found targets, manager-state errors).
#[derive(Debug, Clone, Serialize)]
pub struct ErrorResponse {
    pub id: Option<u64>,
    pub ok: bool,
    pub error: String,
}

impl ErrorResponse {
    pub fn new(id: Option<u64>, error: impl Into<String>) -> Self {
        Self {
            id,
            ok: false,
            error: error.into(),
        }
    }
}
