//! Database Gateway collaborator (spec §4.6).
//!
//! Scoped connection acquisition with guaranteed release is `sqlx::PgPool`'s
//! job already; this module just shapes the two queries the subscription
//! engine needs on top of it: the job status lookup and the ordered,
//! order-preserving response/body scan.

pub mod pg;

use futures_util::stream::BoxStream;

use crate::model::{JobId, JobRow, ResponseBodyRow, ResponseRow};

pub use pg::PgGateway;

#[derive(Debug, thiserror::Error)]
pub enum DatabaseError {
    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),
    #[error("malformed job_id column: {0}")]
    MalformedJobId(#[from] crate::model::JobIdLengthError),
}

/// One item replayed by a Crawl Sync Subscription, already joined with its
/// body row in outer-scan order (spec §4.4 step 2a).
pub type ScanItem = Result<(ResponseRow, ResponseBodyRow), DatabaseError>;

pub trait DatabaseGateway: Send + Sync + 'static {
    /// Fetch the current `run_state`/`item_count` for a job (spec §4.4 step
    /// 1). `None` means the job doesn't exist.
    fn fetch_job_status<'a>(
        &'a self,
        job_id: JobId,
    ) -> futures_util::future::BoxFuture<'a, Result<Option<JobRow>, DatabaseError>>;

    /// Ordered range scan over `response` for `job_id` where
    /// `insert_sequence >= from_sequence`, each row already merged with its
    /// `response_body` row, in `insert_sequence` ascending order (spec §4.4
    /// step 2a). Dropping the returned stream closes the cursor.
    fn scan_responses<'a>(
        &'a self,
        job_id: JobId,
        from_sequence: i64,
    ) -> BoxStream<'a, ScanItem>;
}
