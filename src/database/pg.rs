use futures_util::future::BoxFuture;
use futures_util::stream::BoxStream;
use futures_util::{FutureExt, StreamExt, TryStreamExt};
use sqlx::{PgPool, Row};

use super::{DatabaseError, DatabaseGateway, ScanItem};
use crate::model::{JobId, JobRow, ResponseBodyRow, ResponseRow};

/// Postgres-backed [`DatabaseGateway`], a thin wrapper over a pooled
/// connection, in the same spirit as the teacher's `database::*` modules
/// that take a `Pool<Postgres>` (or any `Executor`) and hand back typed
/// rows.
#[derive(Clone)]
pub struct PgGateway {
    pool: PgPool,
}

impl PgGateway {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn response_row_from_pg(row: sqlx::postgres::PgRow) -> Result<ResponseRow, DatabaseError> {
    let job_id_bytes: Vec<u8> = row.try_get("job_id")?;
    let job_id = JobId::try_from(job_id_bytes.as_slice())?;

    Ok(ResponseRow {
        job_id,
        insert_sequence: row.try_get("insert_sequence")?,
        body_id: row.try_get("body_id")?,
        url: row.try_get("url")?,
        canonical_url: row.try_get("url_can")?,
        started_at: row.try_get("started_at")?,
        completed_at: row.try_get("completed_at")?,
        duration: row.try_get("duration")?,
        status_code: row.try_get("status_code")?,
        content_type: row.try_get("content_type")?,
        charset: row.try_get("charset")?,
        cost: row.try_get("cost")?,
        is_success: row.try_get("is_success")?,
        headers: row.try_get("headers")?,
    })
}

const RESPONSE_SCAN_QUERY: &str = r#"
    SELECT job_id, insert_sequence, body_id, url, url_can, started_at,
           completed_at, duration, status_code, content_type, charset, cost,
           is_success, headers
    FROM response
    WHERE job_id = $1 AND insert_sequence >= $2
    ORDER BY insert_sequence ASC
"#;

impl DatabaseGateway for PgGateway {
    fn fetch_job_status<'a>(
        &'a self,
        job_id: JobId,
    ) -> BoxFuture<'a, Result<Option<JobRow>, DatabaseError>> {
        async move {
            let row = sqlx::query_as::<_, JobRow>(
                "SELECT run_state, item_count FROM job WHERE job_id = $1",
            )
            .bind(job_id.0.as_bytes().as_slice())
            .fetch_optional(&self.pool)
            .await?;
            Ok(row)
        }
        .boxed()
    }

    fn scan_responses<'a>(&'a self, job_id: JobId, from_sequence: i64) -> BoxStream<'a, ScanItem> {
        let pool = self.pool.clone();

        sqlx::query(RESPONSE_SCAN_QUERY)
            .bind(job_id.0.as_bytes().as_slice())
            .bind(from_sequence)
            .fetch(&self.pool)
            .map_err(DatabaseError::from)
            .and_then(move |pg_row| {
                // Fetched per-row by `body_id` rather than via a SQL join,
                // so a reshuffling join plan can never disturb the outer
                // `insert_sequence` ordering (spec §4.4 step 2a).
                let pool = pool.clone();
                async move {
                    let row = response_row_from_pg(pg_row)?;
                    let body = sqlx::query_as::<_, ResponseBodyRow>(
                        "SELECT body, is_compressed FROM response_body WHERE body_id = $1",
                    )
                    .bind(row.body_id)
                    .fetch_one(&pool)
                    .await?;
                    Ok((row, body))
                }
            })
            .boxed()
    }
}
