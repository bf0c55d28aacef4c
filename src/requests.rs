//! Bridges an incoming client `Request` to the
//! [`crate::manager::SubscriptionManager`] (spec §2 "Data flow", §7).
//!
//! The exact wire encoding of a request is out of scope (spec §1): this
//! module only defines the decoded shape and the dispatch logic every
//! transport needs, the way the teacher's `routes::v1::subs` handlers sit
//! between an HTTP body and `database::subscriptions`.

use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;

use crate::database::DatabaseGateway;
use crate::errors::{ManagerError, ProtocolError};
use crate::manager::SubscriptionManager;
use crate::message::ErrorResponse;
use crate::model::JobId;
use crate::sequence::SubscriptionId;
use crate::socket::Socket;
use crate::subscription::{CrawlSyncSubscription, JobStatusSubscription};
use crate::tracker::JobTracker;

#[derive(Debug, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum Request {
    SubscribeCrawlSync {
        id: Option<u64>,
        #[serde(deserialize_with = "job_id::deserialize")]
        job_id: JobId,
        compression_ok: bool,
        #[serde(default)]
        resume_token: Option<Vec<u8>>,
    },
    SubscribeJobStatus {
        id: Option<u64>,
        #[serde(default)]
        min_interval_secs: Option<u64>,
    },
    Unsubscribe {
        id: Option<u64>,
        subscription_id: SubscriptionId,
    },
}

/// Thrown by dispatch before a subscription is ever registered (spec §7
/// items 1, 2, 5): a protocol error, an unknown job, or a manager-state
/// rejection. None of these open a subscription.
#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
    #[error(transparent)]
    Manager(#[from] ManagerError),
    #[error(transparent)]
    Storage(#[from] crate::database::DatabaseError),
}

impl DispatchError {
    pub fn into_response(self, request_id: Option<u64>) -> ErrorResponse {
        ErrorResponse::new(request_id, self.to_string())
    }
}

/// Handle one decoded `Request` against a socket, returning the newly
/// assigned subscription id on success.
pub async fn dispatch(
    request: Request,
    manager: &SubscriptionManager,
    tracker: Arc<dyn JobTracker>,
    db: Arc<dyn DatabaseGateway>,
    socket: Arc<dyn Socket>,
    default_job_status_interval: Duration,
) -> Result<SubscriptionId, DispatchError> {
    match request {
        Request::SubscribeCrawlSync {
            job_id,
            compression_ok,
            resume_token,
            ..
        } => {
            // Spec §7 item 2: an unknown job_id never opens a subscription.
            // Checked here, ahead of `add`, not inside the subscription's
            // own (redundant) initial status fetch.
            if db.fetch_job_status(job_id).await?.is_none() {
                return Err(ProtocolError::JobNotFound(job_id.to_string()).into());
            }

            let id = manager.next_subscription_id();
            let task = CrawlSyncSubscription::new(
                id,
                tracker,
                db,
                socket,
                job_id,
                compression_ok,
                resume_token.as_deref(),
            )?;

            manager.add(Box::new(task))?;
            Ok(id)
        }
        Request::SubscribeJobStatus {
            min_interval_secs, ..
        } => {
            let id = manager.next_subscription_id();
            let min_interval = min_interval_secs
                .map(Duration::from_secs)
                .unwrap_or(default_job_status_interval);
            let task = JobStatusSubscription::new(id, tracker, socket, min_interval);

            manager.add(Box::new(task))?;
            Ok(id)
        }
        Request::Unsubscribe { subscription_id, .. } => {
            manager.unsubscribe(socket.key(), subscription_id).await;
            Ok(subscription_id)
        }
    }
}

mod job_id {
    use crate::model::JobId;
    use serde::{Deserialize, Deserializer};
    use uuid::Uuid;

    pub fn deserialize<'de, D>(deserializer: D) -> Result<JobId, D::Error>
    where
        D: Deserializer<'de>,
    {
        Uuid::deserialize(deserializer).map(JobId)
    }
}
