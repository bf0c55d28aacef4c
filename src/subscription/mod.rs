//! Subscription tasks (spec §4.4, §4.5): the two producer kinds the
//! [`crate::manager::SubscriptionManager`] runs, plus the trait it drives
//! them through.

pub mod crawl_sync;
pub mod job_status;

pub use crawl_sync::CrawlSyncSubscription;
pub use job_status::JobStatusSubscription;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::sequence::SubscriptionId;
use crate::socket::SocketKey;

/// A running subscription, as the manager sees it: something with an id, a
/// socket it belongs to, and a cooperative-cancellation producer loop.
///
/// `run` consumes `Box<Self>` rather than `&mut self` so the manager can
/// store subscriptions as `Box<dyn SubscriptionTask>` and hand ownership to
/// the spawned task outright, same shape as the teacher's `subs::run_task`
/// style handlers that take ownership of the state they drive.
#[async_trait]
pub trait SubscriptionTask: Send + 'static {
    fn id(&self) -> SubscriptionId;
    fn socket_key(&self) -> SocketKey;
    async fn run(self: Box<Self>, cancel: CancellationToken);
}

/// Dispatches to whichever concrete subscription kind was constructed for a
/// client's request (spec §4.2 "Construction").
pub enum Subscription {
    CrawlSync(Box<CrawlSyncSubscription>),
    JobStatus(Box<JobStatusSubscription>),
}

#[async_trait]
impl SubscriptionTask for Subscription {
    fn id(&self) -> SubscriptionId {
        match self {
            Subscription::CrawlSync(task) => task.id(),
            Subscription::JobStatus(task) => task.id(),
        }
    }

    fn socket_key(&self) -> SocketKey {
        match self {
            Subscription::CrawlSync(task) => task.socket_key(),
            Subscription::JobStatus(task) => task.socket_key(),
        }
    }

    async fn run(self: Box<Self>, cancel: CancellationToken) {
        match *self {
            Subscription::CrawlSync(task) => task.run(cancel).await,
            Subscription::JobStatus(task) => task.run(cancel).await,
        }
    }
}
