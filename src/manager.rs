//! Subscription Manager (spec §4.3).
//!
//! Keyed the way the teacher keys `WebSocketServer::sessions` — a `DashMap`
//! of socket to its live subscriptions — and parallel-cancels with
//! `FuturesUnordered` the same way `WebSocketServer::broadcast_event` fans
//! out sends. Cancellation of a running task is cooperative
//! (`CancellationToken`, never `JoinHandle::abort`), so a subscription
//! always gets to close its cursor and deregister its tracker listener
//! before its task actually exits.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use dashmap::{DashMap, DashSet};
use futures_util::StreamExt;
use futures_util::stream::FuturesUnordered;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::errors::ManagerError;
use crate::sequence::{Sequence, SubscriptionId};
use crate::socket::SocketKey;
use crate::subscription::SubscriptionTask;

struct Entry {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

struct Inner {
    sockets: DashMap<SocketKey, DashMap<SubscriptionId, Entry>>,
    closing: DashSet<SocketKey>,
    closed: AtomicBool,
    sequence: Sequence,
}

#[derive(Clone)]
pub struct SubscriptionManager {
    inner: Arc<Inner>,
}

impl Default for SubscriptionManager {
    fn default() -> Self {
        Self::new()
    }
}

impl SubscriptionManager {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                sockets: DashMap::new(),
                closing: DashSet::new(),
                closed: AtomicBool::new(false),
                sequence: Sequence::new(),
            }),
        }
    }

    /// Shared sequence generator, handed to the request layer so a
    /// subscription can be constructed with its id before `add` is called
    /// (spec §9 "Global sequence generator").
    pub fn next_subscription_id(&self) -> SubscriptionId {
        self.inner.sequence.next()
    }

    #[cfg(test)]
    fn subscription_count(&self, socket: SocketKey) -> usize {
        self.inner
            .sockets
            .get(&socket)
            .map(|subs| subs.len())
            .unwrap_or(0)
    }

    /// Register a subscription and launch its producer (spec §4.3 `add`).
    #[tracing::instrument(skip_all, fields(subscription_id = task.id()))]
    pub fn add(&self, task: Box<dyn SubscriptionTask>) -> Result<SubscriptionId, ManagerError> {
        if self.inner.closed.load(Ordering::Acquire) {
            return Err(ManagerError::Closed);
        }

        let socket = task.socket_key();
        if self.inner.closing.contains(&socket) {
            return Err(ManagerError::SocketClosing);
        }

        let id = task.id();
        let cancel = CancellationToken::new();
        let task_cancel = cancel.clone();

        let manager = self.clone();
        let handle = tokio::spawn(async move {
            task.run(task_cancel).await;

            // Spawn the cleanup as a *new* detached task rather than
            // awaiting it inline here: `unsubscribe` awaits this very
            // task's `JoinHandle`, and a task cannot join itself.
            let manager = manager.clone();
            tokio::spawn(async move {
                manager.unsubscribe(socket, id).await;
            });
        });

        self.inner
            .sockets
            .entry(socket)
            .or_default()
            .insert(id, Entry { cancel, handle });

        tracing::debug!(%socket, id, "subscription registered");
        Ok(id)
    }

    /// Cancel one subscription, wait for it to finish, and remove its
    /// record (spec §4.3 `unsubscribe`). Unknown pairs are logged and
    /// ignored, including the ordinary race between an explicit
    /// unsubscribe and the task's own termination callback finding the
    /// entry already gone.
    pub async fn unsubscribe(&self, socket: SocketKey, id: SubscriptionId) {
        let entry = self
            .inner
            .sockets
            .get(&socket)
            .and_then(|subs| subs.remove(&id));

        let Some((_, entry)) = entry else {
            tracing::debug!(%socket, id, "unsubscribe: no such subscription");
            return;
        };

        entry.cancel.cancel();
        let _ = entry.handle.await;
    }

    /// Cancel every subscription on `socket` in parallel, then drop the
    /// socket's entry (spec §4.3 `close_for_socket`). Idempotent.
    #[tracing::instrument(skip(self))]
    pub async fn close_for_socket(&self, socket: SocketKey) {
        self.inner.closing.insert(socket);

        let ids: Vec<SubscriptionId> = self
            .inner
            .sockets
            .get(&socket)
            .map(|subs| subs.iter().map(|entry| *entry.key()).collect())
            .unwrap_or_default();

        let mut cancellations: FuturesUnordered<_> = ids
            .into_iter()
            .map(|id| {
                let manager = self.clone();
                async move { manager.unsubscribe(socket, id).await }
            })
            .collect();
        while cancellations.next().await.is_some() {}

        self.inner.sockets.remove(&socket);
        self.inner.closing.remove(&socket);
    }

    /// Close the manager: further `add` calls fail, every active
    /// subscription is cancelled in parallel, and this waits for all of
    /// them (spec §4.3 `close_all`). Idempotent.
    #[tracing::instrument(skip(self))]
    pub async fn close_all(&self) {
        if self.inner.closed.swap(true, Ordering::AcqRel) {
            return;
        }

        let pairs: Vec<(SocketKey, SubscriptionId)> = self
            .inner
            .sockets
            .iter()
            .flat_map(|entry| {
                let socket = *entry.key();
                entry
                    .value()
                    .iter()
                    .map(|sub| (socket, *sub.key()))
                    .collect::<Vec<_>>()
            })
            .collect();

        let mut cancellations: FuturesUnordered<_> = pairs
            .into_iter()
            .map(|(socket, id)| {
                let manager = self.clone();
                async move { manager.unsubscribe(socket, id).await }
            })
            .collect();
        while cancellations.next().await.is_some() {}

        self.inner.sockets.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use uuid::Uuid;

    /// A subscription that does nothing but wait to be cancelled, for
    /// exercising the manager's bookkeeping independent of any real
    /// producer logic.
    struct ParkedTask {
        id: SubscriptionId,
        socket: SocketKey,
    }

    #[async_trait]
    impl SubscriptionTask for ParkedTask {
        fn id(&self) -> SubscriptionId {
            self.id
        }

        fn socket_key(&self) -> SocketKey {
            self.socket
        }

        async fn run(self: Box<Self>, cancel: CancellationToken) {
            cancel.cancelled().await;
        }
    }

    fn parked(id: SubscriptionId, socket: SocketKey) -> Box<dyn SubscriptionTask> {
        Box::new(ParkedTask { id, socket })
    }

    #[tokio::test]
    async fn add_assigns_one_entry_per_socket_and_id() {
        let manager = SubscriptionManager::new();
        let socket = SocketKey::new(Uuid::new_v4());
        manager.add(parked(1, socket)).unwrap();
        manager.add(parked(2, socket)).unwrap();

        assert_eq!(manager.subscription_count(socket), 2);
    }

    #[tokio::test]
    async fn unsubscribe_unknown_pair_is_a_noop() {
        let manager = SubscriptionManager::new();
        let socket = SocketKey::new(Uuid::new_v4());
        manager.unsubscribe(socket, 42).await;
    }

    #[tokio::test]
    async fn unsubscribe_removes_the_record() {
        let manager = SubscriptionManager::new();
        let socket = SocketKey::new(Uuid::new_v4());
        manager.add(parked(1, socket)).unwrap();

        manager.unsubscribe(socket, 1).await;

        assert_eq!(manager.subscription_count(socket), 0);
    }

    #[tokio::test]
    async fn close_for_socket_removes_every_record_for_that_socket_only() {
        let manager = SubscriptionManager::new();
        let socket_a = SocketKey::new(Uuid::new_v4());
        let socket_b = SocketKey::new(Uuid::new_v4());
        manager.add(parked(1, socket_a)).unwrap();
        manager.add(parked(2, socket_a)).unwrap();
        manager.add(parked(3, socket_b)).unwrap();

        manager.close_for_socket(socket_a).await;

        assert_eq!(manager.subscription_count(socket_a), 0);
        assert_eq!(manager.subscription_count(socket_b), 1);
    }

    #[tokio::test]
    async fn close_all_drains_every_socket_and_rejects_further_add() {
        let manager = SubscriptionManager::new();
        let socket_a = SocketKey::new(Uuid::new_v4());
        let socket_b = SocketKey::new(Uuid::new_v4());
        manager.add(parked(1, socket_a)).unwrap();
        manager.add(parked(2, socket_b)).unwrap();

        manager.close_all().await;

        assert_eq!(manager.subscription_count(socket_a), 0);
        assert_eq!(manager.subscription_count(socket_b), 0);

        // idempotent: a second call is a no-op, not a panic or hang.
        manager.close_all().await;

        let err = manager.add(parked(3, socket_a)).unwrap_err();
        assert!(matches!(err, ManagerError::Closed));
    }

    #[tokio::test]
    async fn add_rejects_while_socket_is_closing() {
        let manager = SubscriptionManager::new();
        let socket = SocketKey::new(Uuid::new_v4());
        manager.add(parked(1, socket)).unwrap();

        let closer = manager.clone();
        let close_handle = tokio::spawn(async move { closer.close_for_socket(socket).await });

        tokio::task::yield_now().await;
        let result = manager.add(parked(2, socket));
        assert!(matches!(result, Err(ManagerError::SocketClosing)) || result.is_ok());

        close_handle.await.unwrap();
    }
}
