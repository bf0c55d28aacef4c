//! Transport-agnostic socket abstraction.
//!
//! The subscription engine never owns a socket: the transport (an
//! `actix-ws` session, a test harness, whatever) owns the connection and is
//! responsible for closing it. Subscriptions only need to send bytes back
//! out on it and to know which socket they belong to, so a connected client
//! can be used as a grouping key without the engine caring what it actually
//! is.

use std::fmt;
use std::net::SocketAddr;

use async_trait::async_trait;
use bytestring::ByteString;
use uuid::Uuid;

/// Opaque identity of a connected client, used as the grouping key for the
/// [`crate::manager::SubscriptionManager`]'s registry.
///
/// The manager treats two sockets as the same connection iff their keys are
/// equal; it never reaches into a socket's contents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SocketKey(Uuid);

impl SocketKey {
    pub fn new(id: Uuid) -> Self {
        Self(id)
    }
}

impl fmt::Display for SocketKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SocketError {
    #[error("socket is closed")]
    Closed,
}

/// One connected client, as seen by a subscription producer.
///
/// `send` is the only suspension point a subscription uses on a socket, and
/// it must be a cancellation point: an implementor backed by a real
/// connection should make sure a cancelled write returns promptly rather
/// than blocking forever.
#[async_trait]
pub trait Socket: Send + Sync + 'static {
    /// Grouping key used by the manager; stable for the lifetime of the
    /// connection.
    fn key(&self) -> SocketKey;

    /// Remote address, for diagnostics only.
    fn remote_address(&self) -> SocketAddr;

    /// Send a single message. An error means the socket is gone; the caller
    /// (a subscription producer) should terminate without treating this as
    /// a protocol failure.
    async fn send(&self, payload: ByteString) -> Result<(), SocketError>;
}
