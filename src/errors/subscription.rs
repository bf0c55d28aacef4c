use crate::database::DatabaseError;
use crate::socket::SocketError;

/// Failures a subscription producer can hit mid-replay (spec §7 items 3-4).
/// These terminate the task; they are logged at the subscription boundary,
/// not propagated to the caller of `add`.
#[derive(Debug, thiserror::Error)]
pub enum SubscriptionError {
    #[error("storage error: {0}")]
    Storage(#[from] DatabaseError),
    #[error("transport error: {0}")]
    Transport(#[from] SocketError),
}
