use crate::token::InvalidSyncToken;

/// Malformed requests and not-found targets (spec §7 items 1-2). None of
/// these open a subscription; the caller replies with a negative response.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ProtocolError {
    #[error("invalid sync token")]
    InvalidSyncToken,
    #[error("no job with id {0}")]
    JobNotFound(String),
}

impl From<InvalidSyncToken> for ProtocolError {
    fn from(_: InvalidSyncToken) -> Self {
        ProtocolError::InvalidSyncToken
    }
}
