use thiserror::Error;

/// Errors raised by operations that act on a single named subscription or a
/// single inbound payload. Fan-out paths never raise these; per-recipient
/// failures are captured in the returned outcome instead.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DispatchError {
    #[error("subscription {0} not found")]
    NotFound(String),
    #[error("subscription {0} is inactive")]
    Inactive(String),
    #[error("subscription {0} has expired")]
    Expired(String),
    #[error("malformed alert payload: {0}")]
    Format(String),
}

/// A push sink rejected a write. Recorded in broadcast outcomes and retry
/// buffers, never raised to the router's caller.
#[derive(Debug, Clone, Error)]
#[error("delivery failed: {0}")]
pub struct DeliveryFailure(pub String);
