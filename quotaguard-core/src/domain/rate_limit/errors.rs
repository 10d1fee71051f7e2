//! Admission control errors

use thiserror::Error;

/// Errors returned to callers of the coordinator.
///
/// A quota denial is not an error; it is reported through
/// `RateLimitResult::allowed`.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RateLimitError {
    #[error("Subject id cannot be empty")]
    EmptySubject,

    #[error("Resource path cannot be empty")]
    EmptyResource,
}

/// Distributed store failures. Never surfaced to end users.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Invalid store URL: {0}")]
    InvalidUrl(#[source] redis::RedisError),

    #[error("Store is disconnected")]
    Disconnected,

    #[error("Store operation '{operation}' timed out after {timeout_ms}ms")]
    Timeout {
        operation: &'static str,
        timeout_ms: u64,
    },

    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("Unexpected reply from store: {0}")]
    UnexpectedReply(String),
}

impl StoreError {
    /// Whether retrying the same round trip may succeed
    pub fn is_transient(&self) -> bool {
        match self {
            StoreError::Timeout { .. } => true,
            StoreError::Redis(e) => {
                e.is_io_error() || e.is_timeout() || e.is_connection_dropped()
            }
            _ => false,
        }
    }
}

/// Tier lookup failures; the coordinator falls back to the free tier.
#[derive(Error, Debug)]
pub enum TierResolutionError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Tier lookup timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },
}
