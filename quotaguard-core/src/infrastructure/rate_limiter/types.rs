//! Rate limiter types and core data structures

use serde::Serialize;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Outcome of a single window store check
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowDecision {
    pub allowed: bool,
    /// Requests left in the window after this one
    pub remaining: u32,
    /// Epoch milliseconds at which a slot frees up (denied) or the window
    /// started by this request ends (allowed)
    pub reset_at_ms: u64,
}

impl WindowDecision {
    pub fn allowed(remaining: u32, reset_at_ms: u64) -> Self {
        Self {
            allowed: true,
            remaining,
            reset_at_ms,
        }
    }

    pub fn denied(reset_at_ms: u64) -> Self {
        Self {
            allowed: false,
            remaining: 0,
            reset_at_ms,
        }
    }
}

/// Which store produced a decision
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Backend {
    /// Shared sliding window store
    Distributed,
    /// Per-process fixed window fallback
    Local,
    /// Rate limiting is switched off
    Disabled,
}

impl Backend {
    /// Get the backend name for logging and metrics
    pub fn as_str(&self) -> &'static str {
        match self {
            Backend::Distributed => "distributed",
            Backend::Local => "local",
            Backend::Disabled => "disabled",
        }
    }
}

impl std::fmt::Display for Backend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Result of a rate limit check
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateLimitResult {
    /// Whether the request is allowed
    pub allowed: bool,
    /// Maximum requests allowed in the window
    pub limit: u32,
    /// Remaining requests in the current window
    pub remaining: u32,
    /// Epoch milliseconds when the quota frees up
    pub reset_at_ms: u64,
    /// Policy message (only set when blocked)
    pub message: Option<String>,
    /// The tier that was applied
    pub tier: String,
    /// The store that made the decision
    pub backend: Backend,
    /// Epoch milliseconds at which the check ran
    pub checked_at_ms: u64,
}

impl RateLimitResult {
    /// Result reported while rate limiting is disabled
    pub fn unlimited(checked_at_ms: u64) -> Self {
        Self {
            allowed: true,
            limit: u32::MAX,
            remaining: u32::MAX,
            reset_at_ms: checked_at_ms,
            message: None,
            tier: String::new(),
            backend: Backend::Disabled,
            checked_at_ms,
        }
    }

    /// Seconds until a denied caller should retry: `ceil((reset - now) / 1000)`,
    /// at least 1 when blocked and 0 when allowed.
    pub fn retry_after_secs(&self) -> u64 {
        if self.allowed {
            return 0;
        }
        self.reset_at_ms
            .saturating_sub(self.checked_at_ms)
            .div_ceil(1000)
            .max(1)
    }
}

/// Lifecycle state of the distributed store as seen by the coordinator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StoreHealth {
    Available,
    Unavailable,
}

/// Connection events emitted by a distributed store client
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreEvent {
    /// A connection was (re)established and answered a PING
    Connected,
    /// The connection was dropped after an operation failure
    Disconnected,
}

/// Operator-facing status of the coordinator
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RateLimiterStatus {
    pub using_distributed_store: bool,
    pub enabled: bool,
    pub health: StoreHealth,
    pub tracked_local_keys: usize,
}

/// Get current time in milliseconds since Unix epoch
pub fn current_time_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or(Duration::ZERO)
        .as_millis() as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    fn denied_at(reset_at_ms: u64, checked_at_ms: u64) -> RateLimitResult {
        RateLimitResult {
            allowed: false,
            limit: 3,
            remaining: 0,
            reset_at_ms,
            message: Some("slow down".to_string()),
            tier: "free".to_string(),
            backend: Backend::Distributed,
            checked_at_ms,
        }
    }

    #[test]
    fn test_backend_display() {
        assert_eq!(Backend::Distributed.as_str(), "distributed");
        assert_eq!(Backend::Local.to_string(), "local");
    }

    #[test]
    fn test_retry_after_rounds_up() {
        assert_eq!(denied_at(60_000, 3).retry_after_secs(), 60);
        assert_eq!(denied_at(1_001, 0).retry_after_secs(), 2);
        assert_eq!(denied_at(1_000, 1_000).retry_after_secs(), 1);
    }

    #[test]
    fn test_retry_after_zero_when_allowed() {
        let result = RateLimitResult::unlimited(42);
        assert!(result.allowed);
        assert_eq!(result.retry_after_secs(), 0);
        assert_eq!(result.backend, Backend::Disabled);
    }

    #[test]
    fn test_window_decision_constructors() {
        let allowed = WindowDecision::allowed(2, 60_000);
        assert!(allowed.allowed);
        assert_eq!(allowed.remaining, 2);

        let denied = WindowDecision::denied(60_000);
        assert!(!denied.allowed);
        assert_eq!(denied.remaining, 0);
    }
}
