//! Request and response bodies of the HTTP API

use serde::{Deserialize, Serialize};

use quotaguard_core::infrastructure::rate_limiter::RateLimiterStatus;

/// Body of a 429 response
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TooManyRequestsResponse {
    pub success: bool,
    pub error: String,
    pub message: String,
    /// Seconds until the quota frees up
    pub retry_after: u64,
}

impl TooManyRequestsResponse {
    pub fn new(message: impl Into<String>, retry_after: u64) -> Self {
        Self {
            success: false,
            error: "Too Many Requests".to_string(),
            message: message.into(),
            retry_after,
        }
    }
}

/// Error response model
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub success: bool,
    /// Machine-readable error code
    pub error: String,
    /// Human-readable error message
    pub message: String,
}

impl ErrorResponse {
    pub fn new(error: &str, message: impl Into<String>) -> Self {
        Self {
            success: false,
            error: error.to_string(),
            message: message.into(),
        }
    }
}

/// Health check response
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub uptime_seconds: u64,
    /// `distributed` or `local`
    pub rate_limit_mode: String,
}

/// Rate limiter status response
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RateLimitStatusResponse {
    pub success: bool,
    #[serde(flatten)]
    pub status: RateLimiterStatus,
}

/// Body of an administrative quota reset
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResetRateLimitRequest {
    pub subject_id: String,
    pub resource_path: Option<String>,
}

/// Acknowledgement of a quota reset
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResetRateLimitResponse {
    pub success: bool,
    pub subject_id: String,
    pub resource_path: Option<String>,
}
