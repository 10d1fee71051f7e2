//! HTTP handlers

use axum::{
    extract::State,
    http::{HeaderMap, StatusCode, header::AUTHORIZATION},
    response::{IntoResponse, Json, Response},
};
use std::sync::Arc;
use std::time::Instant;

use quotaguard_core::infrastructure::RateLimiterService;

use crate::presentation::models::{
    ErrorResponse, HealthResponse, RateLimitStatusResponse, ResetRateLimitRequest,
    ResetRateLimitResponse,
};

/// Application state shared by the handlers
#[derive(Clone)]
pub struct AppState {
    pub rate_limiter: Arc<RateLimiterService>,
    /// Bearer token for the administrative endpoints
    pub admin_token: Option<Arc<str>>,
    pub startup_time: Instant,
}

/// Liveness probe. Never rate limited and never fails because the counter
/// store is down.
pub async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    let status = state.rate_limiter.status();
    let mode = if status.using_distributed_store {
        "distributed"
    } else {
        "local"
    };

    Json(HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_seconds: state.startup_time.elapsed().as_secs(),
        rate_limit_mode: mode.to_string(),
    })
}

/// Operator view of the admission control state
pub async fn rate_limit_status(State(state): State<AppState>) -> Json<RateLimitStatusResponse> {
    Json(RateLimitStatusResponse {
        success: true,
        status: state.rate_limiter.status(),
    })
}

fn is_admin(headers: &HeaderMap, expected: &str) -> bool {
    headers
        .get(AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .is_some_and(|token| token.trim() == expected)
}

/// Clear the quota of a subject
pub async fn reset_rate_limit(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<ResetRateLimitRequest>,
) -> Response {
    let authorized = state
        .admin_token
        .as_deref()
        .is_some_and(|expected| is_admin(&headers, expected));
    if !authorized {
        return (
            StatusCode::UNAUTHORIZED,
            Json(ErrorResponse::new("Unauthorized", "Missing or invalid admin token")),
        )
            .into_response();
    }

    match state
        .rate_limiter
        .reset(&request.subject_id, request.resource_path.as_deref())
        .await
    {
        Ok(()) => Json(ResetRateLimitResponse {
            success: true,
            subject_id: request.subject_id,
            resource_path: request.resource_path,
        })
        .into_response(),
        Err(e) => (
            StatusCode::BAD_REQUEST,
            Json(ErrorResponse::new("Bad Request", e.to_string())),
        )
            .into_response(),
    }
}
