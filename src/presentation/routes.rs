//! Route definitions and server setup

use axum::http::StatusCode;
use axum::{
    Router, middleware,
    routing::{get, post},
};
use std::sync::Arc;
use std::time::Duration;
use tower_http::{timeout::TimeoutLayer, trace::TraceLayer};

use quotaguard_core::Config;

use crate::presentation::{
    controllers::{AppState, health_check, rate_limit_status, reset_rate_limit},
    middleware::{IdentityState, RateLimiterState, admission_middleware, identity_middleware},
};

/// Create the application router
pub fn create_router(state: AppState, identity: IdentityState, config: &Config) -> Router {
    let rate_limiter_state = Arc::new(RateLimiterState::new(state.rate_limiter.clone()));

    let mut api_routes = Router::new().route("/rate-limit/status", get(rate_limit_status));

    if state.admin_token.is_some() {
        api_routes = api_routes.route("/admin/rate-limit/reset", post(reset_rate_limit));
    } else {
        tracing::info!("No admin token configured; rate limit reset endpoint disabled");
    }

    let health_routes = Router::new().route("/health", get(health_check));

    Router::new()
        .nest("/api/v1", api_routes)
        .merge(health_routes)
        .with_state(state)
        // Layers run bottom-up: identity is resolved before admission
        .layer(middleware::from_fn_with_state(
            rate_limiter_state,
            admission_middleware,
        ))
        .layer(middleware::from_fn_with_state(
            Arc::new(identity),
            identity_middleware,
        ))
        .layer(TimeoutLayer::with_status_code(
            StatusCode::REQUEST_TIMEOUT,
            Duration::from_secs(config.server.request_timeout_seconds),
        ))
        .layer(TraceLayer::new_for_http())
}
