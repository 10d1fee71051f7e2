//! HTTP middleware for the web server

use axum::{
    extract::{Request, State},
    http::{HeaderName, HeaderValue, Method, StatusCode},
    middleware::Next,
    response::{IntoResponse, Json, Response},
};
use std::sync::Arc;

use quotaguard_core::infrastructure::RateLimiterService;

use crate::presentation::models::TooManyRequestsResponse;

/// Subject attributed to a request by the authentication gateway
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthenticatedSubject(pub String);

/// Shared state for the identity middleware
#[derive(Debug, Clone)]
pub struct IdentityState {
    /// Header carrying the authenticated subject id
    pub header: HeaderName,
}

impl IdentityState {
    pub fn new(header: &str) -> Result<Self, axum::http::header::InvalidHeaderName> {
        Ok(Self {
            header: HeaderName::from_bytes(header.as_bytes())?,
        })
    }
}

/// Attach the authenticated subject, if any, to the request extensions.
///
/// Blank header values are treated as unauthenticated.
pub async fn identity_middleware(
    State(state): State<Arc<IdentityState>>,
    mut request: Request,
    next: Next,
) -> Response {
    let subject = request
        .headers()
        .get(&state.header)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string);

    if let Some(subject) = subject {
        request.extensions_mut().insert(AuthenticatedSubject(subject));
    }

    next.run(request).await
}

// ============================================================================
// Rate Limiter State (wrapper around quotaguard-core RateLimiterService)
// ============================================================================

/// Shared state for rate limiting middleware
#[derive(Clone)]
pub struct RateLimiterState {
    /// The rate limiter service from quotaguard-core
    pub service: Arc<RateLimiterService>,
    /// Path prefixes that bypass admission control
    pub excluded_paths: Arc<[String]>,
}

impl RateLimiterState {
    /// Create a new rate limiter state
    pub fn new(service: Arc<RateLimiterService>) -> Self {
        let excluded_paths = service.config().excluded_paths.clone().into();
        Self {
            service,
            excluded_paths,
        }
    }

    /// Check if a path should be excluded from rate limiting
    fn should_skip(&self, path: &str) -> bool {
        self.excluded_paths
            .iter()
            .any(|excluded| path.starts_with(excluded.as_str()))
    }
}

impl std::fmt::Debug for RateLimiterState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateLimiterState")
            .field("enabled", &self.service.is_enabled())
            .field("excluded_paths", &self.excluded_paths)
            .finish()
    }
}

/// Add quota headers; the reset is in epoch milliseconds
fn add_rate_limit_headers(response: &mut Response, limit: u32, remaining: u32, reset_at_ms: u64) {
    let headers = response.headers_mut();

    headers.insert("x-ratelimit-limit", HeaderValue::from(limit));
    headers.insert("x-ratelimit-remaining", HeaderValue::from(remaining));
    headers.insert("x-ratelimit-reset", HeaderValue::from(reset_at_ms));
}

/// Admission control middleware
///
/// Checks every authenticated request against the subject's quota on the
/// request path. Preflight requests, excluded paths and unauthenticated
/// requests pass through untouched.
pub async fn admission_middleware(
    State(state): State<Arc<RateLimiterState>>,
    request: Request,
    next: Next,
) -> Response {
    // Skip rate limiting if disabled
    if !state.service.is_enabled() || request.method() == Method::OPTIONS {
        return next.run(request).await;
    }

    let path = request.uri().path().to_string();
    if state.should_skip(&path) {
        return next.run(request).await;
    }

    let Some(AuthenticatedSubject(subject)) =
        request.extensions().get::<AuthenticatedSubject>().cloned()
    else {
        return next.run(request).await;
    };

    let result = match state.service.check(&subject, &path).await {
        Ok(result) => result,
        Err(e) => {
            tracing::warn!(subject = %subject, path = %path, error = %e, "Rate limit check rejected input");
            return next.run(request).await;
        }
    };

    if result.allowed {
        let mut response = next.run(request).await;
        add_rate_limit_headers(
            &mut response,
            result.limit,
            result.remaining,
            result.reset_at_ms,
        );
        return response;
    }

    let retry_after = result.retry_after_secs();

    tracing::warn!(
        subject = %subject,
        path = %path,
        tier = %result.tier,
        backend = %result.backend,
        retry_after = retry_after,
        "Rate limit exceeded"
    );

    let message = result
        .message
        .clone()
        .unwrap_or_else(|| "Rate limit exceeded.".to_string());

    let mut response = (
        StatusCode::TOO_MANY_REQUESTS,
        Json(TooManyRequestsResponse::new(message, retry_after)),
    )
        .into_response();

    add_rate_limit_headers(&mut response, result.limit, 0, result.reset_at_ms);
    response
        .headers_mut()
        .insert("retry-after", HeaderValue::from(retry_after));

    response
}
