//! Application setup and wiring

use std::sync::Arc;
use std::time::Instant;

use axum::Router;

use quotaguard_core::Config;
use quotaguard_core::infrastructure::{RateLimiterService, build_tier_resolver};

use crate::presentation::{AppState, IdentityState, create_router};

/// Handle returned from create_app for graceful shutdown coordination
pub struct AppHandle {
    pub router: Router,
    /// Closed by the caller once the server has stopped
    pub rate_limiter: Arc<RateLimiterService>,
}

/// Build the admission controller and the router around it
pub async fn create_app(
    config: Config,
) -> Result<AppHandle, Box<dyn std::error::Error + Send + Sync>> {
    let startup_time = Instant::now();

    let tier_resolver = build_tier_resolver(&config.tier_resolver)?;

    let rate_limiter = Arc::new(
        RateLimiterService::connect(config.rate_limit.clone(), &config.store, tier_resolver)
            .await?,
    );
    rate_limiter.start();

    let status = rate_limiter.status();
    tracing::info!(
        enabled = status.enabled,
        distributed = status.using_distributed_store,
        "Rate limiter initialized"
    );

    let identity = IdentityState::new(&config.server.identity_header)?;

    let state = AppState {
        rate_limiter: rate_limiter.clone(),
        admin_token: config.server.admin_token.as_deref().map(Arc::from),
        startup_time,
    };

    let router = create_router(state, identity, &config);

    Ok(AppHandle {
        router,
        rate_limiter,
    })
}
