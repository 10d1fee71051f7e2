//! Test data fixtures for quotaguard-core

use std::collections::BTreeMap;
use std::sync::Arc;

use quotaguard_core::config::{RateLimitConfig, RateLimitStorageBackend, TierPolicyConfig};
use quotaguard_core::domain::rate_limit::TierResolver;
use quotaguard_core::infrastructure::rate_limiter::{
    DistributedWindowStore, ManualClock, RateLimiterService,
};

pub const MINUTE_MS: u64 = 60_000;

pub fn tier(window_ms: u64, max_requests: u32, message: &str) -> TierPolicyConfig {
    TierPolicyConfig {
        window_ms,
        max_requests,
        message: message.to_string(),
    }
}

/// Free tier of 3 requests per minute plus larger paid tiers
pub fn strict_test_config() -> RateLimitConfig {
    let mut tiers = BTreeMap::new();
    tiers.insert("free".to_string(), tier(MINUTE_MS, 3, "Free tier limit reached"));
    tiers.insert("basic".to_string(), tier(MINUTE_MS, 5, "Basic tier limit reached"));
    tiers.insert("pro".to_string(), tier(MINUTE_MS, 10, "Pro tier limit reached"));
    tiers.insert(
        "enterprise".to_string(),
        tier(MINUTE_MS, 1_000_000, "Enterprise tier limit reached"),
    );

    RateLimitConfig {
        enabled: true,
        storage_backend: RateLimitStorageBackend::Memory,
        tiers,
        ..RateLimitConfig::default()
    }
}

/// Coordinator over `store` with a manual clock starting at `start_ms`
pub fn test_service(
    config: RateLimitConfig,
    resolver: Arc<dyn TierResolver>,
    store: Arc<dyn DistributedWindowStore>,
    start_ms: u64,
) -> (RateLimiterService, Arc<ManualClock>) {
    let clock = Arc::new(ManualClock::new(start_ms));
    let service = RateLimiterService::with_store(config, resolver, store, clock.clone());
    (service, clock)
}
