//! Infrastructure Layer - External concerns and implementations
//!
//! This module handles the shared counter store, the in-process fallback and the
//! subscription lookup.

pub mod rate_limiter;
pub mod subscription;

pub use rate_limiter::RateLimiterService;
pub use subscription::{SqlxTierResolver, StaticTierResolver, build_tier_resolver};
