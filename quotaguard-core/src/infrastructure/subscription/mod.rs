//! Subscription tier lookup
//!
//! Maps a subject to the tier whose policy applies to it.

mod tier_resolver;

pub use tier_resolver::{SqlxTierResolver, StaticTierResolver, build_tier_resolver};
