//! Quota policies and the tier → policy table

use std::collections::{BTreeMap, HashMap};
use std::time::Duration;

use crate::config::{TierPolicyConfig, default_tiers};

/// Tier every unknown tier name falls back to
pub const DEFAULT_TIER: &str = "free";

/// Immutable quota of one tier
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Policy {
    pub tier: String,
    pub window_ms: u64,
    pub max_requests: u32,
    pub message: String,
}

impl Policy {
    pub fn new(
        tier: impl Into<String>,
        window_ms: u64,
        max_requests: u32,
        message: impl Into<String>,
    ) -> Self {
        Self {
            tier: tier.into(),
            window_ms,
            max_requests,
            message: message.into(),
        }
    }

    pub fn window(&self) -> Duration {
        Duration::from_millis(self.window_ms)
    }

    /// Expiry of a distributed window key: one second longer than the window,
    /// so idle keys clean themselves up.
    pub fn key_ttl_secs(&self) -> u64 {
        self.window_ms.div_ceil(1000) + 1
    }

    fn from_config(tier: &str, config: &TierPolicyConfig) -> Self {
        Self::new(tier, config.window_ms, config.max_requests, &config.message)
    }
}

/// Static mapping from tier name to policy
#[derive(Debug, Clone)]
pub struct PolicyTable {
    policies: HashMap<String, Policy>,
    free: Policy,
}

impl PolicyTable {
    /// Build the table from configured tiers.
    ///
    /// Tier names are matched case-insensitively. When the configuration lacks a
    /// `free` tier the built-in free policy is used so that unknown tiers never
    /// resolve to an unrestricted quota.
    pub fn from_tiers(tiers: &BTreeMap<String, TierPolicyConfig>) -> Self {
        let policies: HashMap<String, Policy> = tiers
            .iter()
            .map(|(name, config)| {
                let name = name.to_ascii_lowercase();
                let policy = Policy::from_config(&name, config);
                (name, policy)
            })
            .collect();

        let free = policies
            .get(DEFAULT_TIER)
            .cloned()
            .unwrap_or_else(|| Policy::new(DEFAULT_TIER, 60_000, 60, "Rate limit exceeded."));

        Self { policies, free }
    }

    /// Resolve a tier name, defaulting to the free tier when unknown.
    pub fn resolve(&self, tier: &str) -> &Policy {
        self.policies
            .get(tier)
            .or_else(|| self.policies.get(&tier.to_ascii_lowercase()))
            .unwrap_or(&self.free)
    }

    pub fn free(&self) -> &Policy {
        &self.free
    }

    pub fn tiers(&self) -> impl Iterator<Item = &Policy> {
        self.policies.values()
    }
}

impl Default for PolicyTable {
    fn default() -> Self {
        Self::from_tiers(&default_tiers())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_known_tiers() {
        let table = PolicyTable::default();
        assert_eq!(table.resolve("pro").tier, "pro");
        assert_eq!(table.resolve("Enterprise").tier, "enterprise");
        assert!(table.resolve("enterprise").max_requests >= 1_000_000);
    }

    #[test]
    fn test_unknown_tier_resolves_to_free() {
        let table = PolicyTable::default();
        let policy = table.resolve("platinum");
        assert_eq!(policy.tier, DEFAULT_TIER);
        assert_eq!(policy, table.free());
    }

    #[test]
    fn test_missing_free_tier_is_filled_in() {
        let mut tiers = BTreeMap::new();
        tiers.insert(
            "pro".to_string(),
            TierPolicyConfig {
                window_ms: 1_000,
                max_requests: 5,
                message: "pro".to_string(),
            },
        );
        let table = PolicyTable::from_tiers(&tiers);
        assert_eq!(table.resolve("nope").tier, DEFAULT_TIER);
        assert_eq!(table.resolve("pro").max_requests, 5);
    }

    #[test]
    fn test_key_ttl_exceeds_window() {
        let policy = Policy::new("t", 60_000, 3, "");
        assert_eq!(policy.key_ttl_secs(), 61);

        let policy = Policy::new("t", 1_500, 3, "");
        assert_eq!(policy.key_ttl_secs(), 3);
    }
}
