//! Configuration management

pub mod validation;

pub use validation::{Validate, ValidationError};

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

use crate::domain::rate_limit::DEFAULT_TIER;

/// Root configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub rate_limit: RateLimitConfig,
    pub store: DistributedStoreConfig,
    pub tier_resolver: TierResolverConfig,
    pub logging: LoggingConfig,
}

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub request_timeout_seconds: u64,
    pub shutdown_timeout_seconds: u64,
    /// Header carrying the subject id asserted by the authentication gateway
    pub identity_header: String,
    /// Bearer token for operator routes; the routes are not mounted when unset
    pub admin_token: Option<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3000,
            request_timeout_seconds: 30,
            shutdown_timeout_seconds: 5,
            identity_header: "x-authenticated-user".to_string(),
            admin_token: None,
        }
    }
}

/// Storage backend for rate limiting
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RateLimitStorageBackend {
    /// Use Dragonfly/Redis shared by every instance (recommended for production)
    #[default]
    Dragonfly,
    /// Use an in-process sliding window log (development/single instance)
    Memory,
}

/// Quota of a single tier
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TierPolicyConfig {
    /// Window length in milliseconds
    pub window_ms: u64,
    /// Requests admitted per window
    pub max_requests: u32,
    /// Message returned to the client when the quota is exhausted
    pub message: String,
}

impl TierPolicyConfig {
    fn per_minute(max_requests: u32, message: &str) -> Self {
        Self {
            window_ms: 60_000,
            max_requests,
            message: message.to_string(),
        }
    }
}

/// Default tier table: free < basic < pro < enterprise, one minute windows.
/// Enterprise is a very large quota rather than a bypass.
pub fn default_tiers() -> BTreeMap<String, TierPolicyConfig> {
    BTreeMap::from([
        (
            DEFAULT_TIER.to_string(),
            TierPolicyConfig::per_minute(
                60,
                "Free tier limit reached. Upgrade your plan for a higher quota.",
            ),
        ),
        (
            "basic".to_string(),
            TierPolicyConfig::per_minute(300, "Basic tier limit reached. Please slow down."),
        ),
        (
            "pro".to_string(),
            TierPolicyConfig::per_minute(1_000, "Pro tier limit reached. Please slow down."),
        ),
        (
            "enterprise".to_string(),
            TierPolicyConfig::per_minute(1_000_000, "Enterprise tier limit reached."),
        ),
    ])
}

/// Admission control configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitConfig {
    /// Whether rate limiting is enabled
    pub enabled: bool,
    /// Storage backend for the shared counters
    pub storage_backend: RateLimitStorageBackend,
    /// Prefix of every key written to the distributed store
    pub key_prefix: String,
    /// Interval between sweeps of expired local windows, in seconds
    pub local_sweep_interval_seconds: u64,
    /// Path prefixes that bypass admission control
    pub excluded_paths: Vec<String>,
    /// Policy per tier name
    pub tiers: BTreeMap<String, TierPolicyConfig>,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            storage_backend: RateLimitStorageBackend::Dragonfly,
            key_prefix: "ratelimit".to_string(),
            local_sweep_interval_seconds: 60,
            excluded_paths: vec![
                "/health".to_string(),
                "/healthz".to_string(),
                "/ready".to_string(),
            ],
            tiers: default_tiers(),
        }
    }
}

impl RateLimitConfig {
    pub fn local_sweep_interval(&self) -> Duration {
        Duration::from_secs(self.local_sweep_interval_seconds)
    }
}

/// Dragonfly/Redis connection configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DistributedStoreConfig {
    /// Connection URL (e.g., "redis://127.0.0.1:6379")
    pub url: String,
    /// Timeout for establishing a connection
    pub connect_timeout_ms: u64,
    /// Timeout for a single round trip
    pub operation_timeout_ms: u64,
    /// Extra attempts after a failed round trip
    pub max_retries: u32,
    /// Delay between attempts
    pub retry_delay_ms: u64,
    /// First reconnect delay after the connection is dropped
    pub reconnect_initial_delay_ms: u64,
    /// Upper bound of the exponential reconnect delay
    pub reconnect_max_delay_ms: u64,
    /// Run prune/count/insert as one server-side script
    pub atomic_window: bool,
}

impl Default for DistributedStoreConfig {
    fn default() -> Self {
        Self {
            url: "redis://127.0.0.1:6379".to_string(),
            connect_timeout_ms: 1_000,
            operation_timeout_ms: 150,
            max_retries: 1,
            retry_delay_ms: 20,
            reconnect_initial_delay_ms: 250,
            reconnect_max_delay_ms: 10_000,
            atomic_window: true,
        }
    }
}

impl DistributedStoreConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn operation_timeout(&self) -> Duration {
        Duration::from_millis(self.operation_timeout_ms)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }
}

/// Where subscription tiers come from
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TierSource {
    /// Every subject gets `static_tier`
    #[default]
    Static,
    /// Look the tier up in the subscriptions table
    Database,
}

/// Tier resolver configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TierResolverConfig {
    pub source: TierSource,
    pub static_tier: String,
    pub database_url: Option<String>,
    pub query_timeout_ms: u64,
}

impl Default for TierResolverConfig {
    fn default() -> Self {
        Self {
            source: TierSource::Static,
            static_tier: DEFAULT_TIER.to_string(),
            database_url: None,
            query_timeout_ms: 200,
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "json".to_string(),
        }
    }
}

impl Validate for Config {
    fn validate(&self) -> Result<(), ValidationError> {
        self.server.validate()?;
        self.rate_limit.validate()?;
        self.store.validate()?;
        self.tier_resolver.validate()?;
        self.logging.validate()?;
        Ok(())
    }
}

impl Config {
    /// Load configuration from files and environment variables
    pub fn load() -> Result<Self, ConfigLoadError> {
        let mut builder = config::Config::builder()
            .add_source(config::File::with_name("config/default").required(false));

        // Add environment-specific config if ENV is set
        if let Ok(env) = std::env::var("ENV") {
            builder = builder
                .add_source(config::File::with_name(&format!("config/{}", env)).required(false));
        }

        builder = builder
            .add_source(config::File::with_name("config/local").required(false))
            .add_source(config::Environment::with_prefix("QUOTAGUARD").separator("__"));

        let mut config: Config = builder.build()?.try_deserialize()?;

        if let Ok(redis_url) = std::env::var("REDIS_URL") {
            config.store.url = redis_url;
        }

        config.validate()?;

        Ok(config)
    }
}

/// Error type for configuration loading
#[derive(Debug, thiserror::Error)]
pub enum ConfigLoadError {
    #[error("Configuration file error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("Configuration validation error: {0}")]
    Validation(#[from] ValidationError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        assert!(Config::default().validate().is_ok());
    }

    #[test]
    fn test_default_tiers_increase_with_fixed_window() {
        let tiers = default_tiers();
        let order = ["free", "basic", "pro", "enterprise"];
        for pair in order.windows(2) {
            let lower = &tiers[pair[0]];
            let higher = &tiers[pair[1]];
            assert!(lower.max_requests < higher.max_requests);
            assert_eq!(lower.window_ms, 60_000);
            assert_eq!(higher.window_ms, 60_000);
        }
    }

    #[test]
    fn test_deserialize_partial_toml() {
        let raw = r#"
            [rate_limit]
            storage_backend = "memory"

            [rate_limit.tiers.free]
            window_ms = 1000
            max_requests = 2
            message = "slow down"

            [store]
            atomic_window = false
        "#;

        let config: Config = config::Config::builder()
            .add_source(config::File::from_str(raw, config::FileFormat::Toml))
            .build()
            .unwrap()
            .try_deserialize()
            .unwrap();

        assert_eq!(
            config.rate_limit.storage_backend,
            RateLimitStorageBackend::Memory
        );
        assert_eq!(config.rate_limit.tiers["free"].max_requests, 2);
        assert!(!config.store.atomic_window);
        assert_eq!(config.store.operation_timeout_ms, 150);
        assert_eq!(config.server.port, 3000);
    }
}
