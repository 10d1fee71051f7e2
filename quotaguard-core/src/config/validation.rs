//! Configuration validation module

use crate::config::{
    DistributedStoreConfig, LoggingConfig, RateLimitConfig, ServerConfig, TierResolverConfig,
    TierSource,
};
use crate::domain::rate_limit::DEFAULT_TIER;

/// Trait for validating configuration sections
pub trait Validate {
    fn validate(&self) -> Result<(), ValidationError>;
}

/// Configuration validation error
#[derive(Debug, thiserror::Error)]
pub enum ValidationError {
    #[error("Server configuration error: {message}")]
    Server { message: String },

    #[error("Rate limit configuration error: {message}")]
    RateLimit { message: String },

    #[error("Store configuration error: {message}")]
    Store { message: String },

    #[error("Tier resolver configuration error: {message}")]
    TierResolver { message: String },

    #[error("Logging configuration error: {message}")]
    Logging { message: String },
}

impl ValidationError {
    pub fn server(message: impl Into<String>) -> Self {
        Self::Server {
            message: message.into(),
        }
    }

    pub fn rate_limit(message: impl Into<String>) -> Self {
        Self::RateLimit {
            message: message.into(),
        }
    }

    pub fn store(message: impl Into<String>) -> Self {
        Self::Store {
            message: message.into(),
        }
    }

    pub fn tier_resolver(message: impl Into<String>) -> Self {
        Self::TierResolver {
            message: message.into(),
        }
    }

    pub fn logging(message: impl Into<String>) -> Self {
        Self::Logging {
            message: message.into(),
        }
    }
}

impl Validate for ServerConfig {
    fn validate(&self) -> Result<(), ValidationError> {
        // u16 cannot exceed 65535, so we only need to check for 0
        if self.port == 0 {
            return Err(ValidationError::server(format!(
                "Port must be in range 1-65535, got {}",
                self.port
            )));
        }

        if self.host.is_empty() {
            return Err(ValidationError::server("Host cannot be empty"));
        }

        if self.request_timeout_seconds == 0 {
            return Err(ValidationError::server(
                "Request timeout must be greater than 0",
            ));
        }

        if self.identity_header.trim().is_empty() {
            return Err(ValidationError::server("Identity header cannot be empty"));
        }

        if let Some(token) = &self.admin_token
            && token.len() < 16
        {
            return Err(ValidationError::server(
                "Admin token must be at least 16 characters",
            ));
        }

        Ok(())
    }
}

impl Validate for RateLimitConfig {
    fn validate(&self) -> Result<(), ValidationError> {
        if self.key_prefix.is_empty() {
            return Err(ValidationError::rate_limit("Key prefix cannot be empty"));
        }

        if self.local_sweep_interval_seconds == 0 {
            return Err(ValidationError::rate_limit(
                "Local sweep interval must be greater than 0",
            ));
        }

        if !self.tiers.contains_key(DEFAULT_TIER) {
            return Err(ValidationError::rate_limit(format!(
                "Tier table must define the '{}' tier",
                DEFAULT_TIER
            )));
        }

        for (name, tier) in &self.tiers {
            if tier.window_ms == 0 {
                return Err(ValidationError::rate_limit(format!(
                    "Tier '{}' window must be greater than 0",
                    name
                )));
            }
            if tier.max_requests == 0 {
                return Err(ValidationError::rate_limit(format!(
                    "Tier '{}' max_requests must be greater than 0",
                    name
                )));
            }
        }

        Ok(())
    }
}

impl Validate for DistributedStoreConfig {
    fn validate(&self) -> Result<(), ValidationError> {
        if self.url.is_empty() {
            return Err(ValidationError::store("Store URL cannot be empty"));
        }

        if self.connect_timeout_ms == 0 || self.operation_timeout_ms == 0 {
            return Err(ValidationError::store("Store timeouts must be greater than 0"));
        }

        if self.reconnect_initial_delay_ms == 0 {
            return Err(ValidationError::store(
                "Reconnect initial delay must be greater than 0",
            ));
        }

        if self.reconnect_initial_delay_ms > self.reconnect_max_delay_ms {
            return Err(ValidationError::store(format!(
                "Reconnect initial delay ({}ms) exceeds max delay ({}ms)",
                self.reconnect_initial_delay_ms, self.reconnect_max_delay_ms
            )));
        }

        Ok(())
    }
}

impl Validate for TierResolverConfig {
    fn validate(&self) -> Result<(), ValidationError> {
        match self.source {
            TierSource::Static => {
                if self.static_tier.is_empty() {
                    return Err(ValidationError::tier_resolver("Static tier cannot be empty"));
                }
            }
            TierSource::Database => {
                if self.database_url.as_deref().is_none_or(str::is_empty) {
                    return Err(ValidationError::tier_resolver(
                        "Database tier source requires database_url",
                    ));
                }
                if self.query_timeout_ms == 0 {
                    return Err(ValidationError::tier_resolver(
                        "Query timeout must be greater than 0",
                    ));
                }
            }
        }

        Ok(())
    }
}

impl Validate for LoggingConfig {
    fn validate(&self) -> Result<(), ValidationError> {
        match self.format.as_str() {
            "json" | "pretty" | "compact" => Ok(()),
            other => Err(ValidationError::logging(format!(
                "Unknown log format '{}', expected json, pretty or compact",
                other
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TierPolicyConfig;

    #[test]
    fn test_server_port_zero_rejected() {
        let config = ServerConfig {
            port: 0,
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ValidationError::Server { .. })
        ));
    }

    #[test]
    fn test_short_admin_token_rejected() {
        let config = ServerConfig {
            admin_token: Some("short".to_string()),
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_missing_free_tier_rejected() {
        let mut config = RateLimitConfig::default();
        config.tiers.remove(DEFAULT_TIER);
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("free"));
    }

    #[test]
    fn test_zero_quota_rejected() {
        let mut config = RateLimitConfig::default();
        config.tiers.insert(
            "broken".to_string(),
            TierPolicyConfig {
                window_ms: 60_000,
                max_requests: 0,
                message: String::new(),
            },
        );
        assert!(matches!(
            config.validate(),
            Err(ValidationError::RateLimit { .. })
        ));
    }

    #[test]
    fn test_reconnect_delays_ordered() {
        let config = DistributedStoreConfig {
            reconnect_initial_delay_ms: 5_000,
            reconnect_max_delay_ms: 100,
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(ValidationError::Store { .. })));
    }

    #[test]
    fn test_database_source_requires_url() {
        let config = TierResolverConfig {
            source: TierSource::Database,
            database_url: None,
            ..Default::default()
        };
        assert!(config.validate().is_err());

        let config = TierResolverConfig {
            source: TierSource::Database,
            database_url: Some("postgres://localhost/quotas".to_string()),
            ..Default::default()
        };
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_unknown_log_format_rejected() {
        let config = LoggingConfig {
            level: "info".to_string(),
            format: "xml".to_string(),
        };
        assert!(config.validate().is_err());
    }
}
