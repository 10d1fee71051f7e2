//! Tier resolver implementations

use async_trait::async_trait;
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

use crate::config::{TierResolverConfig, TierSource};
use crate::domain::rate_limit::{DEFAULT_TIER, TierResolutionError, TierResolver};

/// Resolver returning the same tier for every subject
#[derive(Debug, Clone)]
pub struct StaticTierResolver {
    tier: String,
}

impl StaticTierResolver {
    pub fn new(tier: impl Into<String>) -> Self {
        Self { tier: tier.into() }
    }
}

impl Default for StaticTierResolver {
    fn default() -> Self {
        Self::new(DEFAULT_TIER)
    }
}

#[async_trait]
impl TierResolver for StaticTierResolver {
    async fn resolve_tier(&self, _subject_id: &str) -> Result<String, TierResolutionError> {
        Ok(self.tier.clone())
    }
}

/// SQLx implementation of the tier resolver, backed by the subscriptions table
pub struct SqlxTierResolver {
    pool: Arc<PgPool>,
    query_timeout: Duration,
}

impl SqlxTierResolver {
    /// Create a new SQLx tier resolver
    pub fn new(pool: Arc<PgPool>, query_timeout: Duration) -> Self {
        Self {
            pool,
            query_timeout,
        }
    }

    /// Build a resolver whose pool connects on first use
    pub fn connect_lazy(url: &str, query_timeout: Duration) -> Result<Self, TierResolutionError> {
        let pool = PgPoolOptions::new()
            .max_connections(5)
            .acquire_timeout(query_timeout)
            .connect_lazy(url)?;
        Ok(Self::new(Arc::new(pool), query_timeout))
    }
}

#[async_trait]
impl TierResolver for SqlxTierResolver {
    async fn resolve_tier(&self, subject_id: &str) -> Result<String, TierResolutionError> {
        let query = sqlx::query_scalar::<_, String>(
            r#"
            SELECT tier
            FROM user_subscriptions
            WHERE user_id = $1 AND status = 'active'
            ORDER BY updated_at DESC
            LIMIT 1
            "#,
        )
        .bind(subject_id)
        .fetch_optional(&*self.pool);

        let tier = tokio::time::timeout(self.query_timeout, query)
            .await
            .map_err(|_| TierResolutionError::Timeout {
                timeout_ms: self.query_timeout.as_millis() as u64,
            })??;

        match tier {
            Some(tier) => Ok(tier),
            None => {
                debug!(subject = %subject_id, "No active subscription, using {} tier", DEFAULT_TIER);
                Ok(DEFAULT_TIER.to_string())
            }
        }
    }
}

/// Build the tier resolver selected by configuration
pub fn build_tier_resolver(
    config: &TierResolverConfig,
) -> Result<Arc<dyn TierResolver>, TierResolutionError> {
    match config.source {
        TierSource::Static => {
            info!(tier = %config.static_tier, "Using static subscription tier");
            Ok(Arc::new(StaticTierResolver::new(&config.static_tier)))
        }
        TierSource::Database => {
            let url = config.database_url.as_deref().unwrap_or_default();
            let resolver = SqlxTierResolver::connect_lazy(
                url,
                Duration::from_millis(config.query_timeout_ms),
            )?;
            info!("Resolving subscription tiers from the database");
            Ok(Arc::new(resolver))
        }
    }
}
