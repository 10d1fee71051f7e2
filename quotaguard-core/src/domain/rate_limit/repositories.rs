//! Interfaces implemented by the infrastructure layer

use async_trait::async_trait;

use super::errors::TierResolutionError;

/// Maps a subject to the name of its subscription tier
#[async_trait]
pub trait TierResolver: Send + Sync {
    async fn resolve_tier(&self, subject_id: &str) -> Result<String, TierResolutionError>;
}
