//! Test doubles for the store and tier lookup seams

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use tokio::sync::broadcast;

use quotaguard_core::domain::rate_limit::{
    Policy, RateLimitKey, StoreError, TierResolutionError, TierResolver,
};
use quotaguard_core::infrastructure::rate_limiter::{
    DistributedWindowStore, InMemoryWindowLog, StoreEvent, WindowDecision,
};

/// Shared window log that can be taken down and brought back like a real
/// store connection
pub struct FlakyWindowStore {
    inner: InMemoryWindowLog,
    down: AtomicBool,
    events: broadcast::Sender<StoreEvent>,
    checks: AtomicUsize,
}

impl FlakyWindowStore {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(16);
        Self {
            inner: InMemoryWindowLog::new(),
            down: AtomicBool::new(false),
            events,
            checks: AtomicUsize::new(0),
        }
    }

    /// Every call fails from now on, without any event
    pub fn go_down(&self) {
        self.down.store(true, Ordering::SeqCst);
    }

    /// Calls succeed again, silently
    pub fn heal_silently(&self) {
        self.down.store(false, Ordering::SeqCst);
    }

    /// Calls succeed again and the client announces the new connection
    pub fn reconnect(&self) {
        self.heal_silently();
        let _ = self.events.send(StoreEvent::Connected);
    }

    /// Number of `check` calls that reached this store
    pub fn checks(&self) -> usize {
        self.checks.load(Ordering::SeqCst)
    }

    pub fn log(&self) -> &InMemoryWindowLog {
        &self.inner
    }
}

#[async_trait]
impl DistributedWindowStore for FlakyWindowStore {
    async fn check(
        &self,
        key: &RateLimitKey,
        policy: &Policy,
        now_ms: u64,
    ) -> Result<WindowDecision, StoreError> {
        self.checks.fetch_add(1, Ordering::SeqCst);
        if self.down.load(Ordering::SeqCst) {
            return Err(StoreError::Timeout {
                operation: "window_check",
                timeout_ms: 150,
            });
        }
        self.inner.check(key, policy, now_ms).await
    }

    async fn reset(
        &self,
        subject_id: &str,
        resource_path: Option<&str>,
    ) -> Result<u64, StoreError> {
        if self.down.load(Ordering::SeqCst) {
            return Err(StoreError::Disconnected);
        }
        self.inner.reset(subject_id, resource_path).await
    }

    fn subscribe(&self) -> broadcast::Receiver<StoreEvent> {
        self.events.subscribe()
    }

    fn is_connected(&self) -> bool {
        !self.down.load(Ordering::SeqCst)
    }

    async fn close(&self) {}
}

/// Tier lookup from a fixed subject → tier map; unknown subjects get `free`
#[derive(Default)]
pub struct MapTierResolver {
    tiers: HashMap<String, String>,
}

impl MapTierResolver {
    pub fn with(mut self, subject_id: &str, tier: &str) -> Self {
        self.tiers.insert(subject_id.to_string(), tier.to_string());
        self
    }
}

#[async_trait]
impl TierResolver for MapTierResolver {
    async fn resolve_tier(&self, subject_id: &str) -> Result<String, TierResolutionError> {
        Ok(self
            .tiers
            .get(subject_id)
            .cloned()
            .unwrap_or_else(|| "free".to_string()))
    }
}

/// Tier lookup that always times out
pub struct UnavailableTierResolver;

#[async_trait]
impl TierResolver for UnavailableTierResolver {
    async fn resolve_tier(&self, _subject_id: &str) -> Result<String, TierResolutionError> {
        Err(TierResolutionError::Timeout { timeout_ms: 200 })
    }
}
