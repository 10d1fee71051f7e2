//! Rate Limiter Service
//!
//! The coordinator every request passes through. It resolves the subject's
//! tier, picks the store according to the distributed store health, and turns
//! the window decision into a [`RateLimitResult`]:
//! - Sliding window log in the shared store while it is available
//! - Fixed window counters in this process while it is not
//!
//! A store failure never denies a request. The failing call is answered from
//! the local store and every later call stays local until the store client
//! reports a fresh connection.

use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::task::JoinHandle;
use tokio::time::interval;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::clock::{Clock, SystemClock};
use super::dragonfly::DragonflyWindowStore;
use super::health::StoreHealthTracker;
use super::local_window::LocalWindowStore;
use super::storage::{DistributedWindowStore, InMemoryWindowLog};
use super::types::{
    Backend, RateLimitResult, RateLimiterStatus, StoreEvent, StoreHealth, WindowDecision,
};
use crate::config::{DistributedStoreConfig, RateLimitConfig, RateLimitStorageBackend};
use crate::domain::rate_limit::{
    DEFAULT_TIER, Policy, PolicyTable, RateLimitError, RateLimitKey, StoreError, TierResolver,
};

/// Main rate limiter service
pub struct RateLimiterService {
    policies: PolicyTable,
    tier_resolver: Arc<dyn TierResolver>,
    local: Arc<LocalWindowStore>,
    distributed: Arc<dyn DistributedWindowStore>,
    health: Arc<StoreHealthTracker>,
    clock: Arc<dyn Clock>,
    config: RateLimitConfig,
    shutdown: CancellationToken,
    /// Taken by `start`; subscribed at construction so no event is missed
    events: Mutex<Option<broadcast::Receiver<StoreEvent>>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl RateLimiterService {
    /// Create a rate limiter with the configured storage backend.
    ///
    /// An unreachable Dragonfly is not an error: the service starts in local
    /// mode and switches over once the store connects.
    pub async fn connect(
        config: RateLimitConfig,
        store_config: &DistributedStoreConfig,
        tier_resolver: Arc<dyn TierResolver>,
    ) -> Result<Self, StoreError> {
        let store: Arc<dyn DistributedWindowStore> = match config.storage_backend {
            RateLimitStorageBackend::Dragonfly => {
                let store =
                    DragonflyWindowStore::connect(store_config.clone(), &config.key_prefix)
                        .await?;
                info!(
                    url = %store_config.url,
                    atomic = store_config.atomic_window,
                    "Rate limiter using Dragonfly storage backend"
                );
                Arc::new(store)
            }
            RateLimitStorageBackend::Memory => {
                info!("Rate limiter using in-memory storage backend");
                Arc::new(InMemoryWindowLog::new())
            }
        };

        Ok(Self::with_store(
            config,
            tier_resolver,
            store,
            Arc::new(SystemClock),
        ))
    }

    /// Create with a custom store and clock (for testing)
    pub fn with_store(
        config: RateLimitConfig,
        tier_resolver: Arc<dyn TierResolver>,
        store: Arc<dyn DistributedWindowStore>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        // Subscribe before sampling the connection state; a reconnect landing
        // in between is then still delivered to the listener
        let events = store.subscribe();
        let initial = if store.is_connected() {
            StoreHealth::Available
        } else {
            StoreHealth::Unavailable
        };

        Self {
            policies: PolicyTable::from_tiers(&config.tiers),
            tier_resolver,
            local: Arc::new(LocalWindowStore::new()),
            distributed: store,
            health: Arc::new(StoreHealthTracker::new(initial)),
            clock,
            config,
            shutdown: CancellationToken::new(),
            events: Mutex::new(Some(events)),
            tasks: Mutex::new(Vec::new()),
        }
    }

    /// Check if rate limiting is enabled
    pub fn is_enabled(&self) -> bool {
        self.config.enabled
    }

    /// Get the configuration
    pub fn config(&self) -> &RateLimitConfig {
        &self.config
    }

    /// Get the store health tracker
    pub fn health(&self) -> &StoreHealthTracker {
        &self.health
    }

    /// Policy applied to a subject. Tier lookup failures fall back to the
    /// free tier, never to an unrestricted one.
    pub async fn policy_for(&self, subject_id: &str) -> Policy {
        match self.tier_resolver.resolve_tier(subject_id).await {
            Ok(tier) => self.policies.resolve(&tier).clone(),
            Err(e) => {
                warn!(
                    subject = %subject_id,
                    error = %e,
                    "Tier lookup failed, applying {} tier",
                    DEFAULT_TIER
                );
                self.policies.free().clone()
            }
        }
    }

    /// Admit or deny one request of `subject_id` on `resource_path`.
    ///
    /// # Errors
    /// Only malformed input (empty subject or resource) is an error. Quota
    /// denials are reported through [`RateLimitResult::allowed`].
    pub async fn check(
        &self,
        subject_id: &str,
        resource_path: &str,
    ) -> Result<RateLimitResult, RateLimitError> {
        let key = RateLimitKey::new(subject_id, resource_path)?;

        if !self.config.enabled {
            return Ok(RateLimitResult::unlimited(self.clock.now_millis()));
        }

        let policy = self.policy_for(key.subject_id()).await;
        let now_ms = self.clock.now_millis();
        let (decision, backend) = self.decide(&key, &policy, now_ms).await;

        if !decision.allowed {
            debug!(
                key = %key,
                tier = %policy.tier,
                backend = %backend,
                reset_at_ms = decision.reset_at_ms,
                "Rate limit exceeded"
            );
        }

        Ok(RateLimitResult {
            allowed: decision.allowed,
            limit: policy.max_requests,
            remaining: decision.remaining,
            reset_at_ms: decision.reset_at_ms,
            message: (!decision.allowed).then(|| policy.message.clone()),
            tier: policy.tier,
            backend,
            checked_at_ms: now_ms,
        })
    }

    async fn decide(
        &self,
        key: &RateLimitKey,
        policy: &Policy,
        now_ms: u64,
    ) -> (WindowDecision, Backend) {
        if self.health.is_available() {
            match self.distributed.check(key, policy, now_ms).await {
                Ok(decision) => return (decision, Backend::Distributed),
                Err(e) => self.on_store_failure("check", &e),
            }
        }

        (self.local.check(key, policy, now_ms), Backend::Local)
    }

    fn on_store_failure(&self, operation: &'static str, error: &StoreError) {
        if self.health.mark_unavailable() {
            warn!(
                operation,
                error = %error,
                "Distributed rate limit store unavailable, falling back to local windows"
            );
        } else {
            debug!(operation, error = %error, "Distributed rate limit store call failed");
        }
    }

    /// Clear the quota of a subject, optionally only on one resource.
    ///
    /// The distributed store is cleared on a best-effort basis; the local
    /// records are always cleared.
    pub async fn reset(
        &self,
        subject_id: &str,
        resource_path: Option<&str>,
    ) -> Result<(), RateLimitError> {
        if subject_id.trim().is_empty() {
            return Err(RateLimitError::EmptySubject);
        }
        if resource_path.is_some_and(|resource| resource.trim().is_empty()) {
            return Err(RateLimitError::EmptyResource);
        }

        if self.health.is_available() {
            match self.distributed.reset(subject_id, resource_path).await {
                Ok(deleted) => {
                    debug!(subject = %subject_id, deleted, "Reset distributed rate limit windows")
                }
                Err(e) => {
                    warn!(
                        subject = %subject_id,
                        error = %e,
                        "Failed to reset distributed rate limit windows, clearing local windows only"
                    );
                    self.health.mark_unavailable();
                }
            }
        }

        let removed = self.local.reset(subject_id, resource_path);
        info!(
            subject = %subject_id,
            resource = resource_path.unwrap_or("*"),
            local_removed = removed,
            "Rate limit reset"
        );

        Ok(())
    }

    /// Operator-facing view of the coordinator
    pub fn status(&self) -> RateLimiterStatus {
        let health = self.health.current();
        RateLimiterStatus {
            using_distributed_store: self.config.enabled && health == StoreHealth::Available,
            enabled: self.config.enabled,
            health,
            tracked_local_keys: self.local.len(),
        }
    }

    /// Start the store event listener and the local sweep task.
    ///
    /// Calling it again is a no-op.
    pub fn start(&self) {
        let Some(events) = self
            .events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        else {
            debug!("Rate limiter background tasks already started");
            return;
        };

        let listener = tokio::spawn(listen_for_store_events(
            events,
            Arc::clone(&self.distributed),
            Arc::clone(&self.health),
            self.shutdown.clone(),
        ));

        let sweep_interval = self.config.local_sweep_interval();
        let local = Arc::clone(&self.local);
        let store = Arc::clone(&self.distributed);
        let clock = Arc::clone(&self.clock);
        let shutdown = self.shutdown.clone();
        let sweeper = tokio::spawn(async move {
            let mut interval = interval(sweep_interval);
            // First tick completes immediately
            interval.tick().await;

            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = interval.tick() => {
                        let now_ms = clock.now_millis();
                        let local_removed = local.sweep(now_ms);
                        let store_removed = store.purge_expired(now_ms);
                        debug!(local_removed, store_removed, "Rate limiter cleanup completed");
                    }
                }
            }
        });

        self.tasks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .extend([listener, sweeper]);

        info!(
            sweep_interval_secs = sweep_interval.as_secs(),
            "Rate limiter background tasks started"
        );
    }

    /// Stop background tasks and close the distributed store
    pub async fn close(&self) {
        self.shutdown.cancel();

        let tasks: Vec<_> = self
            .tasks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .drain(..)
            .collect();
        for task in tasks {
            if let Err(e) = task.await {
                warn!(error = %e, "Rate limiter background task failed");
            }
        }

        self.distributed.close().await;
        info!("Rate limiter closed");
    }
}

async fn listen_for_store_events(
    mut events: broadcast::Receiver<StoreEvent>,
    store: Arc<dyn DistributedWindowStore>,
    health: Arc<StoreHealthTracker>,
    shutdown: CancellationToken,
) {
    loop {
        let event = tokio::select! {
            _ = shutdown.cancelled() => break,
            event = events.recv() => event,
        };

        match event {
            Ok(StoreEvent::Connected) => {
                if health.mark_available() {
                    info!("Distributed rate limit store connected, resuming sliding windows");
                }
            }
            Ok(StoreEvent::Disconnected) => {
                if health.mark_unavailable() {
                    warn!("Distributed rate limit store disconnected, using local windows");
                }
            }
            Err(RecvError::Lagged(skipped)) => {
                debug!(skipped, "Store event listener lagged");
                if store.is_connected() && health.mark_available() {
                    info!("Distributed rate limit store connected, resuming sliding windows");
                }
            }
            Err(RecvError::Closed) => break,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TierPolicyConfig;
    use crate::domain::rate_limit::TierResolutionError;
    use crate::infrastructure::rate_limiter::ManualClock;
    use crate::infrastructure::subscription::StaticTierResolver;
    use async_trait::async_trait;
    use std::collections::BTreeMap;
    use std::sync::atomic::{AtomicBool, Ordering};

    fn test_config() -> RateLimitConfig {
        let mut tiers = BTreeMap::new();
        tiers.insert(
            "free".to_string(),
            TierPolicyConfig {
                window_ms: 60_000,
                max_requests: 3,
                message: "Free tier limit reached".to_string(),
            },
        );
        tiers.insert(
            "pro".to_string(),
            TierPolicyConfig {
                window_ms: 60_000,
                max_requests: 10,
                message: "Pro tier limit reached".to_string(),
            },
        );

        RateLimitConfig {
            enabled: true,
            storage_backend: RateLimitStorageBackend::Memory,
            tiers,
            ..RateLimitConfig::default()
        }
    }

    /// In-memory log whose calls can be made to fail
    #[derive(Default)]
    struct BrokenStore {
        inner: InMemoryWindowLog,
        failing: AtomicBool,
    }

    #[async_trait]
    impl DistributedWindowStore for BrokenStore {
        async fn check(
            &self,
            key: &RateLimitKey,
            policy: &Policy,
            now_ms: u64,
        ) -> Result<WindowDecision, StoreError> {
            if self.failing.load(Ordering::SeqCst) {
                return Err(StoreError::Disconnected);
            }
            self.inner.check(key, policy, now_ms).await
        }

        async fn reset(
            &self,
            subject_id: &str,
            resource_path: Option<&str>,
        ) -> Result<u64, StoreError> {
            if self.failing.load(Ordering::SeqCst) {
                return Err(StoreError::Disconnected);
            }
            self.inner.reset(subject_id, resource_path).await
        }

        fn subscribe(&self) -> broadcast::Receiver<StoreEvent> {
            self.inner.subscribe()
        }

        fn is_connected(&self) -> bool {
            !self.failing.load(Ordering::SeqCst)
        }

        async fn close(&self) {}
    }

    struct FailingResolver;

    #[async_trait]
    impl TierResolver for FailingResolver {
        async fn resolve_tier(&self, _subject_id: &str) -> Result<String, TierResolutionError> {
            Err(TierResolutionError::Timeout { timeout_ms: 5 })
        }
    }

    fn service_with(
        config: RateLimitConfig,
        resolver: Arc<dyn TierResolver>,
        store: Arc<dyn DistributedWindowStore>,
    ) -> (RateLimiterService, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(0));
        let service = RateLimiterService::with_store(config, resolver, store, clock.clone());
        (service, clock)
    }

    #[tokio::test]
    async fn test_rate_limiter_disabled() {
        let mut config = test_config();
        config.enabled = false;
        let (service, _) = service_with(
            config,
            Arc::new(StaticTierResolver::default()),
            Arc::new(InMemoryWindowLog::new()),
        );

        for _ in 0..10 {
            let result = service.check("u1", "/x").await.unwrap();
            assert!(result.allowed);
            assert_eq!(result.limit, u32::MAX);
            assert_eq!(result.backend, Backend::Disabled);
        }
        assert!(!service.status().using_distributed_store);
    }

    #[tokio::test]
    async fn test_denial_carries_policy_message() {
        let (service, clock) = service_with(
            test_config(),
            Arc::new(StaticTierResolver::default()),
            Arc::new(InMemoryWindowLog::new()),
        );

        for t in 0..3 {
            clock.set(t);
            let result = service.check("u1", "/x").await.unwrap();
            assert!(result.allowed);
            assert!(result.message.is_none());
            assert_eq!(result.backend, Backend::Distributed);
        }

        clock.set(3);
        let denied = service.check("u1", "/x").await.unwrap();
        assert!(!denied.allowed);
        assert_eq!(denied.tier, "free");
        assert_eq!(denied.message.as_deref(), Some("Free tier limit reached"));
        assert_eq!(denied.retry_after_secs(), 60);
    }

    #[tokio::test]
    async fn test_tier_lookup_failure_uses_free_tier() {
        let (service, _) = service_with(
            test_config(),
            Arc::new(FailingResolver),
            Arc::new(InMemoryWindowLog::new()),
        );

        let result = service.check("u1", "/x").await.unwrap();
        assert_eq!(result.tier, "free");
        assert_eq!(result.limit, 3);
    }

    #[tokio::test]
    async fn test_resolved_tier_applies() {
        let (service, _) = service_with(
            test_config(),
            Arc::new(StaticTierResolver::new("PRO")),
            Arc::new(InMemoryWindowLog::new()),
        );

        let result = service.check("u1", "/x").await.unwrap();
        assert_eq!(result.tier, "pro");
        assert_eq!(result.limit, 10);
        assert_eq!(result.remaining, 9);
    }

    #[tokio::test]
    async fn test_empty_input_rejected() {
        let (service, _) = service_with(
            test_config(),
            Arc::new(StaticTierResolver::default()),
            Arc::new(InMemoryWindowLog::new()),
        );

        assert_eq!(
            service.check("", "/x").await,
            Err(RateLimitError::EmptySubject)
        );
        assert_eq!(
            service.check("u1", "  ").await,
            Err(RateLimitError::EmptyResource)
        );
        assert_eq!(
            service.reset("u1", Some("")).await,
            Err(RateLimitError::EmptyResource)
        );
    }

    #[tokio::test]
    async fn test_store_failure_falls_back_in_same_call() {
        let store = Arc::new(BrokenStore::default());
        let (service, _) = service_with(
            test_config(),
            Arc::new(StaticTierResolver::default()),
            store.clone(),
        );

        store.failing.store(true, Ordering::SeqCst);
        let result = service.check("u1", "/x").await.unwrap();
        assert!(result.allowed);
        assert_eq!(result.backend, Backend::Local);
        assert_eq!(service.health().current(), StoreHealth::Unavailable);

        // A working store alone does not bring the service back
        store.failing.store(false, Ordering::SeqCst);
        let result = service.check("u1", "/x").await.unwrap();
        assert_eq!(result.backend, Backend::Local);
        assert_eq!(result.remaining, 1);
    }

    #[tokio::test]
    async fn test_reset_survives_store_failure() {
        let store = Arc::new(BrokenStore::default());
        let (service, _) = service_with(
            test_config(),
            Arc::new(StaticTierResolver::default()),
            store.clone(),
        );

        store.failing.store(true, Ordering::SeqCst);
        for _ in 0..4 {
            service.check("u1", "/x").await.unwrap();
        }
        assert!(!service.check("u1", "/x").await.unwrap().allowed);

        service.reset("u1", None).await.unwrap();
        assert_eq!(service.status().tracked_local_keys, 0);
        assert!(service.check("u1", "/x").await.unwrap().allowed);
    }

    #[tokio::test]
    async fn test_status_reports_health() {
        let store = Arc::new(BrokenStore::default());
        let (service, _) = service_with(
            test_config(),
            Arc::new(StaticTierResolver::default()),
            store.clone(),
        );

        let status = service.status();
        assert!(status.using_distributed_store);
        assert!(status.enabled);

        store.failing.store(true, Ordering::SeqCst);
        service.check("u1", "/x").await.unwrap();

        let status = service.status();
        assert!(!status.using_distributed_store);
        assert_eq!(status.health, StoreHealth::Unavailable);
        assert_eq!(status.tracked_local_keys, 1);
    }

    #[tokio::test]
    async fn test_policy_for_unknown_tier_is_free() {
        let (service, _) = service_with(
            test_config(),
            Arc::new(StaticTierResolver::new("platinum")),
            Arc::new(InMemoryWindowLog::new()),
        );

        let policy = service.policy_for("u1").await;
        assert_eq!(policy.tier, "free");
        assert_eq!(policy.max_requests, 3);
    }

    #[tokio::test]
    async fn test_start_and_close() {
        let (service, _) = service_with(
            test_config(),
            Arc::new(StaticTierResolver::default()),
            Arc::new(InMemoryWindowLog::new()),
        );

        service.start();
        service.start();
        service.close().await;

        assert!(service.tasks.lock().unwrap().is_empty());
    }
}
