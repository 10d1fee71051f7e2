//! Distributed Window Storage
//!
//! Provides the sliding window log contract shared by every server instance:
//! - Dragonfly/Redis for distributed, production use (see [`super::dragonfly`])
//! - In-memory for development and single-instance deployments

use async_trait::async_trait;
use dashmap::DashMap;
use std::collections::VecDeque;
use tokio::sync::broadcast;

use super::types::{StoreEvent, WindowDecision};
use crate::domain::rate_limit::{Policy, RateLimitKey, StoreError};

/// Sliding window log over a store shared by every instance
#[async_trait]
pub trait DistributedWindowStore: Send + Sync {
    /// Prune entries older than the window, then admit and record `now_ms`
    /// if fewer than `max_requests` entries survive.
    async fn check(
        &self,
        key: &RateLimitKey,
        policy: &Policy,
        now_ms: u64,
    ) -> Result<WindowDecision, StoreError>;

    /// Delete the windows of a subject, optionally limited to one resource.
    /// Returns the number of deleted keys.
    async fn reset(
        &self,
        subject_id: &str,
        resource_path: Option<&str>,
    ) -> Result<u64, StoreError>;

    /// Connection events emitted by the store client
    fn subscribe(&self) -> broadcast::Receiver<StoreEvent>;

    /// Whether the client currently holds a usable connection
    fn is_connected(&self) -> bool;

    /// Drop windows whose TTL elapsed. Stores with native key expiry do nothing.
    fn purge_expired(&self, _now_ms: u64) -> usize {
        0
    }

    /// Release connections and stop background tasks
    async fn close(&self);
}

#[derive(Debug)]
struct WindowLog {
    /// Admitted request timestamps, oldest first
    timestamps: VecDeque<u64>,
    expires_at_ms: u64,
}

/// In-memory sliding window log for development/single instance
#[derive(Debug)]
pub struct InMemoryWindowLog {
    logs: DashMap<RateLimitKey, WindowLog>,
    events: broadcast::Sender<StoreEvent>,
}

impl InMemoryWindowLog {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(16);
        Self {
            logs: DashMap::new(),
            events,
        }
    }

    /// Number of requests recorded for `key` that are still inside their TTL
    pub fn recorded(&self, key: &RateLimitKey, now_ms: u64) -> usize {
        self.logs
            .get(key)
            .filter(|log| now_ms < log.expires_at_ms)
            .map(|log| log.timestamps.len())
            .unwrap_or(0)
    }
}

impl Default for InMemoryWindowLog {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DistributedWindowStore for InMemoryWindowLog {
    async fn check(
        &self,
        key: &RateLimitKey,
        policy: &Policy,
        now_ms: u64,
    ) -> Result<WindowDecision, StoreError> {
        let mut log = self.logs.entry(key.clone()).or_insert_with(|| WindowLog {
            timestamps: VecDeque::new(),
            expires_at_ms: 0,
        });

        if now_ms >= log.expires_at_ms {
            log.timestamps.clear();
        }

        // Keep ts > now - window without underflowing near the epoch
        log.timestamps.retain(|&ts| ts + policy.window_ms > now_ms);

        let count = log.timestamps.len() as u64;
        if count >= u64::from(policy.max_requests) {
            let oldest = log.timestamps.iter().min().copied().unwrap_or(now_ms);
            return Ok(WindowDecision::denied(oldest + policy.window_ms));
        }

        let position = log.timestamps.partition_point(|&ts| ts <= now_ms);
        log.timestamps.insert(position, now_ms);
        log.expires_at_ms = now_ms + policy.key_ttl_secs() * 1000;

        Ok(WindowDecision::allowed(
            policy.max_requests - count as u32 - 1,
            now_ms + policy.window_ms,
        ))
    }

    async fn reset(
        &self,
        subject_id: &str,
        resource_path: Option<&str>,
    ) -> Result<u64, StoreError> {
        let before = self.logs.len();
        self.logs
            .retain(|key, _| !key.belongs_to(subject_id, resource_path));
        Ok(before.saturating_sub(self.logs.len()) as u64)
    }

    fn subscribe(&self) -> broadcast::Receiver<StoreEvent> {
        self.events.subscribe()
    }

    fn is_connected(&self) -> bool {
        true
    }

    /// Mirrors key expiry in Redis
    fn purge_expired(&self, now_ms: u64) -> usize {
        let before = self.logs.len();
        self.logs.retain(|_, log| now_ms < log.expires_at_ms);
        before.saturating_sub(self.logs.len())
    }

    async fn close(&self) {}
}
