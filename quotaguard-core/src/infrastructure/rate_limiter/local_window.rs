//! Per-process fixed window counters
//!
//! Used only while the distributed store is unavailable. Each process enforces
//! the quota on its own, so with N instances the effective ceiling during an
//! outage is `max_requests × N`.

use dashmap::DashMap;
use tracing::debug;

use super::types::WindowDecision;
use crate::domain::rate_limit::{Policy, RateLimitKey};

/// Counter of one key in the current fixed window
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LocalWindowRecord {
    pub count: u32,
    pub window_reset_at_ms: u64,
}

/// Fixed window store keyed by `(subject, resource)`.
///
/// Read-modify-write of one key happens under that key's shard lock, so
/// concurrent checks never lose an increment.
#[derive(Debug, Default)]
pub struct LocalWindowStore {
    records: DashMap<RateLimitKey, LocalWindowRecord>,
}

impl LocalWindowStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn check(&self, key: &RateLimitKey, policy: &Policy, now_ms: u64) -> WindowDecision {
        let mut record = self
            .records
            .entry(key.clone())
            .or_insert(LocalWindowRecord {
                count: 0,
                window_reset_at_ms: now_ms.saturating_add(policy.window_ms),
            });

        if record.count == 0 || now_ms > record.window_reset_at_ms {
            *record = LocalWindowRecord {
                count: 1,
                window_reset_at_ms: now_ms.saturating_add(policy.window_ms),
            };
            return WindowDecision::allowed(
                policy.max_requests.saturating_sub(1),
                record.window_reset_at_ms,
            );
        }

        record.count = record.count.saturating_add(1);

        if record.count <= policy.max_requests {
            WindowDecision::allowed(
                policy.max_requests - record.count,
                record.window_reset_at_ms,
            )
        } else {
            WindowDecision::denied(record.window_reset_at_ms)
        }
    }

    /// Drop the records of a subject, optionally limited to one resource.
    /// Returns the number of removed records.
    pub fn reset(&self, subject_id: &str, resource_path: Option<&str>) -> usize {
        let before = self.records.len();
        self.records
            .retain(|key, _| !key.belongs_to(subject_id, resource_path));
        before.saturating_sub(self.records.len())
    }

    /// Remove every record whose window ended before `now_ms`
    pub fn sweep(&self, now_ms: u64) -> usize {
        let before = self.records.len();
        self.records
            .retain(|_, record| now_ms <= record.window_reset_at_ms);
        let removed = before.saturating_sub(self.records.len());
        if removed > 0 {
            debug!(removed, "Swept expired local rate limit windows");
        }
        removed
    }

    pub fn get(&self, key: &RateLimitKey) -> Option<LocalWindowRecord> {
        self.records.get(key).map(|record| *record)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}
