//! Rate Limiting Infrastructure
//!
//! This module provides the admission control system with:
//! - Sliding window log over Dragonfly/Redis, shared by every instance
//! - Fixed window counters in process memory while the shared store is down
//! - Store health tracking driven by store connection events
//! - Tier-based policies resolved per subject

pub mod clock;
pub mod dragonfly;
pub mod health;
pub mod local_window;
pub mod service;
pub mod storage;
pub mod types;

pub use clock::{Clock, ManualClock, SystemClock};
pub use dragonfly::DragonflyWindowStore;
pub use health::StoreHealthTracker;
pub use local_window::LocalWindowStore;
pub use service::RateLimiterService;
pub use storage::{DistributedWindowStore, InMemoryWindowLog};
pub use types::{
    Backend, RateLimitResult, RateLimiterStatus, StoreEvent, StoreHealth, WindowDecision,
};
