//! Quotaguard Core - Admission control for multi-instance API servers
//!
//! This crate decides, for every request attributed to a subject (a user) and a
//! resource (an API path), whether the request may proceed under the subject's
//! quota policy.
//!
//! # Modules
//!
//! - [`config`] - Strongly-typed configuration with TOML and environment variable support
//! - [`domain`] - Policies, rate limit keys, errors and the tier resolution interface
//! - [`infrastructure`] - Window stores (Dragonfly/Redis and local), the coordinator,
//!   and tier resolvers
//! - [`logging`] - Structured logging with tracing
//!
//! # Architecture
//!
//! ```text
//! quotaguard-core/
//! ├── domain/              # Pure business logic
//! │   └── rate_limit/      # Policy table, keys, errors, TierResolver trait
//! ├── infrastructure/      # External integrations
//! │   ├── rate_limiter/    # Clock, local + distributed stores, coordinator
//! │   └── subscription/    # Static and PostgreSQL tier resolvers
//! └── config/              # Configuration management
//! ```
//!
//! # Failover
//!
//! Counters normally live in a shared Dragonfly/Redis instance using a sliding
//! window log. When that store fails, the coordinator degrades to a per-process
//! fixed window and stays there until the store client reports a fresh
//! connection. During an outage the effective ceiling across a deployment is
//! `max_requests × instances`.
//!
//! # Configuration
//!
//! ```rust,ignore
//! use quotaguard_core::Config;
//!
//! let config = Config::load()?;
//! ```
//!
//! Environment variables use the `QUOTAGUARD__` prefix with double underscore separators:
//!
//! ```bash
//! QUOTAGUARD__STORE__URL=redis://127.0.0.1:6379
//! QUOTAGUARD__RATE_LIMIT__ENABLED=false
//! ```

pub mod config;
pub mod domain;
pub mod infrastructure;
pub mod logging;

pub use config::Config;
pub use logging::init_tracing;
