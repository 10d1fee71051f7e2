//! Domain Layer - Core business logic and entities
//!
//! This module contains the quota policies, the identity of a rate limit bucket and
//! the interfaces the infrastructure layer implements.

pub mod rate_limit;

pub use rate_limit::*;
