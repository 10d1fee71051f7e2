//! Admission control domain

pub mod errors;
pub mod policy;
pub mod repositories;
pub mod value_objects;

pub use errors::{RateLimitError, StoreError, TierResolutionError};
pub use policy::{DEFAULT_TIER, Policy, PolicyTable};
pub use repositories::TierResolver;
pub use value_objects::RateLimitKey;
