//! QuotaGuard - admission control server
//!
//! Wires the quotaguard-core rate limiter into an axum application

mod app;
pub mod presentation;

pub use app::{AppHandle, create_app};
pub use quotaguard_core::{Config, init_tracing};

// Re-export for convenience
pub use quotaguard_core;
