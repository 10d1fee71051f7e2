//! HTTP surface: admission middleware, health and operator endpoints

pub mod controllers;
pub mod middleware;
pub mod models;
pub mod routes;


pub use controllers::AppState;
pub use middleware::{AuthenticatedSubject, IdentityState, RateLimiterState};
pub use routes::create_router;
