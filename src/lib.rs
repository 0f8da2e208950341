//! Request-security layer for a marketing site.
//!
//! CSRF double-submit tokens, per-response CSP nonces, sliding-window rate
//! limiting, security event logging and CSP hash allowlisting for inline
//! animation styles, orchestrated by one Axum middleware.

pub mod config;
pub mod hashes;
pub mod http;
pub mod lifecycle;
pub mod observability;
pub mod security;

pub use config::schema::GuardConfig;
pub use http::{build_router, AppState, HttpServer};
pub use lifecycle::Shutdown;
