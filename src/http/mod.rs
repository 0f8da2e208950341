//! HTTP protocol handling subsystem.
//!
//! # Data Flow
//! ```text
//! TCP connection
//!     → server.rs (Axum setup, request ID, tracing, timeout, body limit)
//!     → middleware.rs (nonce → CSRF → rate limit)
//!     → handlers.rs (token, nonce, CSP report, contact, health)
//!     → middleware.rs (security headers, CSRF cookie renewal)
//!     → Send to client
//! ```
//!
//! Rejections from any stage are rendered by error.rs.

pub mod error;
pub mod handlers;
pub mod middleware;
pub mod request;
pub mod server;

pub use error::ApiError;
pub use request::ClientInfo;
pub use server::{build_router, AppState, HttpServer};
