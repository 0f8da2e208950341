//! Security subsystem.
//!
//! # Data Flow
//! ```text
//! Incoming request:
//!     → nonce.rs (fresh per-response nonce)
//!     → token.rs (double-submit CSRF check on mutating routes)
//!     → rate_limit.rs (sliding window per client key)
//!     → handler
//!     → csp.rs + headers.rs (CSP with nonce + manifest hashes, hardening headers)
//!
//! Every rejection or anomaly:
//!     → events.rs (structured security event)
//! ```
//!
//! # Design Decisions
//! - Fail closed: a missing token is a verification failure, not an error
//! - No server-side sessions; CSRF tokens are bearer values scoped to a browser
//! - Nothing here panics or returns errors into the request path

pub mod csp;
pub mod events;
pub mod headers;
pub mod nonce;
pub mod rate_limit;
pub mod token;

pub use csp::CspPolicy;
pub use events::{SecurityEvent, SecurityEventKind, SecurityEventLogger};
pub use nonce::CspNonce;
pub use rate_limit::{Clock, InMemoryWindowStore, ManualClock, RateLimiter, SystemClock, WindowStore};
pub use token::TokenService;
