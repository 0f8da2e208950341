//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! middleware, handlers, limiter, manifest watcher
//!     → logging.rs (subscriber setup; events via `tracing` macros)
//!     → metrics.rs (request, rejection and security event counters)
//!
//! Consumers:
//!     → stdout (JSON in production, human-readable in development)
//!     → Prometheus scrape on the metrics address
//! ```
//!
//! # Design Decisions
//! - Request IDs come from tower-http and show up in the request span
//! - Security events go through `security::events`, which logs on the `security` target
//! - Recording metrics before the exporter is installed is a no-op

pub mod logging;
pub mod metrics;
