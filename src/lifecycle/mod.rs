//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Signals (signals.rs):
//!     SIGTERM/SIGINT → Shutdown::trigger
//!
//! Shutdown (shutdown.rs):
//!     broadcast → HTTP server (graceful drain)
//!               → rate limit sweeper
//!               → manifest watcher (dropped with the server)
//! ```

pub mod shutdown;
pub mod signals;

pub use shutdown::Shutdown;
