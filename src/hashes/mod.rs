//! CSP hash allowlisting for runtime-injected inline styles.
//!
//! # Data Flow
//! ```text
//! Dev/CI run (csp-hashes collect):
//!     rendered HTML snapshots
//!     → scanner.rs (style="..." attributes, <style> bodies)
//!     → collector.rs (sha256, dedup by source literal)
//!     → manifest.rs (merge into common/collected/manual, save)
//!
//! Server:
//!     manifest.rs (load_or_default at startup)
//!     → security::csp (style-src hash sources)
//!     → watcher.rs (reload on file change)
//! ```
//!
//! # Design Decisions
//! - The animation runtime can't see the response nonce, so its styles are
//!   allowed by hash instead
//! - Merging never removes hashes; stale ones are pruned by hand
//! - A missing or broken manifest means "no hashes", never a failed start

pub mod collector;
pub mod manifest;
pub mod scanner;
pub mod watcher;

pub use collector::{csp_hash, CollectorStats, HashCollector, HashRecord};
pub use manifest::{HashManifest, ManifestError};
pub use watcher::ManifestWatcher;
