//! Manifest file watcher for hot reload of CSP hashes.

use notify::{Config, Event, RecommendedWatcher, RecursiveMode, Watcher};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use crate::hashes::manifest::HashManifest;
use crate::observability::metrics;
use crate::security::csp::CspPolicy;

/// Reloads the hash manifest into a [`CspPolicy`] when the file changes.
pub struct ManifestWatcher {
    path: PathBuf,
    policy: Arc<CspPolicy>,
}

impl ManifestWatcher {
    pub fn new(path: &Path, policy: Arc<CspPolicy>) -> Self {
        Self {
            path: path.to_path_buf(),
            policy,
        }
    }

    /// Load the manifest now and push its hashes into the policy.
    pub fn reload(&self) -> usize {
        reload_into(&self.path, &self.policy)
    }

    /// Start watching in a background thread. Keep the returned watcher alive.
    ///
    /// The parent directory is watched so atomic replace-by-rename is seen.
    pub fn run(self) -> Result<RecommendedWatcher, notify::Error> {
        let path = self.path.clone();
        let policy = self.policy.clone();
        let file_name = path.file_name().map(|n| n.to_os_string());

        let mut watcher = RecommendedWatcher::new(
            move |res: notify::Result<Event>| match res {
                Ok(event) => {
                    let touches_manifest = event
                        .paths
                        .iter()
                        .any(|p| p.file_name().map(|n| n.to_os_string()) == file_name);
                    if touches_manifest && (event.kind.is_modify() || event.kind.is_create()) {
                        tracing::info!("CSP manifest change detected, reloading...");
                        reload_into(&path, &policy);
                    }
                }
                Err(e) => tracing::error!("Watch error: {:?}", e),
            },
            Config::default().with_poll_interval(Duration::from_secs(2)),
        )?;

        let dir = match self.path.parent() {
            Some(dir) if !dir.as_os_str().is_empty() => dir.to_path_buf(),
            _ => PathBuf::from("."),
        };
        watcher.watch(&dir, RecursiveMode::NonRecursive)?;

        tracing::info!(path = ?self.path, "Manifest watcher started");
        Ok(watcher)
    }
}

fn reload_into(path: &Path, policy: &CspPolicy) -> usize {
    let sources = HashManifest::load_or_default(path).csp_sources();
    let count = sources.len();
    metrics::record_manifest_hashes(count);
    policy.replace_style_hashes(sources);
    count
}
