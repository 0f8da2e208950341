//! Persisted CSP hash manifest.
//!
//! ```json
//! {
//!   "version": "1.0.0",
//!   "lastUpdated": "2026-01-01T00:00:00Z",
//!   "hashes": { "common": [], "collected": [], "manual": [] },
//!   "components": { "Hero": ["'sha256-...'"] },
//!   "stats": { "totalHashes": 0, ... }
//! }
//! ```
//!
//! Collection runs merge into the file; nothing is ever removed automatically.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::fs;
use std::io::Write;
use std::path::Path;
use thiserror::Error;

use crate::hashes::collector::HashCollector;

pub const MANIFEST_VERSION: &str = "1.0.0";

#[derive(Debug, Error)]
pub enum ManifestError {
    #[error("manifest IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("manifest is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),
}

/// Hash sources grouped by origin.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ManifestHashes {
    /// Curated by hand, stable across releases.
    pub common: Vec<String>,
    /// Added by automated collection runs.
    pub collected: Vec<String>,
    /// One-off additions for content outside the animation layer.
    pub manual: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ManifestStats {
    pub total_hashes: usize,
    pub common_count: usize,
    pub collected_count: usize,
    pub manual_count: usize,
    pub last_run_hashes: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct HashManifest {
    pub version: String,
    pub last_updated: Option<DateTime<Utc>>,
    pub hashes: ManifestHashes,
    pub components: BTreeMap<String, Vec<String>>,
    pub stats: ManifestStats,
}

impl Default for HashManifest {
    fn default() -> Self {
        Self {
            version: MANIFEST_VERSION.to_string(),
            last_updated: None,
            hashes: ManifestHashes::default(),
            components: BTreeMap::new(),
            stats: ManifestStats::default(),
        }
    }
}

/// Whether `source` is a quoted hash source safe to interpolate into a header.
pub fn is_hash_source(source: &str) -> bool {
    let Some(inner) = source.strip_prefix('\'').and_then(|s| s.strip_suffix('\'')) else {
        return false;
    };
    let Some((algo, digest)) = inner.split_once('-') else {
        return false;
    };
    matches!(algo, "sha256" | "sha384" | "sha512")
        && !digest.is_empty()
        && digest
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '/' | '=' | '-' | '_'))
}

impl HashManifest {
    pub fn load(path: &Path) -> Result<Self, ManifestError> {
        let content = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&content)?)
    }

    /// Load the manifest, falling back to an empty one if it can't be read.
    pub fn load_or_default(path: &Path) -> Self {
        match Self::load(path) {
            Ok(manifest) => {
                tracing::info!(
                    path = %path.display(),
                    hashes = manifest.csp_sources().len(),
                    "Loaded CSP hash manifest"
                );
                manifest
            }
            Err(ManifestError::Io(e)) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!(path = %path.display(), "No CSP hash manifest, starting empty");
                Self::default()
            }
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "Unreadable CSP hash manifest, starting empty");
                Self::default()
            }
        }
    }

    /// Write the manifest via a temporary file and rename.
    pub fn save(&self, path: &Path) -> Result<(), ManifestError> {
        let dir = match path.parent() {
            Some(dir) if !dir.as_os_str().is_empty() => dir,
            _ => Path::new("."),
        };
        fs::create_dir_all(dir)?;

        let json = serde_json::to_string_pretty(self)?;
        let (tmp_path, mut file) = tempfile_in(dir, path)?;
        file.write_all(json.as_bytes())?;
        file.write_all(b"\n")?;
        file.sync_all()?;
        drop(file);
        fs::rename(&tmp_path, path)?;

        tracing::info!(path = %path.display(), hashes = self.stats.total_hashes, "Saved CSP hash manifest");
        Ok(())
    }

    fn known(&self) -> HashSet<&str> {
        self.hashes
            .common
            .iter()
            .chain(&self.hashes.collected)
            .chain(&self.hashes.manual)
            .map(String::as_str)
            .collect()
    }

    /// Merge a collection run. Returns how many hashes were new.
    pub fn merge_collected(&mut self, collector: &HashCollector) -> usize {
        let records = collector.records();
        let known: HashSet<String> = self.known().into_iter().map(str::to_string).collect();

        let mut added = 0;
        for record in &records {
            if !known.contains(&record.hash) {
                self.hashes.collected.push(record.hash.clone());
                added += 1;
            }
            if let Some(component) = &record.component_hint {
                let hashes = self.components.entry(component.clone()).or_default();
                if !hashes.contains(&record.hash) {
                    hashes.push(record.hash.clone());
                }
            }
        }

        self.stats.last_run_hashes = records.len();
        self.touch();
        added
    }

    /// Add a hand-picked hash source. Returns false if invalid or already present.
    pub fn add_manual(&mut self, source: &str) -> bool {
        if !is_hash_source(source) || self.known().contains(source) {
            return false;
        }
        self.hashes.manual.push(source.to_string());
        self.touch();
        true
    }

    /// Ordered, de-duplicated union of all buckets for the `style-src` directive.
    pub fn csp_sources(&self) -> Vec<String> {
        let mut seen = HashSet::new();
        let mut sources = Vec::new();
        for source in self
            .hashes
            .common
            .iter()
            .chain(&self.hashes.collected)
            .chain(&self.hashes.manual)
        {
            if !is_hash_source(source) {
                tracing::warn!(source = %source, "Skipping malformed manifest entry");
                continue;
            }
            if seen.insert(source.as_str()) {
                sources.push(source.clone());
            }
        }
        sources
    }

    fn touch(&mut self) {
        self.last_updated = Some(Utc::now());
        self.version = MANIFEST_VERSION.to_string();
        self.stats.common_count = self.hashes.common.len();
        self.stats.collected_count = self.hashes.collected.len();
        self.stats.manual_count = self.hashes.manual.len();
        self.stats.total_hashes = self.csp_sources().len();
    }
}

fn tempfile_in(dir: &Path, target: &Path) -> std::io::Result<(std::path::PathBuf, fs::File)> {
    let name = target
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "manifest.json".to_string());
    let tmp_path = dir.join(format!(".{name}.{}.tmp", uuid::Uuid::new_v4()));
    let file = fs::File::create(&tmp_path)?;
    Ok((tmp_path, file))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hashes::collector::csp_hash;

    fn collector_with(contents: &[(&str, Option<&str>)]) -> HashCollector {
        let collector = HashCollector::new();
        collector.start();
        for (content, hint) in contents {
            collector.observe(content, *hint);
        }
        collector
    }

    #[test]
    fn test_missing_file_gives_empty_baseline() {
        let dir = tempfile::tempdir().unwrap();
        let manifest = HashManifest::load_or_default(&dir.path().join("absent.json"));
        assert_eq!(manifest, HashManifest::default());
    }

    #[test]
    fn test_invalid_file_gives_empty_baseline() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.json");
        fs::write(&path, "{ not json").unwrap();
        assert!(HashManifest::load_or_default(&path).csp_sources().is_empty());
    }

    #[test]
    fn test_merge_dedups_against_all_buckets() {
        let mut manifest = HashManifest::default();
        manifest.hashes.common.push(csp_hash("opacity: 0;"));
        manifest.hashes.manual.push(csp_hash("opacity: 0.5;"));

        let collector = collector_with(&[
            ("opacity: 0;", None),
            ("opacity: 0.5;", None),
            ("opacity: 1;", Some("Hero")),
        ]);

        assert_eq!(manifest.merge_collected(&collector), 1);
        assert_eq!(manifest.hashes.collected, vec![csp_hash("opacity: 1;")]);
        assert_eq!(manifest.components["Hero"], vec![csp_hash("opacity: 1;")]);
        assert_eq!(manifest.stats.total_hashes, 3);
        assert_eq!(manifest.stats.last_run_hashes, 3);

        // A second run with the same content adds nothing.
        assert_eq!(manifest.merge_collected(&collector), 0);
        assert_eq!(manifest.hashes.collected.len(), 1);
    }

    #[test]
    fn test_save_and_reload_merges_across_runs() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("csp-hashes.json");

        let mut first = HashManifest::load_or_default(&path);
        first.merge_collected(&collector_with(&[("a: 1;", None)]));
        first.save(&path).unwrap();

        let mut second = HashManifest::load_or_default(&path);
        second.merge_collected(&collector_with(&[("a: 1;", None), ("b: 2;", None)]));
        second.save(&path).unwrap();

        let reloaded = HashManifest::load(&path).unwrap();
        assert_eq!(reloaded.hashes.collected.len(), 2);
        assert!(reloaded.last_updated.is_some());

        let raw: serde_json::Value = serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        assert!(raw["hashes"]["common"].is_array());
        assert!(raw["lastUpdated"].is_string());
        assert_eq!(raw["stats"]["collectedCount"], 2);
    }

    #[test]
    fn test_csp_sources_order_and_filter() {
        let mut manifest = HashManifest::default();
        manifest.hashes.common = vec![csp_hash("x"), "'unsafe-inline'".into()];
        manifest.hashes.collected = vec![csp_hash("y"), csp_hash("x")];
        manifest.hashes.manual = vec!["'sha256-abc; script-src *'".into()];

        assert_eq!(manifest.csp_sources(), vec![csp_hash("x"), csp_hash("y")]);
    }

    #[test]
    fn test_add_manual() {
        let mut manifest = HashManifest::default();
        assert!(manifest.add_manual(&csp_hash("z")));
        assert!(!manifest.add_manual(&csp_hash("z")));
        assert!(!manifest.add_manual("sha256-unquoted"));
        assert_eq!(manifest.stats.manual_count, 1);
    }

    #[test]
    fn test_is_hash_source() {
        assert!(is_hash_source(&csp_hash("anything")));
        assert!(is_hash_source("'sha384-abc+/='"));
        assert!(!is_hash_source("'sha1-abc'"));
        assert!(!is_hash_source("'nonce-abc'"));
        assert!(!is_hash_source("'sha256-'"));
    }
}
