//! Inline style hash collection.
//!
//! The animation layer injects inline styles at runtime that can't carry the
//! response nonce. During development and CI runs those styles are observed,
//! hashed, and later folded into `style-src` as `'sha256-<base64>'` sources.

use base64::{engine::general_purpose::STANDARD, Engine};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::hashes::scanner::extract_inline_styles;

/// How many entries `most_frequent` reports.
const MOST_FREQUENT_LIMIT: usize = 10;

/// Quoted CSP source for `content`, e.g. `'sha256-47DEQ...='`.
pub fn csp_hash(content: &str) -> String {
    let digest = Sha256::digest(content.as_bytes());
    format!("'sha256-{}'", STANDARD.encode(digest))
}

/// One distinct inline style seen during collection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HashRecord {
    pub hash: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub component_hint: Option<String>,
    pub first_seen: DateTime<Utc>,
    pub occurrences: u64,
}

/// Aggregate view of a collection session.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CollectorStats {
    pub total_hashes: usize,
    pub by_component: BTreeMap<String, usize>,
    pub most_frequent: Vec<(String, u64)>,
}

/// Collects distinct inline style hashes while active.
#[derive(Debug, Default)]
pub struct HashCollector {
    records: DashMap<String, HashRecord>,
    active: AtomicBool,
}

impl HashCollector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn start(&self) {
        if !self.active.swap(true, Ordering::SeqCst) {
            tracing::debug!("Hash collection started");
        }
    }

    pub fn stop(&self) {
        if self.active.swap(false, Ordering::SeqCst) {
            tracing::debug!(hashes = self.records.len(), "Hash collection stopped");
        }
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    /// Record one observed inline style.
    ///
    /// Returns the hash source when it is new to this collector. Ignored
    /// while stopped or when the content is empty.
    pub fn observe(&self, content: &str, component_hint: Option<&str>) -> Option<String> {
        if !self.is_active() || content.trim().is_empty() {
            return None;
        }

        let hash = csp_hash(content);
        let mut inserted = false;
        self.records
            .entry(hash.clone())
            .and_modify(|record| {
                record.occurrences += 1;
                if record.component_hint.is_none() {
                    record.component_hint = component_hint.map(str::to_string);
                }
            })
            .or_insert_with(|| {
                inserted = true;
                HashRecord {
                    hash: hash.clone(),
                    component_hint: component_hint.map(str::to_string),
                    first_seen: Utc::now(),
                    occurrences: 1,
                }
            });

        if inserted {
            tracing::debug!(hash = %hash, component = ?component_hint, "New inline style hash");
            Some(hash)
        } else {
            None
        }
    }

    /// Observe every inline style in an HTML document. Returns how many were new.
    pub fn observe_html(&self, html: &str, default_hint: Option<&str>) -> usize {
        let mut added = 0;
        for style in extract_inline_styles(html) {
            let hint = style.component.as_deref().or(default_hint);
            if self.observe(&style.content, hint).is_some() {
                added += 1;
            }
        }
        added
    }

    /// Sorted hash sources ready for a `style-src` directive.
    pub fn export_for_csp(&self) -> Vec<String> {
        let mut hashes: Vec<String> = self.records.iter().map(|r| r.key().clone()).collect();
        hashes.sort();
        hashes
    }

    /// Snapshot of all records, sorted by hash.
    pub fn records(&self) -> Vec<HashRecord> {
        let mut records: Vec<HashRecord> = self.records.iter().map(|r| r.value().clone()).collect();
        records.sort_by(|a, b| a.hash.cmp(&b.hash));
        records
    }

    pub fn get_stats(&self) -> CollectorStats {
        let records = self.records();

        let mut by_component = BTreeMap::new();
        for record in &records {
            if let Some(component) = &record.component_hint {
                *by_component.entry(component.clone()).or_insert(0) += 1;
            }
        }

        let mut most_frequent: Vec<(String, u64)> = records
            .iter()
            .map(|r| (r.hash.clone(), r.occurrences))
            .collect();
        most_frequent.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        most_frequent.truncate(MOST_FREQUENT_LIMIT);

        CollectorStats {
            total_hashes: records.len(),
            by_component,
            most_frequent,
        }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}
