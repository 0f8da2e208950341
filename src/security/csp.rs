//! Content-Security-Policy composition.
//!
//! The policy is fixed except for two parts: the per-response nonce and the
//! style hashes loaded from the manifest. Hashes can be swapped at runtime
//! when the manifest changes.

use arc_swap::ArcSwap;
use axum::http::HeaderName;
use std::sync::Arc;

use crate::config::{CspConfig, DeploymentMode};
use crate::security::nonce::CspNonce;

pub const CONTENT_SECURITY_POLICY: HeaderName =
    HeaderName::from_static("content-security-policy");
pub const CONTENT_SECURITY_POLICY_REPORT_ONLY: HeaderName =
    HeaderName::from_static("content-security-policy-report-only");

/// Builds the CSP header value for each response.
#[derive(Debug)]
pub struct CspPolicy {
    config: CspConfig,
    upgrade_insecure: bool,
    style_hashes: ArcSwap<Vec<String>>,
}

impl CspPolicy {
    pub fn new(config: CspConfig, mode: DeploymentMode, style_hashes: Vec<String>) -> Self {
        Self {
            config,
            upgrade_insecure: mode.is_production(),
            style_hashes: ArcSwap::from_pointee(style_hashes),
        }
    }

    /// Header to emit (enforcing or report-only).
    pub fn header_name(&self) -> HeaderName {
        if self.config.report_only {
            CONTENT_SECURITY_POLICY_REPORT_ONLY
        } else {
            CONTENT_SECURITY_POLICY
        }
    }

    /// Replace the manifest hashes used by subsequent responses.
    pub fn replace_style_hashes(&self, hashes: Vec<String>) {
        let count = hashes.len();
        self.style_hashes.store(Arc::new(hashes));
        tracing::info!(hashes = count, "CSP style hashes updated");
    }

    pub fn style_hashes(&self) -> Arc<Vec<String>> {
        self.style_hashes.load_full()
    }

    /// Render the policy for one response.
    pub fn render(&self, nonce: &CspNonce) -> String {
        let nonce_source = nonce.source();
        let hashes = self.style_hashes.load();

        let mut script_src = vec!["'self'".to_string(), nonce_source.clone()];
        script_src.extend(self.config.script_src.iter().cloned());

        let mut style_src = vec!["'self'".to_string(), nonce_source];
        if !hashes.is_empty() && self.config.allow_hashed_style_attributes {
            style_src.push("'unsafe-hashes'".to_string());
        }
        style_src.extend(hashes.iter().cloned());
        style_src.extend(self.config.style_src.iter().cloned());

        let mut directives = vec![
            "default-src 'self'".to_string(),
            directive("script-src", &script_src),
            directive("style-src", &style_src),
            directive("img-src", &with_self(&self.config.img_src)),
            directive("font-src", &with_self(&self.config.font_src)),
            directive("connect-src", &with_self(&self.config.connect_src)),
            "object-src 'none'".to_string(),
            "base-uri 'self'".to_string(),
            "form-action 'self'".to_string(),
        ];

        if !self.config.frame_ancestors.is_empty() {
            directives.push(directive("frame-ancestors", &self.config.frame_ancestors));
        }
        if let Some(uri) = &self.config.report_uri {
            directives.push(format!("report-uri {uri}"));
        }
        if self.upgrade_insecure {
            directives.push("upgrade-insecure-requests".to_string());
        }

        directives.join("; ")
    }
}

fn with_self(extra: &[String]) -> Vec<String> {
    let mut sources = vec!["'self'".to_string()];
    sources.extend(extra.iter().cloned());
    sources
}

fn directive(name: &str, sources: &[String]) -> String {
    format!("{} {}", name, sources.join(" "))
}
