//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the guard.
//! All types derive Serde traits for deserialization from config files.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Root configuration for the security layer.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct GuardConfig {
    /// Deployment mode (development or production).
    pub mode: DeploymentMode,

    /// Listener and request handling settings.
    pub server: ServerConfig,

    /// CSRF double-submit cookie settings.
    pub csrf: CsrfConfig,

    /// Content-Security-Policy composition settings.
    pub csp: CspConfig,

    /// Per-client request rate limiting.
    pub rate_limit: RateLimitConfig,

    /// Contact form submission limits.
    pub contact: ContactConfig,

    /// Security event sinks.
    pub events: EventsConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,
}

/// Where the guard is deployed.
///
/// Production enables `Secure` cookies, HSTS and structured-only event output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum DeploymentMode {
    #[default]
    Development,
    Production,
}

impl DeploymentMode {
    pub fn is_production(self) -> bool {
        matches!(self, DeploymentMode::Production)
    }
}

impl std::str::FromStr for DeploymentMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "development" | "dev" => Ok(DeploymentMode::Development),
            "production" | "prod" => Ok(DeploymentMode::Production),
            other => Err(format!("unknown deployment mode: {other}")),
        }
    }
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Bind address (e.g., "0.0.0.0:3000").
    pub bind_address: String,

    /// Request timeout in seconds.
    pub request_timeout_secs: u64,

    /// Maximum request body size in bytes.
    pub max_body_size: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:3000".to_string(),
            request_timeout_secs: 30,
            max_body_size: 64 * 1024, // 64KB
        }
    }
}

/// CSRF protection configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct CsrfConfig {
    /// Enforce CSRF tokens on state-changing requests.
    pub enabled: bool,

    /// Cookie carrying the token.
    pub cookie_name: String,

    /// Request header the client echoes the token in.
    pub header_name: String,

    /// Body field the client may echo the token in instead of the header.
    pub body_field: String,

    /// Cookie lifetime in seconds.
    pub max_age_secs: u64,

    /// Paths exempt from CSRF checks (exact match).
    pub exempt_paths: Vec<String>,
}

impl Default for CsrfConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            cookie_name: "csrf-token".to_string(),
            header_name: "x-csrf-token".to_string(),
            body_field: "csrfToken".to_string(),
            max_age_secs: 86_400,
            // Browsers post violation reports without any page context.
            exempt_paths: vec!["/api/csp-report".to_string()],
        }
    }
}

/// Content-Security-Policy configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct CspConfig {
    /// Path to the persisted hash manifest.
    pub manifest_path: String,

    /// Reload the manifest when the file changes.
    pub watch_manifest: bool,

    /// Emit `Content-Security-Policy-Report-Only` instead of enforcing.
    pub report_only: bool,

    /// Where browsers should post violation reports.
    pub report_uri: Option<String>,

    /// Add `'unsafe-hashes'` so hashes also cover `style="..."` attributes.
    pub allow_hashed_style_attributes: bool,

    /// Extra `script-src` sources.
    pub script_src: Vec<String>,

    /// Extra `style-src` sources.
    pub style_src: Vec<String>,

    /// Extra `img-src` sources.
    pub img_src: Vec<String>,

    /// Extra `font-src` sources.
    pub font_src: Vec<String>,

    /// Extra `connect-src` sources.
    pub connect_src: Vec<String>,

    /// `frame-ancestors` sources.
    pub frame_ancestors: Vec<String>,
}

impl Default for CspConfig {
    fn default() -> Self {
        Self {
            manifest_path: "csp-hashes.json".to_string(),
            watch_manifest: false,
            report_only: false,
            report_uri: Some("/api/csp-report".to_string()),
            allow_hashed_style_attributes: true,
            script_src: Vec::new(),
            style_src: Vec::new(),
            img_src: vec!["data:".to_string(), "blob:".to_string()],
            font_src: Vec::new(),
            connect_src: Vec::new(),
            frame_ancestors: vec!["'none'".to_string()],
        }
    }
}

/// Rate limiting configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RateLimitConfig {
    /// Enable rate limiting.
    pub enabled: bool,

    /// Maximum requests per client within the window.
    pub max_requests: usize,

    /// Sliding window length in milliseconds.
    pub window_ms: u64,

    /// Only paths under these prefixes are limited.
    pub path_prefixes: Vec<String>,

    /// Upper bound on tracked keys before least-recently-used eviction.
    pub max_keys: usize,

    /// Interval of the background sweep in seconds. Must be non-zero.
    pub sweep_interval_secs: u64,

    /// Use the first `X-Forwarded-For` hop as the client address.
    pub trust_forwarded_for: bool,
}

impl RateLimitConfig {
    pub fn window(&self) -> Duration {
        Duration::from_millis(self.window_ms)
    }
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_requests: 60,
            window_ms: 60_000,
            path_prefixes: vec!["/api/".to_string()],
            max_keys: 100_000,
            sweep_interval_secs: 60,
            trust_forwarded_for: false,
        }
    }
}

/// Contact form submission limits.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ContactConfig {
    /// Submissions allowed per email address within the window.
    pub max_submissions: usize,

    /// Window length in milliseconds.
    pub window_ms: u64,
}

impl ContactConfig {
    pub fn window(&self) -> Duration {
        Duration::from_millis(self.window_ms)
    }
}

impl Default for ContactConfig {
    fn default() -> Self {
        Self {
            max_submissions: 3,
            window_ms: 60 * 60 * 1000, // 1 hour
        }
    }
}

/// Security event sink configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct EventsConfig {
    /// External monitor receiving events as JSON POSTs.
    pub webhook_url: Option<String>,

    /// Number of recent events retained in memory (0 disables the buffer).
    pub memory_capacity: usize,
}

impl Default for EventsConfig {
    fn default() -> Self {
        Self {
            webhook_url: None,
            memory_capacity: 256,
        }
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            metrics_enabled: false,
            metrics_address: "0.0.0.0:9090".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_minimal_config_uses_defaults() {
        let config: GuardConfig = toml::from_str("mode = \"production\"").unwrap();
        assert!(config.mode.is_production());
        assert_eq!(config.csrf.cookie_name, "csrf-token");
        assert_eq!(config.csrf.max_age_secs, 86_400);
        assert_eq!(config.contact.max_submissions, 3);
    }

    #[test]
    fn test_partial_section() {
        let config: GuardConfig = toml::from_str(
            r#"
            [rate_limit]
            max_requests = 3
            window_ms = 1000
            "#,
        )
        .unwrap();
        assert_eq!(config.rate_limit.max_requests, 3);
        assert_eq!(config.rate_limit.window(), Duration::from_secs(1));
        assert!(config.rate_limit.enabled);
    }

    #[test]
    fn test_mode_from_str() {
        assert_eq!("PROD".parse::<DeploymentMode>().unwrap(), DeploymentMode::Production);
        assert_eq!("development".parse::<DeploymentMode>().unwrap(), DeploymentMode::Development);
        assert!("staging".parse::<DeploymentMode>().is_err());
    }
}
