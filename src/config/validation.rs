//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (windows > 0, limits > 0)
//! - Validate addresses and URLs
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: GuardConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use std::net::SocketAddr;
use thiserror::Error;
use url::Url;

use crate::config::schema::GuardConfig;

/// A single semantic problem in the configuration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{field}: {message}")]
pub struct ValidationError {
    pub field: &'static str,
    pub message: String,
}

impl ValidationError {
    fn new(field: &'static str, message: impl Into<String>) -> Self {
        Self {
            field,
            message: message.into(),
        }
    }
}

/// Check a configuration, collecting every error found.
pub fn validate_config(config: &GuardConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.server.bind_address.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::new(
            "server.bind_address",
            format!("not a socket address: {}", config.server.bind_address),
        ));
    }
    if config.server.request_timeout_secs == 0 {
        errors.push(ValidationError::new("server.request_timeout_secs", "must be > 0"));
    }
    if config.server.max_body_size == 0 {
        errors.push(ValidationError::new("server.max_body_size", "must be > 0"));
    }

    let csrf = &config.csrf;
    if csrf.cookie_name.is_empty() || csrf.cookie_name.contains(&[';', '=', ' '][..]) {
        errors.push(ValidationError::new("csrf.cookie_name", "must be a valid cookie name"));
    }
    if axum::http::HeaderName::from_bytes(csrf.header_name.as_bytes()).is_err() {
        errors.push(ValidationError::new("csrf.header_name", "must be a valid header name"));
    }
    if csrf.max_age_secs == 0 {
        errors.push(ValidationError::new("csrf.max_age_secs", "must be > 0"));
    }

    if config.rate_limit.enabled {
        if config.rate_limit.max_requests == 0 {
            errors.push(ValidationError::new("rate_limit.max_requests", "must be > 0"));
        }
        if config.rate_limit.window_ms == 0 {
            errors.push(ValidationError::new("rate_limit.window_ms", "must be > 0"));
        }
    }
    // The limiter also backs the contact form limit, so these apply regardless.
    if config.rate_limit.max_keys == 0 {
        errors.push(ValidationError::new("rate_limit.max_keys", "must be > 0"));
    }
    if config.rate_limit.sweep_interval_secs == 0 {
        errors.push(ValidationError::new("rate_limit.sweep_interval_secs", "must be > 0"));
    }

    if config.contact.max_submissions == 0 {
        errors.push(ValidationError::new("contact.max_submissions", "must be > 0"));
    }
    if config.contact.window_ms == 0 {
        errors.push(ValidationError::new("contact.window_ms", "must be > 0"));
    }

    if config.csp.manifest_path.is_empty() {
        errors.push(ValidationError::new("csp.manifest_path", "must not be empty"));
    }
    if let Some(uri) = &config.csp.report_uri {
        // Relative report paths are fine; absolute ones must parse.
        if !uri.starts_with('/') && Url::parse(uri).is_err() {
            errors.push(ValidationError::new(
                "csp.report_uri",
                format!("not a path or absolute URL: {uri}"),
            ));
        }
    }

    if let Some(webhook) = &config.events.webhook_url {
        match Url::parse(webhook) {
            Ok(url) if matches!(url.scheme(), "http" | "https") => {}
            _ => errors.push(ValidationError::new(
                "events.webhook_url",
                format!("not an http(s) URL: {webhook}"),
            )),
        }
    }

    if config.observability.metrics_enabled
        && config.observability.metrics_address.parse::<SocketAddr>().is_err()
    {
        errors.push(ValidationError::new(
            "observability.metrics_address",
            format!("not a socket address: {}", config.observability.metrics_address),
        ));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        assert!(validate_config(&GuardConfig::default()).is_ok());
    }

    #[test]
    fn test_collects_all_errors() {
        let mut config = GuardConfig::default();
        config.server.bind_address = "nowhere".into();
        config.rate_limit.window_ms = 0;
        config.events.webhook_url = Some("ftp://monitor.example".into());

        let errors = validate_config(&config).unwrap_err();
        let fields: Vec<_> = errors.iter().map(|e| e.field).collect();
        assert_eq!(
            fields,
            vec!["server.bind_address", "rate_limit.window_ms", "events.webhook_url"]
        );
    }

    #[test]
    fn test_disabled_rate_limit_skips_range_checks() {
        let mut config = GuardConfig::default();
        config.rate_limit.enabled = false;
        config.rate_limit.max_requests = 0;
        assert!(validate_config(&config).is_ok());
    }

    #[test]
    fn test_report_uri_forms() {
        let mut config = GuardConfig::default();
        config.csp.report_uri = Some("https://reports.example/csp".into());
        assert!(validate_config(&config).is_ok());

        config.csp.report_uri = Some("reports".into());
        assert!(validate_config(&config).is_err());
    }
}
