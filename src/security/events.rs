//! Security event logging.
//!
//! # Responsibilities
//! - Define the security event record
//! - Fan events out to sinks (structured log, console, memory, webhook)
//! - Swallow malformed input while counting it
//!
//! # Design Decisions
//! - Fire-and-forget: no return value, no ordering, no dedup
//! - A failing sink never fails the request that logged the event
//! - Console mirroring only outside production

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::VecDeque;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use crate::config::GuardConfig;
use crate::observability::metrics;

/// Category of a security event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SecurityEventKind {
    CspViolation,
    RateLimit,
    CsrfFailure,
    SuspiciousActivity,
}

impl SecurityEventKind {
    pub fn as_str(self) -> &'static str {
        match self {
            SecurityEventKind::CspViolation => "csp_violation",
            SecurityEventKind::RateLimit => "rate_limit",
            SecurityEventKind::CsrfFailure => "csrf_failure",
            SecurityEventKind::SuspiciousActivity => "suspicious_activity",
        }
    }
}

impl std::fmt::Display for SecurityEventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An immutable security event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SecurityEvent {
    #[serde(rename = "type")]
    pub kind: SecurityEventKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ip: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_agent: Option<String>,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub details: Value,
    #[serde(default = "Utc::now")]
    pub timestamp: DateTime<Utc>,
}

impl SecurityEvent {
    pub fn new(kind: SecurityEventKind) -> Self {
        Self {
            kind,
            ip: None,
            user_agent: None,
            details: Value::Null,
            timestamp: Utc::now(),
        }
    }

    pub fn with_ip(mut self, ip: impl Into<String>) -> Self {
        self.ip = Some(ip.into());
        self
    }

    pub fn with_user_agent(mut self, user_agent: Option<impl Into<String>>) -> Self {
        self.user_agent = user_agent.map(Into::into);
        self
    }

    pub fn with_details(mut self, details: Map<String, Value>) -> Self {
        self.details = Value::Object(details);
        self
    }

    pub fn with_detail(mut self, key: &str, value: impl Into<Value>) -> Self {
        if !self.details.is_object() {
            self.details = Value::Object(Map::new());
        }
        if let Value::Object(map) = &mut self.details {
            map.insert(key.to_string(), value.into());
        }
        self
    }

    pub fn detail(&self, key: &str) -> Option<&Value> {
        self.details.get(key)
    }

    /// One-line human-readable rendering.
    pub fn summary(&self) -> String {
        let mut line = format!("[SECURITY] {}", self.kind);
        if let Some(ip) = &self.ip {
            line.push_str(&format!(" ip={ip}"));
        }
        if let Some(ua) = &self.user_agent {
            line.push_str(&format!(" ua={ua:?}"));
        }
        if !self.details.is_null() {
            line.push_str(&format!(" details={}", self.details));
        }
        line
    }
}

/// Destination for security events.
pub trait EventSink: Send + Sync {
    fn emit(&self, event: &SecurityEvent);
}

/// Structured record through `tracing`.
#[derive(Debug, Default)]
pub struct TracingSink;

impl EventSink for TracingSink {
    fn emit(&self, event: &SecurityEvent) {
        tracing::warn!(
            target: "security",
            event_type = event.kind.as_str(),
            ip = event.ip.as_deref().unwrap_or("-"),
            user_agent = event.user_agent.as_deref().unwrap_or("-"),
            details = %event.details,
            timestamp = %event.timestamp.to_rfc3339(),
            "Security event"
        );
    }
}

/// Human-readable mirror for local development.
#[derive(Debug, Default)]
pub struct ConsoleSink;

impl EventSink for ConsoleSink {
    fn emit(&self, event: &SecurityEvent) {
        tracing::info!(target: "security::console", "{}", event.summary());
    }
}

/// Bounded buffer of recent events.
#[derive(Debug)]
pub struct MemorySink {
    events: Mutex<VecDeque<SecurityEvent>>,
    capacity: usize,
}

impl MemorySink {
    pub fn new(capacity: usize) -> Self {
        Self {
            events: Mutex::new(VecDeque::with_capacity(capacity.min(1024))),
            capacity: capacity.max(1),
        }
    }

    pub fn events(&self) -> Vec<SecurityEvent> {
        match self.events.lock() {
            Ok(events) => events.iter().cloned().collect(),
            Err(poisoned) => poisoned.into_inner().iter().cloned().collect(),
        }
    }

    pub fn count(&self, kind: SecurityEventKind) -> usize {
        self.events().iter().filter(|e| e.kind == kind).count()
    }
}

impl EventSink for MemorySink {
    fn emit(&self, event: &SecurityEvent) {
        let mut events = match self.events.lock() {
            Ok(events) => events,
            Err(poisoned) => poisoned.into_inner(),
        };
        if events.len() == self.capacity {
            events.pop_front();
        }
        events.push_back(event.clone());
    }
}

/// Posts events as JSON to an external monitor without waiting for it.
#[derive(Debug, Clone)]
pub struct WebhookSink {
    client: reqwest::Client,
    url: String,
}

impl WebhookSink {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            url: url.into(),
        }
    }
}

impl EventSink for WebhookSink {
    fn emit(&self, event: &SecurityEvent) {
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            tracing::debug!("No runtime available, skipping webhook delivery");
            return;
        };

        let request = self.client.post(&self.url).json(event);
        handle.spawn(async move {
            match request.send().await {
                Ok(res) if !res.status().is_success() => {
                    tracing::warn!(status = %res.status(), "Security webhook rejected event");
                }
                Ok(_) => {}
                Err(e) => tracing::warn!(error = %e, "Security webhook unreachable"),
            }
        });
    }
}

/// Fan-out logger for security events.
#[derive(Default)]
pub struct SecurityEventLogger {
    sinks: Vec<Arc<dyn EventSink>>,
    memory: Option<Arc<MemorySink>>,
    dropped: AtomicU64,
}

impl SecurityEventLogger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Logger wired from configuration.
    pub fn from_config(config: &GuardConfig) -> Self {
        let mut logger = Self::new().with_sink(Arc::new(TracingSink));

        if !config.mode.is_production() {
            logger = logger.with_sink(Arc::new(ConsoleSink));
        }
        if config.events.memory_capacity > 0 {
            logger = logger.with_memory(config.events.memory_capacity);
        }
        if let Some(url) = &config.events.webhook_url {
            logger = logger.with_sink(Arc::new(WebhookSink::new(url.clone())));
        }
        logger
    }

    pub fn with_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.sinks.push(sink);
        self
    }

    /// Keep the last `capacity` events readable via [`recent`](Self::recent).
    pub fn with_memory(mut self, capacity: usize) -> Self {
        let memory = Arc::new(MemorySink::new(capacity));
        self.sinks.push(memory.clone());
        self.memory = Some(memory);
        self
    }

    /// Log a well-formed event.
    pub fn log(&self, event: SecurityEvent) {
        metrics::record_security_event(event.kind.as_str());

        for sink in &self.sinks {
            let delivered = catch_unwind(AssertUnwindSafe(|| sink.emit(&event)));
            if delivered.is_err() {
                self.record_drop("sink_panic");
            }
        }
    }

    /// Log an untyped event. Anything that doesn't parse is dropped and counted.
    pub fn log_value(&self, value: &Value) {
        if !value.is_object() {
            self.record_drop("not_an_object");
            return;
        }

        match SecurityEvent::deserialize(value) {
            Ok(event) => self.log(event),
            Err(e) => {
                tracing::trace!(error = %e, "Dropping malformed security event");
                self.record_drop("malformed");
            }
        }
    }

    /// Events dropped because they were malformed or a sink failed.
    pub fn dropped_events(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Recent events, oldest first. Empty when no memory buffer is configured.
    pub fn recent(&self) -> Vec<SecurityEvent> {
        self.memory.as_ref().map(|m| m.events()).unwrap_or_default()
    }

    /// Recent events of one kind.
    pub fn recent_of(&self, kind: SecurityEventKind) -> Vec<SecurityEvent> {
        self.recent().into_iter().filter(|e| e.kind == kind).collect()
    }

    fn record_drop(&self, reason: &'static str) {
        self.dropped.fetch_add(1, Ordering::Relaxed);
        metrics::record_dropped_event(reason);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct PanickingSink;

    impl EventSink for PanickingSink {
        fn emit(&self, _event: &SecurityEvent) {
            panic!("sink exploded");
        }
    }

    #[tokio::test]
    async fn test_webhook_sink_posts_event_json() {
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel::<Value>();
        let app = axum::Router::new().route(
            "/hook",
            axum::routing::post(move |axum::Json(body): axum::Json<Value>| {
                let tx = tx.clone();
                async move {
                    let _ = tx.send(body);
                    axum::http::StatusCode::NO_CONTENT
                }
            }),
        );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move { axum::serve(listener, app).await.unwrap() });

        let logger = SecurityEventLogger::new()
            .with_sink(Arc::new(WebhookSink::new(format!("http://{addr}/hook"))));
        logger.log(
            SecurityEvent::new(SecurityEventKind::CsrfFailure)
                .with_ip("203.0.113.9")
                .with_detail("reason", "mismatch"),
        );

        let body = tokio::time::timeout(std::time::Duration::from_secs(5), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(body["type"], "csrf_failure");
        assert_eq!(body["ip"], "203.0.113.9");
        assert_eq!(body["details"]["reason"], "mismatch");
        assert_eq!(logger.dropped_events(), 0);
    }

    #[tokio::test]
    async fn test_unreachable_webhook_does_not_fail_logging() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let logger = SecurityEventLogger::new()
            .with_sink(Arc::new(WebhookSink::new(format!("http://{addr}/hook"))))
            .with_memory(4);
        logger.log(SecurityEvent::new(SecurityEventKind::RateLimit));

        assert_eq!(logger.recent_of(SecurityEventKind::RateLimit).len(), 1);
        assert_eq!(logger.dropped_events(), 0);
    }

    #[test]
    fn test_malformed_values_are_dropped() {
        let logger = SecurityEventLogger::new().with_memory(8);

        logger.log_value(&Value::Null);
        logger.log_value(&json!({}));
        logger.log_value(&json!("csrf_failure"));
        logger.log_value(&json!({"type": "unknown_kind"}));
        logger.log_value(&json!({"type": "rate_limit", "ip": 42}));

        assert_eq!(logger.dropped_events(), 5);
        assert!(logger.recent().is_empty());

        // Subsequent calls still work.
        logger.log_value(&json!({"type": "rate_limit", "ip": "10.0.0.1"}));
        assert_eq!(logger.recent_of(SecurityEventKind::RateLimit).len(), 1);
    }

    #[test]
    fn test_value_round_trip_fields() {
        let logger = SecurityEventLogger::new().with_memory(8);
        logger.log_value(&json!({
            "type": "csp_violation",
            "userAgent": "Mozilla/5.0",
            "details": {"violatedDirective": "script-src"},
            "timestamp": "2026-01-01T00:00:00Z"
        }));

        let events = logger.recent();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].user_agent.as_deref(), Some("Mozilla/5.0"));
        assert_eq!(events[0].detail("violatedDirective"), Some(&json!("script-src")));
        assert_eq!(events[0].timestamp.to_rfc3339(), "2026-01-01T00:00:00+00:00");
    }

    #[test]
    fn test_panicking_sink_is_contained() {
        let logger = SecurityEventLogger::new()
            .with_sink(Arc::new(PanickingSink))
            .with_memory(4);

        logger.log(SecurityEvent::new(SecurityEventKind::SuspiciousActivity));
        assert_eq!(logger.dropped_events(), 1);
        assert_eq!(logger.recent().len(), 1);
    }

    #[test]
    fn test_memory_sink_is_bounded() {
        let sink = MemorySink::new(2);
        for kind in [
            SecurityEventKind::RateLimit,
            SecurityEventKind::CsrfFailure,
            SecurityEventKind::CspViolation,
        ] {
            sink.emit(&SecurityEvent::new(kind));
        }
        let kinds: Vec<_> = sink.events().iter().map(|e| e.kind).collect();
        assert_eq!(kinds, vec![SecurityEventKind::CsrfFailure, SecurityEventKind::CspViolation]);
    }

    #[test]
    fn test_serialized_shape() {
        let event = SecurityEvent::new(SecurityEventKind::CsrfFailure)
            .with_ip("127.0.0.1")
            .with_user_agent(Some("curl/8"))
            .with_detail("path", "/api/contact");
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["type"], "csrf_failure");
        assert_eq!(value["userAgent"], "curl/8");
        assert_eq!(value["details"]["path"], "/api/contact");
        assert!(value["timestamp"].is_string());
    }

    #[test]
    fn test_summary() {
        let event = SecurityEvent::new(SecurityEventKind::RateLimit).with_ip("1.2.3.4");
        assert_eq!(event.summary(), "[SECURITY] rate_limit ip=1.2.3.4");
    }

    #[test]
    fn test_production_config_has_no_console_sink() {
        let mut config = GuardConfig::default();
        config.mode = crate::config::DeploymentMode::Production;
        assert_eq!(SecurityEventLogger::from_config(&config).sinks.len(), 2);

        config.mode = crate::config::DeploymentMode::Development;
        assert_eq!(SecurityEventLogger::from_config(&config).sinks.len(), 3);
    }
}
