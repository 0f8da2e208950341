//! Shared utilities for integration testing.

#![allow(dead_code)]

use axum::{
    body::Body,
    http::{header, HeaderMap, Request, StatusCode},
    Router,
};
use http_body_util::BodyExt;
use serde_json::Value;
use std::sync::Arc;
use tower::ServiceExt;

use site_guard::config::GuardConfig;
use site_guard::security::{
    Clock, InMemoryWindowStore, ManualClock, RateLimiter, SecurityEventLogger,
};
use site_guard::{build_router, AppState};

pub const TEST_HASH: &str = "'sha256-47DEQpj8HBSvu+TZw1ZyF5YQn8VzRzPqhTNFw3jN4XY='";

/// Defaults with a manifest path that never exists.
pub fn test_config() -> GuardConfig {
    let mut config = GuardConfig::default();
    config.csp.manifest_path = "/nonexistent/csp-hashes.json".to_string();
    config
}

/// App state with an in-memory event buffer and a controllable clock.
pub fn test_state(config: GuardConfig, clock: ManualClock, style_hashes: Vec<String>) -> AppState {
    let clock: Arc<dyn Clock> = Arc::new(clock);
    let limiter = RateLimiter::new(
        Arc::new(InMemoryWindowStore::new(config.rate_limit.max_keys)),
        clock,
    );
    let events = SecurityEventLogger::new().with_memory(128);
    AppState::with_components(config, limiter, events, style_hashes)
}

pub fn test_app(config: GuardConfig) -> (Router, AppState) {
    let state = test_state(config, ManualClock::new(1_000_000), Vec::new());
    (build_router(state.clone()), state)
}

pub struct TestResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Value,
}

impl TestResponse {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    /// Value of the `csrf-token` cookie set by this response, if any.
    pub fn csrf_cookie(&self) -> Option<String> {
        self.headers
            .get_all(header::SET_COOKIE)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .filter_map(|v| v.split(';').next())
            .filter_map(|pair| pair.strip_prefix("csrf-token="))
            .map(str::to_string)
            .next()
    }
}

pub async fn send(router: &Router, request: Request<Body>) -> TestResponse {
    let response = router.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let headers = response.headers().clone();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let body = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or(Value::Null)
    };
    TestResponse {
        status,
        headers,
        body,
    }
}

pub fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

pub fn post_json(uri: &str, body: &Value, headers: &[(&str, &str)]) -> Request<Body> {
    let mut builder = Request::builder()
        .method("POST")
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json");
    for (name, value) in headers {
        builder = builder.header(*name, *value);
    }
    builder.body(Body::from(body.to_string())).unwrap()
}

/// Issue a token and return `(token, cookie header value)`.
pub async fn fetch_token(router: &Router) -> (String, String) {
    let response = send(router, get("/api/csrf-token")).await;
    assert_eq!(response.status, StatusCode::OK);
    let token = response.body["token"].as_str().unwrap().to_string();
    (token.clone(), format!("csrf-token={token}"))
}

pub fn contact_body(email: &str) -> Value {
    serde_json::json!({
        "name": "Ada Lovelace",
        "email": email,
        "message": "We'd like to talk about a project."
    })
}
