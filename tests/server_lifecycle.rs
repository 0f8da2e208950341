//! Tests against a real listener: peer addresses, request IDs, graceful shutdown.

use std::time::Duration;
use tokio::net::TcpListener;

use site_guard::security::SecurityEventKind;
use site_guard::{AppState, HttpServer, Shutdown};

mod common;

async fn start_server(state: AppState) -> (String, Shutdown, tokio::task::JoinHandle<Result<(), std::io::Error>>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let base = format!("http://{}", listener.local_addr().unwrap());
    let shutdown = Shutdown::new();
    let server = HttpServer::from_state(state);
    let handle = tokio::spawn(server.run(listener, shutdown.clone()));
    (base, shutdown, handle)
}

#[tokio::test]
async fn test_serves_and_shuts_down_gracefully() {
    let state = common::test_state(
        common::test_config(),
        site_guard::security::ManualClock::new(0),
        Vec::new(),
    );
    let (base, shutdown, handle) = start_server(state).await;

    let client = reqwest::Client::new();
    let response = client.get(format!("{base}/health")).send().await.unwrap();
    assert_eq!(response.status(), 200);
    assert!(response.headers().contains_key("x-request-id"));
    assert!(response.headers().contains_key("content-security-policy"));

    shutdown.trigger();
    let result = tokio::time::timeout(Duration::from_secs(5), handle)
        .await
        .expect("server did not stop")
        .unwrap();
    assert!(result.is_ok());
}

#[tokio::test]
async fn test_rate_limit_keyed_by_peer_address() {
    let mut config = common::test_config();
    config.rate_limit.max_requests = 1;
    let state = common::test_state(config, site_guard::security::ManualClock::new(0), Vec::new());
    let events = state.events.clone();
    let (base, shutdown, handle) = start_server(state).await;

    let client = reqwest::Client::new();
    let first = client.get(format!("{base}/api/nonce")).send().await.unwrap();
    assert_eq!(first.status(), 200);
    let second = client.get(format!("{base}/api/nonce")).send().await.unwrap();
    assert_eq!(second.status(), 429);

    let limited = events.recent_of(SecurityEventKind::RateLimit);
    assert_eq!(limited.len(), 1);
    assert_eq!(limited[0].ip.as_deref(), Some("127.0.0.1"));

    shutdown.trigger();
    let _ = tokio::time::timeout(Duration::from_secs(5), handle).await;
}

#[tokio::test]
async fn test_zero_sweep_interval_serves_without_sweeper() {
    let mut config = common::test_config();
    config.rate_limit.sweep_interval_secs = 0;
    let state = common::test_state(config, site_guard::security::ManualClock::new(0), Vec::new());
    let (base, shutdown, handle) = start_server(state).await;

    let response = reqwest::get(format!("{base}/health")).await.unwrap();
    assert_eq!(response.status(), 200);

    shutdown.trigger();
    let result = tokio::time::timeout(Duration::from_secs(5), handle)
        .await
        .expect("server did not stop")
        .unwrap();
    assert!(result.is_ok());
}
