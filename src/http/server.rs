//! HTTP server setup and configuration.
//!
//! # Responsibilities
//! - Build shared state (tokens, limiter, event logger, CSP policy)
//! - Create the Axum router with the endpoints and the security middleware
//! - Wire up tower layers (tracing, request ID, panic recovery, timeout, body limit)
//! - Run background tasks (window sweeper, manifest watcher) until shutdown

use axum::{
    middleware::from_fn_with_state,
    response::IntoResponse,
    routing::{get, post},
    Router,
};
use std::any::Any;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tower::ServiceBuilder;
use tower_http::{
    catch_panic::CatchPanicLayer,
    limit::RequestBodyLimitLayer,
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    timeout::TimeoutLayer,
    trace::TraceLayer,
};

use crate::config::{GuardConfig, ServerConfig};
use crate::hashes::{HashManifest, ManifestWatcher};
use crate::http::error::ApiError;
use crate::http::handlers;
use crate::http::middleware::security_middleware;
use crate::lifecycle::Shutdown;
use crate::observability::metrics;
use crate::security::csp::CspPolicy;
use crate::security::events::SecurityEventLogger;
use crate::security::rate_limit::{spawn_sweeper, RateLimiter};
use crate::security::token::TokenService;

/// Application state injected into handlers and the middleware.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<GuardConfig>,
    pub tokens: Arc<TokenService>,
    pub rate_limiter: Arc<RateLimiter>,
    pub events: Arc<SecurityEventLogger>,
    pub csp: Arc<CspPolicy>,
}

impl AppState {
    /// State wired from configuration. Loads the hash manifest once.
    pub fn new(config: GuardConfig) -> Self {
        let manifest = HashManifest::load_or_default(Path::new(&config.csp.manifest_path));
        let hashes = manifest.csp_sources();
        metrics::record_manifest_hashes(hashes.len());

        let rate_limiter = RateLimiter::in_memory(config.rate_limit.max_keys, tracked_window(&config));
        let events = SecurityEventLogger::from_config(&config);
        Self::with_components(config, rate_limiter, events, hashes)
    }

    /// State with a caller-supplied limiter and logger.
    pub fn with_components(
        config: GuardConfig,
        rate_limiter: RateLimiter,
        events: SecurityEventLogger,
        style_hashes: Vec<String>,
    ) -> Self {
        let production = config.mode.is_production();
        let tokens = TokenService::new(&config.csrf, production);
        let csp = CspPolicy::new(config.csp.clone(), config.mode, style_hashes);

        Self {
            config: Arc::new(config),
            tokens: Arc::new(tokens),
            rate_limiter: Arc::new(rate_limiter),
            events: Arc::new(events),
            csp: Arc::new(csp),
        }
    }
}

/// HTTP server for the site's security endpoints.
pub struct HttpServer {
    router: Router,
    state: AppState,
}

impl HttpServer {
    /// Create a new HTTP server with the given configuration.
    pub fn new(config: GuardConfig) -> Self {
        Self::from_state(AppState::new(config))
    }

    pub fn from_state(state: AppState) -> Self {
        let router = build_router(state.clone());
        Self { router, state }
    }

    /// Run the server until `shutdown` fires.
    pub async fn run(self, listener: TcpListener, shutdown: Shutdown) -> Result<(), std::io::Error> {
        let addr = listener.local_addr()?;
        let config = self.state.config.clone();
        tracing::info!(
            address = %addr,
            mode = ?config.mode,
            "HTTP server starting"
        );

        let sweeper = match config.rate_limit.sweep_interval_secs {
            0 => {
                tracing::warn!("Rate limit sweep interval is 0, sweeper not started");
                None
            }
            secs => Some(spawn_sweeper(
                self.state.rate_limiter.clone(),
                Duration::from_secs(secs),
                tracked_window(&config),
                shutdown.subscribe(),
            )),
        };

        // Dropping the watcher stops it, so hold it for the server's lifetime.
        let _watcher = if config.csp.watch_manifest {
            let watcher = ManifestWatcher::new(Path::new(&config.csp.manifest_path), self.state.csp.clone());
            match watcher.run() {
                Ok(w) => Some(w),
                Err(e) => {
                    tracing::warn!(error = %e, "CSP manifest watcher failed to start");
                    None
                }
            }
        } else {
            None
        };

        let app = self.router.into_make_service_with_connect_info::<SocketAddr>();

        let mut stop = shutdown.subscribe();
        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = stop.recv().await;
            })
            .await?;

        if let Some(handle) = sweeper {
            if let Err(e) = handle.await {
                tracing::warn!(error = %e, "Rate limit sweeper exited abnormally");
            }
        }
        tracing::info!("HTTP server stopped");
        Ok(())
    }

    /// The router, for driving requests without a listener.
    pub fn router(&self) -> Router {
        self.router.clone()
    }

    pub fn state(&self) -> &AppState {
        &self.state
    }
}

/// The IP and contact limits share one store, so idle keys are kept for the longer window.
fn tracked_window(config: &GuardConfig) -> Duration {
    config.rate_limit.window().max(config.contact.window())
}

/// Build the Axum router with all middleware layers.
pub fn build_router(state: AppState) -> Router {
    let server = state.config.server.clone();

    let router = Router::new()
        .route(
            "/api/csrf-token",
            get(handlers::issue_csrf_token).options(handlers::preflight),
        )
        .route(
            "/api/nonce",
            get(handlers::issue_nonce).options(handlers::preflight),
        )
        .route("/api/csp-report", post(handlers::csp_report))
        .route("/api/contact", post(handlers::submit_contact))
        .route("/health", get(handlers::health))
        .fallback(handlers::not_found)
        .layer(from_fn_with_state(state.clone(), security_middleware))
        .with_state(state);

    with_service_layers(router, &server)
}

/// Request ID, tracing, panic recovery, body limit and timeout.
#[allow(deprecated)]
fn with_service_layers(router: Router, server: &ServerConfig) -> Router {
    router.layer(
        ServiceBuilder::new()
            .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
            .layer(TraceLayer::new_for_http())
            .layer(PropagateRequestIdLayer::x_request_id())
            .layer(CatchPanicLayer::custom(panic_response))
            .layer(RequestBodyLimitLayer::new(server.max_body_size))
            .layer(TimeoutLayer::new(Duration::from_secs(server.request_timeout_secs))),
    )
}

fn panic_response(panic: Box<dyn Any + Send + 'static>) -> axum::response::Response {
    let detail = if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else if let Some(message) = panic.downcast_ref::<&str>() {
        message.to_string()
    } else {
        "panic with non-string payload".to_string()
    };
    ApiError::Internal(detail).into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use http_body_util::BodyExt;
    use tower::ServiceExt;

    async fn explode() -> &'static str {
        panic!("handler exploded")
    }

    #[tokio::test]
    async fn test_panicking_handler_returns_json_500() {
        let router = with_service_layers(
            Router::new().route("/boom", get(explode)),
            &ServerConfig::default(),
        );

        let response = router
            .oneshot(Request::builder().uri("/boom").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert!(response.headers().contains_key("x-request-id"));

        let body = response.into_body().collect().await.unwrap().to_bytes();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json, serde_json::json!({ "error": "Internal server error" }));
    }

    #[test]
    fn test_tracked_window_is_longest_limit() {
        let mut config = GuardConfig::default();
        config.rate_limit.window_ms = 1_000;
        assert_eq!(tracked_window(&config), config.contact.window());
    }
}
