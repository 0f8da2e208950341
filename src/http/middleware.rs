//! Per-request security pipeline.
//!
//! # Responsibilities
//! - Attach a fresh CSP nonce and the client info to the request
//! - Verify the CSRF token on mutating requests
//! - Enforce the per-address rate limit on protected paths
//! - Harden the response headers and renew the CSRF cookie
//!
//! # Design Decisions
//! - Stages run in a fixed order and the first rejection ends the request
//! - Rejections carry a JSON error body only; nothing from the handler runs
//! - The body is only buffered when the token isn't in the header

use axum::{
    body::Body,
    extract::{Request, State},
    http::{header, HeaderValue, Method},
    middleware::Next,
    response::{IntoResponse, Response},
};
use std::time::Instant;

use crate::http::error::ApiError;
use crate::http::request::ClientInfo;
use crate::http::server::AppState;
use crate::observability::metrics;
use crate::security::events::{SecurityEvent, SecurityEventKind};
use crate::security::headers::apply_security_headers;
use crate::security::nonce::CspNonce;

/// Security middleware, installed with `axum::middleware::from_fn_with_state`.
pub async fn security_middleware(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Response {
    let start = Instant::now();
    let method = request.method().clone();

    let nonce = CspNonce::generate();
    let client = ClientInfo::from_request(&request, state.config.rate_limit.trust_forwarded_for);
    let cookie_token = state.tokens.read_cookie(request.headers());
    request.extensions_mut().insert(nonce.clone());
    request.extensions_mut().insert(client.clone());

    let response = match guard(&state, request, &client, cookie_token.as_deref()).await {
        Ok(request) => {
            let mut response = next.run(request).await;
            apply_security_headers(
                response.headers_mut(),
                &state.csp,
                &nonce,
                state.config.mode.is_production(),
            );
            if cookie_token.is_none() {
                renew_cookie(&state, &mut response);
            }
            response
        }
        Err(err) => err.into_response(),
    };

    metrics::record_request(method.as_str(), response.status().as_u16(), start);
    response
}

/// Run the CSRF and rate limit stages, handing back the (possibly rebuilt) request.
async fn guard(
    state: &AppState,
    request: Request,
    client: &ClientInfo,
    cookie_token: Option<&str>,
) -> Result<Request, ApiError> {
    let request = if requires_csrf(state, &request) {
        verify_csrf(state, request, client, cookie_token).await?
    } else {
        request
    };

    if requires_rate_limit(state, &request) {
        enforce_rate_limit(state, &request, client)?;
    }

    Ok(request)
}

fn is_mutating(method: &Method) -> bool {
    matches!(
        *method,
        Method::POST | Method::PUT | Method::PATCH | Method::DELETE
    )
}

fn requires_csrf(state: &AppState, request: &Request) -> bool {
    let csrf = &state.config.csrf;
    csrf.enabled
        && is_mutating(request.method())
        && !csrf
            .exempt_paths
            .iter()
            .any(|exempt| request.uri().path() == exempt)
}

fn requires_rate_limit(state: &AppState, request: &Request) -> bool {
    let limits = &state.config.rate_limit;
    limits.enabled
        && request.method() != Method::OPTIONS
        && limits
            .path_prefixes
            .iter()
            .any(|prefix| request.uri().path().starts_with(prefix.as_str()))
}

async fn verify_csrf(
    state: &AppState,
    request: Request,
    client: &ClientInfo,
    cookie_token: Option<&str>,
) -> Result<Request, ApiError> {
    let (request, presented) = match state.tokens.read_header(request.headers()) {
        Some(token) => (request, Some(token)),
        None => read_body_token(state, request).await?,
    };

    if state.tokens.verify(presented.as_deref(), cookie_token) {
        return Ok(request);
    }

    let reason = match (cookie_token, presented.as_deref()) {
        (None, _) => "missing_cookie",
        (Some(_), None) => "missing_token",
        _ => "mismatch",
    };
    metrics::record_csrf_failure(reason);
    tracing::debug!(path = %request.uri().path(), reason, "CSRF verification failed");

    state.events.log(
        SecurityEvent::new(SecurityEventKind::CsrfFailure)
            .with_ip(client.ip.clone())
            .with_user_agent(client.user_agent.clone())
            .with_detail("path", request.uri().path())
            .with_detail("method", request.method().as_str())
            .with_detail("reason", reason),
    );
    Err(ApiError::CsrfFailure)
}

/// Buffer the body to look for the token field, then put the bytes back.
async fn read_body_token(
    state: &AppState,
    request: Request,
) -> Result<(Request, Option<String>), ApiError> {
    let content_type = request
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);

    let (parts, body) = request.into_parts();
    let bytes = axum::body::to_bytes(body, state.config.server.max_body_size)
        .await
        .map_err(|_| ApiError::PayloadTooLarge)?;

    let token = state.tokens.read_body(content_type.as_deref(), &bytes);
    Ok((Request::from_parts(parts, Body::from(bytes)), token))
}

fn enforce_rate_limit(
    state: &AppState,
    request: &Request,
    client: &ClientInfo,
) -> Result<(), ApiError> {
    let limits = &state.config.rate_limit;
    let key = client.rate_limit_key();
    let window = limits.window();

    if state.rate_limiter.check_limit(&key, limits.max_requests, window) {
        state.rate_limiter.record_attempt(&key);
        return Ok(());
    }

    metrics::record_rate_limited("ip");
    state.events.log(
        SecurityEvent::new(SecurityEventKind::RateLimit)
            .with_ip(client.ip.clone())
            .with_user_agent(client.user_agent.clone())
            .with_detail("path", request.uri().path())
            .with_detail("method", request.method().as_str())
            .with_detail("limit", limits.max_requests)
            .with_detail("windowMs", limits.window_ms),
    );

    Err(ApiError::RateLimited {
        retry_after: state.rate_limiter.retry_after(&key, window),
    })
}

/// Issue a cookie unless the handler already set one.
fn renew_cookie(state: &AppState, response: &mut Response) {
    if !state.config.csrf.enabled {
        return;
    }

    let already_set = response
        .headers()
        .get_all(header::SET_COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .any(|v| state.tokens.sets_cookie(v));
    if already_set {
        return;
    }

    let cookie = state.tokens.cookie(&state.tokens.generate());
    match HeaderValue::from_str(&cookie.to_string()) {
        Ok(value) => {
            response.headers_mut().append(header::SET_COOKIE, value);
        }
        Err(e) => tracing::error!(error = %e, "CSRF cookie is not a valid header value"),
    }
}
