//! Endpoint handlers.
//!
//! Everything here runs behind [`security_middleware`](super::middleware::security_middleware),
//! so CSRF and the per-address rate limit have already been applied.

use axum::{
    body::Bytes,
    extract::State,
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::Deserialize;
use serde_json::{json, Map, Value};

use crate::http::error::ApiError;
use crate::http::request::ClientInfo;
use crate::http::server::AppState;
use crate::observability::metrics;
use crate::security::events::{SecurityEvent, SecurityEventKind};
use crate::security::nonce::CspNonce;

/// Longest string kept from a violation report field.
pub const MAX_REPORT_FIELD_LEN: usize = 1024;

/// Reports beyond this many in one Reporting API batch are ignored.
pub const MAX_REPORTS_PER_REQUEST: usize = 32;

const CSP_VIOLATION_TYPE: &str = "csp-violation";

/// `(legacy key, Reporting API key, event detail key)`.
const REPORT_FIELDS: &[(&str, &str, &str)] = &[
    ("document-uri", "documentURL", "documentUri"),
    ("referrer", "referrer", "referrer"),
    ("violated-directive", "effectiveDirective", "violatedDirective"),
    ("effective-directive", "effectiveDirective", "effectiveDirective"),
    ("original-policy", "originalPolicy", "originalPolicy"),
    ("blocked-uri", "blockedURL", "blockedUri"),
    ("source-file", "sourceFile", "sourceFile"),
    ("line-number", "lineNumber", "lineNumber"),
    ("column-number", "columnNumber", "columnNumber"),
    ("status-code", "statusCode", "statusCode"),
    ("disposition", "disposition", "disposition"),
    ("script-sample", "sample", "scriptSample"),
];

fn no_store() -> (header::HeaderName, &'static str) {
    (header::CACHE_CONTROL, "no-store")
}

/// `GET /api/csrf-token`: issue a token and set the matching cookie.
pub async fn issue_csrf_token(State(state): State<AppState>) -> Response {
    let token = state.tokens.generate();
    let cookie = state.tokens.cookie(&token).to_string();

    (
        [(header::SET_COOKIE, cookie)],
        [no_store()],
        Json(json!({ "token": token, "success": true })),
    )
        .into_response()
}

/// `GET /api/nonce`: the nonce used in this response's CSP.
pub async fn issue_nonce(nonce: CspNonce) -> Response {
    (
        [no_store()],
        Json(json!({ "nonce": nonce.value(), "success": true })),
    )
        .into_response()
}

/// `OPTIONS` on the token endpoints.
pub async fn preflight() -> impl IntoResponse {
    (StatusCode::OK, [(header::ALLOW, "GET, OPTIONS")])
}

/// `GET /health`.
pub async fn health() -> impl IntoResponse {
    Json(json!({ "status": "ok" }))
}

pub async fn not_found() -> ApiError {
    ApiError::NotFound
}

/// `POST /api/csp-report`: log one `csp_violation` event per report.
///
/// Accepts the legacy `{"csp-report": {...}}` body and the Reporting API array.
/// Browsers send these with their own content types, so the body is parsed as
/// JSON regardless of the header.
pub async fn csp_report(
    State(state): State<AppState>,
    client: ClientInfo,
    body: Bytes,
) -> Result<Json<Value>, ApiError> {
    let payload: Value = serde_json::from_slice(&body).map_err(|_| {
        metrics::record_csp_report("invalid");
        ApiError::BadRequest("Invalid CSP report".into())
    })?;

    let reports = parse_reports(&payload);
    if reports.is_empty() {
        metrics::record_csp_report("invalid");
        return Err(ApiError::BadRequest("Invalid CSP report".into()));
    }

    let received = reports.len();
    for details in reports {
        state.events.log(
            SecurityEvent::new(SecurityEventKind::CspViolation)
                .with_ip(client.ip.clone())
                .with_user_agent(client.user_agent.clone())
                .with_details(details),
        );
        metrics::record_csp_report("accepted");
    }

    Ok(Json(json!({
        "success": true,
        "message": format!("Received {received} CSP violation report(s)"),
    })))
}

/// Pull the known fields out of a report payload. Reports with no known field are skipped.
pub fn parse_reports(payload: &Value) -> Vec<Map<String, Value>> {
    match payload {
        Value::Object(object) => object
            .get("csp-report")
            .and_then(Value::as_object)
            .map(|report| extract_fields(report, |field| field.0))
            .filter(|details| !details.is_empty())
            .into_iter()
            .collect(),
        Value::Array(items) => items
            .iter()
            .take(MAX_REPORTS_PER_REQUEST)
            .filter(|item| {
                item.get("type")
                    .and_then(Value::as_str)
                    .map_or(true, |kind| kind == CSP_VIOLATION_TYPE)
            })
            .filter_map(|item| item.get("body").and_then(Value::as_object))
            .map(|body| extract_fields(body, |field| field.1))
            .filter(|details| !details.is_empty())
            .collect(),
        _ => Vec::new(),
    }
}

fn extract_fields(
    report: &Map<String, Value>,
    source_key: impl Fn(&(&'static str, &'static str, &'static str)) -> &'static str,
) -> Map<String, Value> {
    let mut details = Map::new();
    for field in REPORT_FIELDS {
        let Some(value) = report.get(source_key(field)) else {
            continue;
        };
        let value = match value {
            Value::String(s) => Value::String(truncate(s, MAX_REPORT_FIELD_LEN)),
            Value::Number(_) | Value::Bool(_) => value.clone(),
            _ => continue,
        };
        details.insert(field.2.to_string(), value);
    }
    details
}

fn truncate(value: &str, max_chars: usize) -> String {
    match value.char_indices().nth(max_chars) {
        Some((idx, _)) => value[..idx].to_string(),
        None => value.to_string(),
    }
}

/// Contact form payload.
#[derive(Debug, Default, Deserialize)]
pub struct ContactSubmission {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub message: String,
    /// Honeypot field; real users never fill it in.
    #[serde(default)]
    pub website: Option<String>,
}

impl ContactSubmission {
    pub fn parse(content_type: Option<&str>, body: &[u8]) -> Result<Self, ApiError> {
        let invalid = || ApiError::BadRequest("Invalid form submission".into());

        if content_type.is_some_and(|ct| ct.starts_with("application/x-www-form-urlencoded")) {
            let fields: Map<String, Value> = url::form_urlencoded::parse(body)
                .map(|(k, v)| (k.into_owned(), Value::String(v.into_owned())))
                .collect();
            return serde_json::from_value(Value::Object(fields)).map_err(|_| invalid());
        }
        serde_json::from_slice(body).map_err(|_| invalid())
    }

    pub fn validate(&self) -> Result<(), ApiError> {
        let name = self.name.trim();
        if name.is_empty() || name.chars().count() > 100 {
            return Err(ApiError::BadRequest("Name is required".into()));
        }
        if !is_plausible_email(self.email.trim()) {
            return Err(ApiError::BadRequest("A valid email is required".into()));
        }
        let message = self.message.trim();
        if message.is_empty() || message.chars().count() > 5000 {
            return Err(ApiError::BadRequest("Message is required".into()));
        }
        Ok(())
    }

    fn is_spam(&self) -> bool {
        self.website.as_deref().is_some_and(|w| !w.trim().is_empty())
    }
}

fn is_plausible_email(email: &str) -> bool {
    if email.len() > 254 || email.contains(char::is_whitespace) {
        return false;
    }
    match email.split_once('@') {
        Some((local, domain)) => {
            !local.is_empty()
                && domain.contains('.')
                && !domain.starts_with('.')
                && !domain.ends_with('.')
                && !domain.contains('@')
        }
        None => false,
    }
}

/// `POST /api/contact`: validated submission with a per-email limit.
pub async fn submit_contact(
    State(state): State<AppState>,
    client: ClientInfo,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<Value>, ApiError> {
    let content_type = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok());
    let submission = ContactSubmission::parse(content_type, &body)?;
    let accepted = Json(json!({
        "success": true,
        "message": "Thanks, your message has been sent",
    }));

    if submission.is_spam() {
        state.events.log(
            SecurityEvent::new(SecurityEventKind::SuspiciousActivity)
                .with_ip(client.ip.clone())
                .with_user_agent(client.user_agent.clone())
                .with_detail("path", "/api/contact")
                .with_detail("reason", "honeypot_filled"),
        );
        return Ok(accepted);
    }

    submission.validate()?;

    let limits = &state.config.contact;
    let key = format!("contact:{}", submission.email.trim().to_lowercase());
    if !state
        .rate_limiter
        .check_limit(&key, limits.max_submissions, limits.window())
    {
        metrics::record_rate_limited("contact");
        state.events.log(
            SecurityEvent::new(SecurityEventKind::RateLimit)
                .with_ip(client.ip.clone())
                .with_user_agent(client.user_agent.clone())
                .with_detail("path", "/api/contact")
                .with_detail("scope", "contact")
                .with_detail("limit", limits.max_submissions)
                .with_detail("windowMs", limits.window_ms),
        );
        return Err(ApiError::RateLimited {
            retry_after: state.rate_limiter.retry_after(&key, limits.window()),
        });
    }
    state.rate_limiter.record_attempt(&key);

    tracing::info!(ip = %client.ip, "Contact submission accepted");
    Ok(accepted)
}
