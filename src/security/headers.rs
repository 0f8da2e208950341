//! Security response headers.
//!
//! # Responsibilities
//! - Add CSP and the `x-nonce` copy of the response nonce
//! - Add clickjacking, MIME sniffing and referrer protections
//! - Add HSTS in production
//!
//! # Design Decisions
//! - Headers are inserted, overriding anything a handler set
//! - Both nonce copies come from the same `CspNonce` so they always match

use axum::http::{header, HeaderMap, HeaderName, HeaderValue};

use crate::security::csp::CspPolicy;
use crate::security::nonce::CspNonce;

pub const X_NONCE: HeaderName = HeaderName::from_static("x-nonce");
pub const PERMISSIONS_POLICY: HeaderName = HeaderName::from_static("permissions-policy");

/// Write the security headers for one response.
pub fn apply_security_headers(
    headers: &mut HeaderMap,
    policy: &CspPolicy,
    nonce: &CspNonce,
    production: bool,
) {
    match HeaderValue::from_str(&policy.render(nonce)) {
        Ok(value) => {
            headers.insert(policy.header_name(), value);
        }
        Err(e) => tracing::error!(error = %e, "Rendered CSP is not a valid header value"),
    }

    if let Ok(value) = HeaderValue::from_str(nonce.value()) {
        headers.insert(X_NONCE, value);
    }

    headers.insert(header::X_FRAME_OPTIONS, HeaderValue::from_static("DENY"));
    headers.insert(header::X_CONTENT_TYPE_OPTIONS, HeaderValue::from_static("nosniff"));
    headers.insert(
        header::REFERRER_POLICY,
        HeaderValue::from_static("strict-origin-when-cross-origin"),
    );
    headers.insert(
        PERMISSIONS_POLICY,
        HeaderValue::from_static("camera=(), microphone=(), geolocation=()"),
    );

    if production {
        headers.insert(
            header::STRICT_TRANSPORT_SECURITY,
            HeaderValue::from_static("max-age=31536000; includeSubDomains"),
        );
    }
}
