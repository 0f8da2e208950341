//! CSRF tokens (double-submit cookie).
//!
//! # Responsibilities
//! - Generate 256-bit random tokens, hex encoded
//! - Verify the presented token against the cookie copy
//! - Build and read the `csrf-token` cookie
//!
//! # Design Decisions
//! - No server-side token store: validity is cookie presence plus equality
//! - Verification fails closed and never errors; callers branch on a bool
//! - Equality is constant-time (`subtle`)

use axum::http::{header, HeaderMap};
use cookie::{time::Duration as CookieDuration, Cookie, SameSite};
use rand::RngCore;
use subtle::ConstantTimeEq;

use crate::config::CsrfConfig;

/// Raw token length in bytes (32 bytes = 256 bits).
pub const TOKEN_BYTES_LEN: usize = 32;

/// Generate a fresh CSRF token.
pub fn generate_token() -> String {
    let mut bytes = [0u8; TOKEN_BYTES_LEN];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

/// Compare the client-presented token with the cookie copy.
///
/// Returns `false` when either side is missing or empty.
pub fn verify_token(presented: Option<&str>, cookie_value: Option<&str>) -> bool {
    match (presented, cookie_value) {
        (Some(presented), Some(cookie_value))
            if !presented.is_empty() && !cookie_value.is_empty() =>
        {
            presented.as_bytes().ct_eq(cookie_value.as_bytes()).into()
        }
        _ => false,
    }
}

/// Token issuance and verification bound to the configured cookie settings.
#[derive(Debug, Clone)]
pub struct TokenService {
    cookie_name: String,
    header_name: String,
    body_field: String,
    max_age_secs: u64,
    secure: bool,
}

impl TokenService {
    pub fn new(config: &CsrfConfig, secure: bool) -> Self {
        Self {
            cookie_name: config.cookie_name.clone(),
            header_name: config.header_name.clone(),
            body_field: config.body_field.clone(),
            max_age_secs: config.max_age_secs,
            secure,
        }
    }

    pub fn cookie_name(&self) -> &str {
        &self.cookie_name
    }

    pub fn header_name(&self) -> &str {
        &self.header_name
    }

    pub fn body_field(&self) -> &str {
        &self.body_field
    }

    pub fn generate(&self) -> String {
        generate_token()
    }

    pub fn verify(&self, presented: Option<&str>, cookie_value: Option<&str>) -> bool {
        verify_token(presented, cookie_value)
    }

    /// Build the `Set-Cookie` value carrying `token`.
    pub fn cookie(&self, token: &str) -> Cookie<'static> {
        Cookie::build((self.cookie_name.clone(), token.to_string()))
            .http_only(true)
            .secure(self.secure)
            .same_site(SameSite::Strict)
            .path("/")
            .max_age(CookieDuration::seconds(self.max_age_secs as i64))
            .build()
    }

    /// Read the token from the request's `Cookie` headers.
    pub fn read_cookie(&self, headers: &HeaderMap) -> Option<String> {
        for value in headers.get_all(header::COOKIE) {
            let Ok(value_str) = value.to_str() else {
                continue;
            };

            for cookie in Cookie::split_parse(value_str) {
                let Ok(cookie) = cookie else {
                    continue;
                };
                if cookie.name() == self.cookie_name && !cookie.value().is_empty() {
                    return Some(cookie.value().to_string());
                }
            }
        }
        None
    }

    /// Read the token the client echoed in the request header.
    pub fn read_header(&self, headers: &HeaderMap) -> Option<String> {
        headers
            .get(self.header_name.as_str())
            .and_then(|v| v.to_str().ok())
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    }

    /// Read the token from a buffered JSON or urlencoded body.
    pub fn read_body(&self, content_type: Option<&str>, body: &[u8]) -> Option<String> {
        let content_type = content_type.unwrap_or_default();
        if content_type.starts_with("application/json") {
            let value: serde_json::Value = serde_json::from_slice(body).ok()?;
            return value
                .get(&self.body_field)
                .and_then(|v| v.as_str())
                .filter(|v| !v.is_empty())
                .map(str::to_string);
        }
        if content_type.starts_with("application/x-www-form-urlencoded") {
            let body = std::str::from_utf8(body).ok()?;
            return url::form_urlencoded::parse(body.as_bytes())
                .find(|(k, _)| k == self.body_field.as_str() || k == "_csrf")
                .map(|(_, v)| v.into_owned())
                .filter(|v| !v.is_empty());
        }
        None
    }

    /// Whether a `Set-Cookie` header value sets this service's cookie.
    pub fn sets_cookie(&self, set_cookie: &str) -> bool {
        Cookie::parse(set_cookie)
            .map(|c| c.name() == self.cookie_name)
            .unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;
    use std::collections::HashSet;

    fn service(secure: bool) -> TokenService {
        TokenService::new(&CsrfConfig::default(), secure)
    }

    #[test]
    fn test_tokens_are_unique_hex() {
        let mut seen = HashSet::new();
        for _ in 0..10_000 {
            let token = generate_token();
            assert_eq!(token.len(), TOKEN_BYTES_LEN * 2);
            assert!(token.chars().all(|c| matches!(c, '0'..='9' | 'a'..='f')));
            assert!(seen.insert(token), "duplicate token generated");
        }
    }

    #[test]
    fn test_verify_token() {
        let token = generate_token();
        assert!(verify_token(Some(&token), Some(&token)));
        assert!(verify_token(Some("a"), Some("a")));
        assert!(!verify_token(Some(&token), Some(&generate_token())));
        assert!(!verify_token(Some("abc"), Some("abcd")));
    }

    #[test]
    fn test_verify_fails_closed() {
        assert!(!verify_token(None, None));
        assert!(!verify_token(Some("x"), None));
        assert!(!verify_token(None, Some("x")));
        assert!(!verify_token(Some(""), Some("")));
        assert!(!verify_token(Some(""), Some("x")));
    }

    #[test]
    fn test_cookie_attributes() {
        let cookie = service(true).cookie("abc").to_string();
        assert!(cookie.starts_with("csrf-token=abc"));
        assert!(cookie.contains("HttpOnly"));
        assert!(cookie.contains("SameSite=Strict"));
        assert!(cookie.contains("Secure"));
        assert!(cookie.contains("Path=/"));
        assert!(cookie.contains("Max-Age=86400"));

        let dev_cookie = service(false).cookie("abc").to_string();
        assert!(!dev_cookie.contains("Secure"));
    }

    #[test]
    fn test_read_cookie() {
        let svc = service(false);
        let mut headers = HeaderMap::new();
        headers.insert(header::COOKIE, HeaderValue::from_static("theme=dark; csrf-token=tok123"));
        assert_eq!(svc.read_cookie(&headers).as_deref(), Some("tok123"));

        headers.insert(header::COOKIE, HeaderValue::from_static("csrf-token="));
        assert_eq!(svc.read_cookie(&headers), None);
    }

    #[test]
    fn test_read_body_json_and_form() {
        let svc = service(false);
        let json = br#"{"email":"a@b.c","csrfToken":"tok"}"#;
        assert_eq!(svc.read_body(Some("application/json"), json).as_deref(), Some("tok"));

        let form = b"name=x&_csrf=tok2";
        assert_eq!(
            svc.read_body(Some("application/x-www-form-urlencoded"), form).as_deref(),
            Some("tok2")
        );

        assert_eq!(svc.read_body(Some("text/plain"), b"csrfToken=tok"), None);
        assert_eq!(svc.read_body(Some("application/json"), b"not json"), None);
    }

    #[test]
    fn test_sets_cookie() {
        let svc = service(false);
        assert!(svc.sets_cookie(&svc.cookie("t").to_string()));
        assert!(!svc.sets_cookie("session=1; Path=/"));
    }
}
