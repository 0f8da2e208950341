//! Request metadata used by security decisions.
//!
//! # Responsibilities
//! - Resolve the client address used as the rate limit key
//! - Capture the user agent for security events
//!
//! # Design Decisions
//! - `X-Forwarded-For` is only honored when configured; otherwise a client
//!   could pick its own rate limit bucket
//! - Resolution happens once in the middleware; handlers read it from extensions

use axum::{
    extract::{ConnectInfo, FromRequestParts},
    http::{header, request::Parts, HeaderMap, Request},
};
use std::net::SocketAddr;

/// Placeholder address when no peer information is available.
pub const UNKNOWN_CLIENT: &str = "unknown";

/// Who sent the request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientInfo {
    pub ip: String,
    pub user_agent: Option<String>,
}

impl ClientInfo {
    pub fn from_request<B>(request: &Request<B>, trust_forwarded_for: bool) -> Self {
        let peer = request
            .extensions()
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ConnectInfo(addr)| addr.ip().to_string());
        Self::resolve(request.headers(), peer, trust_forwarded_for)
    }

    fn resolve(headers: &HeaderMap, peer: Option<String>, trust_forwarded_for: bool) -> Self {
        let forwarded = trust_forwarded_for
            .then(|| forwarded_for(headers))
            .flatten();

        let user_agent = headers
            .get(header::USER_AGENT)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);

        Self {
            ip: forwarded
                .or(peer)
                .unwrap_or_else(|| UNKNOWN_CLIENT.to_string()),
            user_agent,
        }
    }

    /// Rate limit key for per-address limiting.
    pub fn rate_limit_key(&self) -> String {
        format!("ip:{}", self.ip)
    }
}

/// First hop in `X-Forwarded-For`.
fn forwarded_for(headers: &HeaderMap) -> Option<String> {
    headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

impl<S> FromRequestParts<S> for ClientInfo
where
    S: Send + Sync,
{
    type Rejection = std::convert::Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        if let Some(info) = parts.extensions.get::<Self>() {
            return Ok(info.clone());
        }
        let peer = parts
            .extensions
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ConnectInfo(addr)| addr.ip().to_string());
        Ok(Self::resolve(&parts.headers, peer, false))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;

    fn request_with(headers: &[(&str, &str)], peer: Option<SocketAddr>) -> Request<Body> {
        let mut builder = Request::builder().uri("/api/contact");
        for (name, value) in headers {
            builder = builder.header(*name, *value);
        }
        let mut request = builder.body(Body::empty()).unwrap();
        if let Some(peer) = peer {
            request.extensions_mut().insert(ConnectInfo(peer));
        }
        request
    }

    #[test]
    fn test_uses_peer_address() {
        let peer: SocketAddr = "203.0.113.7:5555".parse().unwrap();
        let request = request_with(&[("user-agent", "curl/8.0")], Some(peer));
        let info = ClientInfo::from_request(&request, false);
        assert_eq!(info.ip, "203.0.113.7");
        assert_eq!(info.user_agent.as_deref(), Some("curl/8.0"));
        assert_eq!(info.rate_limit_key(), "ip:203.0.113.7");
    }

    #[test]
    fn test_forwarded_for_ignored_unless_trusted() {
        let peer: SocketAddr = "10.0.0.1:80".parse().unwrap();
        let request = request_with(&[("x-forwarded-for", "198.51.100.2, 10.0.0.1")], Some(peer));

        assert_eq!(ClientInfo::from_request(&request, false).ip, "10.0.0.1");
        assert_eq!(ClientInfo::from_request(&request, true).ip, "198.51.100.2");
    }

    #[test]
    fn test_unknown_without_peer() {
        let request = request_with(&[], None);
        let info = ClientInfo::from_request(&request, true);
        assert_eq!(info.ip, UNKNOWN_CLIENT);
        assert!(info.user_agent.is_none());
    }
}
