//! Per-response CSP nonces.
//!
//! Each request gets a fresh 128-bit nonce. The middleware stores it in the
//! request extensions so handlers can tag inline `<script>`/`<style>` elements,
//! and writes the same value into the CSP header and `x-nonce`.

use axum::{extract::FromRequestParts, http::request::Parts};
use base64::{engine::general_purpose::STANDARD, Engine};
use rand::RngCore;
use std::sync::Arc;

/// Length of the raw random bytes for a nonce (16 bytes = 128 bits).
pub const NONCE_BYTES_LEN: usize = 16;

/// Generate a base64 nonce. No state is shared between calls.
pub fn generate_nonce() -> String {
    let mut bytes = [0u8; NONCE_BYTES_LEN];
    rand::thread_rng().fill_bytes(&mut bytes);
    STANDARD.encode(bytes)
}

/// The nonce for the current request.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CspNonce(Arc<str>);

impl CspNonce {
    pub fn generate() -> Self {
        Self(generate_nonce().into())
    }

    pub fn value(&self) -> &str {
        &self.0
    }

    /// The CSP source expression, `'nonce-<value>'`.
    pub fn source(&self) -> String {
        format!("'nonce-{}'", self.0)
    }
}

impl<S> FromRequestParts<S> for CspNonce
where
    S: Send + Sync,
{
    type Rejection = std::convert::Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Ok(parts.extensions.get::<Self>().cloned().unwrap_or_else(|| {
            tracing::warn!("CSP nonce missing from request extensions, security middleware not installed?");
            Self::generate()
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_nonce_shape() {
        let nonce = generate_nonce();
        assert_eq!(nonce.len(), 24);
        let decoded = STANDARD.decode(&nonce).unwrap();
        assert_eq!(decoded.len(), NONCE_BYTES_LEN);
    }

    #[test]
    fn test_nonces_are_unique_across_threads() {
        let handles: Vec<_> = (0..4)
            .map(|_| std::thread::spawn(|| (0..1000).map(|_| generate_nonce()).collect::<Vec<_>>()))
            .collect();

        let mut seen = HashSet::new();
        for handle in handles {
            for nonce in handle.join().unwrap() {
                assert!(seen.insert(nonce));
            }
        }
        assert_eq!(seen.len(), 4000);
    }

    #[test]
    fn test_source_expression() {
        let nonce = CspNonce::generate();
        assert_eq!(nonce.source(), format!("'nonce-{}'", nonce.value()));
    }
}
