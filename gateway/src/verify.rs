//! Local certificate verification (spec §4.3, local path) and credential
//! extraction (spec §4.7 step 1).

use axum::http::HeaderMap;
use trust_common::certificate::{verify_local, Claims, VerifyError};

use crate::keycache::KeyCache;

/// Pull the bearer credential from `Authorization: Bearer <token>` or the
/// `X-Agent-Certificate` header, in that order.
pub fn extract_credential(headers: &HeaderMap) -> Result<&str, VerifyError> {
    if let Some(value) = headers
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
    {
        return Ok(value);
    }
    if let Some(value) = headers.get("X-Agent-Certificate").and_then(|v| v.to_str().ok()) {
        return Ok(value);
    }
    Err(VerifyError::MissingCredential)
}

/// Verify a certificate against the gateway's currently cached station key.
pub fn verify(key_cache: &KeyCache, token: &str) -> Result<Claims, VerifyError> {
    verify_local(&key_cache.current(), token)
}
