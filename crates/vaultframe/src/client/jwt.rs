//! Bearer token expiry check.
//!
//! Only the `exp` claim is read. Signatures are the vault's business; the
//! SDK just avoids sending a token it already knows to be stale.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::{DateTime, TimeZone, Utc};
use serde::Deserialize;

#[derive(Deserialize)]
struct Claims {
    exp: Option<i64>,
}

/// Expiry instant encoded in a JWT, if the token is a JWT with an `exp`.
pub fn expiry(token: &str) -> Option<DateTime<Utc>> {
    let mut parts = token.split('.');
    let (_header, payload, _sig) = (parts.next()?, parts.next()?, parts.next()?);
    if parts.next().is_some() {
        return None;
    }
    let bytes = URL_SAFE_NO_PAD.decode(payload.trim_end_matches('=')).ok()?;
    let claims: Claims = serde_json::from_slice(&bytes).ok()?;
    Utc.timestamp_opt(claims.exp?, 0).single()
}

/// A token is usable when it decodes and its expiry lies in the future.
/// Anything that is not a JWT counts as expired.
pub fn is_token_valid(token: &str) -> bool {
    match expiry(token) {
        Some(exp) => exp > Utc::now(),
        None => false,
    }
}
