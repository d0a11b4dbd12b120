//! JWT payload inspection
//!
//! Only the `exp` claim is read. The signature is not verified; the token
//! is opaque to us and only the engine checks it.

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use serde::Deserialize;

use super::RenewalFailure;

#[derive(Debug, Deserialize)]
struct Claims {
    exp: Option<i64>,
}

/// Expiry of `token` in epoch seconds
pub fn expiry(token: &str) -> Result<i64, RenewalFailure> {
    let payload = token
        .split('.')
        .nth(1)
        .ok_or_else(|| malformed("expected three dot-separated segments"))?;
    let bytes = URL_SAFE_NO_PAD
        .decode(payload.trim_end_matches('=').as_bytes())
        .map_err(|e| malformed(&e.to_string()))?;
    let claims: Claims = serde_json::from_slice(&bytes).map_err(|e| malformed(&e.to_string()))?;
    claims.exp.ok_or_else(|| malformed("no exp claim"))
}

fn malformed(reason: &str) -> RenewalFailure {
    RenewalFailure::new("token", format!("Malformed access token: {}", reason))
}

#[cfg(test)]
pub(crate) fn fake_token(exp: i64) -> String {
    let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"none"}"#);
    let payload = URL_SAFE_NO_PAD.encode(format!(r#"{{"sub":"user","exp":{}}}"#, exp));
    format!("{}.{}.sig", header, payload)
}
