//! Shared-secret check for the manual trigger.

use axum::http::HeaderMap;
use hmac::{Hmac, Mac};
use relay_core::RelayError;
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Header carrying the trigger secret.
pub const SECRET_HEADER: &str = "x-cron-secret";

/// Fixed key: both sides are hashed to equal-length tags so the comparison
/// time does not depend on where the inputs differ.
const COMPARE_KEY: &[u8] = b"relay-gateway/trigger-secret";

/// Constant-time string equality.
pub fn secrets_match(presented: &str, expected: &str) -> bool {
    let (Ok(mut want), Ok(mut got)) = (
        HmacSha256::new_from_slice(COMPARE_KEY),
        HmacSha256::new_from_slice(COMPARE_KEY),
    ) else {
        return false;
    };
    want.update(expected.as_bytes());
    got.update(presented.as_bytes());
    got.verify_slice(&want.finalize().into_bytes()).is_ok()
}

/// Accept the request only when a secret is configured and the header matches.
pub fn verify_trigger(headers: &HeaderMap, configured: Option<&str>) -> Result<(), RelayError> {
    let expected =
        configured.ok_or_else(|| RelayError::Unauthorized("no trigger secret configured".into()))?;
    let presented = headers
        .get(SECRET_HEADER)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| RelayError::Unauthorized(format!("missing {SECRET_HEADER} header")))?;

    if secrets_match(presented, expected) {
        Ok(())
    } else {
        Err(RelayError::Unauthorized("trigger secret mismatch".into()))
    }
}
