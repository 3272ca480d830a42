//! Constant-time comparison helpers shared across the gateway crates.

use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

/// Constant-time byte comparison that does not leak input lengths or content.
///
/// Both inputs are hashed to fixed-length SHA-256 digests before comparison,
/// so timing reveals neither the content nor the length of either input.
/// The final comparison uses `subtle::ConstantTimeEq`.
pub fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    let ha = Sha256::digest(a);
    let hb = Sha256::digest(b);
    ha.ct_eq(&hb).into()
}

/// Check a bearer-token `Authorization` header against a configured token,
/// with a public opt-in escape hatch for `/metrics`-style endpoints.
/// Returns `Err((status, message))` on rejection so callers can translate
/// to their HTTP framework of choice.
pub fn check_bearer_auth(
    auth_header: Option<&str>,
    expected_token: Option<&[u8]>,
    public_opt_in: bool,
) -> Result<(), (u16, &'static str)> {
    if public_opt_in {
        return Ok(());
    }
    let Some(expected) = expected_token else {
        return Err((403, "metrics access requires METRICS_TOKEN to be configured"));
    };
    let presented = auth_header
        .and_then(|h| h.strip_prefix("Bearer "))
        .unwrap_or("");
    if constant_time_eq(presented.as_bytes(), expected) {
        Ok(())
    } else {
        Err((401, "invalid or missing bearer token"))
    }
}
