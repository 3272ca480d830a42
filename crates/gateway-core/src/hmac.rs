//! HMAC-SHA256 signing and verification (C2).
//!
//! Two layers are exposed: raw body signing ([`compute_hmac`]/[`verify_hmac`],
//! unchanged from the donor's facilitator-auth scheme) and canonical-field
//! signing ([`sign_fields`]/[`verify_fields`]) used for challenge envelopes
//! per §4.1/§6, where fields are emitted in a fixed pipe-delimited
//! lexicographic order before hashing.

use std::collections::BTreeMap;

use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Compute HMAC-SHA256 over raw body bytes. Returns lowercase hex.
pub fn compute_hmac(secret: &[u8], body: &[u8]) -> String {
    let mut mac = HmacSha256::new_from_slice(secret).expect("HMAC accepts any key length");
    mac.update(body);
    hex_encode(&mac.finalize().into_bytes())
}

/// Verify an HMAC-SHA256 signature against raw body bytes.
///
/// The MAC is always computed even if the hex fails to decode, so an
/// invalid-hex signature takes the same time as a valid-length one that
/// simply doesn't match — no early return before the constant-time compare.
pub fn verify_hmac(secret: &[u8], body: &[u8], signature: &str) -> bool {
    let expected = hex_decode(signature).unwrap_or_default();
    let mut mac = HmacSha256::new_from_slice(secret).expect("HMAC accepts any key length");
    mac.update(body);
    mac.verify_slice(&expected).is_ok()
}

/// Build the canonical pipe-delimited string for a set of named fields,
/// sorted lexicographically by field name. Numbers must already be passed
/// in as base-10 strings and addresses already lowercased by the caller;
/// this function only orders and joins.
pub fn canonical_string<'a, I>(fields: I) -> String
where
    I: IntoIterator<Item = (&'a str, &'a str)>,
{
    let sorted: BTreeMap<&str, &str> = fields.into_iter().collect();
    sorted
        .into_values()
        .collect::<Vec<_>>()
        .join("|")
}

/// Sign a canonical field set, returning lowercase hex HMAC-SHA256.
/// The `hmac` field itself must not be included in `fields`.
pub fn sign_fields<'a, I>(fields: I, secret: &[u8]) -> String
where
    I: IntoIterator<Item = (&'a str, &'a str)>,
{
    compute_hmac(secret, canonical_string(fields).as_bytes())
}

/// Verify a canonical field set's HMAC against the current secret, falling
/// back to the previous secret during rotation (§5 "Pepper and HMAC
/// secrets"). Verification requires: the signature is fixed-length hex, the
/// decoded bytes match the digest length, and a constant-time compare
/// succeeds under either secret. Rejection carries no extra timing signal
/// beyond that length guard.
pub fn verify_fields<'a, I>(
    fields: I,
    secret: &[u8],
    secret_prev: Option<&[u8]>,
    signature: &str,
) -> bool
where
    I: IntoIterator<Item = (&'a str, &'a str)>,
{
    if signature.len() != 64 || !signature.bytes().all(|b| b.is_ascii_hexdigit()) {
        return false;
    }
    let message = canonical_string(fields);
    let body = message.as_bytes();
    if verify_hmac(secret, body, signature) {
        return true;
    }
    match secret_prev {
        Some(prev) => verify_hmac(prev, body, signature),
        None => false,
    }
}

fn hex_encode(bytes: &[u8]) -> String {
    bytes.iter().fold(String::new(), |mut s, b| {
        use std::fmt::Write;
        let _ = write!(s, "{b:02x}");
        s
    })
}

fn hex_decode(s: &str) -> Result<Vec<u8>, ()> {
    #[allow(clippy::manual_is_multiple_of)]
    if s.len() % 2 != 0 || !s.is_ascii() {
        return Err(());
    }
    (0..s.len())
        .step_by(2)
        .map(|i| u8::from_str_radix(&s[i..i + 2], 16).map_err(|_| ()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hmac_roundtrip() {
        let secret = b"test-secret";
        let body = b"request body content";
        let sig = compute_hmac(secret, body);
        assert!(verify_hmac(secret, body, &sig));
    }

    #[test]
    fn test_hmac_wrong_secret() {
        let body = b"request body content";
        let sig = compute_hmac(b"secret-1", body);
        assert!(!verify_hmac(b"secret-2", body, &sig));
    }

    #[test]
    fn test_hmac_tampered_body() {
        let secret = b"test-secret";
        let sig = compute_hmac(secret, b"original");
        assert!(!verify_hmac(secret, b"tampered", &sig));
    }

    #[test]
    fn test_hmac_invalid_hex() {
        assert!(!verify_hmac(b"secret", b"body", "not-hex-zz"));
    }

    #[test]
    fn canonical_string_orders_by_field_name() {
        let fields = [("nonce", "N"), ("amount", "1000"), ("chain_id", "42431")];
        assert_eq!(canonical_string(fields), "1000|42431|N");
    }

    #[test]
    fn challenge_integrity_flip_any_field_breaks_verification() {
        let secret = b"challenge-secret";
        let fields = [("amount", "1000"), ("nonce", "abc")];
        let sig = sign_fields(fields, secret);
        assert!(verify_fields(fields, secret, None, &sig));

        let flipped = [("amount", "1001"), ("nonce", "abc")];
        assert!(!verify_fields(flipped, secret, None, &sig));
        assert!(!verify_fields(fields, b"other-secret", None, &sig));
    }

    #[test]
    fn rotation_accepts_previous_secret_until_next_rotation() {
        let old_secret = b"secret-v1";
        let new_secret = b"secret-v2";
        let fields = [("amount", "1000"), ("nonce", "abc")];
        let sig = sign_fields(fields, old_secret);

        // During rotation: current=new_secret, previous=old_secret.
        assert!(verify_fields(fields, new_secret, Some(old_secret), &sig));

        // After a *second* rotation, old_secret is no longer `previous`.
        let newer_secret = b"secret-v3";
        assert!(!verify_fields(fields, newer_secret, Some(new_secret), &sig));
    }
}
