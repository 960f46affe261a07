//! Query string signatures for the service API scheme.
//!
//! Callers sign the query string exactly as sent on the wire (parameter
//! order and percent-encoding included) and put the result in the `secret`
//! header.

use base64::{Engine as _, engine::general_purpose::STANDARD};
use hmac::{Hmac, Mac};
use sha2::Sha256;
use subtle::ConstantTimeEq;

type HmacSha256 = Hmac<Sha256>;

/// Generate the HMAC-SHA256 signature of a raw query string.
///
/// # Format
///
/// Standard padded base64 of the 32-byte MAC.
pub fn sign_query(raw_query: &str, secret_key: &str) -> String {
    // HMAC accepts keys of any length
    let mut mac = HmacSha256::new_from_slice(secret_key.as_bytes())
        .expect("HMAC key length is valid");
    mac.update(raw_query.as_bytes());
    STANDARD.encode(mac.finalize().into_bytes())
}

/// Check a caller-supplied signature against the expected one in constant time.
pub fn verify_query(raw_query: &str, secret_key: &str, provided: &str) -> bool {
    let expected = sign_query(raw_query, secret_key);
    expected.as_bytes().ct_eq(provided.as_bytes()).into()
}
