//! Webhook secret generation and HMAC request signing.
//!
//! Every registered endpoint is issued a random signing secret exactly once
//! at creation. Outgoing deliveries carry an `X-Webhook-Signature` header of
//! the form `sha256=<hex>` where `<hex>` is the HMAC-SHA256 of the raw
//! request body under that secret; receivers recompute the same MAC over the
//! exact bytes received to authenticate the sender.

use hmac::{Hmac, Mac};
use rand::Rng;
use sha2::Sha256;
use subtle::ConstantTimeEq;

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

/// Length of the generated signing secret (alphanumeric characters).
pub const SECRET_LENGTH: usize = 48;

/// Prefix carried by the signature header value.
pub const SIGNATURE_SCHEME: &str = "sha256=";

// ---------------------------------------------------------------------------
// Secret generation
// ---------------------------------------------------------------------------

/// Generate a new random webhook signing secret.
///
/// The secret is returned to the registering user exactly once and stored
/// alongside the registration; it is never exposed again through any read
/// surface.
pub fn generate_secret() -> String {
    rand::rng()
        .sample_iter(&rand::distr::Alphanumeric)
        .take(SECRET_LENGTH)
        .map(char::from)
        .collect()
}

// ---------------------------------------------------------------------------
// Signing
// ---------------------------------------------------------------------------

type HmacSha256 = Hmac<Sha256>;

/// Compute the `X-Webhook-Signature` header value for a request body.
///
/// Returns `sha256=<hex HMAC-SHA256(secret, body)>`.
pub fn sign_body(secret: &str, body: &[u8]) -> String {
    let mut mac =
        HmacSha256::new_from_slice(secret.as_bytes()).expect("HMAC accepts any key length");
    mac.update(body);
    format!("{SIGNATURE_SCHEME}{}", hex::encode(mac.finalize().into_bytes()))
}

/// Verify a signature header value against a body and secret.
///
/// Recomputes the MAC over `body` and compares in constant time. Returns
/// `false` for any malformed header, wrong scheme, or mismatch.
pub fn verify_signature(secret: &str, body: &[u8], header_value: &str) -> bool {
    let Some(hex_sig) = header_value.strip_prefix(SIGNATURE_SCHEME) else {
        return false;
    };
    let expected = sign_body(secret, body);
    let expected_hex = &expected[SIGNATURE_SCHEME.len()..];
    constant_time_eq(expected_hex.as_bytes(), hex_sig.as_bytes())
}

/// Constant-time byte comparison so verification leaks nothing via timing.
fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.ct_eq(b).into()
}

// ---------------------------------------------------------------------------
// hex encoding helper (no extra dep)
// ---------------------------------------------------------------------------

mod hex {
    /// Encode bytes as a lowercase hex string.
    pub fn encode(bytes: impl AsRef<[u8]>) -> String {
        bytes.as_ref().iter().map(|b| format!("{b:02x}")).collect()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
