//! Shared SHA-256 hex digest utility.
//!
//! Used for the per-event dedup key that makes delivery-row creation
//! idempotent across bus redeliveries.

use sha2::{Digest, Sha256};

/// Compute a SHA-256 hex digest of the given bytes.
pub fn sha256_hex(data: &[u8]) -> String {
    let hash = Sha256::digest(data);
    hash.iter().map(|b| format!("{b:02x}")).collect()
}
