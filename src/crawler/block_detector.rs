//! Soft-block detection by content fingerprint
//!
//! Anti-bot walls tend to serve the same challenge page whatever was asked
//! for, so a body identical to the one stored from the previous attempt is
//! treated as a block rather than a success.

use sha2::{Digest, Sha256};

/// Computes the fingerprint of a page body
///
/// Line endings are normalised and surrounding whitespace trimmed before
/// hashing, so transport differences do not defeat the comparison.
pub fn fingerprint(body: &str) -> String {
    let normalized = body.replace("\r\n", "\n");
    let mut hasher = Sha256::new();
    hasher.update(normalized.trim().as_bytes());
    hex::encode(hasher.finalize())
}

/// Returns true when `current` repeats the fingerprint stored by an earlier attempt
pub fn is_suspected_block(previous: Option<&str>, current: &str) -> bool {
    previous.map(|prev| prev == current).unwrap_or(false)
}
