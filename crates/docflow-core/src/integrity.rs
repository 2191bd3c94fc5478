// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Document fingerprints.

use sha2::{Digest, Sha256};

/// SHA-256 of `data` as a lowercase hex string.
///
/// Job records carry this instead of the bytes, and the output records the
/// hash of what the converter actually received.
pub fn hash_bytes(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    const EMPTY_SHA256: &str =
        "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855";

    #[test]
    fn hash_empty_input() {
        assert_eq!(hash_bytes(b""), EMPTY_SHA256);
    }

    #[test]
    fn different_documents_differ() {
        assert_ne!(hash_bytes(b"%PDF-1.4 a"), hash_bytes(b"%PDF-1.4 b"));
    }
}
