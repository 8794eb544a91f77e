use krc_core::Fingerprint;
use sha2::{Digest, Sha256};

/// SHA-256 over the raw listing text, hex encoded. No parsing, no
/// normalisation: a one-byte difference anywhere yields a new fingerprint.
pub fn fingerprint(raw_text: &str) -> Fingerprint {
    let mut hasher = Sha256::new();
    hasher.update(raw_text.as_bytes());
    Fingerprint::from_hex(hex::encode(hasher.finalize()))
}
