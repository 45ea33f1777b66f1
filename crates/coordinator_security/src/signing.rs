//! HMAC-SHA256 request signing and verification.
//!
//! Canonical string: `METHOD|PATH|TIMESTAMP|hex(sha256(body))`. Signature is
//! the base64 encoding of `HMAC-SHA256(secret, canonical)`. Comparison is
//! constant-time over the signature bytes so that no early return on a
//! mismatching byte leaks timing information.

use base64::{engine::general_purpose::STANDARD, Engine};
use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;
use thiserror::Error;

type HmacSha256 = Hmac<Sha256>;

#[derive(Debug, Error)]
pub enum SigningError {
    #[error("secret key must be exactly 32 bytes, got {0}")]
    BadKeyLength(usize),
}

/// Signs and verifies requests for a single identity's secret.
pub struct RequestSigner {
    secret: [u8; 32],
}

impl RequestSigner {
    pub fn new(secret: [u8; 32]) -> Self {
        Self { secret }
    }

    fn canonical_string(method: &str, path: &str, timestamp: &str, body: &[u8]) -> String {
        let payload_hash = hex::encode(Sha256::digest(body));
        format!("{}|{}|{}|{}", method.to_ascii_uppercase(), path, timestamp, payload_hash)
    }

    /// Compute the base64 signature for the given request attributes.
    pub fn generate_signature(&self, method: &str, path: &str, timestamp: &str, body: &[u8]) -> String {
        let canonical = Self::canonical_string(method, path, timestamp, body);
        let mut mac = HmacSha256::new_from_slice(&self.secret).expect("hmac accepts any key length");
        mac.update(canonical.as_bytes());
        STANDARD.encode(mac.finalize().into_bytes())
    }

    /// Returns `(timestamp, signature)` for use in outbound request headers.
    pub fn sign(&self, method: &str, path: &str, body: &[u8], now_unix: i64) -> (String, String) {
        let timestamp = now_unix.to_string();
        let signature = self.generate_signature(method, path, &timestamp, body);
        (timestamp, signature)
    }

    /// Verify an inbound request's signature. Does not check clock drift —
    /// that is the authenticator's job since it also needs the current
    /// time and the configured drift window (see `auth::authenticate`).
    pub fn verify(&self, method: &str, path: &str, timestamp: &str, body: &[u8], signature: &str) -> bool {
        let expected = self.generate_signature(method, path, timestamp, body);
        constant_time_eq(expected.as_bytes(), signature.as_bytes())
    }
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.ct_eq(b).into()
}

/// Generate a fresh 32-byte signing secret.
pub fn generate_key() -> [u8; 32] {
    use rand::RngCore;
    let mut key = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut key);
    key
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sign_then_verify_round_trips() {
        let signer = RequestSigner::new([7u8; 32]);
        let (timestamp, signature) = signer.sign("POST", "/jobs/submit", b"{}", 1_700_000_000);
        assert!(signer.verify("POST", "/jobs/submit", &timestamp, b"{}", &signature));
    }

    #[test]
    fn verify_rejects_tampered_body() {
        let signer = RequestSigner::new([7u8; 32]);
        let (timestamp, signature) = signer.sign("POST", "/jobs/submit", b"{}", 1_700_000_000);
        assert!(!signer.verify("POST", "/jobs/submit", &timestamp, b"{\"x\":1}", &signature));
    }

    #[test]
    fn verify_rejects_wrong_secret() {
        let signer = RequestSigner::new([7u8; 32]);
        let other = RequestSigner::new([9u8; 32]);
        let (timestamp, signature) = signer.sign("POST", "/jobs/submit", b"{}", 1_700_000_000);
        assert!(!other.verify("POST", "/jobs/submit", &timestamp, b"{}", &signature));
    }

    #[test]
    fn method_is_case_normalized() {
        let signer = RequestSigner::new([1u8; 32]);
        let (timestamp, sig_lower) = signer.sign("post", "/x", b"", 1);
        assert!(signer.verify("POST", "/x", &timestamp, b"", &sig_lower));
    }
}
