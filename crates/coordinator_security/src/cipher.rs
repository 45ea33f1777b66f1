//! Pluggable key-wrap cipher providers for identity secrets at rest.
//!
//! A small capability interface plus a registry, rather than a provider
//! hierarchy. `CipherProvider` is that capability: wrap/unwrap a 32-byte
//! secret, named so the identity store can record which provider a given
//! wrapped secret depends on (`key_wrap_id`) and look the right one back
//! up on read.

use std::collections::HashMap;

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use base64::{engine::general_purpose::STANDARD, Engine};
use rand::RngCore;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CipherError {
    #[error("unknown cipher provider: {0}")]
    UnknownProvider(String),
    #[error("wrap failed")]
    WrapFailed,
    #[error("unwrap failed: ciphertext invalid or key mismatch")]
    UnwrapFailed,
    #[error("malformed wrapped value")]
    MalformedWrapped,
}

/// A named provider capable of wrapping/unwrapping a raw secret for
/// storage. Implementations own their own key material.
pub trait CipherProvider: Send + Sync {
    fn name(&self) -> &'static str;
    fn wrap(&self, plaintext: &[u8; 32]) -> Result<String, CipherError>;
    fn unwrap(&self, wrapped: &str) -> Result<[u8; 32], CipherError>;
}

/// AES-256-GCM provider: `base64(nonce || ciphertext)`. Symmetric AEAD,
/// one master key per provider instance.
pub struct AesGcmProvider {
    name: &'static str,
    key: Key<Aes256Gcm>,
}

impl AesGcmProvider {
    pub fn new(name: &'static str, master_key: [u8; 32]) -> Self {
        Self {
            name,
            key: *Key::<Aes256Gcm>::from_slice(&master_key),
        }
    }
}

impl CipherProvider for AesGcmProvider {
    fn name(&self) -> &'static str {
        self.name
    }

    fn wrap(&self, plaintext: &[u8; 32]) -> Result<String, CipherError> {
        let cipher = Aes256Gcm::new(&self.key);
        let mut nonce_bytes = [0u8; 12];
        rand::thread_rng().fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);
        let ciphertext = cipher
            .encrypt(nonce, plaintext.as_slice())
            .map_err(|_| CipherError::WrapFailed)?;
        let mut combined = Vec::with_capacity(12 + ciphertext.len());
        combined.extend_from_slice(&nonce_bytes);
        combined.extend_from_slice(&ciphertext);
        Ok(STANDARD.encode(combined))
    }

    fn unwrap(&self, wrapped: &str) -> Result<[u8; 32], CipherError> {
        let combined = STANDARD
            .decode(wrapped)
            .map_err(|_| CipherError::MalformedWrapped)?;
        if combined.len() < 12 {
            return Err(CipherError::MalformedWrapped);
        }
        let (nonce_bytes, ciphertext) = combined.split_at(12);
        let cipher = Aes256Gcm::new(&self.key);
        let plaintext = cipher
            .decrypt(Nonce::from_slice(nonce_bytes), ciphertext)
            .map_err(|_| CipherError::UnwrapFailed)?;
        plaintext
            .try_into()
            .map_err(|_| CipherError::UnwrapFailed)
    }
}

/// Providers registered by name, populated once at startup and keyed by
/// provider name.
#[derive(Default)]
pub struct CipherRegistry {
    providers: HashMap<String, Box<dyn CipherProvider>>,
}

impl CipherRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, provider: Box<dyn CipherProvider>) {
        self.providers.insert(provider.name().to_string(), provider);
    }

    pub fn get(&self, name: &str) -> Result<&dyn CipherProvider, CipherError> {
        self.providers
            .get(name)
            .map(|p| p.as_ref())
            .ok_or_else(|| CipherError::UnknownProvider(name.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wrap_then_unwrap_round_trips() {
        let provider = AesGcmProvider::new("aes256gcm", [1u8; 32]);
        let secret = [42u8; 32];
        let wrapped = provider.wrap(&secret).unwrap();
        let unwrapped = provider.unwrap(&wrapped).unwrap();
        assert_eq!(secret, unwrapped);
    }

    #[test]
    fn unwrap_rejects_garbage() {
        let provider = AesGcmProvider::new("aes256gcm", [1u8; 32]);
        assert!(provider.unwrap("not-valid-base64!!").is_err());
    }

    #[test]
    fn registry_looks_up_by_name() {
        let mut registry = CipherRegistry::new();
        registry.register(Box::new(AesGcmProvider::new("aes256gcm", [2u8; 32])));
        assert!(registry.get("aes256gcm").is_ok());
        assert!(matches!(
            registry.get("missing"),
            Err(CipherError::UnknownProvider(_))
        ));
    }
}
