//! HMAC request authentication, CIDR scoping, and the key-wrap cipher
//! registry.

pub mod auth;
pub mod cidr;
pub mod cipher;
pub mod signing;

pub use auth::{authenticate, AuthError, AuthenticatedIdentity, RawAuthHeaders};
pub use cipher::{AesGcmProvider, CipherError, CipherProvider, CipherRegistry};
pub use signing::{generate_key, RequestSigner, SigningError};
