//! Identity resolution and `localadmin` bootstrap.
//!
//! The identity store only moves bytes (`coordinator_db::IdentityStore`);
//! this module owns the decision of which `CipherProvider` unwraps a given
//! row, keeping that policy in the binary rather than the storage crate.

use coordinator_protocol::Identity;
use coordinator_security::{generate_key, CipherError};

use crate::state::AppState;

/// Looks up `client_id` and transparently unwraps its stored secret.
/// Returns `Ok(None)` for an unknown identity — that's not an error,
/// just "no such row".
pub async fn resolve_identity(
    state: &AppState,
    client_id: &str,
) -> Result<Option<Identity>, IdentityError> {
    let Some((mut identity, stored_key)) = state.identity_store.get_identity_raw(client_id).await? else {
        return Ok(None);
    };
    identity.hmac_key = unwrap_stored_key(state, identity.key_wrap_id.as_deref(), &stored_key)?;
    Ok(Some(identity))
}

fn unwrap_stored_key(
    state: &AppState,
    key_wrap_id: Option<&str>,
    stored_key: &str,
) -> Result<[u8; 32], IdentityError> {
    match key_wrap_id {
        Some(wrap_id) => {
            let provider = state.cipher_registry.get(wrap_id)?;
            Ok(provider.unwrap(stored_key)?)
        }
        None => decode_plaintext_hex(stored_key),
    }
}

fn decode_plaintext_hex(stored_key: &str) -> Result<[u8; 32], IdentityError> {
    let bytes = hex::decode(stored_key).map_err(|_| IdentityError::MalformedKey)?;
    bytes.try_into().map_err(|_| IdentityError::MalformedKey)
}

/// Wraps `raw_key` under the configured provider, if any, returning the
/// value to persist in the `hmac_key` column and the `key_wrap_id` to
/// store alongside it.
fn wrap_for_storage(state: &AppState, raw_key: &[u8; 32]) -> Result<(String, Option<String>), IdentityError> {
    match state.config.key_wrap_provider.as_deref() {
        Some(name) => {
            let provider = state.cipher_registry.get(name)?;
            Ok((provider.wrap(raw_key)?, Some(name.to_string())))
        }
        None => Ok((hex::encode(raw_key), None)),
    }
}

/// Ensures a `localadmin` identity exists, scoped to loopback, with a
/// freshly generated key. Idempotent: a second call on an
/// already-bootstrapped coordinator is a no-op.
pub async fn bootstrap_localadmin(state: &AppState) -> Result<(), IdentityError> {
    const LOCALADMIN_ID: &str = "localadmin";

    if state.identity_store.get_identity_raw(LOCALADMIN_ID).await?.is_some() {
        return Ok(());
    }

    let raw_key = generate_key();
    let (stored_key, key_wrap_id) = wrap_for_storage(state, &raw_key)?;
    let identity = Identity {
        client_id: LOCALADMIN_ID.to_string(),
        role: coordinator_protocol::Role::Admin,
        hmac_key: raw_key,
        key_wrap_id,
        allowed_cidrs: Identity::localadmin_cidrs(),
    };
    state.identity_store.create_identity(&identity, &stored_key).await?;

    tracing::warn!(
        hmac_key_base64 = %base64_encode(&raw_key),
        "bootstrapped 'localadmin' identity; save this key, it is only logged once"
    );
    Ok(())
}

fn base64_encode(bytes: &[u8]) -> String {
    use base64::{engine::general_purpose::STANDARD, Engine};
    STANDARD.encode(bytes)
}

#[derive(Debug, thiserror::Error)]
pub enum IdentityError {
    #[error(transparent)]
    Db(#[from] coordinator_db::DbError),
    #[error(transparent)]
    Cipher(#[from] CipherError),
    #[error("stored key is malformed")]
    MalformedKey,
}
