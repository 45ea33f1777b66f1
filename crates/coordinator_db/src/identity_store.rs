//! Identity store. Keys are persisted wrapped under whichever
//! `coordinator_security::cipher::CipherProvider` produced `key_wrap_id`;
//! this store only moves bytes, it never wraps/unwraps — that happens in
//! the caller (`coordinator_core`), which holds the `CipherRegistry`.

use coordinator_protocol::identity::Role;
use coordinator_protocol::Identity;
use sqlx::FromRow;

use crate::pool::DbPool;
use crate::DbError;

#[derive(FromRow)]
struct IdentityRow {
    client_id: String,
    role: String,
    hmac_key: String,
    key_wrap_id: Option<String>,
    allowed_cidrs: String,
}

fn role_from_str(s: &str) -> Result<Role, DbError> {
    Ok(match s {
        "client" => Role::Client,
        "worker" => Role::Worker,
        "admin" => Role::Admin,
        other => return Err(DbError::Corrupt(format!("unknown role {other:?}"))),
    })
}

/// The identity's `hmac_key` column as stored is whatever the caller handed
/// in — either plaintext hex or a cipher-wrapped string; `key_wrap_id` says
/// which. This function only decodes the row shape, leaving the
/// wrap/unwrap decision to the caller.
fn row_to_identity(row: IdentityRow) -> Result<(Identity, String), DbError> {
    let role = role_from_str(&row.role)?;
    let allowed_cidrs: Vec<ipnet::IpNet> = serde_json::from_str(&row.allowed_cidrs)?;
    let placeholder_key = [0u8; 32];
    Ok((
        Identity {
            client_id: row.client_id,
            role,
            hmac_key: placeholder_key,
            key_wrap_id: row.key_wrap_id,
            allowed_cidrs,
        },
        row.hmac_key,
    ))
}

#[derive(Clone)]
pub struct IdentityStore {
    pool: DbPool,
}

impl IdentityStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    /// Inserts a row with the key stored exactly as given in `stored_key`
    /// (already wrapped, or plaintext hex for a provider-less deployment).
    pub async fn create_identity(&self, identity: &Identity, stored_key: &str) -> Result<(), DbError> {
        sqlx::query(
            r#"
            INSERT INTO identities (client_id, role, hmac_key, key_wrap_id, allowed_cidrs)
            VALUES (?, ?, ?, ?, ?)
            "#,
        )
        .bind(&identity.client_id)
        .bind(identity.role.as_str())
        .bind(stored_key)
        .bind(&identity.key_wrap_id)
        .bind(serde_json::to_string(&identity.allowed_cidrs)?)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Returns the identity shell plus the raw stored key column, so the
    /// caller can unwrap it with the right `CipherProvider`.
    pub async fn get_identity_raw(&self, client_id: &str) -> Result<Option<(Identity, String)>, DbError> {
        let row: Option<IdentityRow> = sqlx::query_as("SELECT * FROM identities WHERE client_id = ?")
            .bind(client_id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(row_to_identity).transpose()
    }

    pub async fn delete_identity(&self, client_id: &str) -> Result<bool, DbError> {
        let rows_affected = sqlx::query("DELETE FROM identities WHERE client_id = ?")
            .bind(client_id)
            .execute(&self.pool)
            .await?
            .rows_affected();
        Ok(rows_affected > 0)
    }

    pub async fn list_identities(&self) -> Result<Vec<(Identity, String)>, DbError> {
        let rows: Vec<IdentityRow> = sqlx::query_as("SELECT * FROM identities ORDER BY client_id")
            .fetch_all(&self.pool)
            .await?;
        rows.into_iter().map(row_to_identity).collect()
    }

    /// Identities whose `key_wrap_id` is not `current_wrap_id` — the
    /// candidate set for a key-rotation sweep. `None` matches rows stored
    /// in plaintext (no cipher provider applied yet).
    pub async fn get_identities_not_using_key(
        &self,
        current_wrap_id: &str,
    ) -> Result<Vec<(Identity, String)>, DbError> {
        let rows: Vec<IdentityRow> = sqlx::query_as(
            "SELECT * FROM identities WHERE key_wrap_id IS NULL OR key_wrap_id != ?",
        )
        .bind(current_wrap_id)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(row_to_identity).collect()
    }

    /// Rewraps a single identity's key under a new provider (used by both
    /// rotation and the one-off re-key admin endpoint).
    pub async fn update_stored_key(
        &self,
        client_id: &str,
        stored_key: &str,
        key_wrap_id: Option<&str>,
    ) -> Result<bool, DbError> {
        let rows_affected = sqlx::query("UPDATE identities SET hmac_key = ?, key_wrap_id = ? WHERE client_id = ?")
            .bind(stored_key)
            .bind(key_wrap_id)
            .bind(client_id)
            .execute(&self.pool)
            .await?
            .rows_affected();
        Ok(rows_affected > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::{create_pool, DbConfig};
    use crate::schema::ensure_schema;

    async fn store() -> IdentityStore {
        let pool = create_pool(DbConfig::sqlite_memory()).await.unwrap();
        ensure_schema(&pool).await.unwrap();
        IdentityStore::new(pool)
    }

    fn sample(client_id: &str) -> Identity {
        Identity {
            client_id: client_id.to_string(),
            role: Role::Client,
            hmac_key: [7u8; 32],
            key_wrap_id: Some("aes-gcm".to_string()),
            allowed_cidrs: Identity::default_cidrs(),
        }
    }

    #[tokio::test]
    async fn create_then_get_round_trips() {
        let store = store().await;
        let identity = sample("alice");
        store.create_identity(&identity, "wrapped-bytes").await.unwrap();

        let (fetched, stored_key) = store.get_identity_raw("alice").await.unwrap().unwrap();
        assert_eq!(fetched.client_id, "alice");
        assert_eq!(fetched.key_wrap_id.as_deref(), Some("aes-gcm"));
        assert_eq!(stored_key, "wrapped-bytes");
    }

    #[tokio::test]
    async fn not_using_key_excludes_current_wrap() {
        let store = store().await;
        store.create_identity(&sample("alice"), "w1").await.unwrap();
        let mut bob = sample("bob");
        bob.key_wrap_id = Some("legacy".to_string());
        store.create_identity(&bob, "w2").await.unwrap();

        let stale = store.get_identities_not_using_key("aes-gcm").await.unwrap();
        assert_eq!(stale.len(), 1);
        assert_eq!(stale[0].0.client_id, "bob");
    }

    #[tokio::test]
    async fn delete_removes_row() {
        let store = store().await;
        store.create_identity(&sample("alice"), "w1").await.unwrap();
        assert!(store.delete_identity("alice").await.unwrap());
        assert!(store.get_identity_raw("alice").await.unwrap().is_none());
    }
}
