//! Database pool creation behind a compile-time engine selection.
//!
//! Unlike `sqlx::AnyPool`, concrete pool types are used so `#[derive(FromRow)]`
//! works with custom types. If both `sqlite` and `postgres` are compiled in,
//! `postgres` takes priority.

use thiserror::Error;
use tracing::info;

#[derive(Debug, Error)]
pub enum DbError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("invalid database URL: {0}")]
    InvalidUrl(String),

    #[error("database type {0} not compiled in")]
    NotCompiled(String),

    #[error("stored row failed to decode: {0}")]
    Corrupt(String),

    #[error("stored JSON column failed to decode: {0}")]
    Json(#[from] serde_json::Error),
}

/// Detected database type, derived from the connection URL.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DatabaseType {
    Sqlite,
    Postgres,
}

impl DatabaseType {
    pub fn from_url(url: &str) -> Option<Self> {
        if url.starts_with("sqlite:") {
            return Some(Self::Sqlite);
        }
        if url.starts_with("postgres:") || url.starts_with("postgresql:") {
            return Some(Self::Postgres);
        }
        None
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Sqlite => "SQLite",
            Self::Postgres => "PostgreSQL",
        }
    }
}

#[cfg(all(feature = "postgres", not(feature = "sqlite")))]
pub type DbPool = sqlx::PgPool;
#[cfg(feature = "sqlite")]
pub type DbPool = sqlx::SqlitePool;

#[cfg(all(feature = "postgres", not(feature = "sqlite")))]
pub type DbRow = sqlx::postgres::PgRow;
#[cfg(feature = "sqlite")]
pub type DbRow = sqlx::sqlite::SqliteRow;

#[derive(Debug, Clone)]
pub struct DbConfig {
    pub url: String,
    pub db_type: DatabaseType,
    pub max_connections: u32,
}

impl DbConfig {
    #[cfg(feature = "sqlite")]
    pub fn sqlite(path: impl AsRef<str>) -> Self {
        Self {
            url: format!("sqlite:{}?mode=rwc", path.as_ref()),
            db_type: DatabaseType::Sqlite,
            max_connections: 5,
        }
    }

    #[cfg(feature = "sqlite")]
    pub fn sqlite_memory() -> Self {
        Self {
            url: "sqlite::memory:".to_string(),
            db_type: DatabaseType::Sqlite,
            max_connections: 1,
        }
    }

    #[cfg(feature = "postgres")]
    pub fn postgres(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            db_type: DatabaseType::Postgres,
            max_connections: 10,
        }
    }

    pub fn from_url(url: impl Into<String>) -> Result<Self, DbError> {
        let url = url.into();
        let db_type = DatabaseType::from_url(&url).ok_or_else(|| DbError::InvalidUrl(url.clone()))?;
        let max_connections = match db_type {
            DatabaseType::Sqlite => 5,
            DatabaseType::Postgres => 10,
        };
        Ok(Self {
            url,
            db_type,
            max_connections,
        })
    }

    pub fn with_max_connections(mut self, max: u32) -> Self {
        self.max_connections = max;
        self
    }
}

pub async fn create_pool(config: DbConfig) -> Result<DbPool, DbError> {
    #[cfg(feature = "sqlite")]
    {
        let pool = sqlx::sqlite::SqlitePoolOptions::new()
            .max_connections(config.max_connections)
            .connect(&config.url)
            .await?;
        apply_sqlite_optimizations(&pool).await?;
        info!("connected to {} database", config.db_type.name());
        return Ok(pool);
    }

    #[cfg(all(feature = "postgres", not(feature = "sqlite")))]
    {
        let pool = sqlx::postgres::PgPoolOptions::new()
            .max_connections(config.max_connections)
            .connect(&config.url)
            .await?;
        info!("connected to {} database", config.db_type.name());
        return Ok(pool);
    }

    #[allow(unreachable_code)]
    Err(DbError::NotCompiled("sqlite or postgres".to_string()))
}

#[cfg(feature = "sqlite")]
async fn apply_sqlite_optimizations(pool: &DbPool) -> Result<(), DbError> {
    sqlx::query("PRAGMA journal_mode=WAL").execute(pool).await?;
    sqlx::query("PRAGMA synchronous=NORMAL").execute(pool).await?;
    sqlx::query("PRAGMA foreign_keys=ON").execute(pool).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    #[cfg(feature = "sqlite")]
    async fn sqlite_memory_pool_connects() {
        let pool = create_pool(DbConfig::sqlite_memory()).await;
        assert!(pool.is_ok());
    }
}
