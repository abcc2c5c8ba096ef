//! Whitelist persistence
//!
//! Stores hold already-normalized addresses; normalization and validation
//! belong to the oracle.

use async_trait::async_trait;
use parking_lot::RwLock;
use sqlx::PgPool;
use std::collections::BTreeSet;
use std::sync::Arc;

use super::WhitelistError;

/// Persisted allow-list of email addresses
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait WhitelistStore: Send + Sync {
    /// Whether `email` is on the list
    ///
    /// # Errors
    ///
    /// Returns `WhitelistError::Database` if the lookup fails
    async fn contains(&self, email: &str) -> Result<bool, WhitelistError>;

    /// Add `email`, returning `false` if it was already present
    ///
    /// # Errors
    ///
    /// Returns `WhitelistError::Database` if the write fails
    async fn insert(&self, email: &str) -> Result<bool, WhitelistError>;

    /// Remove `email`, returning `false` if it was absent
    ///
    /// # Errors
    ///
    /// Returns `WhitelistError::Database` if the write fails
    async fn remove(&self, email: &str) -> Result<bool, WhitelistError>;

    /// Every entry, sorted
    ///
    /// # Errors
    ///
    /// Returns `WhitelistError::Database` if the query fails
    async fn list(&self) -> Result<Vec<String>, WhitelistError>;
}

/// Whitelist held in process memory
#[derive(Debug, Clone, Default)]
pub struct MemoryWhitelistStore {
    entries: Arc<RwLock<BTreeSet<String>>>,
}

impl MemoryWhitelistStore {
    /// Create an empty whitelist
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl WhitelistStore for MemoryWhitelistStore {
    async fn contains(&self, email: &str) -> Result<bool, WhitelistError> {
        Ok(self.entries.read().contains(email))
    }

    async fn insert(&self, email: &str) -> Result<bool, WhitelistError> {
        Ok(self.entries.write().insert(email.to_string()))
    }

    async fn remove(&self, email: &str) -> Result<bool, WhitelistError> {
        Ok(self.entries.write().remove(email))
    }

    async fn list(&self) -> Result<Vec<String>, WhitelistError> {
        Ok(self.entries.read().iter().cloned().collect())
    }
}

/// Whitelist backed by the `whitelist` table
#[derive(Debug, Clone)]
pub struct PgWhitelistStore {
    pool: PgPool,
}

impl PgWhitelistStore {
    /// Create a store over an existing pool
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl WhitelistStore for PgWhitelistStore {
    async fn contains(&self, email: &str) -> Result<bool, WhitelistError> {
        let found: Option<(String,)> =
            sqlx::query_as("SELECT email FROM whitelist WHERE email = $1")
                .bind(email)
                .fetch_optional(&self.pool)
                .await?;
        Ok(found.is_some())
    }

    async fn insert(&self, email: &str) -> Result<bool, WhitelistError> {
        let result = sqlx::query(
            "INSERT INTO whitelist (email) VALUES ($1) ON CONFLICT (email) DO NOTHING",
        )
        .bind(email)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn remove(&self, email: &str) -> Result<bool, WhitelistError> {
        let result = sqlx::query("DELETE FROM whitelist WHERE email = $1")
            .bind(email)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn list(&self) -> Result<Vec<String>, WhitelistError> {
        let rows: Vec<(String,)> = sqlx::query_as("SELECT email FROM whitelist ORDER BY email")
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.into_iter().map(|(email,)| email).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_memory_store_insert_is_idempotent() {
        let store = MemoryWhitelistStore::new();
        assert!(store.insert("a@x.com").await.unwrap());
        assert!(!store.insert("a@x.com").await.unwrap());
        assert!(store.contains("a@x.com").await.unwrap());
        assert_eq!(store.list().await.unwrap(), vec!["a@x.com"]);
    }

    #[tokio::test]
    async fn test_memory_store_remove() {
        let store = MemoryWhitelistStore::new();
        store.insert("a@x.com").await.unwrap();
        assert!(store.remove("a@x.com").await.unwrap());
        assert!(!store.remove("a@x.com").await.unwrap());
        assert!(!store.contains("a@x.com").await.unwrap());
    }

    #[tokio::test]
    #[ignore = "requires DATABASE_URL"]
    async fn test_pg_store_round_trip() {
        let Ok(url) = std::env::var("DATABASE_URL") else { return };
        let pool = PgPool::connect(&url).await.unwrap();
        sqlx::migrate!("./migrations").run(&pool).await.unwrap();
        let store = PgWhitelistStore::new(pool);
        let email = format!("{}@pg.test", uuid::Uuid::new_v4().simple());

        assert!(store.insert(&email).await.unwrap());
        assert!(!store.insert(&email).await.unwrap());
        assert!(store.contains(&email).await.unwrap());
        assert!(store.remove(&email).await.unwrap());
        assert!(!store.contains(&email).await.unwrap());
    }
}
