//! PostgreSQL identity store

use async_trait::async_trait;
use sqlx::PgPool;
use uuid::Uuid;

use super::{IdentityStore, StoreError};
use crate::identity::user::User;
use crate::oauth2::OAuthProvider;

const USER_COLUMNS: &str = "id, github_id, github_username, google_id, google_email, email, \
     emails, name, avatar_url, admin, github_access_token, github_token_expires_at, \
     google_access_token, google_token_expires_at, created_at, updated_at, version";

const GITHUB_CONSTRAINT: &str = "users_github_id_unique";
const GOOGLE_CONSTRAINT: &str = "users_google_id_unique";

/// Identity store backed by the `users` table
#[derive(Debug, Clone)]
pub struct PgIdentityStore {
    pool: PgPool,
}

impl PgIdentityStore {
    /// Create a store over an existing pool
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

/// Translate a unique-constraint violation into a provider conflict
fn map_write_error(err: sqlx::Error, user: &User) -> StoreError {
    if let sqlx::Error::Database(db_err) = &err {
        if db_err.is_unique_violation() {
            let provider = match db_err.constraint() {
                Some(GITHUB_CONSTRAINT) => Some(OAuthProvider::GitHub),
                Some(GOOGLE_CONSTRAINT) => Some(OAuthProvider::Google),
                _ => None,
            };
            if let Some(provider) = provider {
                return StoreError::Conflict {
                    provider,
                    provider_id: user.provider_id(provider).unwrap_or_default().to_string(),
                };
            }
        }
    }
    StoreError::Database(err)
}

fn update_query(
    user: &User,
) -> sqlx::query::Query<'_, sqlx::Postgres, sqlx::postgres::PgArguments> {
    sqlx::query(
        r"
        UPDATE users
        SET github_id = $2, github_username = $3, google_id = $4, google_email = $5,
            email = $6, emails = $7, name = $8, avatar_url = $9, admin = $10,
            github_access_token = $11, github_token_expires_at = $12,
            google_access_token = $13, google_token_expires_at = $14,
            updated_at = $15, version = version + 1
        WHERE id = $1 AND version = $16
        ",
    )
    .bind(user.id)
    .bind(&user.github_id)
    .bind(&user.github_username)
    .bind(&user.google_id)
    .bind(&user.google_email)
    .bind(&user.email)
    .bind(&user.emails)
    .bind(&user.name)
    .bind(&user.avatar_url)
    .bind(user.admin)
    .bind(&user.github_access_token)
    .bind(user.github_token_expires_at)
    .bind(&user.google_access_token)
    .bind(user.google_token_expires_at)
    .bind(user.updated_at)
    .bind(user.version)
}

/// Explain a conditional write that matched no row
async fn missed_write<'e, E>(executor: E, id: Uuid) -> StoreError
where
    E: sqlx::PgExecutor<'e>,
{
    let exists = sqlx::query_scalar::<_, bool>("SELECT EXISTS (SELECT 1 FROM users WHERE id = $1)")
        .bind(id)
        .fetch_one(executor)
        .await;
    match exists {
        Ok(true) => StoreError::Stale(id),
        Ok(false) => StoreError::NotFound(id),
        Err(e) => StoreError::Database(e),
    }
}

#[async_trait]
impl IdentityStore for PgIdentityStore {
    async fn find_by_id(&self, id: Uuid) -> Result<Option<User>, StoreError> {
        let user = sqlx::query_as::<_, User>(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(user)
    }

    async fn find_by_provider_id(
        &self,
        provider: OAuthProvider,
        provider_id: &str,
    ) -> Result<Option<User>, StoreError> {
        let column = match provider {
            OAuthProvider::GitHub => "github_id",
            OAuthProvider::Google => "google_id",
        };
        let user = sqlx::query_as::<_, User>(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE {column} = $1"
        ))
        .bind(provider_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(user)
    }

    async fn create(&self, user: &User) -> Result<(), StoreError> {
        sqlx::query(
            r"
            INSERT INTO users (
                id, github_id, github_username, google_id, google_email, email, emails,
                name, avatar_url, admin, github_access_token, github_token_expires_at,
                google_access_token, google_token_expires_at, created_at, updated_at, version
            )
            VALUES (
                $1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17
            )
            ",
        )
        .bind(user.id)
        .bind(&user.github_id)
        .bind(&user.github_username)
        .bind(&user.google_id)
        .bind(&user.google_email)
        .bind(&user.email)
        .bind(&user.emails)
        .bind(&user.name)
        .bind(&user.avatar_url)
        .bind(user.admin)
        .bind(&user.github_access_token)
        .bind(user.github_token_expires_at)
        .bind(&user.google_access_token)
        .bind(user.google_token_expires_at)
        .bind(user.created_at)
        .bind(user.updated_at)
        .bind(user.version)
        .execute(&self.pool)
        .await
        .map_err(|e| map_write_error(e, user))?;
        Ok(())
    }

    async fn update(&self, user: &User) -> Result<(), StoreError> {
        let result = update_query(user)
            .execute(&self.pool)
            .await
            .map_err(|e| map_write_error(e, user))?;

        if result.rows_affected() == 0 {
            return Err(missed_write(&self.pool, user.id).await);
        }
        Ok(())
    }

    async fn delete(&self, id: Uuid) -> Result<bool, StoreError> {
        let result = sqlx::query("DELETE FROM users WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn commit_merge(&self, survivor: &User, absorbed: &User) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await?;

        // The absorbed row must go first so its provider ids are free
        let deleted = sqlx::query("DELETE FROM users WHERE id = $1 AND version = $2")
            .bind(absorbed.id)
            .bind(absorbed.version)
            .execute(&mut *tx)
            .await?;
        if deleted.rows_affected() == 0 {
            return Err(missed_write(&mut *tx, absorbed.id).await);
        }

        let updated = update_query(survivor)
            .execute(&mut *tx)
            .await
            .map_err(|e| map_write_error(e, survivor))?;
        if updated.rows_affected() == 0 {
            return Err(missed_write(&mut *tx, survivor.id).await);
        }

        tx.commit().await?;
        Ok(())
    }

    async fn count(&self) -> Result<u64, StoreError> {
        let count: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM users")
            .fetch_one(&self.pool)
            .await?;
        Ok(u64::try_from(count.0).unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    async fn store() -> Option<PgIdentityStore> {
        let url = std::env::var("DATABASE_URL").ok()?;
        let pool = PgPool::connect(&url).await.ok()?;
        sqlx::migrate!("./migrations").run(&pool).await.ok()?;
        Some(PgIdentityStore::new(pool))
    }

    fn unique_id() -> String {
        Uuid::new_v4().simple().to_string()
    }

    #[tokio::test]
    #[ignore = "requires DATABASE_URL"]
    async fn test_pg_unique_github_id() {
        let Some(store) = store().await else { return };
        let github_id = unique_id();

        let mut first = User::new(Utc::now());
        first.github_id = Some(github_id.clone());
        store.create(&first).await.unwrap();

        let mut second = User::new(Utc::now());
        second.github_id = Some(github_id.clone());
        let result = store.create(&second).await;

        assert!(matches!(
            result,
            Err(StoreError::Conflict { provider: OAuthProvider::GitHub, provider_id }) if provider_id == github_id
        ));
        store.delete(first.id).await.unwrap();
    }

    #[tokio::test]
    #[ignore = "requires DATABASE_URL"]
    async fn test_pg_commit_merge_is_atomic() {
        let Some(store) = store().await else { return };

        let survivor = User::new(Utc::now());
        let mut absorbed = User::new(Utc::now());
        absorbed.google_id = Some(unique_id());
        store.create(&survivor).await.unwrap();
        store.create(&absorbed).await.unwrap();

        let mut merged = survivor.clone();
        merged.google_id = absorbed.google_id.clone();
        merged.emails = vec!["b@x.com".to_string()];
        store.commit_merge(&merged, &absorbed).await.unwrap();

        assert!(store.find_by_id(absorbed.id).await.unwrap().is_none());
        let loaded = store.find_by_id(survivor.id).await.unwrap().unwrap();
        assert_eq!(loaded.google_id, absorbed.google_id);
        assert_eq!(loaded.emails, vec!["b@x.com"]);
        assert_eq!(loaded.version, survivor.version + 1);

        let missing = store.commit_merge(&merged, &User::new(Utc::now())).await;
        assert!(matches!(missing, Err(StoreError::NotFound(_))));

        // `merged` still carries the pre-merge version; the delete of the
        // second absorbed row must roll back with the failed update
        let second = User::new(Utc::now());
        store.create(&second).await.unwrap();
        let stale = store.commit_merge(&merged, &second).await;
        assert!(matches!(stale, Err(StoreError::Stale(id)) if id == survivor.id));
        assert!(store.find_by_id(second.id).await.unwrap().is_some());

        store.delete(survivor.id).await.unwrap();
        store.delete(second.id).await.unwrap();
    }
}
