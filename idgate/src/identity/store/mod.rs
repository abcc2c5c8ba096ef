//! User persistence
//!
//! [`IdentityStore`] owns the uniqueness of provider ids: `create`, `update`
//! and `commit_merge` re-check it atomically at write time and report a
//! violation as [`StoreError::Conflict`]. Writes to existing rows are
//! conditional on the row version the caller loaded; a row written in the
//! meantime fails with [`StoreError::Stale`] and nothing is changed. Two
//! implementations are provided:
//! [`MemoryIdentityStore`] for tests and database-less development, and
//! [`PgIdentityStore`] backed by PostgreSQL unique constraints.

mod memory;
mod postgres;

use async_trait::async_trait;
use uuid::Uuid;

pub use memory::MemoryIdentityStore;
pub use postgres::PgIdentityStore;

use super::user::User;
use crate::oauth2::OAuthProvider;

/// Identity persistence errors
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// User does not exist
    #[error("User not found: {0}")]
    NotFound(Uuid),

    /// Provider id already attached to another user
    #[error("{provider} account {provider_id} is attached to another user")]
    Conflict {
        /// Provider whose id collided
        provider: OAuthProvider,
        /// The colliding provider id
        provider_id: String,
    },

    /// Row changed since it was loaded
    #[error("User {0} was modified concurrently")]
    Stale(Uuid),

    /// Database error
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// Persistence of the User aggregate
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait IdentityStore: Send + Sync {
    /// Load a user by id
    ///
    /// # Errors
    ///
    /// Returns `StoreError::Database` if the lookup fails
    async fn find_by_id(&self, id: Uuid) -> Result<Option<User>, StoreError>;

    /// Load the user holding `provider_id` for `provider`
    ///
    /// # Errors
    ///
    /// Returns `StoreError::Database` if the lookup fails
    async fn find_by_provider_id(
        &self,
        provider: OAuthProvider,
        provider_id: &str,
    ) -> Result<Option<User>, StoreError>;

    /// Insert a new user
    ///
    /// # Errors
    ///
    /// Returns `StoreError::Conflict` if one of its provider ids is taken
    async fn create(&self, user: &User) -> Result<(), StoreError>;

    /// Replace a stored user loaded at `user.version`
    ///
    /// The stored version becomes `user.version + 1`.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::NotFound` if the user is gone,
    /// `StoreError::Stale` if it was written since `user` was loaded and
    /// `StoreError::Conflict` if a provider id is held by another user
    async fn update(&self, user: &User) -> Result<(), StoreError>;

    /// Delete a user, returning whether it existed
    ///
    /// # Errors
    ///
    /// Returns `StoreError::Database` if the delete fails
    async fn delete(&self, id: Uuid) -> Result<bool, StoreError>;

    /// Delete `absorbed` and persist `survivor` as one atomic operation
    ///
    /// Both rows must still be at the versions they were loaded at. On any
    /// error neither record is changed.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::NotFound` if either user is missing,
    /// `StoreError::Stale` if either was written since it was loaded and
    /// `StoreError::Conflict` if the survivor's provider ids collide with a
    /// third user
    async fn commit_merge(&self, survivor: &User, absorbed: &User) -> Result<(), StoreError>;

    /// Number of stored users
    ///
    /// # Errors
    ///
    /// Returns `StoreError::Database` if the count fails
    async fn count(&self) -> Result<u64, StoreError>;
}
