//! Identity resolution
//!
//! A login either authenticates a provider account (find or create its
//! user), attaches it to the authenticated user, or merges two users that
//! turn out to be the same person. [`IdentityService`] drives these paths;
//! [`merge`] holds the pure field rules and [`store`] the persistence.

pub mod merge;
mod service;
pub mod store;
mod user;

use uuid::Uuid;

pub use merge::{MergePlan, SealedToken};
pub use service::{IdentityService, LinkOutcome};
pub use store::{IdentityStore, MemoryIdentityStore, PgIdentityStore, StoreError};
pub use user::User;

use crate::crypto::CryptoError;
use crate::oauth2::OAuthProvider;

/// Identity resolution errors
#[derive(Debug, thiserror::Error)]
pub enum IdentityError {
    /// Provider account is attached to a different user
    #[error("{provider} account {provider_id} is already associated with another account")]
    AlreadyLinked {
        /// Provider of the contested account
        provider: OAuthProvider,
        /// The contested provider id
        provider_id: String,
    },

    /// User does not exist
    #[error("User not found: {0}")]
    UserNotFound(Uuid),

    /// Writes kept losing to concurrent requests
    #[error("User {0} is being modified concurrently")]
    Contended(Uuid),

    /// Provider token could not be sealed
    #[error("Token sealing failed: {0}")]
    Crypto(#[from] CryptoError),

    /// Persistence failure
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}

impl From<StoreError> for IdentityError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(id) => Self::UserNotFound(id),
            StoreError::Conflict {
                provider,
                provider_id,
            } => Self::AlreadyLinked {
                provider,
                provider_id,
            },
            StoreError::Stale(id) => Self::Contended(id),
            StoreError::Database(e) => Self::Database(e),
        }
    }
}
