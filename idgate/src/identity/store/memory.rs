//! In-memory identity store

use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use uuid::Uuid;

use super::{IdentityStore, StoreError};
use crate::identity::user::User;
use crate::oauth2::OAuthProvider;

/// Identity store held in process memory
///
/// Every write runs its version check, uniqueness check and mutation under
/// one write lock.
#[derive(Debug, Clone, Default)]
pub struct MemoryIdentityStore {
    users: Arc<RwLock<HashMap<Uuid, User>>>,
}

impl MemoryIdentityStore {
    /// Create an empty store
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

/// Fail unless `expected` is stored at the version it was loaded at
fn check_version(users: &HashMap<Uuid, User>, expected: &User) -> Result<(), StoreError> {
    match users.get(&expected.id) {
        None => Err(StoreError::NotFound(expected.id)),
        Some(stored) if stored.version != expected.version => Err(StoreError::Stale(expected.id)),
        Some(_) => Ok(()),
    }
}

fn bumped(user: &User) -> User {
    User {
        version: user.version + 1,
        ..user.clone()
    }
}

/// First provider id of `user` held by a user other than those in `ignore`
fn find_conflict(
    users: &HashMap<Uuid, User>,
    user: &User,
    ignore: &[Uuid],
) -> Option<StoreError> {
    OAuthProvider::ALL.into_iter().find_map(|provider| {
        let provider_id = user.provider_id(provider)?;
        users
            .values()
            .filter(|other| !ignore.contains(&other.id))
            .any(|other| other.provider_id(provider) == Some(provider_id))
            .then(|| StoreError::Conflict {
                provider,
                provider_id: provider_id.to_string(),
            })
    })
}

#[async_trait]
impl IdentityStore for MemoryIdentityStore {
    async fn find_by_id(&self, id: Uuid) -> Result<Option<User>, StoreError> {
        Ok(self.users.read().get(&id).cloned())
    }

    async fn find_by_provider_id(
        &self,
        provider: OAuthProvider,
        provider_id: &str,
    ) -> Result<Option<User>, StoreError> {
        Ok(self
            .users
            .read()
            .values()
            .find(|u| u.provider_id(provider) == Some(provider_id))
            .cloned())
    }

    async fn create(&self, user: &User) -> Result<(), StoreError> {
        let mut users = self.users.write();
        if let Some(conflict) = find_conflict(&users, user, &[]) {
            return Err(conflict);
        }
        users.insert(user.id, user.clone());
        Ok(())
    }

    async fn update(&self, user: &User) -> Result<(), StoreError> {
        let mut users = self.users.write();
        check_version(&users, user)?;
        if let Some(conflict) = find_conflict(&users, user, &[user.id]) {
            return Err(conflict);
        }
        users.insert(user.id, bumped(user));
        Ok(())
    }

    async fn delete(&self, id: Uuid) -> Result<bool, StoreError> {
        Ok(self.users.write().remove(&id).is_some())
    }

    async fn commit_merge(&self, survivor: &User, absorbed: &User) -> Result<(), StoreError> {
        let mut users = self.users.write();
        check_version(&users, absorbed)?;
        check_version(&users, survivor)?;
        if let Some(conflict) = find_conflict(&users, survivor, &[survivor.id, absorbed.id]) {
            return Err(conflict);
        }
        users.remove(&absorbed.id);
        users.insert(survivor.id, bumped(survivor));
        Ok(())
    }

    async fn count(&self) -> Result<u64, StoreError> {
        Ok(self.users.read().len() as u64)
    }
}
