//! Identity service: fresh authentication, linking and merge

use chrono::Utc;
use std::future::Future;
use std::sync::Arc;
use uuid::Uuid;

use super::merge::{
    attach_profile, plan_merge, refresh_from_profile, user_from_profile, SealedToken,
};
use super::store::{IdentityStore, StoreError};
use super::user::User;
use super::IdentityError;
use crate::crypto::TokenCipher;
use crate::oauth2::{OAuthProvider, ProviderProfile};

/// Result of attaching a provider account to an authenticated user
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkOutcome {
    /// Account was unattached and is now on the user
    Linked(User),
    /// Account was already on this user; nothing changed
    AlreadyLinked(User),
    /// Account belonged to another user; the two were merged
    Merged {
        /// The surviving user
        user: User,
        /// Id of the deleted user
        absorbed_id: Uuid,
    },
}

impl LinkOutcome {
    /// The user the account now belongs to
    #[must_use]
    pub const fn user(&self) -> &User {
        match self {
            Self::Linked(user) | Self::AlreadyLinked(user) | Self::Merged { user, .. } => user,
        }
    }

    /// Consume the outcome, returning the resulting user
    #[must_use]
    pub fn into_user(self) -> User {
        match self {
            Self::Linked(user) | Self::AlreadyLinked(user) | Self::Merged { user, .. } => user,
        }
    }
}

/// Attempts per operation before giving up on a contended user
const WRITE_ATTEMPTS: usize = 3;

/// Re-run `attempt` from a fresh read while it loses to concurrent writers
async fn retry_contended<T, F, Fut>(mut attempt: F) -> Result<T, IdentityError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, IdentityError>>,
{
    let mut tries = 1;
    loop {
        match attempt().await {
            Err(IdentityError::Contended(id)) if tries < WRITE_ATTEMPTS => {
                tracing::debug!(user_id = %id, tries, "Concurrent write, retrying");
                tries += 1;
            }
            result => return result,
        }
    }
}

/// The stored copy after a successful conditional write
fn committed(mut user: User) -> User {
    user.version += 1;
    user
}

/// Identity resolution over an [`IdentityStore`]
#[derive(Clone)]
pub struct IdentityService {
    store: Arc<dyn IdentityStore>,
    cipher: TokenCipher,
}

impl IdentityService {
    /// Create a service over `store`, sealing provider tokens with `cipher`
    #[must_use]
    pub fn new(store: Arc<dyn IdentityStore>, cipher: TokenCipher) -> Self {
        Self { store, cipher }
    }

    /// Underlying store
    #[must_use]
    pub fn store(&self) -> &Arc<dyn IdentityStore> {
        &self.store
    }

    fn seal(&self, profile: &ProviderProfile) -> Result<Option<SealedToken>, IdentityError> {
        let Some(token) = profile.token.as_ref() else {
            return Ok(None);
        };
        Ok(Some(SealedToken {
            ciphertext: self.cipher.seal(&token.access_token)?,
            expires_at: token.expires_at,
        }))
    }

    /// Load a user by id
    ///
    /// # Errors
    ///
    /// Returns `UserNotFound` if no such user exists
    pub async fn get_user(&self, id: Uuid) -> Result<User, IdentityError> {
        self.store
            .find_by_id(id)
            .await?
            .ok_or(IdentityError::UserNotFound(id))
    }

    /// Find the user holding a provider account
    ///
    /// # Errors
    ///
    /// Returns `Database` if the lookup fails
    pub async fn find_existing_user(
        &self,
        provider: OAuthProvider,
        provider_id: &str,
    ) -> Result<Option<User>, IdentityError> {
        Ok(self.store.find_by_provider_id(provider, provider_id).await?)
    }

    /// Decrypt the stored provider access token of `user`
    ///
    /// # Errors
    ///
    /// Returns `Crypto` if the stored value cannot be opened
    pub fn provider_access_token(
        &self,
        user: &User,
        provider: OAuthProvider,
    ) -> Result<Option<String>, IdentityError> {
        let sealed = match provider {
            OAuthProvider::GitHub => user.github_access_token.as_deref(),
            OAuthProvider::Google => user.google_access_token.as_deref(),
        };
        Ok(sealed.map(|s| self.cipher.open(s)).transpose()?)
    }

    /// Authenticate a provider account, creating its user on first sight
    ///
    /// Idempotent: repeated calls with the same profile return the same
    /// user. A creator that loses the uniqueness race returns the winner.
    ///
    /// # Errors
    ///
    /// Returns `Database` or `Crypto` on infrastructure failure and
    /// `Contended` if concurrent writes keep winning
    pub async fn find_or_create_user(
        &self,
        profile: &ProviderProfile,
    ) -> Result<User, IdentityError> {
        let sealed = self.seal(profile)?;
        retry_contended(|| self.try_find_or_create(profile, sealed.clone())).await
    }

    async fn try_find_or_create(
        &self,
        profile: &ProviderProfile,
        sealed: Option<SealedToken>,
    ) -> Result<User, IdentityError> {
        let provider = profile.provider;
        let provider_id = profile.provider_user_id.as_str();
        let now = Utc::now();

        if let Some(mut user) = self.find_existing_user(provider, provider_id).await? {
            refresh_from_profile(&mut user, profile, sealed, now);
            self.store.update(&user).await?;
            tracing::debug!(user_id = %user.id, %provider, "Existing user authenticated");
            return Ok(committed(user));
        }

        let user = user_from_profile(profile, sealed, now);
        match self.store.create(&user).await {
            Ok(()) => {
                tracing::info!(user_id = %user.id, %provider, "User created");
                Ok(user)
            }
            Err(StoreError::Conflict { .. }) => {
                tracing::debug!(%provider, "Lost creation race, re-reading winner");
                self.find_existing_user(provider, provider_id)
                    .await?
                    .ok_or_else(|| IdentityError::AlreadyLinked {
                        provider,
                        provider_id: provider_id.to_string(),
                    })
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Attach an unattached provider account to `user_id`
    ///
    /// A different account of the same provider already on the user is
    /// replaced together with its username and token.
    ///
    /// # Errors
    ///
    /// Returns `AlreadyLinked` if the account is attached to another user at
    /// write time, `UserNotFound` if the user is gone and `Contended` if
    /// concurrent writes keep winning
    pub async fn link_account(
        &self,
        user_id: Uuid,
        profile: &ProviderProfile,
    ) -> Result<User, IdentityError> {
        let sealed = self.seal(profile)?;
        retry_contended(|| self.try_link(user_id, profile, sealed.clone())).await
    }

    async fn try_link(
        &self,
        user_id: Uuid,
        profile: &ProviderProfile,
        sealed: Option<SealedToken>,
    ) -> Result<User, IdentityError> {
        let mut user = self.get_user(user_id).await?;

        if user
            .provider_id(profile.provider)
            .is_some_and(|id| id != profile.provider_user_id)
        {
            tracing::warn!(
                user_id = %user.id,
                provider = %profile.provider,
                "Replacing previously linked provider account"
            );
            match profile.provider {
                OAuthProvider::GitHub => {
                    user.github_username.clear();
                    user.github_access_token = None;
                    user.github_token_expires_at = None;
                }
                OAuthProvider::Google => {
                    user.google_email.clear();
                    user.google_access_token = None;
                    user.google_token_expires_at = None;
                }
            }
        }

        attach_profile(&mut user, profile, sealed, Utc::now());
        self.store.update(&user).await?;

        tracing::info!(user_id = %user.id, provider = %profile.provider, "Provider account linked");
        Ok(committed(user))
    }

    /// Attach `profile` to the authenticated user `user_id`
    ///
    /// Unattached accounts are linked, accounts already on the user are left
    /// alone and accounts on another user trigger a merge.
    ///
    /// # Errors
    ///
    /// Returns `AlreadyLinked` on a write-time collision and `UserNotFound`
    /// if either user is missing
    pub async fn resolve_link(
        &self,
        user_id: Uuid,
        profile: &ProviderProfile,
    ) -> Result<LinkOutcome, IdentityError> {
        let existing = self
            .find_existing_user(profile.provider, &profile.provider_user_id)
            .await?;

        match existing {
            None => Ok(LinkOutcome::Linked(self.link_account(user_id, profile).await?)),
            Some(user) if user.id == user_id => {
                tracing::debug!(%user_id, provider = %profile.provider, "Account already linked");
                Ok(LinkOutcome::AlreadyLinked(user))
            }
            Some(other) => {
                let (user, absorbed_id) = self.merge_users(user_id, other.id, Some(profile)).await?;
                Ok(LinkOutcome::Merged { user, absorbed_id })
            }
        }
    }

    /// Merge two users into one
    ///
    /// The older user survives whichever side initiated. When `profile` is
    /// given and its account ends up on the survivor, it is applied in the
    /// same write.
    ///
    /// # Errors
    ///
    /// Returns `UserNotFound` if either user is missing, `AlreadyLinked`
    /// if the survivor's accounts collide with a third user and `Contended`
    /// if concurrent writes keep winning
    pub async fn merge_users(
        &self,
        primary_candidate_id: Uuid,
        secondary_id: Uuid,
        profile: Option<&ProviderProfile>,
    ) -> Result<(User, Uuid), IdentityError> {
        let sealed = profile.map(|p| self.seal(p)).transpose()?.flatten();
        let (survivor, absorbed_id) = retry_contended(|| {
            self.try_merge(primary_candidate_id, secondary_id, profile, sealed.clone())
        })
        .await?;

        tracing::info!(
            survivor = %survivor.id,
            absorbed = %absorbed_id,
            initiator = %primary_candidate_id,
            "Users merged"
        );
        Ok((survivor, absorbed_id))
    }

    /// One merge attempt from fresh reads of both users
    ///
    /// The store commits only if neither user was written since these
    /// reads, so nothing a concurrent request committed is dropped.
    async fn try_merge(
        &self,
        primary_candidate_id: Uuid,
        secondary_id: Uuid,
        profile: Option<&ProviderProfile>,
        sealed: Option<SealedToken>,
    ) -> Result<(User, Uuid), IdentityError> {
        let primary = self.get_user(primary_candidate_id).await?;
        let secondary = self.get_user(secondary_id).await?;
        let now = Utc::now();

        let plan = plan_merge(primary, secondary, now);
        let mut survivor = plan.survivor;

        if let Some(profile) = profile {
            if survivor.provider_id(profile.provider) == Some(profile.provider_user_id.as_str()) {
                refresh_from_profile(&mut survivor, profile, sealed, now);
            }
        }

        self.store.commit_merge(&survivor, &plan.absorbed).await?;
        Ok((committed(survivor), plan.absorbed.id))
    }
}

impl std::fmt::Debug for IdentityService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IdentityService").finish_non_exhaustive()
    }
}
