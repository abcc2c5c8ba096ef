//! OAuth2 provider implementations
//!
//! Each provider implements [`ProviderStrategy`], the network half of the
//! provider capability: authorization URL, code exchange, profile fetch and
//! display name. Both share [`CodeGrantClient`] for the oauth2 client and
//! HTTP plumbing. Persistence (find, create, link) is provider-agnostic and
//! lives on [`crate::identity::IdentityService`].

pub mod base;
pub mod github;
pub mod google;

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;

pub use base::CodeGrantClient;
pub use github::GitHubProvider;
pub use google::GoogleProvider;

use crate::identity::User;
use crate::oauth2::types::{OAuthConfig, OAuthError, OAuthProvider, ProviderProfile, ProviderToken};

/// Network operations of one OAuth provider
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ProviderStrategy: Send + Sync {
    /// Provider this strategy talks to
    fn provider(&self) -> OAuthProvider;

    /// Authorization URL carrying the encoded state
    fn authorization_url(&self, state: &str) -> String;

    /// Exchange an authorization code for a provider access token
    ///
    /// # Errors
    ///
    /// Returns `OAuthError::TokenExchangeFailed` on non-2xx, a missing
    /// token, a provider error payload or a timeout
    async fn exchange_code(&self, code: &str) -> Result<ProviderToken, OAuthError>;

    /// Fetch and normalize the provider profile
    ///
    /// # Errors
    ///
    /// Returns `OAuthError::UserInfoFailed` on any transport or
    /// authorization failure, including timeouts
    async fn fetch_profile(&self, token: &ProviderToken) -> Result<ProviderProfile, OAuthError>;

    /// Human-readable name for a user; never fails
    fn display_name(&self, user: &User) -> String;
}

/// Configured provider strategies keyed by provider
#[derive(Clone, Default)]
pub struct ProviderRegistry {
    providers: HashMap<OAuthProvider, Arc<dyn ProviderStrategy>>,
}

impl ProviderRegistry {
    /// Create an empty registry
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Build strategies for every configured provider
    ///
    /// # Errors
    ///
    /// Returns error if a configured provider has invalid URLs
    pub fn from_config(config: &OAuthConfig) -> Result<Self, OAuthError> {
        let timeout = config.request_timeout();
        let mut registry = Self::new();

        if let Some(github) = &config.github {
            registry = registry.with_provider(Arc::new(GitHubProvider::new(github, timeout)?));
        }
        if let Some(google) = &config.google {
            registry = registry.with_provider(Arc::new(GoogleProvider::new(google, timeout)?));
        }

        Ok(registry)
    }

    /// Register a strategy, replacing any previous one for the same provider
    #[must_use]
    pub fn with_provider(mut self, strategy: Arc<dyn ProviderStrategy>) -> Self {
        self.providers.insert(strategy.provider(), strategy);
        self
    }

    /// Strategy for `provider`
    ///
    /// # Errors
    ///
    /// Returns `ProviderNotConfigured` if no strategy is registered
    pub fn get(&self, provider: OAuthProvider) -> Result<Arc<dyn ProviderStrategy>, OAuthError> {
        self.providers
            .get(&provider)
            .cloned()
            .ok_or(OAuthError::ProviderNotConfigured(provider))
    }

    /// Providers with a registered strategy
    #[must_use]
    pub fn configured(&self) -> Vec<OAuthProvider> {
        OAuthProvider::ALL
            .into_iter()
            .filter(|p| self.providers.contains_key(p))
            .collect()
    }
}

impl std::fmt::Debug for ProviderRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderRegistry")
            .field("providers", &self.configured())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::oauth2::types::ProviderConfig;

    fn provider_config() -> ProviderConfig {
        ProviderConfig {
            client_id: "id".to_string(),
            client_secret: "secret".to_string(),
            redirect_uri: "http://localhost/callback".to_string(),
            scopes: vec![],
            auth_url: None,
            token_url: None,
            userinfo_url: None,
        }
    }

    #[test]
    fn test_registry_from_config() {
        let config = OAuthConfig {
            github: Some(provider_config()),
            ..OAuthConfig::default()
        };
        let registry = ProviderRegistry::from_config(&config).unwrap();

        assert_eq!(registry.configured(), vec![OAuthProvider::GitHub]);
        assert!(registry.get(OAuthProvider::GitHub).is_ok());
        assert!(matches!(
            registry.get(OAuthProvider::Google),
            Err(OAuthError::ProviderNotConfigured(OAuthProvider::Google))
        ));
    }

    #[test]
    fn test_registry_with_mock_provider() {
        let mut mock = MockProviderStrategy::new();
        mock.expect_provider().return_const(OAuthProvider::Google);
        mock.expect_authorization_url()
            .returning(|state| format!("https://auth.example.com/?state={state}"));

        let registry = ProviderRegistry::new().with_provider(Arc::new(mock));
        let strategy = registry.get(OAuthProvider::Google).unwrap();

        assert_eq!(
            strategy.authorization_url("s"),
            "https://auth.example.com/?state=s"
        );
    }
}
