//! Testing utilities
//!
//! - [`StaticProvider`]: a provider strategy that answers from fixed profiles
//! - [`TestGateway`]: state over in-memory stores, ready for `axum-test`
//! - [`silent_endpoint`]: a peer that never replies, for timeout paths
//!
//! Unit tests get this module automatically; integration tests and
//! downstream crates enable the `testing` feature.

use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

use crate::artifacts::NoopAssociator;
use crate::config::IdgateConfig;
use crate::identity::{MemoryIdentityStore, User};
use crate::oauth2::{
    OAuthError, OAuthProvider, ProviderProfile, ProviderRegistry, ProviderStrategy, ProviderToken,
};
use crate::state::IdgateState;
use crate::whitelist::MemoryWhitelistStore;

/// Provider strategy keyed by authorization code
///
/// `code` exchanges for `{provider}-token-{code}`, which fetches the profile
/// registered under `code` with that token attached. Unknown codes fail the
/// exchange the way GitHub reports a spent code.
#[derive(Debug, Clone)]
pub struct StaticProvider {
    provider: OAuthProvider,
    profiles: HashMap<String, ProviderProfile>,
}

impl StaticProvider {
    /// Empty strategy for `provider`
    #[must_use]
    pub fn new(provider: OAuthProvider) -> Self {
        Self {
            provider,
            profiles: HashMap::new(),
        }
    }

    /// Empty GitHub strategy
    #[must_use]
    pub fn github() -> Self {
        Self::new(OAuthProvider::GitHub)
    }

    /// Empty Google strategy
    #[must_use]
    pub fn google() -> Self {
        Self::new(OAuthProvider::Google)
    }

    /// Answer `code` with `profile`
    #[must_use]
    pub fn with_profile(mut self, code: &str, profile: ProviderProfile) -> Self {
        self.profiles.insert(code.to_string(), profile);
        self
    }

    fn token_prefix(&self) -> String {
        format!("{}-token-", self.provider)
    }
}

#[async_trait]
impl ProviderStrategy for StaticProvider {
    fn provider(&self) -> OAuthProvider {
        self.provider
    }

    fn authorization_url(&self, state: &str) -> String {
        let state: String = url::form_urlencoded::byte_serialize(state.as_bytes()).collect();
        format!("https://{}.test/authorize?state={state}", self.provider)
    }

    async fn exchange_code(&self, code: &str) -> Result<ProviderToken, OAuthError> {
        if self.profiles.contains_key(code) {
            Ok(ProviderToken {
                access_token: format!("{}{code}", self.token_prefix()),
                expires_at: None,
            })
        } else {
            Err(OAuthError::TokenExchangeFailed("bad_verification_code".to_string()))
        }
    }

    async fn fetch_profile(&self, token: &ProviderToken) -> Result<ProviderProfile, OAuthError> {
        token
            .access_token
            .strip_prefix(&self.token_prefix())
            .and_then(|code| self.profiles.get(code))
            .cloned()
            .map(|profile| profile.with_token(token.clone()))
            .ok_or_else(|| OAuthError::UserInfoFailed("HTTP 401".to_string()))
    }

    fn display_name(&self, user: &User) -> String {
        match self.provider {
            OAuthProvider::GitHub if !user.github_username.is_empty() => {
                user.github_username.clone()
            }
            _ if !user.name.is_empty() => user.name.clone(),
            _ => user.email.clone(),
        }
    }
}

/// Endpoint that accepts connections and never answers
///
/// Returns the base URL and the task holding the connections open; abort it
/// to close them.
///
/// # Panics
///
/// Panics if no local port can be bound
pub async fn silent_endpoint() -> (String, JoinHandle<()>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind local port");
    let addr = listener.local_addr().expect("local addr");
    let task = tokio::spawn(async move {
        let mut held = Vec::new();
        while let Ok((stream, _)) = listener.accept().await {
            held.push(stream);
        }
    });
    (format!("http://{addr}"), task)
}

/// Gateway state over in-memory stores
#[derive(Debug, Clone)]
pub struct TestGateway {
    /// The state to route with
    pub state: IdgateState,
    /// Identity store behind the state
    pub users: MemoryIdentityStore,
}

impl TestGateway {
    /// Signing secret used by every test gateway
    pub const SECRET: &'static str = "test-gateway-secret";

    /// Build a gateway with the given providers
    ///
    /// # Panics
    ///
    /// Panics if the state cannot be built
    #[must_use]
    pub fn new(providers: Vec<StaticProvider>) -> Self {
        let mut config = IdgateConfig::default();
        config.tokens.secret = Self::SECRET.to_string();

        let registry = providers
            .into_iter()
            .fold(ProviderRegistry::new(), |registry, provider| {
                registry.with_provider(Arc::new(provider))
            });
        let users = MemoryIdentityStore::new();
        let state = IdgateState::with_stores(
            config,
            Arc::new(users.clone()),
            Arc::new(MemoryWhitelistStore::new()),
            registry,
            Arc::new(NoopAssociator),
        )
        .expect("test gateway state");

        Self { state, users }
    }

    /// Create a whitelisted user and return a session token for it
    ///
    /// # Panics
    ///
    /// Panics if a store write fails
    pub async fn session_for(&self, email: &str, admin: bool) -> String {
        let mut user = User::new(Utc::now());
        user.email = email.to_string();
        user.emails = vec![email.to_string()];
        user.admin = admin;
        self.state
            .identity()
            .store()
            .create(&user)
            .await
            .expect("create user");
        self.state.oracle().add(email).await.expect("whitelist user");
        self.state.tokens().issue(&user).await.expect("issue token")
    }
}
