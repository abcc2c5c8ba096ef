//! Application state
//!
//! Wires configuration, stores and services together. Every field is cheap
//! to clone; handlers receive the whole state through axum's `State`.

use sqlx::postgres::PgPoolOptions;
use std::sync::Arc;

use crate::artifacts::{ArtifactAssociator, NoopAssociator};
use crate::config::IdgateConfig;
use crate::error::IdgateError;
use crate::guard::AccessGuard;
use crate::identity::{
    IdentityService, IdentityStore, MemoryIdentityStore, PgIdentityStore,
};
use crate::oauth2::ProviderRegistry;
use crate::orchestrator::OAuthOrchestrator;
use crate::tokens::TokenService;
use crate::whitelist::{MemoryWhitelistStore, PgWhitelistStore, WhitelistOracle, WhitelistStore};

/// Shared state for the gateway
///
/// # Example
///
/// ```rust,no_run
/// use idgate::{config::IdgateConfig, state::IdgateState};
///
/// # async fn example() -> anyhow::Result<()> {
/// let config = IdgateConfig::load(None)?;
/// let state = IdgateState::from_config(config).await?;
/// let app = idgate::handlers::router(state);
/// # Ok(())
/// # }
/// ```
#[derive(Clone, Debug)]
pub struct IdgateState {
    config: Arc<IdgateConfig>,
    identity: IdentityService,
    oracle: WhitelistOracle,
    tokens: TokenService,
    guard: AccessGuard,
    orchestrator: Arc<OAuthOrchestrator>,
}

impl IdgateState {
    /// Build state from configuration
    ///
    /// Connects to PostgreSQL and runs migrations when `database.url` is
    /// set; otherwise falls back to in-memory stores.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid, the database is
    /// unreachable or a migration fails
    pub async fn from_config(config: IdgateConfig) -> anyhow::Result<Self> {
        config.validate()?;
        let registry = ProviderRegistry::from_config(&config.oauth2)?;

        let (identity_store, whitelist_store): (Arc<dyn IdentityStore>, Arc<dyn WhitelistStore>) =
            if let Some(url) = config.database.url.as_deref() {
                let pool = PgPoolOptions::new()
                    .max_connections(config.database.max_connections)
                    .connect(url)
                    .await?;
                sqlx::migrate!("./migrations").run(&pool).await?;
                tracing::info!("Connected to PostgreSQL, migrations applied");
                (
                    Arc::new(PgIdentityStore::new(pool.clone())),
                    Arc::new(PgWhitelistStore::new(pool)),
                )
            } else {
                tracing::warn!("No database configured, using in-memory stores");
                (
                    Arc::new(MemoryIdentityStore::new()),
                    Arc::new(MemoryWhitelistStore::new()),
                )
            };

        Ok(Self::with_stores(
            config,
            identity_store,
            whitelist_store,
            registry,
            Arc::new(NoopAssociator),
        )?)
    }

    /// Build state over explicit stores and providers
    ///
    /// # Errors
    ///
    /// Returns `Crypto` if the configured encryption key is malformed
    pub fn with_stores(
        config: IdgateConfig,
        identity_store: Arc<dyn IdentityStore>,
        whitelist_store: Arc<dyn WhitelistStore>,
        registry: ProviderRegistry,
        associator: Arc<dyn ArtifactAssociator>,
    ) -> Result<Self, IdgateError> {
        let identity = IdentityService::new(identity_store, config.cipher()?);
        let oracle = WhitelistOracle::new(whitelist_store);
        let tokens = TokenService::new(&config.tokens, oracle.clone());
        let guard = AccessGuard::new(tokens.clone(), oracle.clone(), identity.clone());

        tracing::info!(providers = ?registry.configured(), "Gateway state initialized");
        let orchestrator = OAuthOrchestrator::new(
            registry,
            identity.clone(),
            tokens.clone(),
            associator,
            config.frontend.clone(),
        );

        Ok(Self {
            config: Arc::new(config),
            identity,
            oracle,
            tokens,
            guard,
            orchestrator: Arc::new(orchestrator),
        })
    }

    /// Configuration
    #[must_use]
    pub fn config(&self) -> &IdgateConfig {
        &self.config
    }

    /// Identity service
    #[must_use]
    pub const fn identity(&self) -> &IdentityService {
        &self.identity
    }

    /// Whitelist oracle
    #[must_use]
    pub const fn oracle(&self) -> &WhitelistOracle {
        &self.oracle
    }

    /// Token service
    #[must_use]
    pub const fn tokens(&self) -> &TokenService {
        &self.tokens
    }

    /// Access guard
    #[must_use]
    pub const fn guard(&self) -> &AccessGuard {
        &self.guard
    }

    /// Callback orchestrator
    #[must_use]
    pub fn orchestrator(&self) -> Arc<OAuthOrchestrator> {
        Arc::clone(&self.orchestrator)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> IdgateConfig {
        let mut config = IdgateConfig::default();
        config.tokens.secret = "state-secret".to_string();
        config
    }

    #[tokio::test]
    async fn test_from_config_without_database() {
        let state = IdgateState::from_config(config()).await.unwrap();
        assert_eq!(state.identity().store().count().await.unwrap(), 0);
        assert!(state.oracle().list().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_from_config_rejects_missing_secret() {
        let result = IdgateState::from_config(IdgateConfig::default()).await;
        assert!(result.is_err());
    }

    #[test]
    fn test_clone_shares_config() {
        let state = IdgateState::with_stores(
            config(),
            Arc::new(MemoryIdentityStore::new()),
            Arc::new(MemoryWhitelistStore::new()),
            ProviderRegistry::new(),
            Arc::new(NoopAssociator),
        )
        .unwrap();
        let cloned = state.clone();

        assert!(Arc::ptr_eq(&state.config, &cloned.config));
        assert!(Arc::ptr_eq(&state.orchestrator, &cloned.orchestrator));
    }
}
