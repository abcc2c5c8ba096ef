//! OAuth2 callback orchestration
//!
//! One callback walks `AwaitingCode → TokenExchanged → ProfileFetched →
//! IdentityResolved → TokenIssued → RedirectBuilt`. Any failure stops the
//! walk and produces a redirect to the frontend error page; the browser never
//! sees a raw error response from a callback.

pub mod redirect;

use serde::Deserialize;
use std::sync::Arc;
use tracing::Instrument;
use uuid::Uuid;

use crate::artifacts::{associate_best_effort, ArtifactAssociator};
use crate::error::IdgateError;
use crate::identity::{IdentityService, User};
use crate::oauth2::{OAuthProvider, OAuthState, ProviderRegistry, ProviderStrategy};
use crate::tokens::TokenService;

pub use redirect::{success_location, FrontendConfig, SessionPayload};

/// Progress of a callback through the state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum CallbackStage {
    /// Waiting for the provider's authorization code
    AwaitingCode,
    /// Code exchanged for a provider token
    TokenExchanged,
    /// Provider profile fetched
    ProfileFetched,
    /// Profile resolved to a user (created, linked or merged)
    IdentityResolved,
    /// Session token issued
    TokenIssued,
    /// Success redirect built
    RedirectBuilt,
}

impl CallbackStage {
    /// Stable name for logs
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::AwaitingCode => "awaiting_code",
            Self::TokenExchanged => "token_exchanged",
            Self::ProfileFetched => "profile_fetched",
            Self::IdentityResolved => "identity_resolved",
            Self::TokenIssued => "token_issued",
            Self::RedirectBuilt => "redirect_built",
        }
    }
}

impl std::fmt::Display for CallbackStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Query parameters the provider sends to the callback
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CallbackParams {
    /// Authorization code
    pub code: Option<String>,
    /// Raw state parameter
    pub state: Option<String>,
    /// Provider-reported error, e.g. `access_denied`
    pub error: Option<String>,
    /// Human-readable provider error
    pub error_description: Option<String>,
}

/// Query parameters of the authorization-URL endpoint
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthUrlParams {
    /// Frontend path to return to
    pub from: Option<String>,
    /// Presentation mode passthrough
    pub mode: Option<String>,
    /// Pending artifact id
    pub report_id: Option<String>,
    /// User to link the provider account to
    pub user_id: Option<Uuid>,
    /// Redirect origin override
    pub origin: Option<String>,
}

/// Outcome of one callback
#[derive(Debug, Clone)]
pub struct CallbackResult {
    /// Where to send the browser
    pub location: String,
    /// Last stage reached
    pub stage: CallbackStage,
    /// Resolved user, once identity resolution succeeded
    pub user_id: Option<Uuid>,
    /// Public failure message, if the callback failed
    pub failure: Option<String>,
}

impl CallbackResult {
    /// Whether the callback completed
    #[must_use]
    pub const fn is_success(&self) -> bool {
        self.failure.is_none()
    }
}

struct Progress {
    stage: CallbackStage,
    user_id: Option<Uuid>,
}

impl Progress {
    fn advance(&mut self, stage: CallbackStage) {
        tracing::debug!(from = %self.stage, to = %stage, "Callback advanced");
        self.stage = stage;
    }
}

/// Ties providers, identity resolution and token issuance together per
/// callback
#[derive(Clone)]
pub struct OAuthOrchestrator {
    providers: ProviderRegistry,
    identity: IdentityService,
    tokens: TokenService,
    associator: Arc<dyn ArtifactAssociator>,
    frontend: FrontendConfig,
}

impl OAuthOrchestrator {
    /// Create an orchestrator
    #[must_use]
    pub fn new(
        providers: ProviderRegistry,
        identity: IdentityService,
        tokens: TokenService,
        associator: Arc<dyn ArtifactAssociator>,
        frontend: FrontendConfig,
    ) -> Self {
        Self {
            providers,
            identity,
            tokens,
            associator,
            frontend,
        }
    }

    /// Frontend redirect settings
    #[must_use]
    pub const fn frontend(&self) -> &FrontendConfig {
        &self.frontend
    }

    /// Build the provider authorization URL for a login or link request
    ///
    /// `linking_as` is the authenticated user allowed to link; a `userId`
    /// parameter naming anyone else is rejected. Linking states carry a
    /// signed proof the callback checks before resolving.
    ///
    /// # Errors
    ///
    /// Returns `BadRequest` for an unconfigured provider and `Forbidden` when
    /// `userId` does not match the caller
    pub fn authorization_url(
        &self,
        provider: OAuthProvider,
        params: AuthUrlParams,
        linking_as: Option<Uuid>,
    ) -> Result<String, IdgateError> {
        let strategy = self.providers.get(provider)?;

        let link_proof = match params.user_id {
            None => None,
            Some(user_id) if linking_as == Some(user_id) => {
                Some(self.tokens.sign_link_proof(user_id)?)
            }
            Some(user_id) => {
                tracing::warn!(%user_id, "Link request without a matching session");
                return Err(IdgateError::Forbidden(
                    "Linking requires signing in as that user".to_string(),
                ));
            }
        };

        let mut state = OAuthState {
            report_id: params.report_id.unwrap_or_default(),
            user_id: params.user_id,
            origin: params.origin,
            link_proof,
            ..OAuthState::default()
        };
        if let Some(from) = params.from.filter(|p| !p.is_empty()) {
            state.path = if from.starts_with('/') { from } else { format!("/{from}") };
        }
        if let Some(mode) = params.mode.filter(|m| !m.is_empty()) {
            state.mode = mode;
        }

        tracing::debug!(%provider, linking = state.is_linking(), "Authorization URL built");
        Ok(strategy.authorization_url(&state.encode()))
    }

    /// Run one callback to completion
    ///
    /// Never fails: errors become a redirect to the frontend error page.
    pub async fn handle_callback(
        &self,
        provider: OAuthProvider,
        params: CallbackParams,
    ) -> CallbackResult {
        let state = OAuthState::parse(params.state.as_deref().unwrap_or_default());
        let origin = self.frontend.resolve_origin(state.origin.as_deref()).to_string();
        let span = tracing::info_span!(
            "oauth_callback",
            %provider,
            linking = state.is_linking(),
        );

        let mut progress = Progress {
            stage: CallbackStage::AwaitingCode,
            user_id: None,
        };

        let outcome = self
            .run(provider, &params, &state, &origin, &mut progress)
            .instrument(span.clone())
            .await;

        let _entered = span.enter();
        match outcome {
            Ok(location) => {
                tracing::info!(user_id = ?progress.user_id, "OAuth2 callback completed");
                CallbackResult {
                    location,
                    stage: progress.stage,
                    user_id: progress.user_id,
                    failure: None,
                }
            }
            Err(e) => {
                let message = e.public_message();
                tracing::warn!(stage = %progress.stage, error = %e, "OAuth2 callback failed");
                CallbackResult {
                    location: self.frontend.error_location(&origin, &message),
                    stage: progress.stage,
                    user_id: progress.user_id,
                    failure: Some(message),
                }
            }
        }
    }

    async fn run(
        &self,
        provider: OAuthProvider,
        params: &CallbackParams,
        state: &OAuthState,
        origin: &str,
        progress: &mut Progress,
    ) -> Result<String, IdgateError> {
        if let Some(error) = params.error.as_deref() {
            let detail = params.error_description.as_deref().unwrap_or(error);
            return Err(IdgateError::ProviderAuth(detail.to_string()));
        }
        let code = params
            .code
            .as_deref()
            .filter(|c| !c.is_empty())
            .ok_or_else(|| IdgateError::BadRequest("Missing authorization code".to_string()))?;

        let strategy = self.providers.get(provider)?;
        if let Some(user_id) = state.user_id {
            self.check_link_proof(state, user_id)?;
        }

        let token = strategy.exchange_code(code).await?;
        progress.advance(CallbackStage::TokenExchanged);

        let mut profile = strategy.fetch_profile(&token).await?;
        if profile.token.is_none() {
            profile.token = Some(token.clone());
        }
        progress.advance(CallbackStage::ProfileFetched);

        let (user, linked_account) = match state.user_id {
            Some(user_id) => {
                let outcome = self.identity.resolve_link(user_id, &profile).await?;
                (outcome.into_user(), true)
            }
            None => (self.identity.find_or_create_user(&profile).await?, false),
        };
        progress.user_id = Some(user.id);
        progress.advance(CallbackStage::IdentityResolved);

        let session = self.tokens.issue(&user).await?;
        progress.advance(CallbackStage::TokenIssued);

        if !state.is_linking() {
            associate_best_effort(self.associator.as_ref(), state.report_id(), user.id).await;
        }

        let location = self.redirect_for(
            strategy.as_ref(),
            &user,
            &session,
            linked_account,
            state,
            origin,
            &token.access_token,
        )?;
        progress.advance(CallbackStage::RedirectBuilt);
        Ok(location)
    }

    fn check_link_proof(&self, state: &OAuthState, user_id: Uuid) -> Result<(), IdgateError> {
        let verified = state
            .link_proof
            .as_deref()
            .is_some_and(|proof| self.tokens.verify_link_proof(proof, user_id));
        if verified {
            Ok(())
        } else {
            Err(IdgateError::Forbidden(
                "Linking request could not be verified".to_string(),
            ))
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn redirect_for(
        &self,
        strategy: &dyn ProviderStrategy,
        user: &User,
        session: &str,
        linked_account: bool,
        state: &OAuthState,
        origin: &str,
        provider_token: &str,
    ) -> Result<String, IdgateError> {
        let payload = SessionPayload {
            user,
            display_name: strategy.display_name(user),
            token: session,
            linked_account,
            mode: &state.mode,
            report_id: &state.report_id,
            path: &state.path,
        };
        success_location(origin, provider_token, &payload)
            .map_err(|e| IdgateError::ServerError(format!("Failed to encode user payload: {e}")))
    }
}

impl std::fmt::Debug for OAuthOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OAuthOrchestrator")
            .field("providers", &self.providers)
            .field("frontend", &self.frontend)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::artifacts::{ArtifactError, MockArtifactAssociator, NoopAssociator};
    use crate::crypto::TokenCipher;
    use crate::identity::MemoryIdentityStore;
    use crate::oauth2::providers::MockProviderStrategy;
    use crate::oauth2::{GitHubProvider, OAuthError, ProviderConfig, ProviderProfile, ProviderToken};
    use crate::tokens::TokenConfig;
    use crate::whitelist::{MemoryWhitelistStore, WhitelistOracle};
    use std::collections::HashMap;
    use std::time::Duration;

    struct Harness {
        orchestrator: OAuthOrchestrator,
        identity: IdentityService,
        tokens: TokenService,
    }

    fn github_strategy(profile_id: &'static str, email: &'static str) -> MockProviderStrategy {
        let mut strategy = MockProviderStrategy::new();
        strategy
            .expect_provider()
            .return_const(OAuthProvider::GitHub);
        strategy
            .expect_authorization_url()
            .returning(|state| {
                let state: String =
                    url::form_urlencoded::byte_serialize(state.as_bytes()).collect();
                format!("https://github.com/login/oauth/authorize?state={state}")
            });
        strategy.expect_exchange_code().returning(|code| {
            if code == "bad" {
                Err(OAuthError::TokenExchangeFailed("bad_verification_code".to_string()))
            } else {
                Ok(ProviderToken {
                    access_token: "gho_provider".to_string(),
                    expires_at: None,
                })
            }
        });
        strategy.expect_fetch_profile().returning(move |_| {
            Ok(ProviderProfile::new(OAuthProvider::GitHub, profile_id)
                .with_username("octocat")
                .with_email(email))
        });
        strategy
            .expect_display_name()
            .returning(|user| user.github_username.clone());
        strategy
    }

    async fn harness(
        strategy: impl ProviderStrategy + 'static,
        associator: Arc<dyn ArtifactAssociator>,
    ) -> Harness {
        let oracle = WhitelistOracle::new(Arc::new(MemoryWhitelistStore::new()));
        oracle.add("a@x.com").await.unwrap();
        let identity = IdentityService::new(
            Arc::new(MemoryIdentityStore::new()),
            TokenCipher::derive_from_secret("test"),
        );
        let tokens = TokenService::new(
            &TokenConfig {
                secret: "test-secret".to_string(),
                ..TokenConfig::default()
            },
            oracle,
        );
        let orchestrator = OAuthOrchestrator::new(
            ProviderRegistry::new().with_provider(Arc::new(strategy)),
            identity.clone(),
            tokens.clone(),
            associator,
            FrontendConfig {
                default_origin: "https://app.example.com".to_string(),
                ..FrontendConfig::default()
            },
        );
        Harness {
            orchestrator,
            identity,
            tokens,
        }
    }

    fn callback(code: &str, state: &OAuthState) -> CallbackParams {
        CallbackParams {
            code: Some(code.to_string()),
            state: Some(state.encode()),
            ..CallbackParams::default()
        }
    }

    fn query(location: &str) -> HashMap<String, String> {
        url::Url::parse(location)
            .unwrap()
            .query_pairs()
            .into_owned()
            .collect()
    }

    #[tokio::test]
    async fn test_fresh_auth_reaches_redirect() {
        let h = harness(github_strategy("1", "a@x.com"), Arc::new(NoopAssociator)).await;
        let state = OAuthState {
            path: "/reports".to_string(),
            ..OAuthState::default()
        };

        let result = h
            .orchestrator
            .handle_callback(OAuthProvider::GitHub, callback("code", &state))
            .await;

        assert!(result.is_success());
        assert_eq!(result.stage, CallbackStage::RedirectBuilt);
        assert!(result.location.starts_with("https://app.example.com/reports?"));

        let pairs = query(&result.location);
        assert_eq!(pairs["token"], "gho_provider");
        let user: serde_json::Value = serde_json::from_str(&pairs["user"]).unwrap();
        assert_eq!(user["githubId"], "1");
        assert_eq!(user["displayName"], "octocat");
        assert_eq!(user["linkedAccount"], false);

        let claims = h.tokens.verify(user["token"].as_str().unwrap()).unwrap();
        assert_eq!(Some(claims.user_id), result.user_id);
        assert_eq!(claims.whitelisted, Some(true));
    }

    #[tokio::test]
    async fn test_exchange_failure_redirects_to_error_page() {
        let h = harness(github_strategy("1", "a@x.com"), Arc::new(NoopAssociator)).await;

        let result = h
            .orchestrator
            .handle_callback(OAuthProvider::GitHub, callback("bad", &OAuthState::default()))
            .await;

        assert!(!result.is_success());
        assert_eq!(result.stage, CallbackStage::AwaitingCode);
        assert!(result
            .location
            .starts_with("https://app.example.com/auth/error?message="));
        assert_eq!(h.identity.store().count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_silent_token_endpoint_becomes_error_redirect() {
        let (base, server) = crate::testing::silent_endpoint().await;
        let github = GitHubProvider::new(
            &ProviderConfig {
                client_id: "client".to_string(),
                client_secret: "secret".to_string(),
                redirect_uri: "http://localhost:8080/auth/github/callback".to_string(),
                scopes: vec![],
                auth_url: None,
                token_url: Some(format!("{base}/login/oauth/access_token")),
                userinfo_url: Some(base.clone()),
            },
            Duration::from_millis(200),
        )
        .unwrap();
        let h = harness(github, Arc::new(NoopAssociator)).await;

        let result = h
            .orchestrator
            .handle_callback(OAuthProvider::GitHub, callback("code", &OAuthState::default()))
            .await;
        server.abort();

        assert!(!result.is_success());
        assert_eq!(result.stage, CallbackStage::AwaitingCode);
        assert!(result
            .location
            .starts_with("https://app.example.com/auth/error?message="));
        assert_eq!(h.identity.store().count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_provider_error_param_short_circuits() {
        let mut strategy = MockProviderStrategy::new();
        strategy
            .expect_provider()
            .return_const(OAuthProvider::GitHub);
        strategy.expect_exchange_code().never();
        let h = harness(strategy, Arc::new(NoopAssociator)).await;

        let params = CallbackParams {
            error: Some("access_denied".to_string()),
            ..CallbackParams::default()
        };
        let result = h.orchestrator.handle_callback(OAuthProvider::GitHub, params).await;

        let pairs = query(&result.location);
        assert!(pairs["message"].contains("access_denied"));
    }

    #[tokio::test]
    async fn test_missing_code_is_an_error_redirect() {
        let h = harness(github_strategy("1", "a@x.com"), Arc::new(NoopAssociator)).await;
        let result = h
            .orchestrator
            .handle_callback(OAuthProvider::GitHub, CallbackParams::default())
            .await;

        assert_eq!(
            query(&result.location)["message"],
            "Bad request: Missing authorization code"
        );
    }

    #[tokio::test]
    async fn test_unconfigured_provider_is_an_error_redirect() {
        let h = harness(github_strategy("1", "a@x.com"), Arc::new(NoopAssociator)).await;
        let result = h
            .orchestrator
            .handle_callback(OAuthProvider::Google, callback("code", &OAuthState::default()))
            .await;

        assert!(!result.is_success());
    }

    #[tokio::test]
    async fn test_artifact_associated_on_fresh_auth_only() {
        let mut associator = MockArtifactAssociator::new();
        associator
            .expect_associate()
            .withf(|id, _| id == "r-1")
            .times(1)
            .returning(|id, _| Err(ArtifactError::OwnedElsewhere(id.to_string())));
        let h = harness(github_strategy("1", "a@x.com"), Arc::new(associator)).await;

        let state = OAuthState {
            report_id: "r-1".to_string(),
            ..OAuthState::default()
        };
        let result = h
            .orchestrator
            .handle_callback(OAuthProvider::GitHub, callback("code", &state))
            .await;

        // Association failures never fail the login
        assert!(result.is_success());
    }

    #[tokio::test]
    async fn test_linking_with_valid_proof() {
        let mut associator = MockArtifactAssociator::new();
        associator.expect_associate().never();
        let h = harness(github_strategy("1", "a@x.com"), Arc::new(associator)).await;

        let mut google = ProviderProfile::new(OAuthProvider::Google, "77").with_email("b@x.com");
        google.name = "Ada".to_string();
        let existing = h.identity.find_or_create_user(&google).await.unwrap();

        let url = h
            .orchestrator
            .authorization_url(
                OAuthProvider::GitHub,
                AuthUrlParams {
                    user_id: Some(existing.id),
                    report_id: Some("r-1".to_string()),
                    ..AuthUrlParams::default()
                },
                Some(existing.id),
            )
            .unwrap();
        let raw_state = query(&url)["state"].clone();

        let params = CallbackParams {
            code: Some("code".to_string()),
            state: Some(raw_state),
            ..CallbackParams::default()
        };
        let result = h.orchestrator.handle_callback(OAuthProvider::GitHub, params).await;

        assert!(result.is_success());
        assert_eq!(result.user_id, Some(existing.id));
        let user: serde_json::Value =
            serde_json::from_str(&query(&result.location)["user"]).unwrap();
        assert_eq!(user["linkedAccount"], true);
        assert_eq!(user["githubId"], "1");
        assert_eq!(user["googleId"], "77");
    }

    #[tokio::test]
    async fn test_linking_without_proof_is_rejected() {
        let h = harness(github_strategy("1", "a@x.com"), Arc::new(NoopAssociator)).await;
        let victim = h
            .identity
            .find_or_create_user(&ProviderProfile::new(OAuthProvider::Google, "77"))
            .await
            .unwrap();

        let state = OAuthState {
            user_id: Some(victim.id),
            ..OAuthState::default()
        };
        let result = h
            .orchestrator
            .handle_callback(OAuthProvider::GitHub, callback("code", &state))
            .await;

        assert_eq!(
            query(&result.location)["message"],
            "Forbidden: Linking request could not be verified"
        );
        let victim = h.identity.get_user(victim.id).await.unwrap();
        assert_eq!(victim.github_id, None);
    }

    #[tokio::test]
    async fn test_authorization_url_rejects_foreign_user_id() {
        let h = harness(github_strategy("1", "a@x.com"), Arc::new(NoopAssociator)).await;

        let err = h
            .orchestrator
            .authorization_url(
                OAuthProvider::GitHub,
                AuthUrlParams {
                    user_id: Some(Uuid::new_v4()),
                    ..AuthUrlParams::default()
                },
                None,
            )
            .unwrap_err();
        assert!(matches!(err, IdgateError::Forbidden(_)));
    }

    #[tokio::test]
    async fn test_authorization_url_carries_state() {
        let h = harness(github_strategy("1", "a@x.com"), Arc::new(NoopAssociator)).await;
        let url = h
            .orchestrator
            .authorization_url(
                OAuthProvider::GitHub,
                AuthUrlParams {
                    from: Some("dashboard".to_string()),
                    mode: Some("popup".to_string()),
                    ..AuthUrlParams::default()
                },
                None,
            )
            .unwrap();

        let state = OAuthState::parse(&query(&url)["state"]);
        assert_eq!(state.path, "/dashboard");
        assert_eq!(state.mode, "popup");
        assert!(!state.is_linking());
        assert_eq!(state.link_proof, None);
    }
}
