//! Code-grant plumbing shared by the GitHub and Google strategies
//!
//! [`CodeGrantClient`] owns the `oauth2` client, the scopes to request and the
//! reqwest client used for profile calls. Strategies add only their profile
//! endpoints and JSON shapes.

use chrono::Utc;
use oauth2::basic::BasicClient;
use oauth2::{
    AuthUrl, AuthorizationCode, ClientId, ClientSecret, CsrfToken, RedirectUrl, Scope,
    TokenResponse, TokenUrl,
};
use serde::de::DeserializeOwned;
use std::time::Duration;

use crate::oauth2::http::{build_client, execute};
use crate::oauth2::types::{OAuthError, ProviderClient, ProviderConfig, ProviderToken};

fn invalid(what: &str) -> impl FnOnce(oauth2::url::ParseError) -> OAuthError + '_ {
    move |e| OAuthError::InvalidClient(format!("Invalid {what}: {e}"))
}

/// Authorization-code client for one provider
pub struct CodeGrantClient {
    client: ProviderClient,
    http_client: reqwest::Client,
    scopes: Vec<String>,
}

impl CodeGrantClient {
    /// Register `config` against the given endpoints
    ///
    /// `default_scopes` apply when the configuration lists none. `timeout`
    /// bounds every call made through this client.
    ///
    /// # Errors
    ///
    /// Returns `InvalidClient` if an endpoint or the redirect URI does not
    /// parse, or the HTTP client cannot be built
    pub fn new(
        auth_url: &str,
        token_url: &str,
        config: &ProviderConfig,
        default_scopes: &[&str],
        timeout: Duration,
    ) -> Result<Self, OAuthError> {
        let auth_url = AuthUrl::new(auth_url.to_string()).map_err(invalid("auth URL"))?;
        let token_url = TokenUrl::new(token_url.to_string()).map_err(invalid("token URL"))?;
        let redirect_url =
            RedirectUrl::new(config.redirect_uri.clone()).map_err(invalid("redirect URI"))?;

        let client = BasicClient::new(ClientId::new(config.client_id.clone()))
            .set_client_secret(ClientSecret::new(config.client_secret.clone()))
            .set_auth_uri(auth_url)
            .set_token_uri(token_url)
            .set_redirect_uri(redirect_url);

        let http_client = build_client(timeout)
            .map_err(|e| OAuthError::InvalidClient(format!("HTTP client setup failed: {e}")))?;

        let scopes = if config.scopes.is_empty() {
            default_scopes.iter().map(ToString::to_string).collect()
        } else {
            config.scopes.clone()
        };

        Ok(Self {
            client,
            http_client,
            scopes,
        })
    }

    /// Build the authorization URL carrying `state` verbatim
    ///
    /// The encoded state doubles as the CSRF token; nothing is stored
    /// server-side.
    #[must_use]
    pub fn authorization_url(&self, state: &str) -> String {
        let state = state.to_string();
        let mut builder = self.client.authorize_url(move || CsrfToken::new(state));

        for scope in &self.scopes {
            builder = builder.add_scope(Scope::new(scope.clone()));
        }

        let (url, _csrf) = builder.url();
        url.to_string()
    }

    /// Exchange authorization code for access token
    ///
    /// # Errors
    ///
    /// Returns `TokenExchangeFailed` on a non-2xx response, a provider error
    /// payload, a missing token or a timeout
    pub async fn exchange_code(&self, code: &str) -> Result<ProviderToken, OAuthError> {
        let http_client = self.http_client.clone();
        let token_response = self
            .client
            .exchange_code(AuthorizationCode::new(code.to_string()))
            .request_async(&|request| execute(http_client.clone(), request))
            .await
            .map_err(|e| OAuthError::TokenExchangeFailed(e.to_string()))?;

        let access_token = token_response.access_token().secret().clone();
        if access_token.is_empty() {
            return Err(OAuthError::TokenExchangeFailed(
                "Provider returned an empty access token".to_string(),
            ));
        }

        Ok(ProviderToken {
            access_token,
            expires_at: token_response
                .expires_in()
                .and_then(|d| chrono::Duration::from_std(d).ok())
                .map(|d| Utc::now() + d),
        })
    }

    /// Fetch JSON from a provider API endpoint with the bearer token
    ///
    /// # Errors
    ///
    /// Returns `UserInfoFailed` if the request fails, times out, returns a
    /// non-success status or the body does not parse
    pub async fn fetch_json<T: DeserializeOwned>(
        &self,
        url: &str,
        access_token: &str,
    ) -> Result<T, OAuthError> {
        let response = self
            .http_client
            .get(url)
            .bearer_auth(access_token)
            .header(reqwest::header::ACCEPT, "application/json")
            .send()
            .await
            .map_err(|e| OAuthError::UserInfoFailed(e.to_string()))?;

        if !response.status().is_success() {
            return Err(OAuthError::UserInfoFailed(format!(
                "HTTP {}",
                response.status()
            )));
        }

        response
            .json()
            .await
            .map_err(|e| OAuthError::UserInfoFailed(format!("Failed to parse JSON: {e}")))
    }

    /// Scopes requested in the authorization URL
    #[must_use]
    pub fn scopes(&self) -> &[String] {
        &self.scopes
    }
}
