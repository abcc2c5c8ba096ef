//! Google OAuth2 provider implementation

use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;

use super::{CodeGrantClient, ProviderStrategy};
use crate::identity::User;
use crate::oauth2::types::{
    OAuthError, OAuthProvider, ProviderConfig, ProviderProfile, ProviderToken,
};

const AUTH_URL: &str = "https://accounts.google.com/o/oauth2/v2/auth";
const TOKEN_URL: &str = "https://oauth2.googleapis.com/token";
const USERINFO_URL: &str = "https://www.googleapis.com/oauth2/v2/userinfo";

/// Google OAuth2 provider
pub struct GoogleProvider {
    grant: CodeGrantClient,
    userinfo_url: String,
}

impl GoogleProvider {
    /// Create a new Google OAuth2 provider
    ///
    /// # Errors
    ///
    /// Returns error if the configuration is invalid
    pub fn new(config: &ProviderConfig, timeout: Duration) -> Result<Self, OAuthError> {
        let grant = CodeGrantClient::new(
            config.auth_url.as_deref().unwrap_or(AUTH_URL),
            config.token_url.as_deref().unwrap_or(TOKEN_URL),
            config,
            &["openid", "email", "profile"],
            timeout,
        )?;

        Ok(Self {
            grant,
            userinfo_url: config
                .userinfo_url
                .clone()
                .unwrap_or_else(|| USERINFO_URL.to_string()),
        })
    }
}

#[async_trait]
impl ProviderStrategy for GoogleProvider {
    fn provider(&self) -> OAuthProvider {
        OAuthProvider::Google
    }

    fn authorization_url(&self, state: &str) -> String {
        self.grant.authorization_url(state)
    }

    async fn exchange_code(&self, code: &str) -> Result<ProviderToken, OAuthError> {
        self.grant.exchange_code(code).await
    }

    async fn fetch_profile(&self, token: &ProviderToken) -> Result<ProviderProfile, OAuthError> {
        let info: GoogleUserInfo = self
            .grant
            .fetch_json(&self.userinfo_url, &token.access_token)
            .await?;

        Ok(ProviderProfile::new(OAuthProvider::Google, info.id)
            .with_email(info.email.unwrap_or_default())
            .with_name(info.name.unwrap_or_default())
            .with_avatar(info.picture.unwrap_or_default())
            .with_token(token.clone()))
    }

    fn display_name(&self, user: &User) -> String {
        [&user.name, &user.google_email, &user.email]
            .into_iter()
            .find(|s| !s.is_empty())
            .cloned()
            .unwrap_or_else(|| "Google user".to_string())
    }
}

/// Google v2 userinfo response
#[derive(Debug, Deserialize)]
struct GoogleUserInfo {
    id: String,
    email: Option<String>,
    name: Option<String>,
    picture: Option<String>,
}
