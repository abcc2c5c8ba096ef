//! GitHub OAuth2 provider implementation

use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;

use super::{CodeGrantClient, ProviderStrategy};
use crate::identity::User;
use crate::oauth2::types::{
    OAuthError, OAuthProvider, ProviderConfig, ProviderProfile, ProviderToken,
};

const AUTH_URL: &str = "https://github.com/login/oauth/authorize";
const TOKEN_URL: &str = "https://github.com/login/oauth/access_token";
const API_URL: &str = "https://api.github.com";

/// GitHub OAuth2 provider
pub struct GitHubProvider {
    grant: CodeGrantClient,
    api_url: String,
}

impl GitHubProvider {
    /// Create a new GitHub OAuth2 provider
    ///
    /// # Errors
    ///
    /// Returns error if the configuration is invalid
    pub fn new(config: &ProviderConfig, timeout: Duration) -> Result<Self, OAuthError> {
        let grant = CodeGrantClient::new(
            config.auth_url.as_deref().unwrap_or(AUTH_URL),
            config.token_url.as_deref().unwrap_or(TOKEN_URL),
            config,
            &["read:user", "user:email"],
            timeout,
        )?;

        Ok(Self {
            grant,
            api_url: config
                .userinfo_url
                .as_deref()
                .unwrap_or(API_URL)
                .trim_end_matches('/')
                .to_string(),
        })
    }

    async fn fetch_primary_email(&self, access_token: &str) -> Option<String> {
        let url = format!("{}/user/emails", self.api_url);
        match self.grant.fetch_json::<Vec<GitHubEmail>>(&url, access_token).await {
            Ok(emails) => select_email(&emails),
            Err(e) => {
                tracing::debug!(error = %e, "GitHub email list unavailable");
                None
            }
        }
    }
}

#[async_trait]
impl ProviderStrategy for GitHubProvider {
    fn provider(&self) -> OAuthProvider {
        OAuthProvider::GitHub
    }

    fn authorization_url(&self, state: &str) -> String {
        self.grant.authorization_url(state)
    }

    async fn exchange_code(&self, code: &str) -> Result<ProviderToken, OAuthError> {
        self.grant.exchange_code(code).await
    }

    async fn fetch_profile(&self, token: &ProviderToken) -> Result<ProviderProfile, OAuthError> {
        let url = format!("{}/user", self.api_url);
        let github_user: GitHubUser = self.grant.fetch_json(&url, &token.access_token).await?;

        let email = match github_user.email.filter(|e| !e.is_empty()) {
            Some(email) => email,
            None => self
                .fetch_primary_email(&token.access_token)
                .await
                .unwrap_or_default(),
        };

        Ok(
            ProviderProfile::new(OAuthProvider::GitHub, github_user.id.to_string())
                .with_email(email)
                .with_name(github_user.name.unwrap_or_default())
                .with_username(github_user.login)
                .with_avatar(github_user.avatar_url.unwrap_or_default())
                .with_token(token.clone()),
        )
    }

    fn display_name(&self, user: &User) -> String {
        [&user.github_username, &user.name, &user.email]
            .into_iter()
            .find(|s| !s.is_empty())
            .cloned()
            .unwrap_or_else(|| "GitHub user".to_string())
    }
}

/// Pick the address to use from GitHub's email list
///
/// Primary and verified first, then any verified, then the first entry.
fn select_email(emails: &[GitHubEmail]) -> Option<String> {
    emails
        .iter()
        .find(|e| e.primary && e.verified)
        .or_else(|| emails.iter().find(|e| e.verified))
        .or_else(|| emails.first())
        .map(|e| e.email.clone())
}

/// GitHub user response
#[derive(Debug, Deserialize)]
struct GitHubUser {
    id: i64,
    login: String,
    name: Option<String>,
    email: Option<String>,
    avatar_url: Option<String>,
}

/// GitHub email response
#[derive(Debug, Deserialize)]
struct GitHubEmail {
    email: String,
    verified: bool,
    primary: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn config() -> ProviderConfig {
        ProviderConfig {
            client_id: "test-client-id".to_string(),
            client_secret: "test-client-secret".to_string(),
            redirect_uri: "http://localhost:3000/auth/github/callback".to_string(),
            scopes: vec![],
            auth_url: None,
            token_url: None,
            userinfo_url: None,
        }
    }

    fn email(address: &str, primary: bool, verified: bool) -> GitHubEmail {
        GitHubEmail {
            email: address.to_string(),
            verified,
            primary,
        }
    }

    #[test]
    fn test_github_authorization_url() {
        let provider = GitHubProvider::new(&config(), Duration::from_secs(10)).unwrap();
        let auth_url = provider.authorization_url("{}");

        assert!(auth_url.starts_with(AUTH_URL));
        assert!(auth_url.contains("client_id=test-client-id"));
        assert!(auth_url.contains("redirect_uri"));
        assert!(auth_url.contains("scope=read%3Auser+user%3Aemail"));
    }

    #[test]
    fn test_select_email_prefers_primary_verified() {
        let emails = vec![
            email("first@x.com", false, false),
            email("verified@x.com", false, true),
            email("primary@x.com", true, true),
        ];
        assert_eq!(select_email(&emails).as_deref(), Some("primary@x.com"));
    }

    #[test]
    fn test_select_email_falls_back() {
        let emails = vec![
            email("first@x.com", true, false),
            email("verified@x.com", false, true),
        ];
        assert_eq!(select_email(&emails).as_deref(), Some("verified@x.com"));

        let unverified = vec![email("only@x.com", false, false)];
        assert_eq!(select_email(&unverified).as_deref(), Some("only@x.com"));
        assert_eq!(select_email(&[]), None);
    }

    #[test]
    fn test_user_response_parses_null_fields() {
        let user: GitHubUser = serde_json::from_str(
            r#"{"id": 1, "login": "octocat", "name": null, "email": null, "avatar_url": null}"#,
        )
        .unwrap();
        assert_eq!(user.id, 1);
        assert!(user.email.is_none());
    }

    #[test]
    fn test_display_name_order() {
        let provider = GitHubProvider::new(&config(), Duration::from_secs(10)).unwrap();
        let mut user = User::new(Utc::now());
        assert_eq!(provider.display_name(&user), "GitHub user");

        user.email = "a@x.com".to_string();
        assert_eq!(provider.display_name(&user), "a@x.com");

        user.github_username = "octocat".to_string();
        assert_eq!(provider.display_name(&user), "octocat");
    }
}
