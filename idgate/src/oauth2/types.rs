//! Provider identifiers, client registration and normalized profiles

use chrono::{DateTime, Utc};
use oauth2::basic::BasicClient;
use oauth2::{EndpointNotSet, EndpointSet};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

/// oauth2 client with only the authorization and token endpoints set
pub type ProviderClient =
    BasicClient<EndpointSet, EndpointNotSet, EndpointNotSet, EndpointNotSet, EndpointSet>;

/// Identity provider a user can sign in with
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OAuthProvider {
    /// github.com
    GitHub,
    /// accounts.google.com
    Google,
}

impl OAuthProvider {
    /// Every supported provider, in display order
    pub const ALL: [Self; 2] = [Self::GitHub, Self::Google];

    /// Path segment and config key (`github`, `google`)
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::GitHub => "github",
            Self::Google => "google",
        }
    }
}

impl fmt::Display for OAuthProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OAuthProvider {
    type Err = OAuthError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|p| p.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| OAuthError::UnknownProvider(s.to_string()))
    }
}

/// Client registration for one provider
///
/// The endpoint overrides exist for tests and self-hosted deployments; the
/// public endpoints are used when they are absent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    /// Client id issued by the provider
    pub client_id: String,
    /// Client secret issued by the provider
    pub client_secret: String,
    /// Callback URL registered with the provider
    pub redirect_uri: String,
    /// Scopes to request; the provider's defaults when empty
    #[serde(default)]
    pub scopes: Vec<String>,
    /// Authorization endpoint
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth_url: Option<String>,
    /// Token endpoint
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_url: Option<String>,
    /// GitHub API root or Google userinfo endpoint
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub userinfo_url: Option<String>,
}

/// `[oauth2]` configuration section
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OAuthConfig {
    /// GitHub registration; GitHub sign-in is off when absent
    #[serde(skip_serializing_if = "Option::is_none")]
    pub github: Option<ProviderConfig>,
    /// Google registration; Google sign-in is off when absent
    #[serde(skip_serializing_if = "Option::is_none")]
    pub google: Option<ProviderConfig>,
    /// Timeout for each provider HTTP call, in milliseconds
    pub request_timeout_ms: u64,
}

impl OAuthConfig {
    /// Registration for `provider`, if configured
    #[must_use]
    pub const fn provider(&self, provider: OAuthProvider) -> Option<&ProviderConfig> {
        match provider {
            OAuthProvider::GitHub => self.github.as_ref(),
            OAuthProvider::Google => self.google.as_ref(),
        }
    }

    /// Timeout for provider HTTP calls
    #[must_use]
    pub const fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

impl Default for OAuthConfig {
    fn default() -> Self {
        Self {
            github: None,
            google: None,
            request_timeout_ms: 10_000,
        }
    }
}

/// Access token returned by a provider's token endpoint
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderToken {
    /// Access token
    pub access_token: String,
    /// When the token expires, if the provider said so
    pub expires_at: Option<DateTime<Utc>>,
}

/// Normalized user information from an OAuth2 provider
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderProfile {
    /// Provider that produced this profile
    pub provider: OAuthProvider,
    /// Provider-specific user ID
    pub provider_user_id: String,
    /// Primary email address (empty when the provider disclosed none)
    pub email: String,
    /// Login handle (GitHub only; empty otherwise)
    pub username: String,
    /// Display name
    pub name: String,
    /// Avatar/profile picture URL
    pub avatar_url: String,
    /// Provider token obtained during the callback
    pub token: Option<ProviderToken>,
}

impl ProviderProfile {
    /// Create a minimal profile for a provider account
    #[must_use]
    pub fn new(provider: OAuthProvider, provider_user_id: impl Into<String>) -> Self {
        Self {
            provider,
            provider_user_id: provider_user_id.into(),
            email: String::new(),
            username: String::new(),
            name: String::new(),
            avatar_url: String::new(),
            token: None,
        }
    }

    /// Set the primary email
    #[must_use]
    pub fn with_email(mut self, email: impl Into<String>) -> Self {
        self.email = email.into();
        self
    }

    /// Set the login handle
    #[must_use]
    pub fn with_username(mut self, username: impl Into<String>) -> Self {
        self.username = username.into();
        self
    }

    /// Set the display name
    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Set the avatar URL
    #[must_use]
    pub fn with_avatar(mut self, avatar_url: impl Into<String>) -> Self {
        self.avatar_url = avatar_url.into();
        self
    }

    /// Attach the provider token obtained during the exchange
    #[must_use]
    pub fn with_token(mut self, token: ProviderToken) -> Self {
        self.token = Some(token);
        self
    }
}

/// Failures talking to a provider
#[derive(Debug, thiserror::Error)]
pub enum OAuthError {
    /// Path segment names no known provider
    #[error("Unknown OAuth2 provider: {0}")]
    UnknownProvider(String),

    /// Provider known but has no client registration
    #[error("OAuth2 provider not configured: {0}")]
    ProviderNotConfigured(OAuthProvider),

    /// Client registration is unusable (bad URL, HTTP client setup)
    #[error("Invalid OAuth2 client configuration: {0}")]
    InvalidClient(String),

    /// Code exchange rejected or failed in transport
    #[error("Failed to exchange authorization code for token: {0}")]
    TokenExchangeFailed(String),

    /// Profile request rejected, failed or returned an unusable body
    #[error("Failed to fetch user information: {0}")]
    UserInfoFailed(String),
}
