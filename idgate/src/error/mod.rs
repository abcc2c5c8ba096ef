//! Error types and error handling

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;
use uuid::Uuid;

use crate::crypto::CryptoError;
use crate::identity::IdentityError;
use crate::oauth2::OAuthError;
use crate::tokens::TokenError;
use crate::whitelist::WhitelistError;

/// Message shown when a provider account belongs to someone else
pub const ALREADY_LINKED_MESSAGE: &str = "This account is already associated with another account";

/// Gateway error type
#[derive(Debug, Error)]
pub enum IdgateError {
    /// Code exchange with the provider failed
    #[error("Provider authentication failed: {0}")]
    ProviderAuth(String),

    /// Profile fetch from the provider failed
    #[error("Provider profile unavailable: {0}")]
    ProviderProfile(String),

    /// Provider account is attached to a different user
    #[error("This account is already associated with another account")]
    AlreadyLinked,

    /// User does not exist
    #[error("User not found: {0}")]
    UserNotFound(Uuid),

    /// Bearer token missing, malformed, expired or wrongly signed
    #[error("Invalid token: {0}")]
    InvalidToken(String),

    /// Authenticated but not allowed
    #[error("Forbidden: {0}")]
    Forbidden(String),

    /// Bad request error
    #[error("Bad request: {0}")]
    BadRequest(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Database error
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Token sealing error
    #[error("Crypto error: {0}")]
    Crypto(#[from] CryptoError),

    /// Server error
    #[error("Server error: {0}")]
    ServerError(String),
}

impl IdgateError {
    /// Stable machine-readable code
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::ProviderAuth(_) => "provider_auth",
            Self::ProviderProfile(_) => "provider_profile",
            Self::AlreadyLinked => "already_linked",
            Self::UserNotFound(_) => "user_not_found",
            Self::InvalidToken(_) => "invalid_token",
            Self::Forbidden(_) => "forbidden",
            Self::BadRequest(_) => "bad_request",
            Self::Config(_) | Self::Database(_) | Self::Crypto(_) | Self::ServerError(_) => {
                "internal"
            }
        }
    }

    /// HTTP status for this error
    #[must_use]
    pub const fn status(&self) -> StatusCode {
        match self {
            Self::ProviderAuth(_) | Self::ProviderProfile(_) => StatusCode::BAD_GATEWAY,
            Self::AlreadyLinked => StatusCode::CONFLICT,
            Self::UserNotFound(_) => StatusCode::NOT_FOUND,
            Self::InvalidToken(_) => StatusCode::UNAUTHORIZED,
            Self::Forbidden(_) => StatusCode::FORBIDDEN,
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::Config(_) | Self::Database(_) | Self::Crypto(_) | Self::ServerError(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    /// Message safe to show to the caller
    #[must_use]
    pub fn public_message(&self) -> String {
        match self {
            Self::Config(_) | Self::Database(_) | Self::Crypto(_) | Self::ServerError(_) => {
                "Internal server error".to_string()
            }
            other => other.to_string(),
        }
    }
}

impl From<OAuthError> for IdgateError {
    fn from(err: OAuthError) -> Self {
        match err {
            OAuthError::UnknownProvider(_) | OAuthError::ProviderNotConfigured(_) => {
                Self::BadRequest(err.to_string())
            }
            OAuthError::InvalidClient(msg) => Self::Config(msg),
            OAuthError::UserInfoFailed(msg) => Self::ProviderProfile(msg),
            OAuthError::TokenExchangeFailed(msg) => Self::ProviderAuth(msg),
        }
    }
}

impl From<IdentityError> for IdgateError {
    fn from(err: IdentityError) -> Self {
        match err {
            IdentityError::AlreadyLinked { .. } => Self::AlreadyLinked,
            IdentityError::UserNotFound(id) => Self::UserNotFound(id),
            IdentityError::Contended(id) => {
                Self::ServerError(format!("User {id} is being modified concurrently"))
            }
            IdentityError::Crypto(e) => Self::Crypto(e),
            IdentityError::Database(e) => Self::Database(e),
        }
    }
}

impl From<WhitelistError> for IdgateError {
    fn from(err: WhitelistError) -> Self {
        match err {
            WhitelistError::Database(e) => Self::Database(e),
        }
    }
}

impl From<TokenError> for IdgateError {
    fn from(err: TokenError) -> Self {
        match err {
            TokenError::Invalid(msg) => Self::InvalidToken(msg),
            TokenError::Signing(e) => Self::ServerError(e.to_string()),
        }
    }
}

impl IntoResponse for IdgateError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(error = %self, "Request failed");
        } else {
            tracing::debug!(error = %self, "Request rejected");
        }

        let body = json!({
            "error": self.code(),
            "message": self.public_message(),
        });
        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::oauth2::OAuthProvider;

    #[test]
    fn test_status_mapping() {
        assert_eq!(
            IdgateError::ProviderAuth("x".into()).status(),
            StatusCode::BAD_GATEWAY
        );
        assert_eq!(IdgateError::AlreadyLinked.status(), StatusCode::CONFLICT);
        assert_eq!(
            IdgateError::InvalidToken("x".into()).status(),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(
            IdgateError::Forbidden("x".into()).status(),
            StatusCode::FORBIDDEN
        );
        assert_eq!(
            IdgateError::UserNotFound(Uuid::nil()).status(),
            StatusCode::NOT_FOUND
        );
    }

    #[test]
    fn test_already_linked_message() {
        let err: IdgateError = IdentityError::AlreadyLinked {
            provider: OAuthProvider::Google,
            provider_id: "77".to_string(),
        }
        .into();
        assert_eq!(err.to_string(), ALREADY_LINKED_MESSAGE);
    }

    #[test]
    fn test_oauth_error_mapping() {
        let err: IdgateError = OAuthError::UserInfoFailed("HTTP 401".into()).into();
        assert!(matches!(err, IdgateError::ProviderProfile(_)));

        let err: IdgateError = OAuthError::UnknownProvider("oidc".into()).into();
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn test_internal_details_hidden() {
        let err = IdgateError::ServerError("pool exhausted".into());
        assert_eq!(err.public_message(), "Internal server error");
        assert_eq!(err.code(), "internal");
    }

    #[tokio::test]
    async fn test_response_body_shape() {
        let response = IdgateError::Forbidden("not whitelisted".into()).into_response();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
    }
}
