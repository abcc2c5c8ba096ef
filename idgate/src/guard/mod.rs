//! Request authentication and whitelist enforcement
//!
//! Two layers run in order:
//!
//! 1. [`AccessGuard::authenticate`] verifies the bearer token, loads the user
//!    and attaches a [`Principal`] to the request. Requests without a valid
//!    token pass through anonymously.
//! 2. [`AccessGuard::enforce`] decides whether an authenticated principal may
//!    proceed. The token's `whitelisted` claim is trusted when present;
//!    otherwise the whitelist is consulted for every address the principal
//!    is known by.
//!
//! Handlers that need a caller use the [`RequirePrincipal`] or
//! [`RequireAdmin`] extractors.
//!
//! # Example
//!
//! ```rust,ignore
//! use axum::{middleware, routing::get, Router};
//! use idgate::guard::{AccessGuard, RequirePrincipal};
//!
//! async fn me(RequirePrincipal(principal): RequirePrincipal) -> String {
//!     principal.user_id.to_string()
//! }
//!
//! let app = Router::new()
//!     .route("/me", get(me))
//!     .layer(middleware::from_fn_with_state(guard.clone(), AccessGuard::enforce))
//!     .layer(middleware::from_fn_with_state(guard, AccessGuard::authenticate));
//! ```

use axum::{
    extract::{FromRequestParts, Request, State},
    http::{header::AUTHORIZATION, request::Parts, HeaderMap},
    middleware::Next,
    response::{IntoResponse, Response},
};
use uuid::Uuid;

use crate::error::IdgateError;
use crate::identity::{IdentityService, User};
use crate::tokens::TokenService;
use crate::whitelist::WhitelistOracle;

/// The authenticated caller
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Principal {
    /// User id
    pub user_id: Uuid,
    /// Administrator flag
    pub admin: bool,
    /// Primary email
    pub email: String,
    /// Email set
    pub emails: Vec<String>,
    /// Google email, which may be missing from the set
    pub google_email: String,
}

impl Principal {
    /// Build a principal from a stored user
    #[must_use]
    pub fn from_user(user: &User) -> Self {
        Self {
            user_id: user.id,
            admin: user.admin,
            email: user.email.clone(),
            emails: user.emails.clone(),
            google_email: user.google_email.clone(),
        }
    }

    /// Every address the principal is known by, without duplicates
    #[must_use]
    pub fn known_emails(&self) -> Vec<&str> {
        let mut all: Vec<&str> = Vec::new();
        let candidates = self
            .emails
            .iter()
            .map(String::as_str)
            .chain([self.email.as_str(), self.google_email.as_str()]);
        for email in candidates {
            if !email.is_empty() && !all.contains(&email) {
                all.push(email);
            }
        }
        all
    }
}

/// Extract the bearer token from an `Authorization` header
#[must_use]
pub fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    let value = headers.get(AUTHORIZATION)?.to_str().ok()?;
    let (scheme, token) = value.split_once(' ')?;
    let token = token.trim();
    (scheme.eq_ignore_ascii_case("bearer") && !token.is_empty()).then_some(token)
}

/// Outcome of a guard decision
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    /// Request may proceed
    Allow,
    /// Request is refused with a reason
    Deny(String),
}

/// Authentication and whitelist enforcement
#[derive(Clone, Debug)]
pub struct AccessGuard {
    tokens: TokenService,
    oracle: WhitelistOracle,
    identity: IdentityService,
}

impl AccessGuard {
    /// Create a guard
    #[must_use]
    pub const fn new(
        tokens: TokenService,
        oracle: WhitelistOracle,
        identity: IdentityService,
    ) -> Self {
        Self {
            tokens,
            oracle,
            identity,
        }
    }

    /// Resolve the principal for a bearer token, if it is valid
    ///
    /// # Errors
    ///
    /// Returns `IdgateError::Database` if the user lookup fails
    pub async fn principal_for(&self, token: &str) -> Result<Option<Principal>, IdgateError> {
        let Ok(claims) = self.tokens.verify(token) else {
            return Ok(None);
        };
        Ok(self
            .identity
            .store()
            .find_by_id(claims.user_id)
            .await
            .map_err(crate::identity::IdentityError::from)?
            .map(|user| Principal::from_user(&user)))
    }

    /// Decide whether `principal` may proceed
    ///
    /// # Errors
    ///
    /// Returns `IdgateError::Database` if the whitelist lookup fails
    pub async fn authorize(
        &self,
        principal: Option<&Principal>,
        bearer: Option<&str>,
    ) -> Result<Decision, IdgateError> {
        let Some(principal) = principal else {
            return Ok(Decision::Allow);
        };

        let claim = bearer
            .and_then(|token| self.tokens.verify(token).ok())
            .and_then(|claims| claims.whitelisted);

        if let Some(whitelisted) = claim {
            return Ok(if whitelisted {
                Decision::Allow
            } else {
                Decision::Deny("Email address is not whitelisted".to_string())
            });
        }

        let emails = principal.known_emails();
        if emails.is_empty() {
            return Ok(Decision::Deny("No email address on record".to_string()));
        }
        if self.oracle.is_any_authorized(emails).await? {
            Ok(Decision::Allow)
        } else {
            Ok(Decision::Deny("Email address is not whitelisted".to_string()))
        }
    }

    /// Middleware: attach a [`Principal`] for a valid bearer token
    pub async fn authenticate(
        State(guard): State<Self>,
        mut request: Request,
        next: Next,
    ) -> Response {
        let token = bearer_token(request.headers()).map(ToString::to_string);
        if let Some(token) = token {
            match guard.principal_for(&token).await {
                Ok(Some(principal)) => {
                    request.extensions_mut().insert(principal);
                }
                Ok(None) => tracing::debug!("Bearer token rejected"),
                Err(e) => return e.into_response(),
            }
        }
        next.run(request).await
    }

    /// Middleware: refuse principals that are not whitelisted
    pub async fn enforce(State(guard): State<Self>, request: Request, next: Next) -> Response {
        let principal = request.extensions().get::<Principal>().cloned();
        let bearer = bearer_token(request.headers()).map(ToString::to_string);

        match guard.authorize(principal.as_ref(), bearer.as_deref()).await {
            Ok(Decision::Allow) => next.run(request).await,
            Ok(Decision::Deny(reason)) => {
                tracing::info!(
                    user_id = ?principal.map(|p| p.user_id),
                    %reason,
                    "Access denied"
                );
                IdgateError::Forbidden(reason).into_response()
            }
            Err(e) => e.into_response(),
        }
    }
}

/// Extractor requiring an authenticated principal
pub struct RequirePrincipal(pub Principal);

impl<S> FromRequestParts<S> for RequirePrincipal
where
    S: Send + Sync,
{
    type Rejection = IdgateError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<Principal>()
            .cloned()
            .map(Self)
            .ok_or_else(|| IdgateError::InvalidToken("Authentication required".to_string()))
    }
}

/// Extractor yielding the principal when the request carries one
pub struct MaybePrincipal(pub Option<Principal>);

impl<S> FromRequestParts<S> for MaybePrincipal
where
    S: Send + Sync,
{
    type Rejection = std::convert::Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Ok(Self(parts.extensions.get::<Principal>().cloned()))
    }
}

/// Extractor requiring an administrator
pub struct RequireAdmin(pub Principal);

impl<S> FromRequestParts<S> for RequireAdmin
where
    S: Send + Sync,
{
    type Rejection = IdgateError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let RequirePrincipal(principal) = RequirePrincipal::from_request_parts(parts, state).await?;
        if principal.admin {
            Ok(Self(principal))
        } else {
            Err(IdgateError::Forbidden(
                "Administrator access required".to_string(),
            ))
        }
    }
}
