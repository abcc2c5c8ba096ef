//! Session access tokens
//!
//! Tokens are HS256 JWTs carrying the user's identity and a `whitelisted`
//! claim computed once at issuance. Verification checks signature, issuer
//! and expiry only; the claim is not re-checked against the whitelist, so a
//! revoked address keeps access until its token expires.

use chrono::Utc;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::identity::User;
use crate::whitelist::WhitelistOracle;

/// Token configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TokenConfig {
    /// HS256 signing secret
    pub secret: String,
    /// Token lifetime in seconds
    pub ttl_secs: i64,
    /// `iss` claim
    pub issuer: String,
    /// Base64 32-byte key for sealing provider tokens; derived from
    /// `secret` when unset
    #[serde(skip_serializing_if = "Option::is_none")]
    pub encryption_key: Option<String>,
}

impl Default for TokenConfig {
    fn default() -> Self {
        Self {
            secret: String::new(),
            ttl_secs: 7 * 24 * 60 * 60,
            issuer: "idgate".to_string(),
            encryption_key: None,
        }
    }
}

/// Claims carried by an access token
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccessClaims {
    /// User id
    pub user_id: Uuid,
    /// GitHub id, if linked
    #[serde(default)]
    pub github_id: Option<String>,
    /// GitHub login
    #[serde(default)]
    pub github_username: String,
    /// Google id, if linked
    #[serde(default)]
    pub google_id: Option<String>,
    /// Google email
    #[serde(default)]
    pub google_email: String,
    /// Administrator flag
    #[serde(default)]
    pub admin: bool,
    /// Whitelist decision at issuance; absent on tokens that predate it
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub whitelisted: Option<bool>,
    /// Issued at (unix seconds)
    pub iat: i64,
    /// Expiry (unix seconds)
    pub exp: i64,
    /// Issuer
    pub iss: String,
}

/// Claims of a link proof carried in the OAuth2 state
#[derive(Debug, Clone, Serialize, Deserialize)]
struct LinkClaims {
    sub: Uuid,
    purpose: String,
    exp: i64,
    iss: String,
}

const LINK_PURPOSE: &str = "link";
const LINK_PROOF_TTL_SECS: i64 = 600;

/// Token errors
#[derive(Debug, thiserror::Error)]
pub enum TokenError {
    /// Signature, issuer or expiry check failed
    #[error("Invalid token: {0}")]
    Invalid(String),

    /// Token could not be signed
    #[error("Failed to sign token: {0}")]
    Signing(#[source] jsonwebtoken::errors::Error),
}

/// Issues and verifies access tokens
#[derive(Clone)]
pub struct TokenService {
    encoding: EncodingKey,
    decoding: DecodingKey,
    validation: Validation,
    ttl_secs: i64,
    issuer: String,
    oracle: WhitelistOracle,
}

impl TokenService {
    /// Create a token service
    #[must_use]
    pub fn new(config: &TokenConfig, oracle: WhitelistOracle) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.set_issuer(&[config.issuer.as_str()]);

        Self {
            encoding: EncodingKey::from_secret(config.secret.as_bytes()),
            decoding: DecodingKey::from_secret(config.secret.as_bytes()),
            validation,
            ttl_secs: config.ttl_secs,
            issuer: config.issuer.clone(),
            oracle,
        }
    }

    /// Claims for `user` with the given whitelist decision
    #[must_use]
    pub fn claims_for(&self, user: &User, whitelisted: Option<bool>) -> AccessClaims {
        let now = Utc::now().timestamp();
        AccessClaims {
            user_id: user.id,
            github_id: user.github_id.clone(),
            github_username: user.github_username.clone(),
            google_id: user.google_id.clone(),
            google_email: user.google_email.clone(),
            admin: user.admin,
            whitelisted,
            iat: now,
            exp: now + self.ttl_secs,
            iss: self.issuer.clone(),
        }
    }

    /// Sign arbitrary claims
    ///
    /// # Errors
    ///
    /// Returns `TokenError::Signing` if encoding fails
    pub fn sign(&self, claims: &AccessClaims) -> Result<String, TokenError> {
        encode(&Header::new(Algorithm::HS256), claims, &self.encoding).map_err(|e| {
            tracing::error!("Failed to sign JWT: {e}");
            TokenError::Signing(e)
        })
    }

    /// Issue a token for `user`
    ///
    /// The whitelist is consulted once here. If the lookup fails the claim is
    /// omitted and the guard decides on each request instead.
    ///
    /// # Errors
    ///
    /// Returns `TokenError::Signing` if encoding fails
    pub async fn issue(&self, user: &User) -> Result<String, TokenError> {
        let whitelisted = match self.oracle.is_user_authorized(user).await {
            Ok(decision) => Some(decision),
            Err(e) => {
                tracing::warn!(
                    user_id = %user.id,
                    error = %e,
                    "Whitelist lookup failed, omitting claim"
                );
                None
            }
        };

        let token = self.sign(&self.claims_for(user, whitelisted))?;
        tracing::debug!(user_id = %user.id, ?whitelisted, "Access token issued");
        Ok(token)
    }

    /// Verify a token and return its claims
    ///
    /// # Errors
    ///
    /// Returns `TokenError::Invalid` on a bad signature, wrong issuer or
    /// expiry
    pub fn verify(&self, token: &str) -> Result<AccessClaims, TokenError> {
        decode::<AccessClaims>(token, &self.decoding, &self.validation)
            .map(|data| data.claims)
            .map_err(|e| TokenError::Invalid(e.to_string()))
    }

    /// Sign a short-lived proof that `user_id` requested a link
    ///
    /// # Errors
    ///
    /// Returns `TokenError::Signing` if encoding fails
    pub fn sign_link_proof(&self, user_id: Uuid) -> Result<String, TokenError> {
        let claims = LinkClaims {
            sub: user_id,
            purpose: LINK_PURPOSE.to_string(),
            exp: Utc::now().timestamp() + LINK_PROOF_TTL_SECS,
            iss: self.issuer.clone(),
        };
        encode(&Header::new(Algorithm::HS256), &claims, &self.encoding)
            .map_err(TokenError::Signing)
    }

    /// Whether `proof` is a valid, unexpired link proof for `user_id`
    #[must_use]
    pub fn verify_link_proof(&self, proof: &str, user_id: Uuid) -> bool {
        decode::<LinkClaims>(proof, &self.decoding, &self.validation).is_ok_and(|data| {
            data.claims.sub == user_id && data.claims.purpose == LINK_PURPOSE
        })
    }
}

impl std::fmt::Debug for TokenService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenService")
            .field("ttl_secs", &self.ttl_secs)
            .field("issuer", &self.issuer)
            .finish_non_exhaustive()
    }
}
