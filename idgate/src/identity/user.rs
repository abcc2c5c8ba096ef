//! User aggregate
//!
//! A `User` is the unit of identity: one person, up to one GitHub account and
//! up to one Google account. Provider ids are `Option<String>` so a unique
//! index admits any number of unset values; every other text field uses the
//! empty string as its "unset" sentinel.
//!
//! # Database Schema
//!
//! ```sql
//! CREATE TABLE users (
//!     id UUID PRIMARY KEY,
//!     github_id TEXT,
//!     github_username TEXT NOT NULL DEFAULT '',
//!     google_id TEXT,
//!     google_email TEXT NOT NULL DEFAULT '',
//!     email TEXT NOT NULL DEFAULT '',
//!     emails TEXT[] NOT NULL DEFAULT '{}',
//!     name TEXT NOT NULL DEFAULT '',
//!     avatar_url TEXT NOT NULL DEFAULT '',
//!     admin BOOLEAN NOT NULL DEFAULT FALSE,
//!     github_access_token TEXT,
//!     github_token_expires_at TIMESTAMPTZ,
//!     google_access_token TEXT,
//!     google_token_expires_at TIMESTAMPTZ,
//!     created_at TIMESTAMPTZ NOT NULL,
//!     updated_at TIMESTAMPTZ NOT NULL,
//!     version BIGINT NOT NULL DEFAULT 0,
//!     CONSTRAINT users_github_id_unique UNIQUE (github_id),
//!     CONSTRAINT users_google_id_unique UNIQUE (google_id)
//! );
//! ```

use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::FromRow;
use uuid::Uuid;

use crate::oauth2::OAuthProvider;

/// The identity aggregate
#[derive(Debug, Clone, PartialEq, Eq, Serialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct User {
    /// Stable opaque identifier, never reused
    pub id: Uuid,
    /// GitHub numeric id (unique when present)
    pub github_id: Option<String>,
    /// GitHub login
    pub github_username: String,
    /// Google subject id (unique when present)
    pub google_id: Option<String>,
    /// Email reported by Google
    pub google_email: String,
    /// Primary contact email
    pub email: String,
    /// Every known address, lower-cased and deduplicated
    pub emails: Vec<String>,
    /// Display name
    pub name: String,
    /// Avatar URL
    pub avatar_url: String,
    /// Operator-assigned administrator flag
    pub admin: bool,
    /// Sealed GitHub access token (never serialized)
    #[serde(skip_serializing)]
    pub github_access_token: Option<String>,
    /// GitHub token expiry
    #[serde(skip_serializing)]
    pub github_token_expires_at: Option<DateTime<Utc>>,
    /// Sealed Google access token (never serialized)
    #[serde(skip_serializing)]
    pub google_access_token: Option<String>,
    /// Google token expiry
    #[serde(skip_serializing)]
    pub google_token_expires_at: Option<DateTime<Utc>>,
    /// Creation time; the merge tie-break
    pub created_at: DateTime<Utc>,
    /// Last write time
    pub updated_at: DateTime<Utc>,
    /// Row version; every store write requires the loaded value and bumps it
    #[serde(skip_serializing)]
    pub version: i64,
}

impl User {
    /// Create an empty user with a fresh id
    #[must_use]
    pub fn new(created_at: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            github_id: None,
            github_username: String::new(),
            google_id: None,
            google_email: String::new(),
            email: String::new(),
            emails: Vec::new(),
            name: String::new(),
            avatar_url: String::new(),
            admin: false,
            github_access_token: None,
            github_token_expires_at: None,
            google_access_token: None,
            google_token_expires_at: None,
            created_at,
            updated_at: created_at,
            version: 0,
        }
    }

    /// Provider id held for `provider`, if any
    #[must_use]
    pub fn provider_id(&self, provider: OAuthProvider) -> Option<&str> {
        match provider {
            OAuthProvider::GitHub => self.github_id.as_deref(),
            OAuthProvider::Google => self.google_id.as_deref(),
        }
    }

    /// Providers attached to this user
    #[must_use]
    pub fn linked_providers(&self) -> Vec<OAuthProvider> {
        OAuthProvider::ALL
            .into_iter()
            .filter(|p| self.provider_id(*p).is_some())
            .collect()
    }

    /// Addresses the whitelist is consulted for
    ///
    /// The email set when it is non-empty; otherwise the primary email
    /// followed by the Google email, both tried in that order.
    #[must_use]
    pub fn authorization_emails(&self) -> Vec<&str> {
        if !self.emails.is_empty() {
            return self.emails.iter().map(String::as_str).collect();
        }
        let mut fallback: Vec<&str> = Vec::new();
        for email in [self.email.as_str(), self.google_email.as_str()] {
            if !email.is_empty() && !fallback.contains(&email) {
                fallback.push(email);
            }
        }
        fallback
    }
}
