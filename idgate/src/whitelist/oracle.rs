//! Whitelist oracle

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use validator::ValidateEmail;

use super::store::WhitelistStore;
use super::WhitelistError;
use crate::identity::merge::normalize_email;
use crate::identity::User;

/// A batch of addresses for administration
///
/// Built from a delimited string (comma, semicolon, whitespace or newline)
/// or from a list. Entries are kept raw; the oracle normalizes them.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(from = "EmailInput")]
pub struct EmailBatch(Vec<String>);

impl EmailBatch {
    /// Split a delimited string into entries
    #[must_use]
    pub fn parse(raw: &str) -> Self {
        Self(
            raw.split(|c: char| c == ',' || c == ';' || c.is_whitespace())
                .filter(|s| !s.is_empty())
                .map(ToString::to_string)
                .collect(),
        )
    }

    /// Raw entries in input order
    #[must_use]
    pub fn entries(&self) -> &[String] {
        &self.0
    }
}

impl From<&str> for EmailBatch {
    fn from(raw: &str) -> Self {
        Self::parse(raw)
    }
}

impl From<Vec<String>> for EmailBatch {
    fn from(list: Vec<String>) -> Self {
        Self(list)
    }
}

/// Wire form of a batch: a delimited string or a JSON list
#[derive(Deserialize)]
#[serde(untagged)]
enum EmailInput {
    Text(String),
    List(Vec<String>),
}

impl From<EmailInput> for EmailBatch {
    fn from(input: EmailInput) -> Self {
        match input {
            EmailInput::Text(raw) => Self::parse(&raw),
            EmailInput::List(list) => Self(list),
        }
    }
}

/// Why an entry was not added
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    /// Already on the whitelist
    AlreadyPresent,
    /// Not a valid email address
    Invalid,
}

/// An entry that was not added
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SkippedEmail {
    /// The entry as given (normalized when possible)
    pub email: String,
    /// Why it was skipped
    pub reason: SkipReason,
}

/// Per-entry result of [`WhitelistOracle::add`]
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct AddReport {
    /// Newly added addresses
    pub added: Vec<String>,
    /// Entries skipped
    pub skipped: Vec<SkippedEmail>,
}

/// Per-entry result of [`WhitelistOracle::remove`]
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoveReport {
    /// Removed addresses
    pub removed: Vec<String>,
    /// Entries that were not on the list
    pub not_found: Vec<String>,
}

/// Answers whether an address, or a user, is authorized
#[derive(Clone)]
pub struct WhitelistOracle {
    store: Arc<dyn WhitelistStore>,
}

impl WhitelistOracle {
    /// Create an oracle over `store`
    #[must_use]
    pub fn new(store: Arc<dyn WhitelistStore>) -> Self {
        Self { store }
    }

    /// Whether `email` is whitelisted; empty input never is
    ///
    /// # Errors
    ///
    /// Returns `WhitelistError::Database` if the lookup fails
    pub async fn is_authorized(&self, email: &str) -> Result<bool, WhitelistError> {
        match normalize_email(email) {
            Some(email) => self.store.contains(&email).await,
            None => Ok(false),
        }
    }

    /// Whether any of `emails` is whitelisted, stopping at the first match
    ///
    /// # Errors
    ///
    /// Returns `WhitelistError::Database` if a lookup fails
    pub async fn is_any_authorized<'a>(
        &self,
        emails: impl IntoIterator<Item = &'a str> + Send,
    ) -> Result<bool, WhitelistError> {
        for email in emails {
            if self.is_authorized(email).await? {
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// Whether any address known for `user` is whitelisted
    ///
    /// # Errors
    ///
    /// Returns `WhitelistError::Database` if a lookup fails
    pub async fn is_user_authorized(&self, user: &User) -> Result<bool, WhitelistError> {
        self.is_any_authorized(user.authorization_emails()).await
    }

    /// Add a batch of addresses
    ///
    /// Invalid entries are reported, never fatal.
    ///
    /// # Errors
    ///
    /// Returns `WhitelistError::Database` if a write fails
    pub async fn add(&self, batch: impl Into<EmailBatch>) -> Result<AddReport, WhitelistError> {
        let mut report = AddReport::default();

        for raw in batch.into().0 {
            let Some(email) = normalize_email(&raw).filter(|e| e.validate_email()) else {
                report.skipped.push(SkippedEmail {
                    email: raw,
                    reason: SkipReason::Invalid,
                });
                continue;
            };

            if self.store.insert(&email).await? {
                report.added.push(email);
            } else {
                report.skipped.push(SkippedEmail {
                    email,
                    reason: SkipReason::AlreadyPresent,
                });
            }
        }

        tracing::info!(
            added = report.added.len(),
            skipped = report.skipped.len(),
            "Whitelist entries added"
        );
        Ok(report)
    }

    /// Remove a batch of addresses
    ///
    /// # Errors
    ///
    /// Returns `WhitelistError::Database` if a write fails
    pub async fn remove(
        &self,
        batch: impl Into<EmailBatch>,
    ) -> Result<RemoveReport, WhitelistError> {
        let mut report = RemoveReport::default();

        for raw in batch.into().0 {
            let email = normalize_email(&raw).unwrap_or(raw);
            if self.store.remove(&email).await? {
                report.removed.push(email);
            } else {
                report.not_found.push(email);
            }
        }

        tracing::info!(
            removed = report.removed.len(),
            not_found = report.not_found.len(),
            "Whitelist entries removed"
        );
        Ok(report)
    }

    /// Every whitelisted address
    ///
    /// # Errors
    ///
    /// Returns `WhitelistError::Database` if the query fails
    pub async fn list(&self) -> Result<Vec<String>, WhitelistError> {
        self.store.list().await
    }
}

impl std::fmt::Debug for WhitelistOracle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WhitelistOracle").finish_non_exhaustive()
    }
}
