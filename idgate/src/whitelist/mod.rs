//! Email whitelist
//!
//! An address on the whitelist is authorized; nothing else is. Entries are
//! stored lower-cased and trimmed and change only through administration.

mod oracle;
mod store;

pub use oracle::{AddReport, EmailBatch, RemoveReport, SkipReason, SkippedEmail, WhitelistOracle};
pub use store::{MemoryWhitelistStore, PgWhitelistStore, WhitelistStore};

/// Whitelist errors
#[derive(Debug, thiserror::Error)]
pub enum WhitelistError {
    /// Database error
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}
