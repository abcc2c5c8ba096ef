//! idgate: OAuth identity gateway
//!
//! Signs users in with GitHub or Google, keeps one identity per person
//! across providers, and issues session tokens that carry a whitelist
//! decision.
//!
//! - **Identity**: fresh sign-in creates or finds a user; linking attaches a
//!   second provider and merges two users when the account already belongs
//!   to someone else. The older user always survives a merge.
//! - **Whitelist**: normalized email addresses; any of a user's addresses
//!   grants access.
//! - **Tokens**: HS256 JWTs with a `whitelisted` claim computed at issuance.
//! - **Guard**: trusts the claim when present, falls back to the whitelist
//!   otherwise.
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use idgate::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = IdgateConfig::load(None)?;
//!     idgate::observability::init(&config.logging)?;
//!
//!     let addr = config.bind_addr()?;
//!     let state = IdgateState::from_config(config).await?;
//!
//!     let listener = tokio::net::TcpListener::bind(addr).await?;
//!     axum::serve(listener, idgate::handlers::router(state)).await?;
//!     Ok(())
//! }
//! ```

pub mod artifacts;
pub mod config;
pub mod crypto;
pub mod error;
pub mod guard;
pub mod handlers;
pub mod identity;
pub mod oauth2;
pub mod observability;
pub mod orchestrator;
pub mod state;
pub mod tokens;
pub mod whitelist;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub mod prelude {
    //! Convenience re-exports for common types and traits
    //!
    //! ```rust
    //! use idgate::prelude::*;
    //! ```

    pub use crate::artifacts::{ArtifactAssociator, ArtifactError, NoopAssociator};
    pub use crate::config::IdgateConfig;
    pub use crate::error::IdgateError;
    pub use crate::guard::{AccessGuard, Principal, RequireAdmin, RequirePrincipal};
    pub use crate::identity::{IdentityService, IdentityStore, LinkOutcome, User};
    pub use crate::oauth2::{
        OAuthProvider, OAuthState, ProviderProfile, ProviderRegistry, ProviderStrategy,
        ProviderToken,
    };
    pub use crate::orchestrator::{CallbackResult, CallbackStage, OAuthOrchestrator};
    pub use crate::state::IdgateState;
    pub use crate::tokens::{AccessClaims, TokenService};
    pub use crate::whitelist::{WhitelistOracle, WhitelistStore};
}
