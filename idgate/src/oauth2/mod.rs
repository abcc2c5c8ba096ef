//! OAuth2 provider integration
//!
//! GitHub and Google are supported through the [`ProviderStrategy`] trait.
//! The `state` parameter carries an [`OAuthState`] JSON payload round-tripped
//! by the provider; nothing about an in-flight authorization is stored
//! server-side.

pub mod http;
pub mod providers;
pub mod state;
pub mod types;

pub use providers::{GitHubProvider, GoogleProvider, ProviderRegistry, ProviderStrategy};
pub use state::OAuthState;
pub use types::{
    OAuthConfig, OAuthError, OAuthProvider, ProviderConfig, ProviderProfile, ProviderToken,
};
