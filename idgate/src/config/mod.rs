//! Configuration management
//!
//! Configuration is loaded from multiple sources with clear precedence:
//!
//! 1. Environment variables (highest priority, `IDGATE_` prefix, `__` for nesting)
//! 2. `./config.toml` (development)
//! 3. `~/.config/idgate/config.toml` (user config, XDG)
//! 4. `/etc/idgate/config.toml` (system config)
//! 5. Hardcoded defaults (fallback)
//!
//! An explicit `--config` path replaces steps 2 to 4.
//!
//! Environment variable format: `IDGATE_SECTION__FIELD_NAME`, e.g.
//! `IDGATE_TOKENS__SECRET=...` or `IDGATE_OAUTH2__GITHUB__CLIENT_ID=...`.
//!
//! # Example Configuration
//!
//! ```toml
//! [server]
//! host = "0.0.0.0"
//! port = 8080
//!
//! [database]
//! url = "postgres://idgate@localhost/idgate"
//!
//! [oauth2.github]
//! client_id = "Iv1.abc"
//! client_secret = "..."
//! redirect_uri = "https://api.example.com/auth/github/callback"
//!
//! [tokens]
//! secret = "change-me"
//! ttl_secs = 604800
//!
//! [frontend]
//! default_origin = "https://app.example.com"
//! allowed_origins = ["https://staging.example.com"]
//! ```

use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use crate::crypto::TokenCipher;
use crate::error::IdgateError;
use crate::oauth2::OAuthConfig;
use crate::observability::LoggingSettings;
use crate::orchestrator::FrontendConfig;
use crate::tokens::TokenConfig;

/// Listener settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSettings {
    /// Bind address
    pub host: String,
    /// Bind port
    pub port: u16,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8080,
        }
    }
}

/// Database settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseSettings {
    /// PostgreSQL URL; in-memory stores are used when unset
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    /// Pool size
    pub max_connections: u32,
}

impl Default for DatabaseSettings {
    fn default() -> Self {
        Self {
            url: None,
            max_connections: 10,
        }
    }
}

/// Complete gateway configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct IdgateConfig {
    /// Listener settings
    #[serde(default)]
    pub server: ServerSettings,

    /// Database settings
    #[serde(default)]
    pub database: DatabaseSettings,

    /// OAuth2 provider configuration
    #[serde(default)]
    pub oauth2: OAuthConfig,

    /// Session token settings
    #[serde(default)]
    pub tokens: TokenConfig,

    /// Frontend redirect settings
    #[serde(default)]
    pub frontend: FrontendConfig,

    /// Logging settings
    #[serde(default)]
    pub logging: LoggingSettings,
}

impl IdgateConfig {
    /// Load configuration, optionally from an explicit file
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - Default configuration cannot be serialized to TOML
    /// - A configuration file contains invalid TOML
    /// - Values fail type conversion
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        let mut figment = Figment::new().merge(Toml::string(&toml::to_string(&Self::default())?));

        if let Some(path) = path {
            figment = figment.merge(Toml::file(path));
        } else {
            for candidate in Self::search_paths() {
                if candidate.exists() {
                    figment = figment.merge(Toml::file(&candidate));
                }
            }
        }

        let config: Self = figment
            .merge(Env::prefixed("IDGATE_").split("__").lowercase(true))
            .extract()?;
        Ok(config)
    }

    /// Config files consulted when no explicit path is given, lowest
    /// priority first
    #[must_use]
    pub fn search_paths() -> Vec<PathBuf> {
        vec![
            PathBuf::from("/etc/idgate/config.toml"),
            Self::recommended_path(),
            PathBuf::from("./config.toml"),
        ]
    }

    /// XDG config path for this user
    #[must_use]
    pub fn recommended_path() -> PathBuf {
        dirs::config_dir().map_or_else(
            || PathBuf::from("./config.toml"),
            |config_dir| config_dir.join("idgate").join("config.toml"),
        )
    }

    /// Reject configurations the server cannot run with
    ///
    /// # Errors
    ///
    /// Returns `Config` if the signing secret is empty or the encryption key
    /// is malformed
    pub fn validate(&self) -> Result<(), IdgateError> {
        if self.tokens.secret.trim().is_empty() {
            return Err(IdgateError::Config(
                "tokens.secret must be set (IDGATE_TOKENS__SECRET)".to_string(),
            ));
        }
        if self.tokens.ttl_secs <= 0 {
            return Err(IdgateError::Config("tokens.ttl_secs must be positive".to_string()));
        }
        self.cipher()?;
        Ok(())
    }

    /// Cipher for provider tokens at rest
    ///
    /// # Errors
    ///
    /// Returns `Crypto` if `tokens.encryption_key` is not a base64 32-byte key
    pub fn cipher(&self) -> Result<TokenCipher, IdgateError> {
        match &self.tokens.encryption_key {
            Some(key) => Ok(TokenCipher::from_base64_key(key)?),
            None => Ok(TokenCipher::derive_from_secret(&self.tokens.secret)),
        }
    }

    /// Socket address to bind
    ///
    /// # Errors
    ///
    /// Returns `Config` if `server.host` is not an IP address
    pub fn bind_addr(&self) -> Result<SocketAddr, IdgateError> {
        format!("{}:{}", self.server.host, self.server.port)
            .parse()
            .map_err(|e| IdgateError::Config(format!("invalid server address: {e}")))
    }
}
