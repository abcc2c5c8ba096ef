//! Observability (logging, tracing)
//!
//! Structured logging through `tracing`. Output is pretty in debug builds
//! and JSON in release builds unless the configuration says otherwise.

use serde::{Deserialize, Serialize};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Log output format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human-readable multi-line output
    Pretty,
    /// One JSON object per event
    Json,
}

impl Default for LogFormat {
    fn default() -> Self {
        if cfg!(debug_assertions) {
            Self::Pretty
        } else {
            Self::Json
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSettings {
    /// Output format
    pub format: LogFormat,
    /// Filter directives used when `RUST_LOG` is unset
    pub filter: String,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            format: LogFormat::default(),
            filter: if cfg!(debug_assertions) {
                "info,idgate=debug,tower_http=debug".to_string()
            } else {
                "info".to_string()
            },
        }
    }
}

/// Initialize the tracing subscriber
///
/// `RUST_LOG` takes precedence over `settings.filter`.
///
/// # Errors
///
/// Returns an error if a global subscriber is already installed
///
/// # Example
///
/// ```rust,no_run
/// use idgate::observability::{self, LoggingSettings};
///
/// # fn main() -> anyhow::Result<()> {
/// observability::init(&LoggingSettings::default())?;
/// tracing::info!("Gateway started");
/// # Ok(())
/// # }
/// ```
pub fn init(settings: &LoggingSettings) -> anyhow::Result<()> {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&settings.filter))?;

    let registry = tracing_subscriber::registry().with(env_filter);
    match settings.format {
        LogFormat::Pretty => registry
            .with(tracing_subscriber::fmt::layer().pretty())
            .try_init()?,
        LogFormat::Json => registry
            .with(tracing_subscriber::fmt::layer().json())
            .try_init()?,
    }

    Ok(())
}
