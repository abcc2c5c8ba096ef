//! OAuth2 `state` parameter payload
//!
//! The state is built by the authorization-URL endpoint, round-tripped
//! unmodified by the provider and parsed exactly once by the orchestrator.
//! Nothing is persisted server-side.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Mode used when the caller did not specify one
pub const DEFAULT_MODE: &str = "auth";

/// Payload carried through the provider's `state` parameter
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OAuthState {
    /// Post-auth redirect target (path on the frontend origin)
    #[serde(default = "default_path")]
    pub path: String,
    /// Pending artifact reference; empty when there is none
    #[serde(default)]
    pub report_id: String,
    /// Set only when an authenticated user is linking a second provider
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<Uuid>,
    /// Presentation passthrough, never used for branching
    #[serde(default = "default_mode")]
    pub mode: String,
    /// Redirect origin override
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub origin: Option<String>,
    /// Signed proof that `user_id` came from that user's own session
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub link_proof: Option<String>,
}

fn default_path() -> String {
    "/".to_string()
}

fn default_mode() -> String {
    DEFAULT_MODE.to_string()
}

impl Default for OAuthState {
    fn default() -> Self {
        Self {
            path: default_path(),
            report_id: String::new(),
            user_id: None,
            mode: default_mode(),
            origin: None,
            link_proof: None,
        }
    }
}

impl OAuthState {
    /// Parse the raw `state` query value
    ///
    /// Malformed input degrades to the default state instead of failing the
    /// flow.
    #[must_use]
    pub fn parse(raw: &str) -> Self {
        match serde_json::from_str::<Self>(raw) {
            Ok(mut state) => {
                if !state.path.starts_with('/') {
                    state.path = format!("/{}", state.path);
                }
                state
            }
            Err(e) => {
                tracing::warn!(error = %e, "Malformed OAuth2 state, using defaults");
                Self::default()
            }
        }
    }

    /// Encode for the provider's `state` parameter
    #[must_use]
    pub fn encode(&self) -> String {
        // Serializing a struct of strings cannot fail
        serde_json::to_string(self).unwrap_or_default()
    }

    /// Whether this callback attaches a provider to an authenticated user
    #[must_use]
    pub const fn is_linking(&self) -> bool {
        self.user_id.is_some()
    }

    /// Pending artifact reference, if any
    #[must_use]
    pub fn report_id(&self) -> Option<&str> {
        Some(self.report_id.as_str()).filter(|id| !id.is_empty())
    }
}
