//! Frontend redirects issued at the end of a callback

use serde::{Deserialize, Serialize};
use url::form_urlencoded;

use crate::identity::User;

/// Where callbacks send the browser
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FrontendConfig {
    /// Origin used when the state names none, or an unknown one
    pub default_origin: String,
    /// Origins a state may select
    pub allowed_origins: Vec<String>,
    /// Path of the frontend's error page
    pub error_path: String,
}

impl Default for FrontendConfig {
    fn default() -> Self {
        Self {
            default_origin: "http://localhost:3000".to_string(),
            allowed_origins: Vec::new(),
            error_path: "/auth/error".to_string(),
        }
    }
}

impl FrontendConfig {
    /// Pick the redirect origin for a requested override
    ///
    /// Overrides outside `allowed_origins` fall back to the default.
    #[must_use]
    pub fn resolve_origin(&self, requested: Option<&str>) -> &str {
        let default = self.default_origin.trim_end_matches('/');
        let Some(requested) = requested.map(|o| o.trim_end_matches('/')) else {
            return default;
        };
        if requested == default {
            return default;
        }
        if let Some(allowed) = self
            .allowed_origins
            .iter()
            .map(|o| o.trim_end_matches('/'))
            .find(|o| *o == requested)
        {
            return allowed;
        }
        tracing::warn!(origin = %requested, "Redirect origin not allowed, using default");
        default
    }

    /// Error page location carrying `message`
    #[must_use]
    pub fn error_location(&self, origin: &str, message: &str) -> String {
        with_query(
            &format!("{origin}{}", self.error_path),
            &[("message", message)],
        )
    }
}

/// User payload handed to the frontend after a successful callback
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionPayload<'a> {
    /// Public user fields
    #[serde(flatten)]
    pub user: &'a User,
    /// Name to greet the user with
    pub display_name: String,
    /// Session access token
    pub token: &'a str,
    /// Whether this callback attached a provider to an existing user
    pub linked_account: bool,
    /// Presentation mode from the state
    pub mode: &'a str,
    /// Pending artifact reference from the state
    pub report_id: &'a str,
    /// Redirect path from the state
    pub path: &'a str,
}

/// Success location: `{origin}{path}?token=..&user=..`
///
/// # Errors
///
/// Returns `serde_json::Error` if the payload cannot be serialized
pub fn success_location(
    origin: &str,
    provider_token: &str,
    payload: &SessionPayload<'_>,
) -> Result<String, serde_json::Error> {
    let user = serde_json::to_string(payload)?;
    Ok(with_query(
        &format!("{origin}{}", payload.path),
        &[("token", provider_token), ("user", &user)],
    ))
}

fn with_query(base: &str, pairs: &[(&str, &str)]) -> String {
    let query = form_urlencoded::Serializer::new(String::new())
        .extend_pairs(pairs.iter().copied())
        .finish();
    let separator = if base.contains('?') { '&' } else { '?' };
    format!("{base}{separator}{query}")
}
