//! Whitelist administration handlers
//!
//! Every handler requires an administrator principal.
//!
//! ```rust,ignore
//! let admin_routes = Router::new().route(
//!     "/admin/whitelist",
//!     get(whitelist_admin::list).post(whitelist_admin::add).delete(whitelist_admin::remove),
//! );
//! ```

use axum::{extract::State, Json};
use serde::{Deserialize, Serialize};

use crate::error::IdgateError;
use crate::guard::RequireAdmin;
use crate::state::IdgateState;
use crate::whitelist::{AddReport, EmailBatch, RemoveReport};

/// Request body for add and remove
///
/// `emails` may be a JSON list or a comma, semicolon or whitespace separated
/// string.
#[derive(Debug, Deserialize)]
pub struct WhitelistRequest {
    /// Addresses to add or remove
    pub emails: EmailBatch,
}

/// Response for the list endpoint
#[derive(Debug, Serialize, Deserialize)]
pub struct WhitelistListResponse {
    /// Whitelisted addresses, sorted
    pub emails: Vec<String>,
    /// Number of addresses
    pub total: usize,
}

/// List whitelisted addresses
///
/// # Errors
///
/// Returns `Forbidden` for non-administrators
pub async fn list(
    State(state): State<IdgateState>,
    RequireAdmin(_admin): RequireAdmin,
) -> Result<Json<WhitelistListResponse>, IdgateError> {
    let emails = state.oracle().list().await?;
    Ok(Json(WhitelistListResponse {
        total: emails.len(),
        emails,
    }))
}

/// Add addresses
///
/// # Errors
///
/// Returns `Forbidden` for non-administrators
pub async fn add(
    State(state): State<IdgateState>,
    RequireAdmin(admin): RequireAdmin,
    Json(request): Json<WhitelistRequest>,
) -> Result<Json<AddReport>, IdgateError> {
    tracing::info!(
        admin_id = %admin.user_id,
        count = request.emails.entries().len(),
        "Whitelist add requested"
    );
    Ok(Json(state.oracle().add(request.emails).await?))
}

/// Remove addresses
///
/// Tokens already issued to removed addresses keep their `whitelisted`
/// claim until they expire.
///
/// # Errors
///
/// Returns `Forbidden` for non-administrators
pub async fn remove(
    State(state): State<IdgateState>,
    RequireAdmin(admin): RequireAdmin,
    Json(request): Json<WhitelistRequest>,
) -> Result<Json<RemoveReport>, IdgateError> {
    tracing::info!(
        admin_id = %admin.user_id,
        count = request.emails.entries().len(),
        "Whitelist remove requested"
    );
    Ok(Json(state.oracle().remove(request.emails).await?))
}
