//! API endpoint handlers.
//!
//! One module per resource. Handlers open a connection per request, call
//! into the domain modules and record mutating actions in the audit log.

pub mod appointments;
pub mod audit;
pub mod auth;
pub mod branches;
pub mod health;
pub mod insurance;
pub mod invoices;
pub mod patients;
pub mod reports;
pub mod roles;
pub mod treatments;
pub mod users;

use rusqlite::Connection;
use uuid::Uuid;

use crate::api::error::ApiError;
use crate::api::types::AuthUser;
use crate::db;

/// Parse a path id, rejecting malformed values with 400.
pub(crate) fn parse_id(raw: &str, what: &str) -> Result<Uuid, ApiError> {
    Uuid::parse_str(raw).map_err(|e| ApiError::BadRequest(format!("Invalid {what} ID: {e}")))
}

/// Best-effort audit row for a business mutation.
pub(crate) fn record(
    conn: &Connection,
    auth: &AuthUser,
    action: &str,
    entity_type: &str,
    entity_id: &Uuid,
    details: Option<String>,
) {
    if let Err(e) = db::record_audit(
        conn,
        Some(&auth.user.id),
        action,
        entity_type,
        Some(&entity_id.to_string()),
        details,
    ) {
        tracing::warn!(action, entity_type, "Failed to write audit entry: {e}");
    }
}

/// Trimmed, non-empty required text field.
pub(crate) fn required(value: &str, field: &str) -> Result<String, ApiError> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(ApiError::BadRequest(format!("{field} is required")));
    }
    Ok(trimmed.to_string())
}

/// Blank optional strings become `None`.
pub(crate) fn optional(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}
