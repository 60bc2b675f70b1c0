//! Audit trail (`/api/audit`).

use axum::extract::{Query, State};
use axum::{Extension, Json};

use crate::api::error::ApiError;
use crate::api::types::{ApiContext, AuthUser};
use crate::db;
use crate::models::{AuditFilter, AuditRecord, UserRole};

const DEFAULT_LIMIT: i64 = 100;
const MAX_LIMIT: i64 = 1000;

/// `GET /api/audit?user_id=&entity_type=&limit=` — newest first.
pub async fn list(
    State(ctx): State<ApiContext>,
    Extension(auth_user): Extension<AuthUser>,
    Query(mut filter): Query<AuditFilter>,
) -> Result<Json<Vec<AuditRecord>>, ApiError> {
    auth_user.require_any(&[UserRole::SystemAdministrator, UserRole::BranchManager])?;
    filter.limit = Some(filter.limit.unwrap_or(DEFAULT_LIMIT).clamp(1, MAX_LIMIT));

    // Buffered request entries become visible once flushed.
    if let Err(e) = ctx.core.flush_and_prune_audit() {
        tracing::warn!("Audit flush before listing failed: {e}");
    }
    let conn = ctx.core.open_db()?;
    Ok(Json(db::list_audit(&conn, &filter)?))
}
