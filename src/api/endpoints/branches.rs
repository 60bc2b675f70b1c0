//! Clinic branches (`/api/branches`).

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::{Extension, Json};
use chrono::Utc;
use serde::Deserialize;
use uuid::Uuid;

use crate::api::endpoints::{optional, parse_id, record, required};
use crate::api::error::ApiError;
use crate::api::types::{ApiContext, AuthUser};
use crate::db;
use crate::models::Branch;

#[derive(Deserialize)]
pub struct BranchQuery {
    #[serde(default)]
    pub include_inactive: bool,
}

/// `GET /api/branches`
pub async fn list(
    State(ctx): State<ApiContext>,
    Extension(auth_user): Extension<AuthUser>,
    Query(query): Query<BranchQuery>,
) -> Result<Json<Vec<Branch>>, ApiError> {
    let conn = ctx.core.open_db()?;
    let include_inactive = query.include_inactive && auth_user.user.role.is_admin();
    Ok(Json(db::list_branches(&conn, include_inactive)?))
}

/// `GET /api/branches/:id`
pub async fn detail(
    State(ctx): State<ApiContext>,
    Extension(_auth_user): Extension<AuthUser>,
    Path(id): Path<String>,
) -> Result<Json<Branch>, ApiError> {
    let id = parse_id(&id, "branch")?;
    let conn = ctx.core.open_db()?;
    let branch = db::get_branch(&conn, &id)?
        .ok_or_else(|| ApiError::NotFound("Branch not found".into()))?;
    Ok(Json(branch))
}

#[derive(Deserialize)]
pub struct BranchInput {
    pub name: String,
    pub address: String,
    pub phone: Option<String>,
    pub email: Option<String>,
}

fn validated_email(email: Option<String>) -> Result<Option<String>, ApiError> {
    match optional(email) {
        Some(e) if !e.contains('@') => Err(ApiError::BadRequest("Invalid branch email".into())),
        other => Ok(other),
    }
}

/// `POST /api/branches`
pub async fn create(
    State(ctx): State<ApiContext>,
    Extension(auth_user): Extension<AuthUser>,
    Json(input): Json<BranchInput>,
) -> Result<(StatusCode, Json<Branch>), ApiError> {
    auth_user.require_admin()?;
    let now = Utc::now();
    let branch = Branch {
        id: Uuid::new_v4(),
        name: required(&input.name, "name")?,
        address: required(&input.address, "address")?,
        phone: optional(input.phone),
        email: validated_email(input.email)?,
        is_active: true,
        created_at: now,
        updated_at: now,
    };
    let conn = ctx.core.open_db()?;
    db::insert_branch(&conn, &branch)?;
    record(&conn, &auth_user, "create", "branch", &branch.id, Some(branch.name.clone()));
    tracing::info!(branch_id = %branch.id, "Branch created");
    Ok((StatusCode::CREATED, Json(branch)))
}

/// `PUT /api/branches/:id`
pub async fn update(
    State(ctx): State<ApiContext>,
    Extension(auth_user): Extension<AuthUser>,
    Path(id): Path<String>,
    Json(input): Json<BranchInput>,
) -> Result<Json<Branch>, ApiError> {
    auth_user.require_admin()?;
    let id = parse_id(&id, "branch")?;
    let conn = ctx.core.open_db()?;
    let mut branch = db::get_branch(&conn, &id)?
        .ok_or_else(|| ApiError::NotFound("Branch not found".into()))?;
    branch.name = required(&input.name, "name")?;
    branch.address = required(&input.address, "address")?;
    branch.phone = optional(input.phone);
    branch.email = validated_email(input.email)?;
    db::update_branch(&conn, &branch)?;
    record(&conn, &auth_user, "update", "branch", &branch.id, None);
    Ok(Json(branch))
}

/// `DELETE /api/branches/:id` — refused while active staff still work there.
pub async fn deactivate(
    State(ctx): State<ApiContext>,
    Extension(auth_user): Extension<AuthUser>,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    auth_user.require_admin()?;
    let id = parse_id(&id, "branch")?;
    let conn = ctx.core.open_db()?;
    let mut branch = db::get_branch(&conn, &id)?
        .ok_or_else(|| ApiError::NotFound("Branch not found".into()))?;

    let staff = db::count_active_staff_in_branch(&conn, &branch.id)?;
    if staff > 0 {
        return Err(ApiError::Conflict(format!(
            "Branch still has {staff} active staff member(s)"
        )));
    }
    branch.is_active = false;
    db::update_branch(&conn, &branch)?;
    record(&conn, &auth_user, "deactivate", "branch", &branch.id, None);
    Ok(StatusCode::NO_CONTENT)
}
