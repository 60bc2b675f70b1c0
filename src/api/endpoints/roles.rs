//! Staff titles (`/api/roles`).

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
use crate::models::{StaffTitle, UserRole};

#[derive(Deserialize)]
pub struct RoleQuery {
    #[serde(default)]
    pub include_inactive: bool,
}

/// `GET /api/roles` — staff can read titles to label colleagues.
pub async fn list(
    State(ctx): State<ApiContext>,
    Extension(auth_user): Extension<AuthUser>,
    Query(query): Query<RoleQuery>,
) -> Result<Json<Vec<StaffTitle>>, ApiError> {
    auth_user.require_staff()?;
    let conn = ctx.core.open_db()?;
    let include_inactive = query.include_inactive && auth_user.user.role.is_admin();
    Ok(Json(db::list_staff_titles(&conn, include_inactive)?))
}

#[derive(Deserialize)]
pub struct RoleInput {
    pub name: String,
    pub base_role: UserRole,
    pub description: Option<String>,
}

fn staff_base_role(role: UserRole) -> Result<UserRole, ApiError> {
    if !role.is_staff() {
        return Err(ApiError::BadRequest("Staff titles cannot be based on the patient role".into()));
    }
    Ok(role)
}

/// `POST /api/roles`
pub async fn create(
    State(ctx): State<ApiContext>,
    Extension(auth_user): Extension<AuthUser>,
    Json(input): Json<RoleInput>,
) -> Result<(StatusCode, Json<StaffTitle>), ApiError> {
    auth_user.require_admin()?;
    let title = StaffTitle {
        id: Uuid::new_v4(),
        name: required(&input.name, "name")?,
        base_role: staff_base_role(input.base_role)?,
        description: optional(input.description),
        is_active: true,
        created_at: Utc::now(),
    };
    let conn = ctx.core.open_db()?;
    db::insert_staff_title(&conn, &title)?;
    record(&conn, &auth_user, "create", "role", &title.id, Some(title.name.clone()));
    Ok((StatusCode::CREATED, Json(title)))
}

/// `PUT /api/roles/:id`
pub async fn update(
    State(ctx): State<ApiContext>,
    Extension(auth_user): Extension<AuthUser>,
    Path(id): Path<String>,
    Json(input): Json<RoleInput>,
) -> Result<Json<StaffTitle>, ApiError> {
    auth_user.require_admin()?;
    let id = parse_id(&id, "role")?;
    let conn = ctx.core.open_db()?;
    let mut title = db::get_staff_title(&conn, &id)?
        .ok_or_else(|| ApiError::NotFound("Role not found".into()))?;

    let base_role = staff_base_role(input.base_role)?;
    if base_role != title.base_role {
        let holders = db::list_users(
            &conn,
            &crate::models::UserFilter {
                role: Some(title.base_role),
                ..Default::default()
            },
        )?;
        if holders.iter().any(|u| u.staff_title_id == Some(title.id)) {
            return Err(ApiError::Conflict(
                "Role is assigned to users; its base role cannot change".into(),
            ));
        }
    }

    title.name = required(&input.name, "name")?;
    title.base_role = base_role;
    title.description = optional(input.description);
    db::update_staff_title(&conn, &title)?;
    record(&conn, &auth_user, "update", "role", &title.id, None);
    Ok(Json(title))
}

/// `DELETE /api/roles/:id` — soft delete; existing assignments stay readable.
pub async fn deactivate(
    State(ctx): State<ApiContext>,
    Extension(auth_user): Extension<AuthUser>,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    auth_user.require_admin()?;
    let id = parse_id(&id, "role")?;
    let conn = ctx.core.open_db()?;
    let mut title = db::get_staff_title(&conn, &id)?
        .ok_or_else(|| ApiError::NotFound("Role not found".into()))?;
    title.is_active = false;
    db::update_staff_title(&conn, &title)?;
    record(&conn, &auth_user, "deactivate", "role", &title.id, None);
    Ok(StatusCode::NO_CONTENT)
}
