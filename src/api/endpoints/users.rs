//! Staff account management and profile pictures.
//!
//! Administrators manage every account. Branch managers manage doctors and
//! receptionists of their own branch.

use std::path::Path as FsPath;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::{Extension, Json};
use base64::Engine;
use chrono::Utc;
use rusqlite::Connection;
use serde::Deserialize;
use uuid::Uuid;

use crate::api::endpoints::{optional, parse_id, record, required};
use crate::api::error::ApiError;
use crate::api::types::{ApiContext, AuthUser};
use crate::auth;
use crate::db;
use crate::models::*;

/// Profile pictures larger than this are refused.
const MAX_PICTURE_BYTES: usize = 2 * 1024 * 1024;

/// Request body cap for picture uploads: base64 of the largest accepted
/// image plus room for the data-URL prefix and JSON framing.
pub const PICTURE_BODY_LIMIT: usize = MAX_PICTURE_BYTES.div_ceil(3) * 4 + 64 * 1024;

/// Roles a branch manager may hand out.
const MANAGER_ASSIGNABLE: &[UserRole] = &[UserRole::Doctor, UserRole::Receptionist];

fn may_manage(actor: &User, role: UserRole, branch_id: Option<&Uuid>) -> bool {
    match actor.role {
        UserRole::SystemAdministrator => true,
        UserRole::BranchManager => {
            MANAGER_ASSIGNABLE.contains(&role) && branch_id.is_some() && branch_id == actor.branch_id.as_ref()
        }
        _ => false,
    }
}

fn load_user(conn: &Connection, id: &Uuid) -> Result<User, ApiError> {
    db::get_user(conn, id)?.ok_or_else(|| ApiError::NotFound("User not found".into()))
}

/// Staff titles must sit on the same base role as the account.
fn check_title(conn: &Connection, title_id: Option<&Uuid>, role: UserRole) -> Result<(), ApiError> {
    let Some(id) = title_id else {
        return Ok(());
    };
    let title = db::get_staff_title(conn, id)?
        .filter(|t| t.is_active)
        .ok_or_else(|| ApiError::BadRequest("Unknown staff title".into()))?;
    if title.base_role != role {
        return Err(ApiError::BadRequest(format!(
            "Staff title '{}' is for {} accounts",
            title.name, title.base_role
        )));
    }
    Ok(())
}

fn check_branch(conn: &Connection, branch_id: Option<&Uuid>) -> Result<(), ApiError> {
    if let Some(id) = branch_id {
        db::get_branch(conn, id)?
            .filter(|b| b.is_active)
            .ok_or_else(|| ApiError::BadRequest("Unknown branch".into()))?;
    }
    Ok(())
}

// ── List / detail ───────────────────────────────────────────

/// `GET /api/users?role=&branch_id=&include_inactive=`
pub async fn list(
    State(ctx): State<ApiContext>,
    Extension(auth_user): Extension<AuthUser>,
    Query(mut filter): Query<UserFilter>,
) -> Result<Json<Vec<User>>, ApiError> {
    auth_user.require_any(&[UserRole::SystemAdministrator, UserRole::BranchManager])?;
    filter.branch_id = auth_user.scoped_branch(filter.branch_id)?;
    let conn = ctx.core.open_db()?;
    Ok(Json(db::list_users(&conn, &filter)?))
}

#[derive(Deserialize)]
pub struct DoctorQuery {
    pub branch_id: Option<Uuid>,
}

/// `GET /api/doctors?branch_id=` — open to every signed-in user for booking.
pub async fn doctors(
    State(ctx): State<ApiContext>,
    Extension(_auth_user): Extension<AuthUser>,
    Query(query): Query<DoctorQuery>,
) -> Result<Json<Vec<User>>, ApiError> {
    let conn = ctx.core.open_db()?;
    let filter = UserFilter {
        role: Some(UserRole::Doctor),
        branch_id: query.branch_id,
        include_inactive: false,
    };
    Ok(Json(db::list_users(&conn, &filter)?))
}

/// `GET /api/users/:id`
pub async fn detail(
    State(ctx): State<ApiContext>,
    Extension(auth_user): Extension<AuthUser>,
    Path(id): Path<String>,
) -> Result<Json<User>, ApiError> {
    let id = parse_id(&id, "user")?;
    let conn = ctx.core.open_db()?;
    let user = load_user(&conn, &id)?;
    if user.id != auth_user.user.id && !may_manage(&auth_user.user, user.role, user.branch_id.as_ref()) {
        return Err(ApiError::NotFound("User not found".into()));
    }
    Ok(Json(user))
}

// ── Create / update / deactivate ────────────────────────────

#[derive(Deserialize)]
pub struct CreateUser {
    pub email: String,
    pub password: String,
    pub full_name: String,
    pub phone: Option<String>,
    pub role: UserRole,
    pub staff_title_id: Option<Uuid>,
    pub branch_id: Option<Uuid>,
}

/// `POST /api/users`
pub async fn create(
    State(ctx): State<ApiContext>,
    Extension(auth_user): Extension<AuthUser>,
    Json(req): Json<CreateUser>,
) -> Result<(StatusCode, Json<User>), ApiError> {
    let branch_id = req.branch_id.or(match auth_user.user.role {
        UserRole::BranchManager => auth_user.user.branch_id,
        _ => None,
    });
    if !may_manage(&auth_user.user, req.role, branch_id.as_ref()) {
        return Err(ApiError::Forbidden("Cannot create this kind of account".into()));
    }

    let email = req.email.trim().to_lowercase();
    if !email.contains('@') {
        return Err(ApiError::BadRequest("A valid email is required".into()));
    }
    let full_name = required(&req.full_name, "full_name")?;
    auth::validate_password(&req.password)?;
    if req.role.is_branch_scoped() && branch_id.is_none() {
        return Err(ApiError::BadRequest(format!("A {} needs a branch", req.role)));
    }

    let conn = ctx.core.open_db()?;
    check_branch(&conn, branch_id.as_ref())?;
    check_title(&conn, req.staff_title_id.as_ref(), req.role)?;
    if db::get_user_by_email(&conn, &email)?.is_some() {
        return Err(ApiError::Conflict("Email is already registered".into()));
    }

    let now = Utc::now();
    let user = User {
        id: Uuid::new_v4(),
        email,
        password_hash: auth::hash_password(&req.password),
        full_name,
        phone: optional(req.phone),
        role: req.role,
        staff_title_id: req.staff_title_id,
        branch_id,
        profile_picture: None,
        is_active: true,
        last_login_at: None,
        created_at: now,
        updated_at: now,
    };
    db::insert_user(&conn, &user)?;
    record(&conn, &auth_user, "create", "user", &user.id, Some(user.role.to_string()));
    tracing::info!(user_id = %user.id, role = %user.role, "User created");
    Ok((StatusCode::CREATED, Json(user)))
}

#[derive(Deserialize)]
pub struct UpdateUser {
    pub full_name: Option<String>,
    pub phone: Option<String>,
    pub role: Option<UserRole>,
    /// Use a nil UUID to clear the title.
    pub staff_title_id: Option<Uuid>,
    pub branch_id: Option<Uuid>,
    pub is_active: Option<bool>,
}

/// `PUT /api/users/:id` — users may edit their own name and phone.
pub async fn update(
    State(ctx): State<ApiContext>,
    Extension(auth_user): Extension<AuthUser>,
    Path(id): Path<String>,
    Json(req): Json<UpdateUser>,
) -> Result<Json<User>, ApiError> {
    let id = parse_id(&id, "user")?;
    let conn = ctx.core.open_db()?;
    let mut user = load_user(&conn, &id)?;

    let was_active_admin = user.role == UserRole::SystemAdministrator && user.is_active;
    let is_self = user.id == auth_user.user.id;
    let manages = may_manage(&auth_user.user, user.role, user.branch_id.as_ref());
    if !is_self && !manages {
        return Err(ApiError::NotFound("User not found".into()));
    }
    let admin_fields = req.role.is_some() || req.staff_title_id.is_some() || req.branch_id.is_some() || req.is_active.is_some();
    if admin_fields && !manages {
        return Err(ApiError::Forbidden("Only an administrator can change role, branch or status".into()));
    }

    if let Some(name) = &req.full_name {
        user.full_name = required(name, "full_name")?;
    }
    if req.phone.is_some() {
        user.phone = optional(req.phone);
    }
    if let Some(role) = req.role {
        user.role = role;
    }
    if let Some(branch_id) = req.branch_id {
        check_branch(&conn, Some(&branch_id))?;
        user.branch_id = Some(branch_id);
    }
    if let Some(title) = req.staff_title_id {
        user.staff_title_id = (!title.is_nil()).then_some(title);
    }
    if let Some(active) = req.is_active {
        if !active && is_self {
            return Err(ApiError::BadRequest("You cannot deactivate your own account".into()));
        }
        user.is_active = active;
    }
    // The result must still be something this actor is allowed to manage.
    if admin_fields && !may_manage(&auth_user.user, user.role, user.branch_id.as_ref()) {
        return Err(ApiError::Forbidden("Cannot assign this role or branch".into()));
    }
    if user.role.is_branch_scoped() && user.branch_id.is_none() {
        return Err(ApiError::BadRequest(format!("A {} needs a branch", user.role)));
    }
    if user.staff_title_id.is_some() {
        check_title(&conn, user.staff_title_id.as_ref(), user.role)?;
    }
    let still_admin = user.role == UserRole::SystemAdministrator && user.is_active;
    if was_active_admin
        && !still_admin
        && db::count_active_users_with_role(&conn, UserRole::SystemAdministrator)? <= 1
    {
        return Err(ApiError::Conflict("Cannot remove the last administrator".into()));
    }

    db::update_user(&conn, &user)?;
    if !user.is_active {
        db::delete_user_sessions(&conn, &user.id)?;
    }
    record(&conn, &auth_user, "update", "user", &user.id, None);
    Ok(Json(user))
}

/// `DELETE /api/users/:id` — soft delete; open sessions are revoked.
pub async fn deactivate(
    State(ctx): State<ApiContext>,
    Extension(auth_user): Extension<AuthUser>,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    let id = parse_id(&id, "user")?;
    let conn = ctx.core.open_db()?;
    let mut user = load_user(&conn, &id)?;
    if !may_manage(&auth_user.user, user.role, user.branch_id.as_ref()) {
        return Err(ApiError::NotFound("User not found".into()));
    }
    if user.id == auth_user.user.id {
        return Err(ApiError::BadRequest("You cannot deactivate your own account".into()));
    }
    if user.role == UserRole::SystemAdministrator
        && user.is_active
        && db::count_active_users_with_role(&conn, UserRole::SystemAdministrator)? <= 1
    {
        return Err(ApiError::Conflict("Cannot remove the last administrator".into()));
    }

    user.is_active = false;
    db::update_user(&conn, &user)?;
    let revoked = db::delete_user_sessions(&conn, &user.id)?;
    record(&conn, &auth_user, "deactivate", "user", &user.id, None);
    tracing::info!(user_id = %user.id, revoked, "User deactivated");
    Ok(StatusCode::NO_CONTENT)
}

// ── Profile picture ─────────────────────────────────────────

#[derive(Deserialize)]
pub struct PictureUpload {
    /// Base64 data URL (e.g. `data:image/png;base64,iVBOR...`) or raw base64.
    pub data: String,
}

/// Decode a base64 data URL to raw bytes.
fn decode_data_url(data_url: &str) -> Result<Vec<u8>, ApiError> {
    let payload = match data_url.find(',') {
        Some(idx) => &data_url[idx + 1..],
        None => data_url,
    };
    base64::engine::general_purpose::STANDARD
        .decode(payload.trim())
        .map_err(|e| ApiError::BadRequest(format!("Base64 decode failed: {e}")))
}

/// Image extension from magic bytes; `None` for anything else.
fn image_extension(bytes: &[u8]) -> Option<&'static str> {
    if bytes.starts_with(&[0xFF, 0xD8, 0xFF]) {
        Some("jpg")
    } else if bytes.starts_with(&[0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A]) {
        Some("png")
    } else if bytes.starts_with(b"GIF87a") || bytes.starts_with(b"GIF89a") {
        Some("gif")
    } else if bytes.len() >= 12 && &bytes[0..4] == b"RIFF" && &bytes[8..12] == b"WEBP" {
        Some("webp")
    } else {
        None
    }
}

fn remove_old_picture(uploads_dir: &FsPath, url: &str) {
    let Some(name) = url.strip_prefix("/uploads/") else {
        return;
    };
    if let Err(e) = std::fs::remove_file(uploads_dir.join(name)) {
        tracing::debug!("Old profile picture not removed: {e}");
    }
}

/// `POST /api/users/:id/picture` — own picture, or any managed account.
pub async fn upload_picture(
    State(ctx): State<ApiContext>,
    Extension(auth_user): Extension<AuthUser>,
    Path(id): Path<String>,
    Json(req): Json<PictureUpload>,
) -> Result<Json<User>, ApiError> {
    let id = parse_id(&id, "user")?;
    let conn = ctx.core.open_db()?;
    let mut user = load_user(&conn, &id)?;
    if user.id != auth_user.user.id && !may_manage(&auth_user.user, user.role, user.branch_id.as_ref()) {
        return Err(ApiError::NotFound("User not found".into()));
    }

    let bytes = decode_data_url(&req.data)?;
    if bytes.len() > MAX_PICTURE_BYTES {
        return Err(ApiError::BadRequest(format!(
            "Picture too large ({} bytes, max {MAX_PICTURE_BYTES})",
            bytes.len()
        )));
    }
    let ext = image_extension(&bytes)
        .ok_or_else(|| ApiError::BadRequest("Only PNG, JPEG, GIF or WebP images are accepted".into()))?;

    let uploads_dir = &ctx.core.config.uploads_dir;
    std::fs::create_dir_all(uploads_dir)
        .map_err(|e| ApiError::Internal(format!("Cannot create uploads dir: {e}")))?;
    let file_name = format!("{}-{}.{ext}", user.id, &Uuid::new_v4().simple().to_string()[..8]);
    std::fs::write(uploads_dir.join(&file_name), &bytes)
        .map_err(|e| ApiError::Internal(format!("Cannot store picture: {e}")))?;

    if let Some(old) = user.profile_picture.take() {
        remove_old_picture(uploads_dir, &old);
    }
    user.profile_picture = Some(format!("/uploads/{file_name}"));
    db::update_user(&conn, &user)?;
    record(&conn, &auth_user, "upload_picture", "user", &user.id, Some(file_name));
    Ok(Json(user))
}
