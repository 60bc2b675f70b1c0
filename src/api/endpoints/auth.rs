//! Account endpoints.
//!
//! `POST /api/auth/register` and `POST /api/auth/login` are public; the
//! rest run behind the auth middleware.

use axum::extract::State;
use axum::http::StatusCode;
use axum::{Extension, Json};
use serde::{Deserialize, Serialize};

use crate::api::endpoints::record;
use crate::api::error::ApiError;
use crate::api::types::{ApiContext, AuthUser};
use crate::auth::{self, AuthError, RegisterRequest};
use crate::db;
use crate::models::{Patient, User};

#[derive(Serialize)]
pub struct SessionResponse {
    pub token: String,
    pub expires_in_hours: i64,
    pub user: User,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub patient: Option<Patient>,
}

/// `POST /api/auth/register` — patient self-registration.
pub async fn register(
    State(ctx): State<ApiContext>,
    Json(request): Json<RegisterRequest>,
) -> Result<(StatusCode, Json<SessionResponse>), ApiError> {
    let conn = ctx.core.open_db()?;
    if let Some(branch_id) = request.branch_id {
        db::get_branch(&conn, &branch_id)?
            .filter(|b| b.is_active)
            .ok_or_else(|| ApiError::BadRequest("Unknown branch".into()))?;
    }

    let ttl = ctx.core.config.session_ttl_hours;
    let (token, user, patient) = auth::register_patient(&conn, &request, ttl)?;
    if let Err(e) = db::record_audit(
        &conn,
        Some(&user.id),
        "register",
        "user",
        Some(&user.id.to_string()),
        None,
    ) {
        tracing::warn!("Failed to audit registration: {e}");
    }
    tracing::info!(user_id = %user.id, "Patient registered");

    Ok((
        StatusCode::CREATED,
        Json(SessionResponse {
            token,
            expires_in_hours: ttl,
            user,
            patient: Some(patient),
        }),
    ))
}

#[derive(Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

/// `POST /api/auth/login`
pub async fn login(
    State(ctx): State<ApiContext>,
    Json(request): Json<LoginRequest>,
) -> Result<Json<SessionResponse>, ApiError> {
    let conn = ctx.core.open_db()?;
    let ttl = ctx.core.config.session_ttl_hours;
    let (token, user) = auth::login(
        &conn,
        &ctx.core.login_lockout,
        &request.email,
        &request.password,
        ttl,
    )?;
    let patient = db::get_patient_by_user(&conn, &user.id)?;

    if let Err(e) = db::record_audit(&conn, Some(&user.id), "login", "user", Some(&user.id.to_string()), None) {
        tracing::warn!("Failed to audit login: {e}");
    }

    Ok(Json(SessionResponse {
        token,
        expires_in_hours: ttl,
        user,
        patient,
    }))
}

/// `POST /api/auth/logout` — revoke the current token.
pub async fn logout(
    State(ctx): State<ApiContext>,
    Extension(auth_user): Extension<AuthUser>,
) -> Result<StatusCode, ApiError> {
    let conn = ctx.core.open_db()?;
    auth::logout(&conn, &auth_user.token)?;
    record(&conn, &auth_user, "logout", "user", &auth_user.user.id, None);
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Serialize)]
pub struct MeResponse {
    pub user: User,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub patient: Option<Patient>,
}

/// `GET /api/auth/me`
pub async fn me(
    State(ctx): State<ApiContext>,
    Extension(auth_user): Extension<AuthUser>,
) -> Result<Json<MeResponse>, ApiError> {
    let conn = ctx.core.open_db()?;
    let patient = db::get_patient_by_user(&conn, &auth_user.user.id)?;
    Ok(Json(MeResponse {
        user: auth_user.user,
        patient,
    }))
}

#[derive(Deserialize)]
pub struct PasswordChange {
    pub current_password: String,
    pub new_password: String,
}

/// `PUT /api/auth/password` — every session, this one included, is revoked.
pub async fn change_password(
    State(ctx): State<ApiContext>,
    Extension(auth_user): Extension<AuthUser>,
    Json(request): Json<PasswordChange>,
) -> Result<StatusCode, ApiError> {
    let conn = ctx.core.open_db()?;
    auth::change_password(
        &conn,
        &auth_user.user,
        &request.current_password,
        &request.new_password,
    )
    .map_err(|e| match e {
        AuthError::InvalidCredentials => ApiError::BadRequest("Current password is incorrect".into()),
        other => other.into(),
    })?;
    record(&conn, &auth_user, "change_password", "user", &auth_user.user.id, None);
    Ok(StatusCode::NO_CONTENT)
}
