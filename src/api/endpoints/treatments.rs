//! Treatment catalogue (`/api/treatments`).

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
use crate::models::{Treatment, TreatmentFilter};
use crate::scheduling::{MAX_DURATION_MINUTES, MIN_DURATION_MINUTES};

fn require_catalogue_manager(auth_user: &AuthUser) -> Result<(), ApiError> {
    if !auth_user.user.role.can_manage_catalogue() {
        return Err(ApiError::Forbidden("Only managers can edit the treatment catalogue".into()));
    }
    Ok(())
}

/// `GET /api/treatments?category=&include_inactive=`
pub async fn list(
    State(ctx): State<ApiContext>,
    Extension(auth_user): Extension<AuthUser>,
    Query(mut filter): Query<TreatmentFilter>,
) -> Result<Json<Vec<Treatment>>, ApiError> {
    filter.include_inactive &= auth_user.user.role.is_staff();
    let conn = ctx.core.open_db()?;
    Ok(Json(db::list_treatments(&conn, &filter)?))
}

/// `GET /api/treatments/:id`
pub async fn detail(
    State(ctx): State<ApiContext>,
    Extension(_auth_user): Extension<AuthUser>,
    Path(id): Path<String>,
) -> Result<Json<Treatment>, ApiError> {
    let id = parse_id(&id, "treatment")?;
    let conn = ctx.core.open_db()?;
    let treatment = db::get_treatment(&conn, &id)?
        .ok_or_else(|| ApiError::NotFound("Treatment not found".into()))?;
    Ok(Json(treatment))
}

#[derive(Debug, Deserialize)]
pub struct TreatmentInput {
    pub name: String,
    pub description: Option<String>,
    pub category: String,
    pub price_cents: i64,
    pub duration_minutes: i64,
}

fn check_amounts(input: &TreatmentInput) -> Result<(), ApiError> {
    if input.price_cents < 0 {
        return Err(ApiError::BadRequest("Price cannot be negative".into()));
    }
    if !(MIN_DURATION_MINUTES..=MAX_DURATION_MINUTES).contains(&input.duration_minutes) {
        return Err(ApiError::BadRequest(format!(
            "Duration must be between {MIN_DURATION_MINUTES} and {MAX_DURATION_MINUTES} minutes"
        )));
    }
    Ok(())
}

/// `POST /api/treatments`
pub async fn create(
    State(ctx): State<ApiContext>,
    Extension(auth_user): Extension<AuthUser>,
    Json(input): Json<TreatmentInput>,
) -> Result<(StatusCode, Json<Treatment>), ApiError> {
    require_catalogue_manager(&auth_user)?;
    check_amounts(&input)?;
    let now = Utc::now();
    let treatment = Treatment {
        id: Uuid::new_v4(),
        name: required(&input.name, "name")?,
        description: optional(input.description),
        category: required(&input.category, "category")?,
        price_cents: input.price_cents,
        duration_minutes: input.duration_minutes,
        is_active: true,
        created_at: now,
        updated_at: now,
    };
    let conn = ctx.core.open_db()?;
    db::insert_treatment(&conn, &treatment)?;
    record(&conn, &auth_user, "create", "treatment", &treatment.id, Some(treatment.name.clone()));
    Ok((StatusCode::CREATED, Json(treatment)))
}

/// `PUT /api/treatments/:id`
pub async fn update(
    State(ctx): State<ApiContext>,
    Extension(auth_user): Extension<AuthUser>,
    Path(id): Path<String>,
    Json(input): Json<TreatmentInput>,
) -> Result<Json<Treatment>, ApiError> {
    require_catalogue_manager(&auth_user)?;
    check_amounts(&input)?;
    let id = parse_id(&id, "treatment")?;
    let conn = ctx.core.open_db()?;
    let mut treatment = db::get_treatment(&conn, &id)?
        .ok_or_else(|| ApiError::NotFound("Treatment not found".into()))?;
    treatment.name = required(&input.name, "name")?;
    treatment.description = optional(input.description);
    treatment.category = required(&input.category, "category")?;
    treatment.price_cents = input.price_cents;
    treatment.duration_minutes = input.duration_minutes;
    treatment.updated_at = Utc::now();
    db::update_treatment(&conn, &treatment)?;
    record(&conn, &auth_user, "update", "treatment", &treatment.id, None);
    Ok(Json(treatment))
}

/// `DELETE /api/treatments/:id` — soft delete; billed lines keep their text.
pub async fn deactivate(
    State(ctx): State<ApiContext>,
    Extension(auth_user): Extension<AuthUser>,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    require_catalogue_manager(&auth_user)?;
    let id = parse_id(&id, "treatment")?;
    let conn = ctx.core.open_db()?;
    let mut treatment = db::get_treatment(&conn, &id)?
        .ok_or_else(|| ApiError::NotFound("Treatment not found".into()))?;
    treatment.is_active = false;
    db::update_treatment(&conn, &treatment)?;
    record(&conn, &auth_user, "deactivate", "treatment", &treatment.id, None);
    Ok(StatusCode::NO_CONTENT)
}
