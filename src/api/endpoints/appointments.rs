//! Appointment endpoints (`/api/appointments`).
//!
//! Booking rules and the status workflow live in [`crate::scheduling`];
//! these handlers add request plumbing, audit rows and the patient
//! notifications that follow a decision.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::{Extension, Json};
use chrono::{Local, NaiveDateTime};
use rusqlite::Connection;
use serde::Deserialize;

use crate::api::endpoints::{parse_id, record};
use crate::api::error::ApiError;
use crate::api::types::{ApiContext, AuthUser};
use crate::db;
use crate::models::{Appointment, AppointmentFilter, AppointmentTreatment};
use crate::notifications::{self, Notifier};
use crate::scheduling::{
    self, AppointmentUpdate, BookingRequest, ScheduleRules, TreatmentLine, Transition,
};

fn local_now() -> NaiveDateTime {
    Local::now().naive_local()
}

/// `GET /api/appointments?status=&doctor_id=&branch_id=&patient_id=&from=&to=`
pub async fn list(
    State(ctx): State<ApiContext>,
    Extension(auth_user): Extension<AuthUser>,
    Query(filter): Query<AppointmentFilter>,
) -> Result<Json<Vec<Appointment>>, ApiError> {
    let conn = ctx.core.open_db()?;
    let filter = scheduling::scope_filter(&conn, &auth_user.user, filter)?;
    Ok(Json(db::list_appointments(&conn, &filter)?))
}

/// `GET /api/appointments/:id`
pub async fn detail(
    State(ctx): State<ApiContext>,
    Extension(auth_user): Extension<AuthUser>,
    Path(id): Path<String>,
) -> Result<Json<Appointment>, ApiError> {
    let id = parse_id(&id, "appointment")?;
    let conn = ctx.core.open_db()?;
    Ok(Json(scheduling::load_visible(&conn, &auth_user.user, &id)?))
}

/// `POST /api/appointments`
pub async fn create(
    State(ctx): State<ApiContext>,
    Extension(auth_user): Extension<AuthUser>,
    Json(req): Json<BookingRequest>,
) -> Result<(StatusCode, Json<Appointment>), ApiError> {
    let rules = ScheduleRules::from(&ctx.core.config);
    let conn = ctx.core.open_db()?;
    let appt = scheduling::book_appointment(&conn, &auth_user.user, &req, &rules, local_now())?;
    record(&conn, &auth_user, "create", "appointment", &appt.id, Some(appt.status.to_string()));
    Ok((StatusCode::CREATED, Json(appt)))
}

/// `POST /api/appointments/walk-in`
pub async fn walk_in(
    State(ctx): State<ApiContext>,
    Extension(auth_user): Extension<AuthUser>,
    Json(req): Json<BookingRequest>,
) -> Result<(StatusCode, Json<Appointment>), ApiError> {
    let rules = ScheduleRules::from(&ctx.core.config);
    let conn = ctx.core.open_db()?;
    let appt = scheduling::book_walk_in(&conn, &auth_user.user, &req, &rules, local_now())?;
    record(&conn, &auth_user, "walk_in", "appointment", &appt.id, None);
    Ok((StatusCode::CREATED, Json(appt)))
}

/// `PUT /api/appointments/:id`
pub async fn update(
    State(ctx): State<ApiContext>,
    Extension(auth_user): Extension<AuthUser>,
    Path(id): Path<String>,
    Json(update): Json<AppointmentUpdate>,
) -> Result<Json<Appointment>, ApiError> {
    let id = parse_id(&id, "appointment")?;
    let rules = ScheduleRules::from(&ctx.core.config);
    let conn = ctx.core.open_db()?;
    let appt = scheduling::update_appointment(&conn, &auth_user.user, &id, &update, &rules, local_now())?;
    record(&conn, &auth_user, "update", "appointment", &appt.id, None);
    Ok(Json(appt))
}

/// Tell the patient about a decision. Failures are logged, never returned.
fn notify_patient(conn: &Connection, notifier: &dyn Notifier, appt: &Appointment, transition: &Transition) {
    let patient = match db::get_patient(conn, &appt.patient_id) {
        Ok(Some(p)) => p,
        Ok(None) => return,
        Err(e) => {
            tracing::warn!(appointment_id = %appt.id, "Cannot load patient for notification: {e}");
            return;
        }
    };
    let message = match transition {
        Transition::Approve => notifications::appointment_approved(&patient, appt),
        Transition::Reject { reason } => notifications::appointment_rejected(&patient, appt, reason),
        Transition::Cancel => notifications::appointment_cancelled(&patient, appt),
        Transition::Complete => return,
    };
    notifications::dispatch(notifier, &patient, &message);
}

fn apply(ctx: &ApiContext, auth_user: &AuthUser, raw_id: &str, transition: Transition) -> Result<Appointment, ApiError> {
    let id = parse_id(raw_id, "appointment")?;
    let conn = ctx.core.open_db()?;
    let action = transition.action();
    let appt = scheduling::transition(&conn, &auth_user.user, &id, transition.clone())?;
    record(&conn, auth_user, action, "appointment", &appt.id, appt.decision_note.clone());
    notify_patient(&conn, ctx.core.notifier(), &appt, &transition);
    Ok(appt)
}

/// `POST /api/appointments/:id/approve`
pub async fn approve(
    State(ctx): State<ApiContext>,
    Extension(auth_user): Extension<AuthUser>,
    Path(id): Path<String>,
) -> Result<Json<Appointment>, ApiError> {
    Ok(Json(apply(&ctx, &auth_user, &id, Transition::Approve)?))
}

#[derive(Deserialize)]
pub struct RejectRequest {
    #[serde(default)]
    pub reason: String,
}

/// `POST /api/appointments/:id/reject` — `{reason}` is required.
pub async fn reject(
    State(ctx): State<ApiContext>,
    Extension(auth_user): Extension<AuthUser>,
    Path(id): Path<String>,
    Json(req): Json<RejectRequest>,
) -> Result<Json<Appointment>, ApiError> {
    Ok(Json(apply(&ctx, &auth_user, &id, Transition::Reject { reason: req.reason })?))
}

/// `POST /api/appointments/:id/cancel`
pub async fn cancel(
    State(ctx): State<ApiContext>,
    Extension(auth_user): Extension<AuthUser>,
    Path(id): Path<String>,
) -> Result<Json<Appointment>, ApiError> {
    Ok(Json(apply(&ctx, &auth_user, &id, Transition::Cancel)?))
}

/// `POST /api/appointments/:id/complete`
pub async fn complete(
    State(ctx): State<ApiContext>,
    Extension(auth_user): Extension<AuthUser>,
    Path(id): Path<String>,
) -> Result<Json<Appointment>, ApiError> {
    Ok(Json(apply(&ctx, &auth_user, &id, Transition::Complete)?))
}

#[derive(Deserialize)]
pub struct TreatmentsRequest {
    pub treatments: Vec<TreatmentLine>,
}

/// `POST /api/appointments/:id/treatments`
pub async fn add_treatments(
    State(ctx): State<ApiContext>,
    Extension(auth_user): Extension<AuthUser>,
    Path(id): Path<String>,
    Json(req): Json<TreatmentsRequest>,
) -> Result<(StatusCode, Json<Vec<AppointmentTreatment>>), ApiError> {
    let id = parse_id(&id, "appointment")?;
    let conn = ctx.core.open_db()?;
    let recorded = scheduling::record_treatments(&conn, &auth_user.user, &id, &req.treatments)?;
    record(
        &conn,
        &auth_user,
        "record_treatments",
        "appointment",
        &id,
        Some(format!("{} line(s)", recorded.len())),
    );
    Ok((StatusCode::CREATED, Json(recorded)))
}

/// `GET /api/appointments/:id/treatments`
pub async fn treatments(
    State(ctx): State<ApiContext>,
    Extension(auth_user): Extension<AuthUser>,
    Path(id): Path<String>,
) -> Result<Json<Vec<AppointmentTreatment>>, ApiError> {
    let id = parse_id(&id, "appointment")?;
    let conn = ctx.core.open_db()?;
    let appt = scheduling::load_visible(&conn, &auth_user.user, &id)?;
    Ok(Json(db::list_appointment_treatments(&conn, &appt.id)?))
}
