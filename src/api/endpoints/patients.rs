//! Patient records (`/api/patients`).
//!
//! Staff read patients of the branches they can access; a patient account
//! reads and edits only its own record.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::{Extension, Json};
use chrono::{Local, NaiveDate, Utc};
use rusqlite::Connection;
use serde::Deserialize;
use uuid::Uuid;

use crate::api::endpoints::{optional, parse_id, record, required};
use crate::api::error::ApiError;
use crate::api::types::{ApiContext, AuthUser};
use crate::auth::can_access_branch;
use crate::billing;
use crate::db;
use crate::models::*;
use crate::scheduling;

fn can_view_patient(actor: &User, patient: &Patient) -> bool {
    match actor.role {
        UserRole::Patient => patient.user_id == Some(actor.id),
        _ => can_access_branch(actor, patient.branch_id.as_ref()),
    }
}

/// Fetch a patient the caller may see; hidden rows look missing.
pub(crate) fn load_visible_patient(conn: &Connection, actor: &User, id: &Uuid) -> Result<Patient, ApiError> {
    db::get_patient(conn, id)?
        .filter(|p| can_view_patient(actor, p))
        .ok_or_else(|| ApiError::NotFound("Patient not found".into()))
}

fn require_front_desk(auth_user: &AuthUser) -> Result<(), ApiError> {
    if !auth_user.user.role.can_manage_appointments() {
        return Err(ApiError::Forbidden("Front-desk staff only".into()));
    }
    Ok(())
}

#[derive(Debug, Deserialize)]
pub struct PatientInput {
    pub first_name: String,
    pub last_name: String,
    pub date_of_birth: NaiveDate,
    #[serde(default = "unspecified")]
    pub gender: Gender,
    pub phone: Option<String>,
    pub email: Option<String>,
    pub address: Option<String>,
    pub branch_id: Option<Uuid>,
    pub blood_type: Option<String>,
    pub allergies: Option<String>,
    pub medical_history: Option<String>,
    pub emergency_contact_name: Option<String>,
    pub emergency_contact_phone: Option<String>,
}

fn unspecified() -> Gender {
    Gender::Unspecified
}

/// Checked copies of the free-text fields.
struct CleanInput {
    first_name: String,
    last_name: String,
    email: Option<String>,
}

fn validate(input: &PatientInput, today: NaiveDate) -> Result<CleanInput, ApiError> {
    let first_name = required(&input.first_name, "first_name")?;
    let last_name = required(&input.last_name, "last_name")?;
    if input.date_of_birth > today {
        return Err(ApiError::BadRequest("Date of birth cannot be in the future".into()));
    }
    let email = optional(input.email.clone());
    if email.as_deref().is_some_and(|e| !e.contains('@')) {
        return Err(ApiError::BadRequest("Invalid email address".into()));
    }
    Ok(CleanInput {
        first_name,
        last_name,
        email,
    })
}

/// `GET /api/patients?search=&branch_id=&include_inactive=`
pub async fn list(
    State(ctx): State<ApiContext>,
    Extension(auth_user): Extension<AuthUser>,
    Query(mut filter): Query<PatientFilter>,
) -> Result<Json<Vec<Patient>>, ApiError> {
    let conn = ctx.core.open_db()?;
    if auth_user.user.role == UserRole::Patient {
        let own = db::get_patient_by_user(&conn, &auth_user.user.id)?;
        return Ok(Json(own.into_iter().collect()));
    }
    filter.branch_id = auth_user.scoped_branch(filter.branch_id)?;
    Ok(Json(db::list_patients(&conn, &filter)?))
}

/// `GET /api/patients/:id`
pub async fn detail(
    State(ctx): State<ApiContext>,
    Extension(auth_user): Extension<AuthUser>,
    Path(id): Path<String>,
) -> Result<Json<Patient>, ApiError> {
    let id = parse_id(&id, "patient")?;
    let conn = ctx.core.open_db()?;
    Ok(Json(load_visible_patient(&conn, &auth_user.user, &id)?))
}

/// `POST /api/patients`
pub async fn create(
    State(ctx): State<ApiContext>,
    Extension(auth_user): Extension<AuthUser>,
    Json(input): Json<PatientInput>,
) -> Result<(StatusCode, Json<Patient>), ApiError> {
    require_front_desk(&auth_user)?;
    let clean = validate(&input, Local::now().date_naive())?;
    let branch_id = auth_user.scoped_branch(input.branch_id)?;

    let conn = ctx.core.open_db()?;
    if let Some(id) = &branch_id {
        db::get_branch(&conn, id)?
            .filter(|b| b.is_active)
            .ok_or_else(|| ApiError::BadRequest("Unknown branch".into()))?;
    }

    let now = Utc::now();
    let patient = Patient {
        id: Uuid::new_v4(),
        user_id: None,
        branch_id,
        first_name: clean.first_name,
        last_name: clean.last_name,
        date_of_birth: input.date_of_birth,
        gender: input.gender,
        phone: optional(input.phone),
        email: clean.email,
        address: optional(input.address),
        blood_type: optional(input.blood_type),
        allergies: optional(input.allergies),
        medical_history: optional(input.medical_history),
        emergency_contact_name: optional(input.emergency_contact_name),
        emergency_contact_phone: optional(input.emergency_contact_phone),
        is_active: true,
        created_at: now,
        updated_at: now,
    };
    db::insert_patient(&conn, &patient)?;
    record(&conn, &auth_user, "create", "patient", &patient.id, None);
    Ok((StatusCode::CREATED, Json(patient)))
}

/// `PUT /api/patients/:id` — full replacement of the editable fields.
pub async fn update(
    State(ctx): State<ApiContext>,
    Extension(auth_user): Extension<AuthUser>,
    Path(id): Path<String>,
    Json(input): Json<PatientInput>,
) -> Result<Json<Patient>, ApiError> {
    let id = parse_id(&id, "patient")?;
    let conn = ctx.core.open_db()?;
    let mut patient = load_visible_patient(&conn, &auth_user.user, &id)?;
    let is_self = auth_user.user.role == UserRole::Patient;
    if !is_self {
        require_front_desk(&auth_user)?;
    }
    let clean = validate(&input, Local::now().date_naive())?;

    // Patients cannot move themselves between branches.
    if !is_self && input.branch_id != patient.branch_id {
        let target = input.branch_id;
        if !can_access_branch(&auth_user.user, target.as_ref()) {
            return Err(ApiError::Forbidden("Cannot move a patient to another branch".into()));
        }
        if let Some(branch) = &target {
            db::get_branch(&conn, branch)?
                .filter(|b| b.is_active)
                .ok_or_else(|| ApiError::BadRequest("Unknown branch".into()))?;
        }
        patient.branch_id = target;
    }

    patient.first_name = clean.first_name;
    patient.last_name = clean.last_name;
    patient.date_of_birth = input.date_of_birth;
    patient.gender = input.gender;
    patient.phone = optional(input.phone);
    patient.email = clean.email;
    patient.address = optional(input.address);
    patient.blood_type = optional(input.blood_type);
    patient.allergies = optional(input.allergies);
    patient.medical_history = optional(input.medical_history);
    patient.emergency_contact_name = optional(input.emergency_contact_name);
    patient.emergency_contact_phone = optional(input.emergency_contact_phone);
    patient.updated_at = Utc::now();

    db::update_patient(&conn, &patient)?;
    record(&conn, &auth_user, "update", "patient", &patient.id, None);
    Ok(Json(patient))
}

/// `DELETE /api/patients/:id` — soft delete.
pub async fn deactivate(
    State(ctx): State<ApiContext>,
    Extension(auth_user): Extension<AuthUser>,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    require_front_desk(&auth_user)?;
    let id = parse_id(&id, "patient")?;
    let conn = ctx.core.open_db()?;
    let mut patient = load_visible_patient(&conn, &auth_user.user, &id)?;
    patient.is_active = false;
    db::update_patient(&conn, &patient)?;
    record(&conn, &auth_user, "deactivate", "patient", &patient.id, None);
    Ok(StatusCode::NO_CONTENT)
}

/// `GET /api/patients/:id/appointments`
pub async fn appointments(
    State(ctx): State<ApiContext>,
    Extension(auth_user): Extension<AuthUser>,
    Path(id): Path<String>,
) -> Result<Json<Vec<Appointment>>, ApiError> {
    let id = parse_id(&id, "patient")?;
    let conn = ctx.core.open_db()?;
    let patient = load_visible_patient(&conn, &auth_user.user, &id)?;
    let filter = scheduling::scope_filter(
        &conn,
        &auth_user.user,
        AppointmentFilter {
            patient_id: Some(patient.id),
            ..Default::default()
        },
    )?;
    Ok(Json(db::list_appointments(&conn, &filter)?))
}

/// `GET /api/patients/:id/invoices`
pub async fn invoices(
    State(ctx): State<ApiContext>,
    Extension(auth_user): Extension<AuthUser>,
    Path(id): Path<String>,
) -> Result<Json<Vec<Invoice>>, ApiError> {
    let id = parse_id(&id, "patient")?;
    let conn = ctx.core.open_db()?;
    let patient = load_visible_patient(&conn, &auth_user.user, &id)?;
    let filter = billing::scope_invoice_filter(
        &conn,
        &auth_user.user,
        InvoiceFilter {
            patient_id: Some(patient.id),
            ..Default::default()
        },
    )?;
    Ok(Json(db::list_invoices(&conn, &filter)?))
}

#[derive(Deserialize)]
pub struct PolicyQuery {
    #[serde(default)]
    pub include_inactive: bool,
}

/// `GET /api/patients/:id/policies`
pub async fn policies(
    State(ctx): State<ApiContext>,
    Extension(auth_user): Extension<AuthUser>,
    Path(id): Path<String>,
    Query(query): Query<PolicyQuery>,
) -> Result<Json<Vec<InsurancePolicy>>, ApiError> {
    if auth_user.user.role == UserRole::Doctor {
        return Err(ApiError::Forbidden("Billing is not available to doctors".into()));
    }
    let id = parse_id(&id, "patient")?;
    let conn = ctx.core.open_db()?;
    let patient = load_visible_patient(&conn, &auth_user.user, &id)?;
    Ok(Json(db::list_policies_for_patient(&conn, &patient.id, query.include_inactive)?))
}
