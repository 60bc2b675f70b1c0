//! Appointment booking rules and status workflow.
//!
//! Calendar checks ([`validate_schedule`], [`check_doctor_conflict`]) are
//! pure apart from the conflict lookup. The booking operations below them
//! resolve the actor's permissions, apply the checks that fit the kind of
//! booking (regular, emergency, walk-in) and persist the result.

use chrono::{Datelike, Duration, NaiveDateTime, Timelike, Weekday};
use rusqlite::Connection;
use serde::Deserialize;
use uuid::Uuid;

use crate::auth::can_access_branch;
use crate::config::AppConfig;
use crate::db::{self, DatabaseError};
use crate::models::*;

pub const MIN_DURATION_MINUTES: i64 = 5;
pub const MAX_DURATION_MINUTES: i64 = 240;
pub const DEFAULT_DURATION_MINUTES: i64 = 30;

#[derive(Debug, thiserror::Error)]
pub enum SchedulingError {
    #[error("Appointment time must be in the future")]
    PastDate,
    #[error("Appointments cannot be booked on weekends")]
    Weekend,
    #[error("Appointments must fall between {opening:02}:00 and {closing:02}:00")]
    OutsideWorkingHours { opening: u32, closing: u32 },
    #[error("Duration must be between {MIN_DURATION_MINUTES} and {MAX_DURATION_MINUTES} minutes")]
    InvalidDuration,
    #[error("Doctor already has an appointment at {0}")]
    Conflict(NaiveDateTime),
    #[error("Cannot move appointment from {from} to {to}")]
    InvalidTransition {
        from: AppointmentStatus,
        to: AppointmentStatus,
    },
    #[error("{0} not found")]
    NotFound(&'static str),
    #[error("{0}")]
    Invalid(String),
    #[error("{0}")]
    Forbidden(&'static str),
    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),
}

/// Calendar rules in effect for a clinic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScheduleRules {
    pub opening_hour: u32,
    pub closing_hour: u32,
    pub conflict_window_minutes: i64,
}

impl Default for ScheduleRules {
    fn default() -> Self {
        Self {
            opening_hour: 8,
            closing_hour: 18,
            conflict_window_minutes: 30,
        }
    }
}

impl From<&AppConfig> for ScheduleRules {
    fn from(config: &AppConfig) -> Self {
        Self {
            opening_hour: config.opening_hour,
            closing_hour: config.closing_hour,
            conflict_window_minutes: config.conflict_window_minutes,
        }
    }
}

// ═══════════════════════════════════════════════════════════
// Calendar checks
// ═══════════════════════════════════════════════════════════

pub fn validate_duration(duration_minutes: i64) -> Result<(), SchedulingError> {
    if !(MIN_DURATION_MINUTES..=MAX_DURATION_MINUTES).contains(&duration_minutes) {
        return Err(SchedulingError::InvalidDuration);
    }
    Ok(())
}

/// Future, weekday, inside working hours, sane duration.
pub fn validate_schedule(
    scheduled_at: NaiveDateTime,
    now: NaiveDateTime,
    duration_minutes: i64,
    rules: &ScheduleRules,
) -> Result<(), SchedulingError> {
    if scheduled_at <= now {
        return Err(SchedulingError::PastDate);
    }
    if matches!(scheduled_at.weekday(), Weekday::Sat | Weekday::Sun) {
        return Err(SchedulingError::Weekend);
    }

    let outside = SchedulingError::OutsideWorkingHours {
        opening: rules.opening_hour,
        closing: rules.closing_hour,
    };
    if scheduled_at.hour() < rules.opening_hour {
        return Err(outside);
    }
    let start_minute = i64::from(scheduled_at.hour() * 60 + scheduled_at.minute());
    if start_minute + duration_minutes > i64::from(rules.closing_hour) * 60 {
        return Err(outside);
    }

    validate_duration(duration_minutes)
}

/// Fails with `Conflict` when the doctor holds another live appointment
/// closer than the conflict window.
pub fn check_doctor_conflict(
    conn: &Connection,
    doctor_id: &Uuid,
    scheduled_at: NaiveDateTime,
    rules: &ScheduleRules,
    exclude: Option<&Uuid>,
) -> Result<(), SchedulingError> {
    let conflicts = db::find_doctor_conflicts(
        conn,
        doctor_id,
        &scheduled_at,
        rules.conflict_window_minutes,
        exclude,
    )?;
    match conflicts.first() {
        Some(existing) => Err(SchedulingError::Conflict(existing.scheduled_at)),
        None => Ok(()),
    }
}

// ═══════════════════════════════════════════════════════════
// Access
// ═══════════════════════════════════════════════════════════

/// The patient record linked to a patient account.
pub fn own_patient(conn: &Connection, actor: &User) -> Result<Patient, SchedulingError> {
    db::get_patient_by_user(conn, &actor.id)?
        .ok_or(SchedulingError::Forbidden("No patient record is linked to this account"))
}

pub fn can_view(conn: &Connection, actor: &User, appt: &Appointment) -> Result<bool, SchedulingError> {
    Ok(match actor.role {
        UserRole::Patient => own_patient(conn, actor)?.id == appt.patient_id,
        UserRole::Doctor => appt.doctor_id == actor.id,
        _ => can_access_branch(actor, Some(&appt.branch_id)),
    })
}

fn is_branch_manager_for(actor: &User, appt: &Appointment) -> bool {
    actor.role.can_manage_appointments() && can_access_branch(actor, Some(&appt.branch_id))
}

/// Narrow a list filter to what the actor may see.
pub fn scope_filter(
    conn: &Connection,
    actor: &User,
    mut filter: AppointmentFilter,
) -> Result<AppointmentFilter, SchedulingError> {
    match actor.role {
        UserRole::Patient => filter.patient_id = Some(own_patient(conn, actor)?.id),
        UserRole::Doctor => filter.doctor_id = Some(actor.id),
        role if role.is_branch_scoped() => {
            let branch = actor
                .branch_id
                .ok_or(SchedulingError::Forbidden("Your account is not assigned to a branch"))?;
            filter.branch_id = Some(branch);
        }
        _ => {}
    }
    Ok(filter)
}

pub fn load_visible(conn: &Connection, actor: &User, id: &Uuid) -> Result<Appointment, SchedulingError> {
    let appt = db::get_appointment(conn, id)?.ok_or(SchedulingError::NotFound("Appointment"))?;
    if !can_view(conn, actor, &appt)? {
        // Hidden rows look missing.
        return Err(SchedulingError::NotFound("Appointment"));
    }
    Ok(appt)
}

// ═══════════════════════════════════════════════════════════
// Booking
// ═══════════════════════════════════════════════════════════

#[derive(Debug, Clone, Default, Deserialize)]
pub struct BookingRequest {
    /// Required for staff; patients always book for themselves.
    pub patient_id: Option<Uuid>,
    pub doctor_id: Uuid,
    /// Defaults to the doctor's branch.
    pub branch_id: Option<Uuid>,
    /// Ignored for walk-ins.
    pub scheduled_at: Option<NaiveDateTime>,
    pub duration_minutes: Option<i64>,
    #[serde(default)]
    pub reason: String,
    pub notes: Option<String>,
    #[serde(default)]
    pub emergency: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BookingKind {
    Regular,
    Emergency,
    WalkIn,
}

struct Parties {
    patient: Patient,
    doctor: User,
    branch: Branch,
}

fn resolve_parties(conn: &Connection, actor: &User, req: &BookingRequest) -> Result<Parties, SchedulingError> {
    let patient = if actor.role == UserRole::Patient {
        let own = own_patient(conn, actor)?;
        if req.patient_id.is_some_and(|id| id != own.id) {
            return Err(SchedulingError::Forbidden("Patients can only book for themselves"));
        }
        own
    } else {
        let id = req
            .patient_id
            .ok_or_else(|| SchedulingError::Invalid("patient_id is required".into()))?;
        db::get_patient(conn, &id)?.ok_or(SchedulingError::NotFound("Patient"))?
    };
    if !patient.is_active {
        return Err(SchedulingError::Invalid("Patient record is inactive".into()));
    }

    let doctor = db::get_user(conn, &req.doctor_id)?.ok_or(SchedulingError::NotFound("Doctor"))?;
    if doctor.role != UserRole::Doctor || !doctor.is_active {
        return Err(SchedulingError::Invalid("Selected user is not an active doctor".into()));
    }

    let branch_id = req
        .branch_id
        .or(doctor.branch_id)
        .or(patient.branch_id)
        .ok_or_else(|| SchedulingError::Invalid("branch_id is required".into()))?;
    let branch = db::get_branch(conn, &branch_id)?.ok_or(SchedulingError::NotFound("Branch"))?;
    if !branch.is_active {
        return Err(SchedulingError::Invalid("Branch is closed".into()));
    }
    if actor.role.is_staff() && !can_access_branch(actor, Some(&branch.id)) {
        return Err(SchedulingError::Forbidden("Cannot book outside your branch"));
    }

    Ok(Parties {
        patient,
        doctor,
        branch,
    })
}

fn book(
    conn: &Connection,
    actor: &User,
    req: &BookingRequest,
    kind: BookingKind,
    rules: &ScheduleRules,
    now: NaiveDateTime,
) -> Result<Appointment, SchedulingError> {
    let parties = resolve_parties(conn, actor, req)?;
    let duration = req.duration_minutes.unwrap_or(DEFAULT_DURATION_MINUTES);

    let scheduled_at = match kind {
        BookingKind::WalkIn => now.with_second(0).and_then(|t| t.with_nanosecond(0)).unwrap_or(now),
        _ => req
            .scheduled_at
            .ok_or_else(|| SchedulingError::Invalid("scheduled_at is required".into()))?,
    };

    match kind {
        BookingKind::Regular => {
            validate_schedule(scheduled_at, now, duration, rules)?;
            check_doctor_conflict(conn, &parties.doctor.id, scheduled_at, rules, None)?;
        }
        BookingKind::WalkIn => {
            validate_duration(duration)?;
            check_doctor_conflict(conn, &parties.doctor.id, scheduled_at, rules, None)?;
        }
        BookingKind::Emergency => validate_duration(duration)?,
    }

    let (status, decided_by) = match kind {
        BookingKind::Emergency => (AppointmentStatus::Emergency, Some(actor.id)),
        _ if actor.role == UserRole::Patient => (AppointmentStatus::Pending, None),
        _ => (AppointmentStatus::Approved, Some(actor.id)),
    };

    let ts = chrono::Utc::now();
    let appt = Appointment {
        id: Uuid::new_v4(),
        patient_id: parties.patient.id,
        doctor_id: parties.doctor.id,
        branch_id: parties.branch.id,
        scheduled_at,
        duration_minutes: duration,
        reason: req.reason.trim().to_string(),
        notes: req.notes.clone(),
        status,
        is_walk_in: kind == BookingKind::WalkIn,
        created_by: actor.id,
        decided_by,
        decision_note: None,
        reminder_sent: false,
        created_at: ts,
        updated_at: ts,
    };
    db::insert_appointment(conn, &appt)?;
    tracing::info!(
        appointment_id = %appt.id,
        doctor_id = %appt.doctor_id,
        status = %appt.status,
        "Appointment booked"
    );
    Ok(appt)
}

/// Book a regular or emergency appointment.
///
/// Patient bookings start `pending`; staff bookings are approved straight
/// away. Emergencies (staff only) skip the calendar checks.
pub fn book_appointment(
    conn: &Connection,
    actor: &User,
    req: &BookingRequest,
    rules: &ScheduleRules,
    now: NaiveDateTime,
) -> Result<Appointment, SchedulingError> {
    let kind = if req.emergency {
        if !actor.role.is_staff() {
            return Err(SchedulingError::Forbidden("Only staff can log emergencies"));
        }
        BookingKind::Emergency
    } else {
        BookingKind::Regular
    };
    book(conn, actor, req, kind, rules, now)
}

/// Register a walk-in: scheduled now, approved, conflict-checked only.
pub fn book_walk_in(
    conn: &Connection,
    actor: &User,
    req: &BookingRequest,
    rules: &ScheduleRules,
    now: NaiveDateTime,
) -> Result<Appointment, SchedulingError> {
    if !actor.role.can_manage_appointments() {
        return Err(SchedulingError::Forbidden("Only front-desk staff can register walk-ins"));
    }
    book(conn, actor, req, BookingKind::WalkIn, rules, now)
}

// ═══════════════════════════════════════════════════════════
// Changes
// ═══════════════════════════════════════════════════════════

#[derive(Debug, Clone, Default, Deserialize)]
pub struct AppointmentUpdate {
    pub scheduled_at: Option<NaiveDateTime>,
    pub duration_minutes: Option<i64>,
    pub doctor_id: Option<Uuid>,
    pub reason: Option<String>,
    pub notes: Option<String>,
}

/// Edit a pending or approved appointment. Moving it re-runs the calendar
/// checks; a patient moving their own booking sends it back for approval.
pub fn update_appointment(
    conn: &Connection,
    actor: &User,
    id: &Uuid,
    update: &AppointmentUpdate,
    rules: &ScheduleRules,
    now: NaiveDateTime,
) -> Result<Appointment, SchedulingError> {
    let mut appt = load_visible(conn, actor, id)?;
    let allowed = match actor.role {
        UserRole::Patient => true,
        UserRole::Doctor => appt.doctor_id == actor.id,
        _ => is_branch_manager_for(actor, &appt),
    };
    if !allowed {
        return Err(SchedulingError::Forbidden("Not allowed to change this appointment"));
    }
    if !matches!(appt.status, AppointmentStatus::Pending | AppointmentStatus::Approved) {
        return Err(SchedulingError::Invalid(format!(
            "A {} appointment cannot be changed",
            appt.status
        )));
    }

    let moved = update.scheduled_at.is_some_and(|t| t != appt.scheduled_at)
        || update.duration_minutes.is_some_and(|d| d != appt.duration_minutes)
        || update.doctor_id.is_some_and(|d| d != appt.doctor_id);

    if let Some(doctor_id) = update.doctor_id.filter(|d| *d != appt.doctor_id) {
        if actor.role == UserRole::Patient || actor.role == UserRole::Doctor {
            return Err(SchedulingError::Forbidden("Only front-desk staff can reassign doctors"));
        }
        let doctor = db::get_user(conn, &doctor_id)?.ok_or(SchedulingError::NotFound("Doctor"))?;
        if doctor.role != UserRole::Doctor || !doctor.is_active {
            return Err(SchedulingError::Invalid("Selected user is not an active doctor".into()));
        }
        appt.doctor_id = doctor_id;
    }
    if let Some(at) = update.scheduled_at {
        appt.scheduled_at = at;
    }
    if let Some(d) = update.duration_minutes {
        appt.duration_minutes = d;
    }
    if let Some(reason) = &update.reason {
        appt.reason = reason.trim().to_string();
    }
    if update.notes.is_some() {
        appt.notes = update.notes.clone();
    }

    if moved {
        validate_schedule(appt.scheduled_at, now, appt.duration_minutes, rules)?;
        check_doctor_conflict(conn, &appt.doctor_id, appt.scheduled_at, rules, Some(&appt.id))?;
        appt.reminder_sent = false;
        if actor.role == UserRole::Patient {
            appt.status = AppointmentStatus::Pending;
            appt.decided_by = None;
            appt.decision_note = None;
        }
    }

    db::update_appointment(conn, &appt)?;
    Ok(appt)
}

/// Workflow actions on an appointment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transition {
    Approve,
    Reject { reason: String },
    Cancel,
    Complete,
}

impl Transition {
    pub fn target(&self) -> AppointmentStatus {
        match self {
            Self::Approve => AppointmentStatus::Approved,
            Self::Reject { .. } => AppointmentStatus::Rejected,
            Self::Cancel => AppointmentStatus::Cancelled,
            Self::Complete => AppointmentStatus::Completed,
        }
    }

    pub fn action(&self) -> &'static str {
        match self {
            Self::Approve => "approve",
            Self::Reject { .. } => "reject",
            Self::Cancel => "cancel",
            Self::Complete => "complete",
        }
    }
}

fn may_apply(conn: &Connection, actor: &User, appt: &Appointment, transition: &Transition) -> Result<bool, SchedulingError> {
    let assigned_doctor = actor.role == UserRole::Doctor && appt.doctor_id == actor.id;
    Ok(match transition {
        Transition::Approve | Transition::Reject { .. } | Transition::Complete => {
            assigned_doctor || is_branch_manager_for(actor, appt)
        }
        Transition::Cancel => match actor.role {
            UserRole::Patient => own_patient(conn, actor)?.id == appt.patient_id,
            _ => is_branch_manager_for(actor, appt),
        },
    })
}

/// Apply a workflow action, enforcing who may act and the status graph.
pub fn transition(
    conn: &Connection,
    actor: &User,
    id: &Uuid,
    transition: Transition,
) -> Result<Appointment, SchedulingError> {
    let mut appt = load_visible(conn, actor, id)?;
    if !may_apply(conn, actor, &appt, &transition)? {
        return Err(SchedulingError::Forbidden("Not allowed to perform this action"));
    }

    let target = transition.target();
    if !appt.status.can_transition_to(target) {
        return Err(SchedulingError::InvalidTransition {
            from: appt.status,
            to: target,
        });
    }

    appt.status = target;
    match transition {
        Transition::Reject { reason } => {
            let reason = reason.trim();
            if reason.is_empty() {
                return Err(SchedulingError::Invalid("A rejection reason is required".into()));
            }
            appt.decided_by = Some(actor.id);
            appt.decision_note = Some(reason.to_string());
        }
        Transition::Approve | Transition::Cancel => appt.decided_by = Some(actor.id),
        Transition::Complete => {}
    }

    db::update_appointment(conn, &appt)?;
    tracing::info!(appointment_id = %appt.id, status = %appt.status, "Appointment status changed");
    Ok(appt)
}

// ═══════════════════════════════════════════════════════════
// Treatments delivered
// ═══════════════════════════════════════════════════════════

#[derive(Debug, Clone, Deserialize)]
pub struct TreatmentLine {
    pub treatment_id: Uuid,
    #[serde(default = "one")]
    pub quantity: i64,
    pub notes: Option<String>,
}

fn one() -> i64 {
    1
}

/// Record catalogue treatments against an appointment.
pub fn record_treatments(
    conn: &Connection,
    actor: &User,
    id: &Uuid,
    lines: &[TreatmentLine],
) -> Result<Vec<AppointmentTreatment>, SchedulingError> {
    let appt = load_visible(conn, actor, id)?;
    let allowed = (actor.role == UserRole::Doctor && appt.doctor_id == actor.id)
        || is_branch_manager_for(actor, &appt);
    if !allowed {
        return Err(SchedulingError::Forbidden("Not allowed to record treatments"));
    }
    if matches!(appt.status, AppointmentStatus::Rejected | AppointmentStatus::Cancelled) {
        return Err(SchedulingError::Invalid(format!(
            "Cannot record treatments on a {} appointment",
            appt.status
        )));
    }
    if lines.is_empty() {
        return Err(SchedulingError::Invalid("At least one treatment is required".into()));
    }

    let tx = conn.unchecked_transaction().map_err(DatabaseError::from)?;
    for line in lines {
        if line.quantity < 1 {
            return Err(SchedulingError::Invalid("Quantity must be at least 1".into()));
        }
        let treatment = db::get_treatment(&tx, &line.treatment_id)?
            .filter(|t| t.is_active)
            .ok_or(SchedulingError::NotFound("Treatment"))?;
        db::insert_appointment_treatment(&tx, &appt.id, &treatment.id, line.quantity, line.notes.as_deref())?;
    }
    tx.commit().map_err(DatabaseError::from)?;

    Ok(db::list_appointment_treatments(conn, &appt.id)?)
}
