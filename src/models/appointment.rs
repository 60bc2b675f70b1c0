use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::enums::AppointmentStatus;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Appointment {
    pub id: Uuid,
    pub patient_id: Uuid,
    pub doctor_id: Uuid,
    pub branch_id: Uuid,
    /// Clinic-local wall clock time.
    pub scheduled_at: NaiveDateTime,
    pub duration_minutes: i64,
    pub reason: String,
    pub notes: Option<String>,
    pub status: AppointmentStatus,
    pub is_walk_in: bool,
    pub created_by: Uuid,
    pub decided_by: Option<Uuid>,
    pub decision_note: Option<String>,
    pub reminder_sent: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Treatment delivered during an appointment, later billed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppointmentTreatment {
    pub id: Uuid,
    pub appointment_id: Uuid,
    pub treatment_id: Uuid,
    pub treatment_name: String,
    pub unit_price_cents: i64,
    pub quantity: i64,
    pub notes: Option<String>,
}
