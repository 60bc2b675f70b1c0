use chrono::NaiveDate;
use serde::Deserialize;
use uuid::Uuid;

use super::enums::{AppointmentStatus, ClaimStatus, InvoiceStatus, UserRole};

#[derive(Debug, Clone, Default, Deserialize)]
pub struct UserFilter {
    pub role: Option<UserRole>,
    pub branch_id: Option<Uuid>,
    #[serde(default)]
    pub include_inactive: bool,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PatientFilter {
    /// Matches first name, last name, phone or email.
    pub search: Option<String>,
    pub branch_id: Option<Uuid>,
    #[serde(default)]
    pub include_inactive: bool,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct AppointmentFilter {
    pub status: Option<AppointmentStatus>,
    pub doctor_id: Option<Uuid>,
    pub patient_id: Option<Uuid>,
    pub branch_id: Option<Uuid>,
    /// Inclusive, by scheduled date.
    pub from: Option<NaiveDate>,
    /// Inclusive, by scheduled date.
    pub to: Option<NaiveDate>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct TreatmentFilter {
    pub category: Option<String>,
    #[serde(default)]
    pub include_inactive: bool,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct InvoiceFilter {
    pub status: Option<InvoiceStatus>,
    pub patient_id: Option<Uuid>,
    pub branch_id: Option<Uuid>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ClaimFilter {
    pub status: Option<ClaimStatus>,
    pub policy_id: Option<Uuid>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct AuditFilter {
    pub user_id: Option<String>,
    pub entity_type: Option<String>,
    pub limit: Option<i64>,
}
