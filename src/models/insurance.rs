use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::enums::ClaimStatus;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InsurancePolicy {
    pub id: Uuid,
    pub patient_id: Uuid,
    pub provider_name: String,
    pub policy_number: String,
    /// 0–100.
    pub coverage_percentage: f64,
    pub co_pay_cents: i64,
    pub annual_limit_cents: Option<i64>,
    pub valid_from: NaiveDate,
    pub valid_until: NaiveDate,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl InsurancePolicy {
    pub fn is_valid_on(&self, date: NaiveDate) -> bool {
        self.is_active && self.valid_from <= date && date <= self.valid_until
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InsuranceClaim {
    pub id: Uuid,
    pub claim_number: String,
    pub policy_id: Uuid,
    pub invoice_id: Uuid,
    pub appointment_id: Option<Uuid>,
    pub claimed_cents: i64,
    pub approved_cents: Option<i64>,
    pub status: ClaimStatus,
    pub notes: Option<String>,
    pub submitted_at: DateTime<Utc>,
    pub decided_at: Option<DateTime<Utc>>,
    pub decided_by: Option<Uuid>,
}
