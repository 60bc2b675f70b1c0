//! Invoicing, payments and insurance.
//!
//! All money is integer cents. The arithmetic helpers in this module are
//! pure; `invoices` and `insurance` persist through the repository layer
//! and `pdf` renders a printable invoice.

pub mod insurance;
pub mod invoices;
pub mod pdf;

pub use insurance::*;
pub use invoices::*;
pub use pdf::render_invoice_pdf;

use chrono::NaiveDate;
use serde::Serialize;
use uuid::Uuid;

use crate::db::DatabaseError;
use crate::models::{InsurancePolicy, InvoiceStatus};

#[derive(Debug, thiserror::Error)]
pub enum BillingError {
    #[error("{0}")]
    Invalid(String),
    #[error("Payment of {amount} exceeds outstanding balance of {balance}")]
    Overpayment { amount: i64, balance: i64 },
    #[error("Invoice is {0}")]
    InvoiceClosed(InvoiceStatus),
    #[error("{0}")]
    Conflict(String),
    #[error("{0} not found")]
    NotFound(&'static str),
    #[error("{0}")]
    Forbidden(&'static str),
    #[error("PDF error: {0}")]
    Pdf(String),
    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),
}

/// Render cents as a decimal amount, e.g. `1234.50`.
pub fn format_cents(cents: i64) -> String {
    let sign = if cents < 0 { "-" } else { "" };
    let abs = cents.unsigned_abs();
    format!("{sign}{}.{:02}", abs / 100, abs % 100)
}

/// Round half away from zero to whole cents.
fn round_cents(value: f64) -> i64 {
    value.round() as i64
}

// ═══════════════════════════════════════════════════════════
// Invoice totals
// ═══════════════════════════════════════════════════════════

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Totals {
    pub subtotal_cents: i64,
    pub discount_cents: i64,
    pub tax_cents: i64,
    pub total_cents: i64,
}

pub fn line_total(quantity: i64, unit_price_cents: i64) -> Result<i64, BillingError> {
    if quantity < 1 {
        return Err(BillingError::Invalid("Quantity must be at least 1".into()));
    }
    if unit_price_cents < 0 {
        return Err(BillingError::Invalid("Unit price cannot be negative".into()));
    }
    quantity
        .checked_mul(unit_price_cents)
        .ok_or_else(|| BillingError::Invalid("Line total is too large".into()))
}

/// `subtotal - discount + tax`, tax charged on the discounted amount.
pub fn compute_totals(
    line_totals: &[i64],
    discount_cents: i64,
    tax_rate_percent: f64,
) -> Result<Totals, BillingError> {
    let subtotal: i64 = line_totals.iter().sum();
    if discount_cents < 0 || discount_cents > subtotal {
        return Err(BillingError::Invalid(
            "Discount must be between zero and the subtotal".into(),
        ));
    }
    if !(0.0..=100.0).contains(&tax_rate_percent) {
        return Err(BillingError::Invalid("Tax rate must be between 0 and 100".into()));
    }
    let taxable = subtotal - discount_cents;
    let tax = round_cents(taxable as f64 * tax_rate_percent / 100.0);
    Ok(Totals {
        subtotal_cents: subtotal,
        discount_cents,
        tax_cents: tax,
        total_cents: taxable + tax,
    })
}

/// Status implied by how much of `total` has been paid.
pub fn status_after_payment(total_cents: i64, paid_cents: i64) -> InvoiceStatus {
    if paid_cents >= total_cents {
        InvoiceStatus::Paid
    } else if paid_cents > 0 {
        InvoiceStatus::PartiallyPaid
    } else {
        InvoiceStatus::Unpaid
    }
}

// ═══════════════════════════════════════════════════════════
// Insurance coverage
// ═══════════════════════════════════════════════════════════

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Coverage {
    pub amount_cents: i64,
    pub policy_id: Option<Uuid>,
    pub coverage_percentage: f64,
    pub covered_cents: i64,
    pub co_pay_cents: i64,
    pub patient_responsibility_cents: i64,
    /// Why coverage is zero or capped, when it is.
    pub reason: Option<String>,
}

impl Coverage {
    fn uncovered(amount_cents: i64, reason: &str) -> Self {
        Self {
            amount_cents,
            policy_id: None,
            coverage_percentage: 0.0,
            covered_cents: 0,
            co_pay_cents: 0,
            patient_responsibility_cents: amount_cents,
            reason: Some(reason.to_string()),
        }
    }
}

/// Split `amount_cents` between insurer and patient.
///
/// `already_claimed_cents` is what the policy has paid or committed this
/// year; it only matters when the policy has an annual limit.
pub fn calculate_coverage(
    amount_cents: i64,
    policy: Option<&InsurancePolicy>,
    on_date: NaiveDate,
    already_claimed_cents: i64,
) -> Coverage {
    let amount_cents = amount_cents.max(0);
    let Some(policy) = policy else {
        return Coverage::uncovered(amount_cents, "No insurance policy on file");
    };
    if !policy.is_active {
        return Coverage::uncovered(amount_cents, "Policy is inactive");
    }
    if !policy.is_valid_on(on_date) {
        return Coverage::uncovered(amount_cents, "Policy is not valid on this date");
    }

    let pct = if policy.coverage_percentage.is_finite() {
        policy.coverage_percentage.clamp(0.0, 100.0)
    } else {
        0.0
    };
    let mut covered = round_cents(amount_cents as f64 * pct / 100.0);
    let mut reason = None;
    if let Some(limit) = policy.annual_limit_cents {
        let remaining = (limit - already_claimed_cents).max(0);
        if covered > remaining {
            covered = remaining;
            reason = Some("Annual limit reached".to_string());
        }
    }

    let co_pay = policy.co_pay_cents.max(0);
    let responsibility = (amount_cents - covered + co_pay).clamp(0, amount_cents + co_pay);
    Coverage {
        amount_cents,
        policy_id: Some(policy.id),
        coverage_percentage: pct,
        covered_cents: covered,
        co_pay_cents: co_pay,
        patient_responsibility_cents: responsibility,
        reason,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn policy(pct: f64, co_pay: i64, limit: Option<i64>) -> InsurancePolicy {
        let now = Utc::now();
        InsurancePolicy {
            id: Uuid::new_v4(),
            patient_id: Uuid::new_v4(),
            provider_name: "Acme".into(),
            policy_number: "P-1".into(),
            coverage_percentage: pct,
            co_pay_cents: co_pay,
            annual_limit_cents: limit,
            valid_from: NaiveDate::from_ymd_opt(2030, 1, 1).unwrap(),
            valid_until: NaiveDate::from_ymd_opt(2030, 12, 31).unwrap(),
            is_active: true,
            created_at: now,
            updated_at: now,
        }
    }

    fn day() -> NaiveDate {
        NaiveDate::from_ymd_opt(2030, 6, 1).unwrap()
    }

    #[test]
    fn totals_apply_discount_before_tax() {
        let totals = compute_totals(&[10_000, 5_000], 1_000, 10.0).unwrap();
        assert_eq!(totals.subtotal_cents, 15_000);
        assert_eq!(totals.tax_cents, 1_400);
        assert_eq!(totals.total_cents, 15_400);
    }

    #[test]
    fn tax_rounds_to_nearest_cent() {
        // 333 * 7.5% = 24.975
        assert_eq!(compute_totals(&[333], 0, 7.5).unwrap().tax_cents, 25);
    }

    #[test]
    fn discount_cannot_exceed_subtotal() {
        assert!(compute_totals(&[500], 600, 0.0).is_err());
        assert!(compute_totals(&[500], -1, 0.0).is_err());
    }

    #[test]
    fn line_total_rejects_bad_input() {
        assert_eq!(line_total(3, 2_500).unwrap(), 7_500);
        assert!(line_total(0, 100).is_err());
        assert!(line_total(1, -5).is_err());
    }

    #[test]
    fn payment_status() {
        assert_eq!(status_after_payment(1_000, 0), InvoiceStatus::Unpaid);
        assert_eq!(status_after_payment(1_000, 400), InvoiceStatus::PartiallyPaid);
        assert_eq!(status_after_payment(1_000, 1_000), InvoiceStatus::Paid);
    }

    #[test]
    fn coverage_basic_split() {
        let p = policy(80.0, 2_000, None);
        let c = calculate_coverage(10_000, Some(&p), day(), 0);
        assert_eq!(c.covered_cents, 8_000);
        assert_eq!(c.patient_responsibility_cents, 4_000);
        assert_eq!(c.policy_id, Some(p.id));
        assert!(c.reason.is_none());
    }

    #[test]
    fn coverage_without_policy_is_zero() {
        let c = calculate_coverage(10_000, None, day(), 0);
        assert_eq!(c.covered_cents, 0);
        assert_eq!(c.patient_responsibility_cents, 10_000);
        assert!(c.reason.is_some());
    }

    #[test]
    fn coverage_outside_validity_is_zero() {
        let p = policy(80.0, 0, None);
        let later = NaiveDate::from_ymd_opt(2031, 2, 1).unwrap();
        assert_eq!(calculate_coverage(10_000, Some(&p), later, 0).covered_cents, 0);

        let mut inactive = policy(80.0, 0, None);
        inactive.is_active = false;
        assert_eq!(calculate_coverage(10_000, Some(&inactive), day(), 0).covered_cents, 0);
    }

    #[test]
    fn coverage_percentage_is_clamped() {
        let p = policy(150.0, 0, None);
        let c = calculate_coverage(10_000, Some(&p), day(), 0);
        assert_eq!(c.covered_cents, 10_000);
        assert_eq!(c.patient_responsibility_cents, 0);

        let negative = policy(-20.0, 0, None);
        assert_eq!(calculate_coverage(10_000, Some(&negative), day(), 0).covered_cents, 0);
    }

    #[test]
    fn annual_limit_caps_coverage() {
        let p = policy(100.0, 0, Some(50_000));
        let c = calculate_coverage(20_000, Some(&p), day(), 45_000);
        assert_eq!(c.covered_cents, 5_000);
        assert_eq!(c.patient_responsibility_cents, 15_000);
        assert_eq!(c.reason.as_deref(), Some("Annual limit reached"));

        let exhausted = calculate_coverage(20_000, Some(&p), day(), 60_000);
        assert_eq!(exhausted.covered_cents, 0);
    }

    #[test]
    fn cents_formatting() {
        assert_eq!(format_cents(123_450), "1234.50");
        assert_eq!(format_cents(5), "0.05");
        assert_eq!(format_cents(-250), "-2.50");
    }
}
