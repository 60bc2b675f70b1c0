use chrono::{Datelike, NaiveDate, Utc};
use rusqlite::Connection;
use serde::Deserialize;
use uuid::Uuid;

use super::invoices::{apply_payment_in, load_visible_invoice, PaymentRequest};
use super::{calculate_coverage, BillingError, Coverage};
use crate::db::{self, DatabaseError};
use crate::models::*;

// ═══════════════════════════════════════════════════════════
// Policies
// ═══════════════════════════════════════════════════════════

#[derive(Debug, Clone, Deserialize)]
pub struct PolicyInput {
    pub patient_id: Uuid,
    pub provider_name: String,
    pub policy_number: String,
    pub coverage_percentage: f64,
    #[serde(default)]
    pub co_pay_cents: i64,
    pub annual_limit_cents: Option<i64>,
    pub valid_from: NaiveDate,
    pub valid_until: NaiveDate,
}

fn validate_policy(input: &PolicyInput) -> Result<(), BillingError> {
    if input.provider_name.trim().is_empty() || input.policy_number.trim().is_empty() {
        return Err(BillingError::Invalid("Provider and policy number are required".into()));
    }
    if !(0.0..=100.0).contains(&input.coverage_percentage) {
        return Err(BillingError::Invalid("Coverage percentage must be between 0 and 100".into()));
    }
    if input.co_pay_cents < 0 || input.annual_limit_cents.is_some_and(|l| l < 0) {
        return Err(BillingError::Invalid("Amounts cannot be negative".into()));
    }
    if input.valid_from > input.valid_until {
        return Err(BillingError::Invalid("valid_from must not be after valid_until".into()));
    }
    Ok(())
}

fn duplicate_policy(e: DatabaseError) -> BillingError {
    if e.is_unique_violation() {
        BillingError::Conflict("This provider already has a policy with that number".into())
    } else {
        BillingError::Database(e)
    }
}

pub fn create_policy(conn: &Connection, input: &PolicyInput) -> Result<InsurancePolicy, BillingError> {
    validate_policy(input)?;
    db::get_patient(conn, &input.patient_id)?.ok_or(BillingError::NotFound("Patient"))?;
    let now = Utc::now();
    let policy = InsurancePolicy {
        id: Uuid::new_v4(),
        patient_id: input.patient_id,
        provider_name: input.provider_name.trim().to_string(),
        policy_number: input.policy_number.trim().to_string(),
        coverage_percentage: input.coverage_percentage,
        co_pay_cents: input.co_pay_cents,
        annual_limit_cents: input.annual_limit_cents,
        valid_from: input.valid_from,
        valid_until: input.valid_until,
        is_active: true,
        created_at: now,
        updated_at: now,
    };
    db::insert_policy(conn, &policy).map_err(duplicate_policy)?;
    Ok(policy)
}

pub fn update_policy(conn: &Connection, id: &Uuid, input: &PolicyInput) -> Result<InsurancePolicy, BillingError> {
    validate_policy(input)?;
    let mut policy = db::get_policy(conn, id)?.ok_or(BillingError::NotFound("Insurance policy"))?;
    if policy.patient_id != input.patient_id {
        return Err(BillingError::Invalid("A policy cannot move to another patient".into()));
    }
    policy.provider_name = input.provider_name.trim().to_string();
    policy.policy_number = input.policy_number.trim().to_string();
    policy.coverage_percentage = input.coverage_percentage;
    policy.co_pay_cents = input.co_pay_cents;
    policy.annual_limit_cents = input.annual_limit_cents;
    policy.valid_from = input.valid_from;
    policy.valid_until = input.valid_until;
    db::update_policy(conn, &policy).map_err(duplicate_policy)?;
    Ok(policy)
}

pub fn deactivate_policy(conn: &Connection, id: &Uuid) -> Result<InsurancePolicy, BillingError> {
    let mut policy = db::get_policy(conn, id)?.ok_or(BillingError::NotFound("Insurance policy"))?;
    policy.is_active = false;
    db::update_policy(conn, &policy)?;
    Ok(policy)
}

// ═══════════════════════════════════════════════════════════
// Coverage estimate
// ═══════════════════════════════════════════════════════════

fn policy_for_invoice(
    conn: &Connection,
    invoice: &Invoice,
    policy_id: Option<&Uuid>,
    on_date: NaiveDate,
) -> Result<Option<InsurancePolicy>, BillingError> {
    match policy_id {
        Some(id) => {
            let policy = db::get_policy(conn, id)?.ok_or(BillingError::NotFound("Insurance policy"))?;
            if policy.patient_id != invoice.patient_id {
                return Err(BillingError::Invalid("Policy belongs to another patient".into()));
            }
            Ok(Some(policy))
        }
        None => Ok(db::find_applicable_policy(conn, &invoice.patient_id, &on_date)?),
    }
}

/// Coverage the patient's policy would give for an invoice's total.
pub fn estimate_invoice_coverage(
    conn: &Connection,
    actor: &User,
    invoice_id: &Uuid,
    policy_id: Option<&Uuid>,
    on_date: NaiveDate,
) -> Result<Coverage, BillingError> {
    let invoice = load_visible_invoice(conn, actor, invoice_id)?;
    let policy = policy_for_invoice(conn, &invoice, policy_id, on_date)?;
    let claimed = match &policy {
        Some(p) => db::claimed_total_for_year(conn, &p.id, on_date.year())?,
        None => 0,
    };
    Ok(calculate_coverage(invoice.total_cents, policy.as_ref(), on_date, claimed))
}

// ═══════════════════════════════════════════════════════════
// Claims
// ═══════════════════════════════════════════════════════════

#[derive(Debug, Clone, Deserialize)]
pub struct ClaimRequest {
    pub invoice_id: Uuid,
    pub policy_id: Option<Uuid>,
    pub notes: Option<String>,
}

fn require_billing_role(actor: &User) -> Result<(), BillingError> {
    if !actor.role.can_manage_billing() {
        return Err(BillingError::Forbidden("Billing staff only"));
    }
    Ok(())
}

/// File a claim for the covered share of an invoice.
pub fn submit_claim(
    conn: &Connection,
    actor: &User,
    req: &ClaimRequest,
    today: NaiveDate,
) -> Result<InsuranceClaim, BillingError> {
    require_billing_role(actor)?;
    let invoice = load_visible_invoice(conn, actor, &req.invoice_id)?;
    if !invoice.status.is_open() {
        return Err(BillingError::InvoiceClosed(invoice.status));
    }
    if !db::list_live_claims_for_invoice(conn, &invoice.id)?.is_empty() {
        return Err(BillingError::Conflict("Invoice already has an open claim".into()));
    }

    let policy = policy_for_invoice(conn, &invoice, req.policy_id.as_ref(), today)?;
    let claimed = match &policy {
        Some(p) => db::claimed_total_for_year(conn, &p.id, today.year())?,
        None => 0,
    };
    // Only the unpaid part of the invoice is claimable.
    let coverage = calculate_coverage(invoice.balance_cents(), policy.as_ref(), today, claimed);
    let (Some(policy_id), true) = (coverage.policy_id, coverage.covered_cents > 0) else {
        return Err(BillingError::Invalid(
            coverage
                .reason
                .unwrap_or_else(|| "Nothing to claim for this invoice".into()),
        ));
    };

    let claim = InsuranceClaim {
        id: Uuid::new_v4(),
        claim_number: db::next_claim_number(conn, today.year())?,
        policy_id,
        invoice_id: invoice.id,
        appointment_id: invoice.appointment_id,
        claimed_cents: coverage.covered_cents,
        approved_cents: None,
        status: ClaimStatus::Submitted,
        notes: req.notes.clone(),
        submitted_at: Utc::now(),
        decided_at: None,
        decided_by: None,
    };
    db::insert_claim(conn, &claim)?;
    tracing::info!(claim_id = %claim.id, amount = claim.claimed_cents, "Insurance claim submitted");
    Ok(claim)
}

/// Insurer-side claim decisions recorded by billing staff.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClaimAction {
    Review,
    /// Approve for the claimed amount or a lower one.
    Approve { approved_cents: Option<i64> },
    Reject { reason: String },
    Pay,
}

impl ClaimAction {
    fn target(&self) -> ClaimStatus {
        match self {
            Self::Review => ClaimStatus::UnderReview,
            Self::Approve { .. } => ClaimStatus::Approved,
            Self::Reject { .. } => ClaimStatus::Rejected,
            Self::Pay => ClaimStatus::Paid,
        }
    }
}

pub fn load_visible_claim(conn: &Connection, actor: &User, id: &Uuid) -> Result<InsuranceClaim, BillingError> {
    let claim = db::get_claim(conn, id)?.ok_or(BillingError::NotFound("Insurance claim"))?;
    // Visibility follows the invoice.
    load_visible_invoice(conn, actor, &claim.invoice_id).map_err(|e| match e {
        BillingError::NotFound(_) => BillingError::NotFound("Insurance claim"),
        other => other,
    })?;
    Ok(claim)
}

/// Advance a claim. Paying it posts an `insurance` payment on the invoice.
pub fn advance_claim(
    conn: &Connection,
    actor: &User,
    id: &Uuid,
    action: ClaimAction,
) -> Result<InsuranceClaim, BillingError> {
    require_billing_role(actor)?;
    let mut claim = load_visible_claim(conn, actor, id)?;
    let target = action.target();
    if !claim.status.can_transition_to(target) {
        return Err(BillingError::Conflict(format!(
            "Claim cannot move from {} to {}",
            claim.status, target
        )));
    }

    match &action {
        ClaimAction::Review => {}
        ClaimAction::Approve { approved_cents } => {
            let approved = approved_cents.unwrap_or(claim.claimed_cents);
            if approved <= 0 || approved > claim.claimed_cents {
                return Err(BillingError::Invalid(
                    "Approved amount must be positive and not exceed the claim".into(),
                ));
            }
            claim.approved_cents = Some(approved);
        }
        ClaimAction::Reject { reason } => {
            if reason.trim().is_empty() {
                return Err(BillingError::Invalid("A rejection reason is required".into()));
            }
            claim.approved_cents = Some(0);
            claim.notes = Some(reason.trim().to_string());
        }
        ClaimAction::Pay => {}
    }
    if target != ClaimStatus::Paid {
        claim.decided_at = Some(Utc::now());
        claim.decided_by = Some(actor.id);
    }
    claim.status = target;

    let tx = conn.unchecked_transaction().map_err(DatabaseError::from)?;
    if action == ClaimAction::Pay {
        let approved = claim.approved_cents.unwrap_or(claim.claimed_cents);
        let invoice = db::get_invoice(&tx, &claim.invoice_id)?.ok_or(BillingError::NotFound("Invoice"))?;
        let amount = approved.min(invoice.balance_cents());
        if amount > 0 {
            let (_, invoice) = apply_payment_in(
                &tx,
                &invoice.id,
                &PaymentRequest {
                    amount_cents: amount,
                    method: PaymentMethod::Insurance,
                    reference: Some(claim.claim_number.clone()),
                },
                Some(&actor.id),
            )?;
            db::update_invoice_balance(
                &tx,
                &invoice.id,
                invoice.amount_paid_cents,
                invoice.insurance_covered_cents + amount,
                invoice.status,
            )?;
        }
    }
    db::update_claim(&tx, &claim)?;
    tx.commit().map_err(DatabaseError::from)?;

    tracing::info!(claim_id = %claim.id, status = %claim.status, "Insurance claim updated");
    Ok(claim)
}
