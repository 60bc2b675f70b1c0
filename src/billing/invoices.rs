use chrono::{Duration, NaiveDate, Utc};
use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{compute_totals, line_total, status_after_payment, BillingError};
use crate::auth::can_access_branch;
use crate::db::{self, DatabaseError};
use crate::models::*;

/// Invoice-level defaults taken from configuration.
#[derive(Debug, Clone, Copy)]
pub struct BillingDefaults {
    pub tax_rate_percent: f64,
    pub payment_terms_days: i64,
}

impl Default for BillingDefaults {
    fn default() -> Self {
        Self {
            tax_rate_percent: 0.0,
            payment_terms_days: 30,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct LineInput {
    pub treatment_id: Option<Uuid>,
    /// Defaults to the treatment name.
    pub description: Option<String>,
    #[serde(default = "one")]
    pub quantity: i64,
    /// Defaults to the catalogue price.
    pub unit_price_cents: Option<i64>,
}

fn one() -> i64 {
    1
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CreateInvoiceRequest {
    pub patient_id: Uuid,
    pub branch_id: Option<Uuid>,
    /// Build the lines from treatments recorded on this appointment.
    pub from_appointment_id: Option<Uuid>,
    #[serde(default)]
    pub items: Vec<LineInput>,
    #[serde(default)]
    pub discount_cents: i64,
    pub tax_rate_percent: Option<f64>,
    pub due_date: Option<NaiveDate>,
    pub notes: Option<String>,
}

/// Invoice with its lines and payments.
#[derive(Debug, Clone, Serialize)]
pub struct InvoiceDetail {
    #[serde(flatten)]
    pub invoice: Invoice,
    pub balance_cents: i64,
    pub items: Vec<InvoiceItem>,
    pub payments: Vec<Payment>,
}

pub fn load_detail(conn: &Connection, invoice: Invoice) -> Result<InvoiceDetail, BillingError> {
    let items = db::list_invoice_items(conn, &invoice.id)?;
    let payments = db::list_payments_for_invoice(conn, &invoice.id)?;
    Ok(InvoiceDetail {
        balance_cents: invoice.balance_cents(),
        invoice,
        items,
        payments,
    })
}

pub fn can_view_invoice(conn: &Connection, actor: &User, invoice: &Invoice) -> Result<bool, BillingError> {
    Ok(match actor.role {
        UserRole::Patient => db::get_patient_by_user(conn, &actor.id)?
            .is_some_and(|p| p.id == invoice.patient_id),
        UserRole::Doctor => false,
        _ => can_access_branch(actor, Some(&invoice.branch_id)),
    })
}

/// Fetch an invoice the actor may see; hidden invoices look missing.
pub fn load_visible_invoice(conn: &Connection, actor: &User, id: &Uuid) -> Result<Invoice, BillingError> {
    let invoice = db::get_invoice(conn, id)?.ok_or(BillingError::NotFound("Invoice"))?;
    if !can_view_invoice(conn, actor, &invoice)? {
        return Err(BillingError::NotFound("Invoice"));
    }
    Ok(invoice)
}

/// Narrow a list filter to what the actor may see.
pub fn scope_invoice_filter(
    conn: &Connection,
    actor: &User,
    mut filter: InvoiceFilter,
) -> Result<InvoiceFilter, BillingError> {
    match actor.role {
        UserRole::Patient => {
            let patient = db::get_patient_by_user(conn, &actor.id)?
                .ok_or(BillingError::Forbidden("No patient record is linked to this account"))?;
            filter.patient_id = Some(patient.id);
        }
        UserRole::Doctor => return Err(BillingError::Forbidden("Billing is not available to doctors")),
        role if role.is_branch_scoped() => {
            let branch = actor
                .branch_id
                .ok_or(BillingError::Forbidden("Your account is not assigned to a branch"))?;
            filter.branch_id = Some(branch);
        }
        _ => {}
    }
    Ok(filter)
}

fn require_biller(actor: &User, branch_id: &Uuid) -> Result<(), BillingError> {
    if !actor.role.can_manage_billing() {
        return Err(BillingError::Forbidden("Billing staff only"));
    }
    if !can_access_branch(actor, Some(branch_id)) {
        return Err(BillingError::Forbidden("Invoice belongs to another branch"));
    }
    Ok(())
}

fn resolve_line(conn: &Connection, input: &LineInput) -> Result<(Option<Uuid>, String, i64), BillingError> {
    let treatment = match input.treatment_id {
        Some(id) => Some(db::get_treatment(conn, &id)?.ok_or(BillingError::NotFound("Treatment"))?),
        None => None,
    };
    let description = input
        .description
        .as_deref()
        .map(str::trim)
        .filter(|d| !d.is_empty())
        .map(str::to_string)
        .or_else(|| treatment.as_ref().map(|t| t.name.clone()))
        .ok_or_else(|| BillingError::Invalid("Each line needs a description or treatment".into()))?;
    let unit_price = input
        .unit_price_cents
        .or_else(|| treatment.as_ref().map(|t| t.price_cents))
        .ok_or_else(|| BillingError::Invalid("Each line needs a price or treatment".into()))?;
    Ok((treatment.map(|t| t.id), description, unit_price))
}

/// Create an invoice from explicit lines or from the treatments recorded on
/// an appointment.
pub fn create_invoice(
    conn: &Connection,
    actor: &User,
    req: &CreateInvoiceRequest,
    defaults: &BillingDefaults,
    today: NaiveDate,
) -> Result<InvoiceDetail, BillingError> {
    let patient = db::get_patient(conn, &req.patient_id)?.ok_or(BillingError::NotFound("Patient"))?;

    let appointment = match req.from_appointment_id {
        Some(id) => {
            let appt = db::get_appointment(conn, &id)?.ok_or(BillingError::NotFound("Appointment"))?;
            if appt.patient_id != patient.id {
                return Err(BillingError::Invalid("Appointment belongs to another patient".into()));
            }
            Some(appt)
        }
        None => None,
    };

    let branch_id = req
        .branch_id
        .or(appointment.as_ref().map(|a| a.branch_id))
        .or(patient.branch_id)
        .or(actor.branch_id)
        .ok_or_else(|| BillingError::Invalid("branch_id is required".into()))?;
    db::get_branch(conn, &branch_id)?.ok_or(BillingError::NotFound("Branch"))?;
    require_biller(actor, &branch_id)?;

    let mut inputs: Vec<LineInput> = req.items.clone();
    if let Some(appt) = &appointment {
        for t in db::list_appointment_treatments(conn, &appt.id)? {
            inputs.push(LineInput {
                treatment_id: Some(t.treatment_id),
                description: Some(t.treatment_name),
                quantity: t.quantity,
                unit_price_cents: Some(t.unit_price_cents),
            });
        }
    }
    if inputs.is_empty() {
        return Err(BillingError::Invalid("An invoice needs at least one line".into()));
    }

    let invoice_id = Uuid::new_v4();
    let mut items = Vec::with_capacity(inputs.len());
    for input in &inputs {
        let (treatment_id, description, unit_price) = resolve_line(conn, input)?;
        items.push(InvoiceItem {
            id: Uuid::new_v4(),
            invoice_id,
            treatment_id,
            description,
            quantity: input.quantity,
            unit_price_cents: unit_price,
            line_total_cents: line_total(input.quantity, unit_price)?,
        });
    }

    let line_totals: Vec<i64> = items.iter().map(|i| i.line_total_cents).collect();
    let totals = compute_totals(
        &line_totals,
        req.discount_cents,
        req.tax_rate_percent.unwrap_or(defaults.tax_rate_percent),
    )?;
    let due_date = req
        .due_date
        .unwrap_or(today + Duration::days(defaults.payment_terms_days));
    if due_date < today {
        return Err(BillingError::Invalid("Due date cannot be in the past".into()));
    }

    let now = Utc::now();
    let invoice = Invoice {
        id: invoice_id,
        invoice_number: db::next_invoice_number(conn, &today)?,
        patient_id: patient.id,
        branch_id,
        appointment_id: appointment.as_ref().map(|a| a.id),
        subtotal_cents: totals.subtotal_cents,
        discount_cents: totals.discount_cents,
        tax_cents: totals.tax_cents,
        total_cents: totals.total_cents,
        insurance_covered_cents: 0,
        amount_paid_cents: 0,
        status: status_after_payment(totals.total_cents, 0),
        due_date,
        notes: req.notes.clone(),
        created_by: actor.id,
        created_at: now,
        updated_at: now,
    };
    db::insert_invoice(conn, &invoice, &items).map_err(|e| {
        if e.is_unique_violation() {
            BillingError::Conflict("Invoice number already taken, retry".into())
        } else {
            BillingError::Database(e)
        }
    })?;
    tracing::info!(
        invoice_id = %invoice.id,
        number = %invoice.invoice_number,
        total = invoice.total_cents,
        "Invoice created"
    );

    Ok(InvoiceDetail {
        balance_cents: invoice.balance_cents(),
        invoice,
        items,
        payments: Vec::new(),
    })
}

/// Cancel an invoice nothing has been paid on.
pub fn cancel_invoice(conn: &Connection, actor: &User, id: &Uuid) -> Result<Invoice, BillingError> {
    let mut invoice = load_visible_invoice(conn, actor, id)?;
    require_biller(actor, &invoice.branch_id)?;
    if !invoice.status.is_open() {
        return Err(BillingError::InvoiceClosed(invoice.status));
    }
    if invoice.amount_paid_cents > 0 {
        return Err(BillingError::Conflict("Cannot cancel an invoice with payments".into()));
    }
    db::set_invoice_status(conn, &invoice.id, InvoiceStatus::Cancelled)?;
    invoice.status = InvoiceStatus::Cancelled;
    Ok(invoice)
}

#[derive(Debug, Clone, Deserialize)]
pub struct PaymentRequest {
    pub amount_cents: i64,
    pub method: PaymentMethod,
    pub reference: Option<String>,
}

/// Apply a payment against the invoice balance. Runs in one transaction so
/// concurrent payments cannot overshoot the total.
pub fn apply_payment(
    conn: &Connection,
    invoice_id: &Uuid,
    req: &PaymentRequest,
    received_by: Option<&Uuid>,
) -> Result<(Payment, Invoice), BillingError> {
    let tx = conn.unchecked_transaction().map_err(DatabaseError::from)?;
    let applied = apply_payment_in(&tx, invoice_id, req, received_by)?;
    tx.commit().map_err(DatabaseError::from)?;
    Ok(applied)
}

/// [`apply_payment`] for callers already inside a transaction.
pub(crate) fn apply_payment_in(
    tx: &Connection,
    invoice_id: &Uuid,
    req: &PaymentRequest,
    received_by: Option<&Uuid>,
) -> Result<(Payment, Invoice), BillingError> {
    if req.amount_cents <= 0 {
        return Err(BillingError::Invalid("Payment amount must be positive".into()));
    }

    let mut invoice = db::get_invoice(tx, invoice_id)?.ok_or(BillingError::NotFound("Invoice"))?;
    if !invoice.status.is_open() {
        return Err(BillingError::InvoiceClosed(invoice.status));
    }
    let balance = invoice.balance_cents();
    if req.amount_cents > balance {
        return Err(BillingError::Overpayment {
            amount: req.amount_cents,
            balance,
        });
    }

    let payment = Payment {
        id: Uuid::new_v4(),
        invoice_id: invoice.id,
        amount_cents: req.amount_cents,
        method: req.method,
        reference: req.reference.clone(),
        received_by: received_by.copied(),
        paid_at: Utc::now(),
    };
    db::insert_payment(tx, &payment)?;

    invoice.amount_paid_cents += req.amount_cents;
    let status = status_after_payment(invoice.total_cents, invoice.amount_paid_cents);
    // A partial payment keeps an overdue invoice flagged overdue.
    invoice.status = if status == InvoiceStatus::PartiallyPaid && invoice.status == InvoiceStatus::Overdue {
        InvoiceStatus::Overdue
    } else {
        status
    };
    db::update_invoice_balance(
        tx,
        &invoice.id,
        invoice.amount_paid_cents,
        invoice.insurance_covered_cents,
        invoice.status,
    )?;

    tracing::info!(
        invoice_id = %invoice.id,
        amount = payment.amount_cents,
        status = %invoice.status,
        "Payment recorded"
    );
    Ok((payment, invoice))
}

/// Front-desk payment entry.
pub fn record_payment(
    conn: &Connection,
    actor: &User,
    invoice_id: &Uuid,
    req: &PaymentRequest,
) -> Result<(Payment, Invoice), BillingError> {
    let invoice = load_visible_invoice(conn, actor, invoice_id)?;
    require_biller(actor, &invoice.branch_id)?;
    apply_payment(conn, &invoice.id, req, Some(&actor.id))
}

/// Flag open invoices past their due date as overdue. Returns them.
pub fn mark_overdue(conn: &Connection, today: NaiveDate) -> Result<Vec<Invoice>, BillingError> {
    let mut past_due = db::list_past_due(conn, &today)?;
    for invoice in past_due.iter_mut() {
        if invoice.status != InvoiceStatus::Overdue {
            db::set_invoice_status(conn, &invoice.id, InvoiceStatus::Overdue)?;
            invoice.status = InvoiceStatus::Overdue;
        }
    }
    Ok(past_due)
}
