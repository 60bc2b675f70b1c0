//! Invoices and payments (`/api/invoices`).

use axum::extract::{Path, Query, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::{Extension, Json};
use chrono::Local;
use serde::Serialize;

use crate::api::endpoints::{parse_id, record};
use crate::api::error::ApiError;
use crate::api::types::{ApiContext, AuthUser};
use crate::billing::{self, BillingDefaults, CreateInvoiceRequest, InvoiceDetail, PaymentRequest};
use crate::db;
use crate::models::{Invoice, InvoiceFilter, Payment};

/// `GET /api/invoices?status=&patient_id=&branch_id=`
pub async fn list(
    State(ctx): State<ApiContext>,
    Extension(auth_user): Extension<AuthUser>,
    Query(filter): Query<InvoiceFilter>,
) -> Result<Json<Vec<Invoice>>, ApiError> {
    let conn = ctx.core.open_db()?;
    let filter = billing::scope_invoice_filter(&conn, &auth_user.user, filter)?;
    Ok(Json(db::list_invoices(&conn, &filter)?))
}

/// `GET /api/invoices/:id` — with lines and payments.
pub async fn detail(
    State(ctx): State<ApiContext>,
    Extension(auth_user): Extension<AuthUser>,
    Path(id): Path<String>,
) -> Result<Json<InvoiceDetail>, ApiError> {
    let id = parse_id(&id, "invoice")?;
    let conn = ctx.core.open_db()?;
    let invoice = billing::load_visible_invoice(&conn, &auth_user.user, &id)?;
    Ok(Json(billing::load_detail(&conn, invoice)?))
}

/// `POST /api/invoices`
pub async fn create(
    State(ctx): State<ApiContext>,
    Extension(auth_user): Extension<AuthUser>,
    Json(req): Json<CreateInvoiceRequest>,
) -> Result<(StatusCode, Json<InvoiceDetail>), ApiError> {
    let defaults = BillingDefaults {
        tax_rate_percent: ctx.core.config.tax_rate_percent,
        payment_terms_days: ctx.core.config.payment_terms_days,
    };
    let conn = ctx.core.open_db()?;
    let detail = billing::create_invoice(
        &conn,
        &auth_user.user,
        &req,
        &defaults,
        Local::now().date_naive(),
    )?;
    record(
        &conn,
        &auth_user,
        "create",
        "invoice",
        &detail.invoice.id,
        Some(detail.invoice.invoice_number.clone()),
    );
    Ok((StatusCode::CREATED, Json(detail)))
}

/// `POST /api/invoices/:id/cancel`
pub async fn cancel(
    State(ctx): State<ApiContext>,
    Extension(auth_user): Extension<AuthUser>,
    Path(id): Path<String>,
) -> Result<Json<Invoice>, ApiError> {
    let id = parse_id(&id, "invoice")?;
    let conn = ctx.core.open_db()?;
    let invoice = billing::cancel_invoice(&conn, &auth_user.user, &id)?;
    record(&conn, &auth_user, "cancel", "invoice", &invoice.id, None);
    Ok(Json(invoice))
}

/// `GET /api/invoices/:id/pdf`
pub async fn pdf(
    State(ctx): State<ApiContext>,
    Extension(auth_user): Extension<AuthUser>,
    Path(id): Path<String>,
) -> Result<Response, ApiError> {
    let id = parse_id(&id, "invoice")?;
    let conn = ctx.core.open_db()?;
    let invoice = billing::load_visible_invoice(&conn, &auth_user.user, &id)?;
    let items = db::list_invoice_items(&conn, &invoice.id)?;
    let payments = db::list_payments_for_invoice(&conn, &invoice.id)?;
    let patient = db::get_patient(&conn, &invoice.patient_id)?
        .ok_or_else(|| ApiError::NotFound("Patient not found".into()))?;
    let branch = db::get_branch(&conn, &invoice.branch_id)?
        .ok_or_else(|| ApiError::NotFound("Branch not found".into()))?;
    drop(conn);

    let bytes = billing::render_invoice_pdf(&invoice, &items, &payments, &patient, &branch)?;
    let disposition = format!("inline; filename=\"{}.pdf\"", invoice.invoice_number);
    Ok((
        [
            (header::CONTENT_TYPE, "application/pdf".to_string()),
            (header::CONTENT_DISPOSITION, disposition),
        ],
        bytes,
    )
        .into_response())
}

/// `GET /api/invoices/:id/payments`
pub async fn payments(
    State(ctx): State<ApiContext>,
    Extension(auth_user): Extension<AuthUser>,
    Path(id): Path<String>,
) -> Result<Json<Vec<Payment>>, ApiError> {
    let id = parse_id(&id, "invoice")?;
    let conn = ctx.core.open_db()?;
    let invoice = billing::load_visible_invoice(&conn, &auth_user.user, &id)?;
    Ok(Json(db::list_payments_for_invoice(&conn, &invoice.id)?))
}

#[derive(Serialize)]
pub struct PaymentResponse {
    pub payment: Payment,
    pub invoice: Invoice,
}

/// `POST /api/invoices/:id/payments`
pub async fn add_payment(
    State(ctx): State<ApiContext>,
    Extension(auth_user): Extension<AuthUser>,
    Path(id): Path<String>,
    Json(req): Json<PaymentRequest>,
) -> Result<(StatusCode, Json<PaymentResponse>), ApiError> {
    let id = parse_id(&id, "invoice")?;
    let conn = ctx.core.open_db()?;
    let (payment, invoice) = billing::record_payment(&conn, &auth_user.user, &id, &req)?;
    record(
        &conn,
        &auth_user,
        "payment",
        "invoice",
        &invoice.id,
        Some(format!("{} {}", payment.method, billing::format_cents(payment.amount_cents))),
    );
    Ok((StatusCode::CREATED, Json(PaymentResponse { payment, invoice })))
}
