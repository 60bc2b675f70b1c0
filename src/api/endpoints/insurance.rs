//! Insurance policies, coverage estimates and claims (`/api/insurance`).
//!
//! Policy and claim writes are billing-staff operations. Policies for a
//! patient are listed under `/api/patients/:id/policies`.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::{Extension, Json};
use chrono::Local;
use serde::Deserialize;
use uuid::Uuid;

use crate::api::endpoints::patients::load_visible_patient;
use crate::api::endpoints::{parse_id, record};
use crate::api::error::ApiError;
use crate::api::types::{ApiContext, AuthUser};
use crate::billing::{self, ClaimAction, ClaimRequest, Coverage, PolicyInput};
use crate::db;
use crate::models::{ClaimFilter, InsuranceClaim, InsurancePolicy};

fn require_biller(auth_user: &AuthUser) -> Result<(), ApiError> {
    if !auth_user.user.role.can_manage_billing() {
        return Err(ApiError::Forbidden("Billing staff only".into()));
    }
    Ok(())
}

// ── Policies ────────────────────────────────────────────────

/// `POST /api/insurance/policies`
pub async fn create_policy(
    State(ctx): State<ApiContext>,
    Extension(auth_user): Extension<AuthUser>,
    Json(input): Json<PolicyInput>,
) -> Result<(StatusCode, Json<InsurancePolicy>), ApiError> {
    require_biller(&auth_user)?;
    let conn = ctx.core.open_db()?;
    load_visible_patient(&conn, &auth_user.user, &input.patient_id)?;
    let policy = billing::create_policy(&conn, &input)?;
    record(&conn, &auth_user, "create", "insurance_policy", &policy.id, Some(policy.provider_name.clone()));
    Ok((StatusCode::CREATED, Json(policy)))
}

fn visible_policy(
    conn: &rusqlite::Connection,
    auth_user: &AuthUser,
    id: &Uuid,
) -> Result<InsurancePolicy, ApiError> {
    let policy = db::get_policy(conn, id)?
        .ok_or_else(|| ApiError::NotFound("Insurance policy not found".into()))?;
    load_visible_patient(conn, &auth_user.user, &policy.patient_id)
        .map_err(|_| ApiError::NotFound("Insurance policy not found".into()))?;
    Ok(policy)
}

/// `PUT /api/insurance/policies/:id`
pub async fn update_policy(
    State(ctx): State<ApiContext>,
    Extension(auth_user): Extension<AuthUser>,
    Path(id): Path<String>,
    Json(input): Json<PolicyInput>,
) -> Result<Json<InsurancePolicy>, ApiError> {
    require_biller(&auth_user)?;
    let id = parse_id(&id, "policy")?;
    let conn = ctx.core.open_db()?;
    visible_policy(&conn, &auth_user, &id)?;
    let policy = billing::update_policy(&conn, &id, &input)?;
    record(&conn, &auth_user, "update", "insurance_policy", &policy.id, None);
    Ok(Json(policy))
}

/// `DELETE /api/insurance/policies/:id` — soft delete.
pub async fn deactivate_policy(
    State(ctx): State<ApiContext>,
    Extension(auth_user): Extension<AuthUser>,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    require_biller(&auth_user)?;
    let id = parse_id(&id, "policy")?;
    let conn = ctx.core.open_db()?;
    visible_policy(&conn, &auth_user, &id)?;
    let policy = billing::deactivate_policy(&conn, &id)?;
    record(&conn, &auth_user, "deactivate", "insurance_policy", &policy.id, None);
    Ok(StatusCode::NO_CONTENT)
}

// ── Coverage ────────────────────────────────────────────────

#[derive(Deserialize)]
pub struct CoverageQuery {
    pub invoice_id: Uuid,
    pub policy_id: Option<Uuid>,
}

/// `GET /api/insurance/coverage?invoice_id=&policy_id=`
pub async fn coverage(
    State(ctx): State<ApiContext>,
    Extension(auth_user): Extension<AuthUser>,
    Query(query): Query<CoverageQuery>,
) -> Result<Json<Coverage>, ApiError> {
    let conn = ctx.core.open_db()?;
    let estimate = billing::estimate_invoice_coverage(
        &conn,
        &auth_user.user,
        &query.invoice_id,
        query.policy_id.as_ref(),
        Local::now().date_naive(),
    )?;
    Ok(Json(estimate))
}

// ── Claims ──────────────────────────────────────────────────

/// `POST /api/insurance/claims`
pub async fn submit_claim(
    State(ctx): State<ApiContext>,
    Extension(auth_user): Extension<AuthUser>,
    Json(req): Json<ClaimRequest>,
) -> Result<(StatusCode, Json<InsuranceClaim>), ApiError> {
    let conn = ctx.core.open_db()?;
    let claim = billing::submit_claim(&conn, &auth_user.user, &req, Local::now().date_naive())?;
    record(&conn, &auth_user, "submit", "insurance_claim", &claim.id, Some(claim.claim_number.clone()));
    Ok((StatusCode::CREATED, Json(claim)))
}

/// `GET /api/insurance/claims?status=&policy_id=`
pub async fn list_claims(
    State(ctx): State<ApiContext>,
    Extension(auth_user): Extension<AuthUser>,
    Query(filter): Query<ClaimFilter>,
) -> Result<Json<Vec<InsuranceClaim>>, ApiError> {
    require_biller(&auth_user)?;
    let conn = ctx.core.open_db()?;
    let claims = db::list_claims(&conn, &filter)?;
    if !auth_user.user.role.is_branch_scoped() {
        return Ok(Json(claims));
    }
    // Branch staff only see claims on their branch's invoices.
    let mut visible = Vec::with_capacity(claims.len());
    for claim in claims {
        if let Some(invoice) = db::get_invoice(&conn, &claim.invoice_id)? {
            if billing::can_view_invoice(&conn, &auth_user.user, &invoice)? {
                visible.push(claim);
            }
        }
    }
    Ok(Json(visible))
}

/// `GET /api/insurance/claims/:id`
pub async fn claim_detail(
    State(ctx): State<ApiContext>,
    Extension(auth_user): Extension<AuthUser>,
    Path(id): Path<String>,
) -> Result<Json<InsuranceClaim>, ApiError> {
    let id = parse_id(&id, "claim")?;
    let conn = ctx.core.open_db()?;
    Ok(Json(billing::load_visible_claim(&conn, &auth_user.user, &id)?))
}

fn advance(ctx: &ApiContext, auth_user: &AuthUser, raw_id: &str, action: ClaimAction, verb: &str) -> Result<InsuranceClaim, ApiError> {
    let id = parse_id(raw_id, "claim")?;
    let conn = ctx.core.open_db()?;
    let claim = billing::advance_claim(&conn, &auth_user.user, &id, action)?;
    record(&conn, auth_user, verb, "insurance_claim", &claim.id, None);
    Ok(claim)
}

/// `POST /api/insurance/claims/:id/review`
pub async fn review_claim(
    State(ctx): State<ApiContext>,
    Extension(auth_user): Extension<AuthUser>,
    Path(id): Path<String>,
) -> Result<Json<InsuranceClaim>, ApiError> {
    Ok(Json(advance(&ctx, &auth_user, &id, ClaimAction::Review, "review")?))
}

#[derive(Deserialize, Default)]
pub struct ApproveClaim {
    pub approved_cents: Option<i64>,
}

/// `POST /api/insurance/claims/:id/approve` — body optional.
pub async fn approve_claim(
    State(ctx): State<ApiContext>,
    Extension(auth_user): Extension<AuthUser>,
    Path(id): Path<String>,
    body: Option<Json<ApproveClaim>>,
) -> Result<Json<InsuranceClaim>, ApiError> {
    let approved_cents = body.and_then(|Json(b)| b.approved_cents);
    Ok(Json(advance(&ctx, &auth_user, &id, ClaimAction::Approve { approved_cents }, "approve")?))
}

#[derive(Deserialize)]
pub struct RejectClaim {
    #[serde(default)]
    pub reason: String,
}

/// `POST /api/insurance/claims/:id/reject`
pub async fn reject_claim(
    State(ctx): State<ApiContext>,
    Extension(auth_user): Extension<AuthUser>,
    Path(id): Path<String>,
    Json(req): Json<RejectClaim>,
) -> Result<Json<InsuranceClaim>, ApiError> {
    Ok(Json(advance(&ctx, &auth_user, &id, ClaimAction::Reject { reason: req.reason }, "reject")?))
}

/// `POST /api/insurance/claims/:id/pay` — posts the insurer's payment.
pub async fn pay_claim(
    State(ctx): State<ApiContext>,
    Extension(auth_user): Extension<AuthUser>,
    Path(id): Path<String>,
) -> Result<Json<InsuranceClaim>, ApiError> {
    Ok(Json(advance(&ctx, &auth_user, &id, ClaimAction::Pay, "pay")?))
}
