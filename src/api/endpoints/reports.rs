//! Reporting endpoints (`/api/reports`).

use axum::extract::{Query, State};
use axum::{Extension, Json};
use chrono::{Datelike, Local, NaiveDate};
use serde::Deserialize;
use uuid::Uuid;

use crate::api::error::ApiError;
use crate::api::types::{ApiContext, AuthUser};
use crate::models::UserRole;
use crate::reports::{self, Dashboard, DoctorWorkload, RevenuePoint};

#[derive(Deserialize)]
pub struct DashboardQuery {
    pub branch_id: Option<Uuid>,
}

/// `GET /api/reports/dashboard?branch_id=`
///
/// Only administrators pick the branch; other staff always get their own.
/// Money figures are left out for roles without billing access.
pub async fn dashboard(
    State(ctx): State<ApiContext>,
    Extension(auth_user): Extension<AuthUser>,
    Query(query): Query<DashboardQuery>,
) -> Result<Json<Dashboard>, ApiError> {
    auth_user.require_staff()?;
    let branch = if auth_user.user.role.is_admin() {
        query.branch_id
    } else {
        Some(auth_user.own_branch()?)
    };
    let conn = ctx.core.open_db()?;
    let dash = reports::dashboard(&conn, branch.as_ref(), Local::now().date_naive(), &Local)?;
    if auth_user.user.role.can_manage_billing() {
        Ok(Json(dash))
    } else {
        Ok(Json(dash.without_billing()))
    }
}

#[derive(Deserialize)]
pub struct RangeQuery {
    pub from: Option<NaiveDate>,
    pub to: Option<NaiveDate>,
    pub branch_id: Option<Uuid>,
}

impl RangeQuery {
    /// Missing bounds default to the current month up to today.
    fn bounds(&self, today: NaiveDate) -> (NaiveDate, NaiveDate) {
        let to = self.to.unwrap_or(today);
        let from = self
            .from
            .unwrap_or_else(|| to.with_day(1).unwrap_or(to));
        (from, to)
    }
}

fn require_manager(auth_user: &AuthUser) -> Result<(), ApiError> {
    auth_user.require_any(&[UserRole::SystemAdministrator, UserRole::BranchManager])
}

/// `GET /api/reports/revenue?from=&to=&branch_id=`
pub async fn revenue(
    State(ctx): State<ApiContext>,
    Extension(auth_user): Extension<AuthUser>,
    Query(query): Query<RangeQuery>,
) -> Result<Json<Vec<RevenuePoint>>, ApiError> {
    require_manager(&auth_user)?;
    let (from, to) = query.bounds(Local::now().date_naive());
    let branch = auth_user.scoped_branch(query.branch_id)?;
    let conn = ctx.core.open_db()?;
    Ok(Json(reports::revenue_series(&conn, from, to, branch.as_ref(), &Local)?))
}

/// `GET /api/reports/doctor-workload?from=&to=&branch_id=`
pub async fn doctor_workload(
    State(ctx): State<ApiContext>,
    Extension(auth_user): Extension<AuthUser>,
    Query(query): Query<RangeQuery>,
) -> Result<Json<Vec<DoctorWorkload>>, ApiError> {
    require_manager(&auth_user)?;
    let (from, to) = query.bounds(Local::now().date_naive());
    let branch = auth_user.scoped_branch(query.branch_id)?;
    let conn = ctx.core.open_db()?;
    Ok(Json(reports::doctor_workload(&conn, from, to, branch.as_ref())?))
}
