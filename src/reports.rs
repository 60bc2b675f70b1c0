//! Dashboard and reporting queries.
//!
//! Read-only aggregates over the operational tables. Every query takes an
//! optional branch so branch-scoped staff only ever see their own numbers.
//!
//! Payment timestamps are stored in UTC; money is bucketed by the calendar
//! day of the clinic's clock, which callers pass in as a time zone.

use std::collections::BTreeMap;

use chrono::{Datelike, NaiveDate, TimeZone};
use rusqlite::{params, Connection};
use serde::Serialize;
use uuid::Uuid;

use crate::db::repository::{format_date, timestamp_col, uuid_col};
use crate::db::DatabaseError;

/// Longest range a revenue or workload report may span.
pub const MAX_REPORT_DAYS: i64 = 366;

#[derive(Debug, thiserror::Error)]
pub enum ReportError {
    #[error("{0}")]
    Invalid(String),
    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),
}

impl From<rusqlite::Error> for ReportError {
    fn from(e: rusqlite::Error) -> Self {
        Self::Database(e.into())
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Dashboard {
    pub branch_id: Option<Uuid>,
    pub total_patients: i64,
    pub todays_appointments: i64,
    pub pending_approvals: i64,
    pub appointments_by_status: BTreeMap<String, i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub revenue_this_month_cents: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub outstanding_cents: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub claims_by_status: Option<BTreeMap<String, i64>>,
}

impl Dashboard {
    /// Drop the money figures for roles without billing access.
    pub fn without_billing(self) -> Self {
        Self {
            revenue_this_month_cents: None,
            outstanding_cents: None,
            claims_by_status: None,
            ..self
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RevenuePoint {
    pub date: NaiveDate,
    pub amount_cents: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DoctorWorkload {
    pub doctor_id: Uuid,
    pub doctor_name: String,
    pub total: i64,
    pub completed: i64,
    pub upcoming: i64,
    pub cancelled: i64,
}

fn branch_param(branch_id: Option<&Uuid>) -> Option<String> {
    branch_id.map(Uuid::to_string)
}

fn grouped_counts(
    conn: &Connection,
    sql: &str,
    branch_id: Option<&Uuid>,
) -> Result<BTreeMap<String, i64>, ReportError> {
    let mut stmt = conn.prepare(sql)?;
    let rows = stmt.query_map(params![branch_param(branch_id)], |row| {
        Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
    })?;
    let mut out = BTreeMap::new();
    for row in rows {
        let (status, count) = row?;
        out.insert(status, count);
    }
    Ok(out)
}

fn check_range(from: NaiveDate, to: NaiveDate) -> Result<(), ReportError> {
    if from > to {
        return Err(ReportError::Invalid("`from` must not be after `to`".into()));
    }
    if (to - from).num_days() >= MAX_REPORT_DAYS {
        return Err(ReportError::Invalid(format!(
            "Reports span at most {MAX_REPORT_DAYS} days"
        )));
    }
    Ok(())
}

/// Payments summed per day of `tz` for days in `[from, to]`.
fn payments_by_day<Tz: TimeZone>(
    conn: &Connection,
    from: NaiveDate,
    to: NaiveDate,
    branch_id: Option<&Uuid>,
    tz: &Tz,
) -> Result<BTreeMap<NaiveDate, i64>, ReportError> {
    // A day either side covers every UTC offset.
    let lo = from.pred_opt().unwrap_or(from);
    let hi = to.succ_opt().unwrap_or(to);
    let mut stmt = conn.prepare(
        "SELECT p.paid_at, p.amount_cents
         FROM payments p JOIN invoices i ON i.id = p.invoice_id
         WHERE substr(p.paid_at, 1, 10) BETWEEN ?1 AND ?2
           AND (?3 IS NULL OR i.branch_id = ?3)",
    )?;
    let rows = stmt.query_map(
        params![format_date(&lo), format_date(&hi), branch_param(branch_id)],
        |row| Ok((timestamp_col(row, 0)?, row.get::<_, i64>(1)?)),
    )?;
    let mut by_day = BTreeMap::new();
    for row in rows {
        let (paid_at, amount) = row?;
        let day = paid_at.with_timezone(tz).date_naive();
        if day >= from && day <= to {
            *by_day.entry(day).or_insert(0) += amount;
        }
    }
    Ok(by_day)
}

/// Headline numbers for the staff dashboard. `today` is a day of `tz`.
pub fn dashboard<Tz: TimeZone>(
    conn: &Connection,
    branch_id: Option<&Uuid>,
    today: NaiveDate,
    tz: &Tz,
) -> Result<Dashboard, ReportError> {
    let branch = branch_param(branch_id);

    let total_patients = crate::db::count_active_patients(conn, branch_id)?;

    let todays_appointments: i64 = conn.query_row(
        "SELECT COUNT(*) FROM appointments
         WHERE substr(scheduled_at, 1, 10) = ?1
           AND status IN ('pending', 'approved', 'emergency', 'completed')
           AND (?2 IS NULL OR branch_id = ?2)",
        params![format_date(&today), branch],
        |row| row.get(0),
    )?;

    let appointments_by_status = grouped_counts(
        conn,
        "SELECT status, COUNT(*) FROM appointments
         WHERE ?1 IS NULL OR branch_id = ?1
         GROUP BY status",
        branch_id,
    )?;
    let pending_approvals = appointments_by_status.get("pending").copied().unwrap_or(0);

    let month_start = today.with_day(1).unwrap_or(today);
    let month_end = month_start
        .checked_add_months(chrono::Months::new(1))
        .and_then(|next| next.pred_opt())
        .unwrap_or(today);
    let revenue_this_month_cents: i64 = payments_by_day(conn, month_start, month_end, branch_id, tz)?
        .values()
        .sum();

    let outstanding_cents: i64 = conn.query_row(
        "SELECT COALESCE(SUM(MAX(total_cents - amount_paid_cents, 0)), 0)
         FROM invoices
         WHERE status IN ('unpaid', 'partially_paid', 'overdue')
           AND (?1 IS NULL OR branch_id = ?1)",
        params![branch],
        |row| row.get(0),
    )?;

    let claims_by_status = grouped_counts(
        conn,
        "SELECT c.status, COUNT(*)
         FROM insurance_claims c JOIN invoices i ON i.id = c.invoice_id
         WHERE ?1 IS NULL OR i.branch_id = ?1
         GROUP BY c.status",
        branch_id,
    )?;

    Ok(Dashboard {
        branch_id: branch_id.copied(),
        total_patients,
        todays_appointments,
        pending_approvals,
        appointments_by_status,
        revenue_this_month_cents: Some(revenue_this_month_cents),
        outstanding_cents: Some(outstanding_cents),
        claims_by_status: Some(claims_by_status),
    })
}

/// Payments received per day of `tz` in `[from, to]`. Days without
/// payments are included with a zero amount.
pub fn revenue_series<Tz: TimeZone>(
    conn: &Connection,
    from: NaiveDate,
    to: NaiveDate,
    branch_id: Option<&Uuid>,
    tz: &Tz,
) -> Result<Vec<RevenuePoint>, ReportError> {
    check_range(from, to)?;
    let by_day = payments_by_day(conn, from, to, branch_id, tz)?;
    Ok(from
        .iter_days()
        .take_while(|d| *d <= to)
        .map(|date| RevenuePoint {
            amount_cents: by_day.get(&date).copied().unwrap_or(0),
            date,
        })
        .collect())
}

/// Appointments per doctor in `[from, to]`, busiest first.
pub fn doctor_workload(
    conn: &Connection,
    from: NaiveDate,
    to: NaiveDate,
    branch_id: Option<&Uuid>,
) -> Result<Vec<DoctorWorkload>, ReportError> {
    check_range(from, to)?;
    let mut stmt = conn.prepare(
        "SELECT u.id, u.full_name,
                COUNT(*),
                SUM(a.status = 'completed'),
                SUM(a.status IN ('pending', 'approved', 'emergency')),
                SUM(a.status IN ('cancelled', 'rejected'))
         FROM appointments a JOIN users u ON u.id = a.doctor_id
         WHERE substr(a.scheduled_at, 1, 10) BETWEEN ?1 AND ?2
           AND (?3 IS NULL OR a.branch_id = ?3)
         GROUP BY u.id, u.full_name
         ORDER BY COUNT(*) DESC, u.full_name",
    )?;
    let rows = stmt.query_map(
        params![format_date(&from), format_date(&to), branch_param(branch_id)],
        |row| {
            Ok(DoctorWorkload {
                doctor_id: uuid_col(row, 0)?,
                doctor_name: row.get(1)?,
                total: row.get(2)?,
                completed: row.get(3)?,
                upcoming: row.get(4)?,
                cancelled: row.get(5)?,
            })
        },
    )?;
    rows.map(|r| r.map_err(ReportError::from)).collect()
}
