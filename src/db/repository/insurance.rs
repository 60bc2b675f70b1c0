use chrono::{NaiveDate, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use uuid::Uuid;

use super::{
    date_col, format_date, format_timestamp, opt_id, opt_timestamp_col, opt_uuid_col,
    timestamp_col, uuid_col,
};
use crate::db::DatabaseError;
use crate::models::*;

const POLICY_COLUMNS: &str = "id, patient_id, provider_name, policy_number, coverage_percentage,
     co_pay_cents, annual_limit_cents, valid_from, valid_until, is_active, created_at, updated_at";

const CLAIM_COLUMNS: &str = "id, claim_number, policy_id, invoice_id, appointment_id, claimed_cents,
     approved_cents, status, notes, submitted_at, decided_at, decided_by";

fn map_policy(row: &rusqlite::Row<'_>) -> rusqlite::Result<InsurancePolicy> {
    Ok(InsurancePolicy {
        id: uuid_col(row, 0)?,
        patient_id: uuid_col(row, 1)?,
        provider_name: row.get(2)?,
        policy_number: row.get(3)?,
        coverage_percentage: row.get(4)?,
        co_pay_cents: row.get(5)?,
        annual_limit_cents: row.get(6)?,
        valid_from: date_col(row, 7)?,
        valid_until: date_col(row, 8)?,
        is_active: row.get(9)?,
        created_at: timestamp_col(row, 10)?,
        updated_at: timestamp_col(row, 11)?,
    })
}

fn map_claim(row: &rusqlite::Row<'_>) -> rusqlite::Result<InsuranceClaim> {
    Ok(InsuranceClaim {
        id: uuid_col(row, 0)?,
        claim_number: row.get(1)?,
        policy_id: uuid_col(row, 2)?,
        invoice_id: uuid_col(row, 3)?,
        appointment_id: opt_uuid_col(row, 4)?,
        claimed_cents: row.get(5)?,
        approved_cents: row.get(6)?,
        status: row.get(7)?,
        notes: row.get(8)?,
        submitted_at: timestamp_col(row, 9)?,
        decided_at: opt_timestamp_col(row, 10)?,
        decided_by: opt_uuid_col(row, 11)?,
    })
}

// ── Policies ────────────────────────────────────────────────

pub fn insert_policy(conn: &Connection, p: &InsurancePolicy) -> Result<(), DatabaseError> {
    conn.execute(
        "INSERT INTO insurance_policies (id, patient_id, provider_name, policy_number,
             coverage_percentage, co_pay_cents, annual_limit_cents, valid_from, valid_until,
             is_active, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
        params![
            p.id.to_string(),
            p.patient_id.to_string(),
            p.provider_name,
            p.policy_number,
            p.coverage_percentage,
            p.co_pay_cents,
            p.annual_limit_cents,
            format_date(&p.valid_from),
            format_date(&p.valid_until),
            p.is_active,
            format_timestamp(&p.created_at),
            format_timestamp(&p.updated_at),
        ],
    )?;
    Ok(())
}

pub fn get_policy(conn: &Connection, id: &Uuid) -> Result<Option<InsurancePolicy>, DatabaseError> {
    let sql = format!("SELECT {POLICY_COLUMNS} FROM insurance_policies WHERE id = ?1");
    Ok(conn.query_row(&sql, params![id.to_string()], map_policy).optional()?)
}

pub fn list_policies_for_patient(
    conn: &Connection,
    patient_id: &Uuid,
    include_inactive: bool,
) -> Result<Vec<InsurancePolicy>, DatabaseError> {
    let sql = format!(
        "SELECT {POLICY_COLUMNS} FROM insurance_policies
         WHERE patient_id = ?1 AND (?2 = 1 OR is_active = 1)
         ORDER BY valid_until DESC"
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(params![patient_id.to_string(), include_inactive], map_policy)?;
    rows.map(|r| r.map_err(DatabaseError::from)).collect()
}

/// The policy that applies to `patient_id` on `date`: active, in its
/// validity window, highest coverage first.
pub fn find_applicable_policy(
    conn: &Connection,
    patient_id: &Uuid,
    date: &NaiveDate,
) -> Result<Option<InsurancePolicy>, DatabaseError> {
    let sql = format!(
        "SELECT {POLICY_COLUMNS} FROM insurance_policies
         WHERE patient_id = ?1 AND is_active = 1 AND valid_from <= ?2 AND valid_until >= ?2
         ORDER BY coverage_percentage DESC LIMIT 1"
    );
    Ok(conn
        .query_row(&sql, params![patient_id.to_string(), format_date(date)], map_policy)
        .optional()?)
}

pub fn update_policy(conn: &Connection, p: &InsurancePolicy) -> Result<(), DatabaseError> {
    let changed = conn.execute(
        "UPDATE insurance_policies SET provider_name = ?2, policy_number = ?3,
             coverage_percentage = ?4, co_pay_cents = ?5, annual_limit_cents = ?6,
             valid_from = ?7, valid_until = ?8, is_active = ?9, updated_at = ?10
         WHERE id = ?1",
        params![
            p.id.to_string(),
            p.provider_name,
            p.policy_number,
            p.coverage_percentage,
            p.co_pay_cents,
            p.annual_limit_cents,
            format_date(&p.valid_from),
            format_date(&p.valid_until),
            p.is_active,
            format_timestamp(&Utc::now()),
        ],
    )?;
    if changed == 0 {
        return Err(DatabaseError::not_found("InsurancePolicy", p.id));
    }
    Ok(())
}

// ── Claims ──────────────────────────────────────────────────

pub fn insert_claim(conn: &Connection, c: &InsuranceClaim) -> Result<(), DatabaseError> {
    conn.execute(
        "INSERT INTO insurance_claims (id, claim_number, policy_id, invoice_id, appointment_id,
             claimed_cents, approved_cents, status, notes, submitted_at, decided_at, decided_by)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
        params![
            c.id.to_string(),
            c.claim_number,
            c.policy_id.to_string(),
            c.invoice_id.to_string(),
            opt_id(&c.appointment_id),
            c.claimed_cents,
            c.approved_cents,
            c.status,
            c.notes,
            format_timestamp(&c.submitted_at),
            c.decided_at.as_ref().map(format_timestamp),
            opt_id(&c.decided_by),
        ],
    )?;
    Ok(())
}

pub fn get_claim(conn: &Connection, id: &Uuid) -> Result<Option<InsuranceClaim>, DatabaseError> {
    let sql = format!("SELECT {CLAIM_COLUMNS} FROM insurance_claims WHERE id = ?1");
    Ok(conn.query_row(&sql, params![id.to_string()], map_claim).optional()?)
}

pub fn list_claims(conn: &Connection, filter: &ClaimFilter) -> Result<Vec<InsuranceClaim>, DatabaseError> {
    let sql = format!(
        "SELECT {CLAIM_COLUMNS} FROM insurance_claims
         WHERE (?1 IS NULL OR status = ?1) AND (?2 IS NULL OR policy_id = ?2)
         ORDER BY submitted_at DESC"
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(
        params![filter.status.map(|s| s.as_str()), opt_id(&filter.policy_id)],
        map_claim,
    )?;
    rows.map(|r| r.map_err(DatabaseError::from)).collect()
}

/// Claims still in play for an invoice (anything but rejected).
pub fn list_live_claims_for_invoice(
    conn: &Connection,
    invoice_id: &Uuid,
) -> Result<Vec<InsuranceClaim>, DatabaseError> {
    let sql = format!(
        "SELECT {CLAIM_COLUMNS} FROM insurance_claims
         WHERE invoice_id = ?1 AND status != 'rejected'"
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(params![invoice_id.to_string()], map_claim)?;
    rows.map(|r| r.map_err(DatabaseError::from)).collect()
}

pub fn update_claim(conn: &Connection, c: &InsuranceClaim) -> Result<(), DatabaseError> {
    let changed = conn.execute(
        "UPDATE insurance_claims SET approved_cents = ?2, status = ?3, notes = ?4,
             decided_at = ?5, decided_by = ?6
         WHERE id = ?1",
        params![
            c.id.to_string(),
            c.approved_cents,
            c.status,
            c.notes,
            c.decided_at.as_ref().map(format_timestamp),
            opt_id(&c.decided_by),
        ],
    )?;
    if changed == 0 {
        return Err(DatabaseError::not_found("InsuranceClaim", c.id));
    }
    Ok(())
}

/// Amount already drawn against a policy in `year`: approved amounts for
/// decided claims, claimed amounts for claims still pending. The claim
/// year is the one in its number.
pub fn claimed_total_for_year(conn: &Connection, policy_id: &Uuid, year: i32) -> Result<i64, DatabaseError> {
    Ok(conn.query_row(
        "SELECT COALESCE(SUM(COALESCE(approved_cents, claimed_cents)), 0)
         FROM insurance_claims
         WHERE policy_id = ?1 AND status != 'rejected' AND claim_number LIKE ?2 || '%'",
        params![policy_id.to_string(), claim_prefix(year)],
        |row| row.get(0),
    )?)
}

fn claim_prefix(year: i32) -> String {
    format!("CLM-{year:04}-")
}

/// Next `CLM-YYYY-NNNNN` number.
pub fn next_claim_number(conn: &Connection, year: i32) -> Result<String, DatabaseError> {
    let prefix = claim_prefix(year);
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM insurance_claims WHERE claim_number LIKE ?1 || '%'",
        params![prefix],
        |row| row.get(0),
    )?;
    Ok(format!("{prefix}{:05}", count + 1))
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::db::repository::fixtures;
    use crate::db::sqlite::open_memory_database;

    pub(crate) fn policy(patient: &Patient, pct: f64) -> InsurancePolicy {
        let now = Utc::now();
        InsurancePolicy {
            id: Uuid::new_v4(),
            patient_id: patient.id,
            provider_name: "Acme Health".into(),
            policy_number: format!("POL-{}", &Uuid::new_v4().simple().to_string()[..8]),
            coverage_percentage: pct,
            co_pay_cents: 1_000,
            annual_limit_cents: None,
            valid_from: NaiveDate::from_ymd_opt(2020, 1, 1).unwrap(),
            valid_until: NaiveDate::from_ymd_opt(2099, 12, 31).unwrap(),
            is_active: true,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn applicable_policy_prefers_highest_coverage_in_window() {
        let conn = open_memory_database().unwrap();
        let patient = fixtures::patient(&conn, "Ivy", "Stone", None);
        let low = policy(&patient, 50.0);
        let high = policy(&patient, 80.0);
        let mut expired = policy(&patient, 100.0);
        expired.valid_until = NaiveDate::from_ymd_opt(2021, 1, 1).unwrap();
        for p in [&low, &high, &expired] {
            insert_policy(&conn, p).unwrap();
        }
        let day = NaiveDate::from_ymd_opt(2030, 6, 1).unwrap();
        let chosen = find_applicable_policy(&conn, &patient.id, &day).unwrap().unwrap();
        assert_eq!(chosen.id, high.id);
    }

    #[test]
    fn claim_numbers_are_sequential_per_year() {
        let conn = open_memory_database().unwrap();
        assert_eq!(next_claim_number(&conn, 2030).unwrap(), "CLM-2030-00001");
    }
}
