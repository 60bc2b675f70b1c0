//! Repository layer — entity-scoped database operations.
//!
//! Free functions over a borrowed `rusqlite::Connection`, one sub-module
//! per table group. All public functions are re-exported here.

pub(crate) mod appointment;
mod audit;
mod branch;
pub(crate) mod insurance;
pub(crate) mod invoice;
mod patient;
mod payment;
mod reminder;
mod role;
mod session;
mod treatment;
mod user;

pub use appointment::*;
pub use audit::*;
pub use branch::*;
pub use insurance::*;
pub use invoice::*;
pub use patient::*;
pub use payment::*;
pub use reminder::*;
pub use role::*;
pub use session::*;
pub use treatment::*;
pub use user::*;

use chrono::{DateTime, NaiveDate, NaiveDateTime, SecondsFormat, Utc};
use rusqlite::types::Type;
use uuid::Uuid;

/// Storage format for clinic-local appointment times.
pub const DATETIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";
pub const DATE_FORMAT: &str = "%Y-%m-%d";

// ═══════════════════════════════════════════════════════════
// Column codecs
// ═══════════════════════════════════════════════════════════

fn conversion_error(idx: usize, err: impl std::error::Error + Send + Sync + 'static) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(err))
}

pub(crate) fn uuid_col(row: &rusqlite::Row<'_>, idx: usize) -> rusqlite::Result<Uuid> {
    let raw: String = row.get(idx)?;
    Uuid::parse_str(&raw).map_err(|e| conversion_error(idx, e))
}

pub(crate) fn opt_uuid_col(row: &rusqlite::Row<'_>, idx: usize) -> rusqlite::Result<Option<Uuid>> {
    row.get::<_, Option<String>>(idx)?
        .map(|raw| Uuid::parse_str(&raw).map_err(|e| conversion_error(idx, e)))
        .transpose()
}

pub(crate) fn timestamp_col(row: &rusqlite::Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let raw: String = row.get(idx)?;
    DateTime::parse_from_rfc3339(&raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| conversion_error(idx, e))
}

pub(crate) fn opt_timestamp_col(
    row: &rusqlite::Row<'_>,
    idx: usize,
) -> rusqlite::Result<Option<DateTime<Utc>>> {
    row.get::<_, Option<String>>(idx)?
        .map(|raw| {
            DateTime::parse_from_rfc3339(&raw)
                .map(|dt| dt.with_timezone(&Utc))
                .map_err(|e| conversion_error(idx, e))
        })
        .transpose()
}

pub(crate) fn date_col(row: &rusqlite::Row<'_>, idx: usize) -> rusqlite::Result<NaiveDate> {
    let raw: String = row.get(idx)?;
    NaiveDate::parse_from_str(&raw, DATE_FORMAT).map_err(|e| conversion_error(idx, e))
}

pub(crate) fn datetime_col(row: &rusqlite::Row<'_>, idx: usize) -> rusqlite::Result<NaiveDateTime> {
    let raw: String = row.get(idx)?;
    NaiveDateTime::parse_from_str(&raw, DATETIME_FORMAT).map_err(|e| conversion_error(idx, e))
}

pub fn format_timestamp(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Secs, true)
}

pub fn format_datetime(dt: &NaiveDateTime) -> String {
    dt.format(DATETIME_FORMAT).to_string()
}

pub fn format_date(date: &NaiveDate) -> String {
    date.format(DATE_FORMAT).to_string()
}

pub(crate) fn opt_id(id: &Option<Uuid>) -> Option<String> {
    id.map(|u| u.to_string())
}

#[cfg(test)]
pub(crate) mod fixtures {
    //! Seed helpers shared by repository and service tests.

    use chrono::{NaiveDate, Utc};
    use rusqlite::Connection;
    use uuid::Uuid;

    use super::*;
    use crate::models::*;

    pub fn branch(conn: &Connection, name: &str) -> Branch {
        let now = Utc::now();
        let branch = Branch {
            id: Uuid::new_v4(),
            name: name.into(),
            address: "1 Harbour Road".into(),
            phone: None,
            email: None,
            is_active: true,
            created_at: now,
            updated_at: now,
        };
        insert_branch(conn, &branch).unwrap();
        branch
    }

    pub fn user(conn: &Connection, email: &str, role: UserRole, branch_id: Option<Uuid>) -> User {
        let now = Utc::now();
        let user = User {
            id: Uuid::new_v4(),
            email: email.into(),
            password_hash: "not-a-real-hash".into(),
            full_name: format!("Test {}", role.as_str()),
            phone: Some("+15550100".into()),
            role,
            staff_title_id: None,
            branch_id,
            profile_picture: None,
            is_active: true,
            last_login_at: None,
            created_at: now,
            updated_at: now,
        };
        insert_user(conn, &user).unwrap();
        user
    }

    pub fn patient(conn: &Connection, first: &str, last: &str, branch_id: Option<Uuid>) -> Patient {
        let now = Utc::now();
        let patient = Patient {
            id: Uuid::new_v4(),
            user_id: None,
            branch_id,
            first_name: first.into(),
            last_name: last.into(),
            date_of_birth: NaiveDate::from_ymd_opt(1985, 3, 14).unwrap(),
            gender: Gender::Female,
            phone: Some("+15550111".into()),
            email: Some(format!("{}@example.com", first.to_lowercase())),
            address: None,
            blood_type: Some("O+".into()),
            allergies: None,
            medical_history: None,
            emergency_contact_name: None,
            emergency_contact_phone: None,
            is_active: true,
            created_at: now,
            updated_at: now,
        };
        insert_patient(conn, &patient).unwrap();
        patient
    }

    pub fn treatment(conn: &Connection, name: &str, price_cents: i64) -> Treatment {
        let now = Utc::now();
        let treatment = Treatment {
            id: Uuid::new_v4(),
            name: name.into(),
            description: None,
            category: "general".into(),
            price_cents,
            duration_minutes: 30,
            is_active: true,
            created_at: now,
            updated_at: now,
        };
        insert_treatment(conn, &treatment).unwrap();
        treatment
    }
}
