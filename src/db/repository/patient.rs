use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};
use uuid::Uuid;

use super::{date_col, format_date, format_timestamp, opt_id, opt_uuid_col, timestamp_col, uuid_col};
use crate::db::DatabaseError;
use crate::models::*;

const PATIENT_COLUMNS: &str = "id, user_id, branch_id, first_name, last_name, date_of_birth,
     gender, phone, email, address, blood_type, allergies, medical_history,
     emergency_contact_name, emergency_contact_phone, is_active, created_at, updated_at";

fn map_patient(row: &rusqlite::Row<'_>) -> rusqlite::Result<Patient> {
    Ok(Patient {
        id: uuid_col(row, 0)?,
        user_id: opt_uuid_col(row, 1)?,
        branch_id: opt_uuid_col(row, 2)?,
        first_name: row.get(3)?,
        last_name: row.get(4)?,
        date_of_birth: date_col(row, 5)?,
        gender: row.get(6)?,
        phone: row.get(7)?,
        email: row.get(8)?,
        address: row.get(9)?,
        blood_type: row.get(10)?,
        allergies: row.get(11)?,
        medical_history: row.get(12)?,
        emergency_contact_name: row.get(13)?,
        emergency_contact_phone: row.get(14)?,
        is_active: row.get(15)?,
        created_at: timestamp_col(row, 16)?,
        updated_at: timestamp_col(row, 17)?,
    })
}

pub fn insert_patient(conn: &Connection, p: &Patient) -> Result<(), DatabaseError> {
    conn.execute(
        "INSERT INTO patients (id, user_id, branch_id, first_name, last_name, date_of_birth,
             gender, phone, email, address, blood_type, allergies, medical_history,
             emergency_contact_name, emergency_contact_phone, is_active, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18)",
        params![
            p.id.to_string(),
            opt_id(&p.user_id),
            opt_id(&p.branch_id),
            p.first_name,
            p.last_name,
            format_date(&p.date_of_birth),
            p.gender,
            p.phone,
            p.email,
            p.address,
            p.blood_type,
            p.allergies,
            p.medical_history,
            p.emergency_contact_name,
            p.emergency_contact_phone,
            p.is_active,
            format_timestamp(&p.created_at),
            format_timestamp(&p.updated_at),
        ],
    )?;
    Ok(())
}

pub fn get_patient(conn: &Connection, id: &Uuid) -> Result<Option<Patient>, DatabaseError> {
    let sql = format!("SELECT {PATIENT_COLUMNS} FROM patients WHERE id = ?1");
    Ok(conn.query_row(&sql, params![id.to_string()], map_patient).optional()?)
}

/// Patient record linked to a portal account.
pub fn get_patient_by_user(conn: &Connection, user_id: &Uuid) -> Result<Option<Patient>, DatabaseError> {
    let sql = format!("SELECT {PATIENT_COLUMNS} FROM patients WHERE user_id = ?1");
    Ok(conn.query_row(&sql, params![user_id.to_string()], map_patient).optional()?)
}

pub fn list_patients(conn: &Connection, filter: &PatientFilter) -> Result<Vec<Patient>, DatabaseError> {
    let search = filter
        .search
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| format!("%{s}%"));
    let sql = format!(
        "SELECT {PATIENT_COLUMNS} FROM patients
         WHERE (?1 IS NULL OR first_name LIKE ?1 OR last_name LIKE ?1
                OR (first_name || ' ' || last_name) LIKE ?1
                OR phone LIKE ?1 OR email LIKE ?1)
           AND (?2 IS NULL OR branch_id = ?2)
           AND (?3 = 1 OR is_active = 1)
         ORDER BY last_name COLLATE NOCASE, first_name COLLATE NOCASE"
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(
        params![search, opt_id(&filter.branch_id), filter.include_inactive],
        map_patient,
    )?;
    rows.map(|r| r.map_err(DatabaseError::from)).collect()
}

pub fn update_patient(conn: &Connection, p: &Patient) -> Result<(), DatabaseError> {
    let changed = conn.execute(
        "UPDATE patients SET branch_id = ?2, first_name = ?3, last_name = ?4, date_of_birth = ?5,
             gender = ?6, phone = ?7, email = ?8, address = ?9, blood_type = ?10, allergies = ?11,
             medical_history = ?12, emergency_contact_name = ?13, emergency_contact_phone = ?14,
             is_active = ?15, updated_at = ?16
         WHERE id = ?1",
        params![
            p.id.to_string(),
            opt_id(&p.branch_id),
            p.first_name,
            p.last_name,
            format_date(&p.date_of_birth),
            p.gender,
            p.phone,
            p.email,
            p.address,
            p.blood_type,
            p.allergies,
            p.medical_history,
            p.emergency_contact_name,
            p.emergency_contact_phone,
            p.is_active,
            format_timestamp(&Utc::now()),
        ],
    )?;
    if changed == 0 {
        return Err(DatabaseError::not_found("Patient", p.id));
    }
    Ok(())
}

pub fn count_active_patients(conn: &Connection, branch_id: Option<&Uuid>) -> Result<i64, DatabaseError> {
    Ok(conn.query_row(
        "SELECT COUNT(*) FROM patients WHERE is_active = 1 AND (?1 IS NULL OR branch_id = ?1)",
        params![branch_id.map(|b| b.to_string())],
        |row| row.get(0),
    )?)
}
