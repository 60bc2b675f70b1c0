use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};
use uuid::Uuid;

use super::{format_timestamp, timestamp_col, uuid_col};
use crate::db::DatabaseError;
use crate::models::*;

fn map_treatment(row: &rusqlite::Row<'_>) -> rusqlite::Result<Treatment> {
    Ok(Treatment {
        id: uuid_col(row, 0)?,
        name: row.get(1)?,
        description: row.get(2)?,
        category: row.get(3)?,
        price_cents: row.get(4)?,
        duration_minutes: row.get(5)?,
        is_active: row.get(6)?,
        created_at: timestamp_col(row, 7)?,
        updated_at: timestamp_col(row, 8)?,
    })
}

pub fn insert_treatment(conn: &Connection, t: &Treatment) -> Result<(), DatabaseError> {
    conn.execute(
        "INSERT INTO treatments (id, name, description, category, price_cents, duration_minutes,
             is_active, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
        params![
            t.id.to_string(),
            t.name,
            t.description,
            t.category,
            t.price_cents,
            t.duration_minutes,
            t.is_active,
            format_timestamp(&t.created_at),
            format_timestamp(&t.updated_at),
        ],
    )?;
    Ok(())
}

pub fn get_treatment(conn: &Connection, id: &Uuid) -> Result<Option<Treatment>, DatabaseError> {
    Ok(conn
        .query_row(
            "SELECT id, name, description, category, price_cents, duration_minutes, is_active,
                 created_at, updated_at
             FROM treatments WHERE id = ?1",
            params![id.to_string()],
            map_treatment,
        )
        .optional()?)
}

pub fn list_treatments(conn: &Connection, filter: &TreatmentFilter) -> Result<Vec<Treatment>, DatabaseError> {
    let mut stmt = conn.prepare(
        "SELECT id, name, description, category, price_cents, duration_minutes, is_active,
             created_at, updated_at
         FROM treatments
         WHERE (?1 IS NULL OR category = ?1 COLLATE NOCASE)
           AND (?2 = 1 OR is_active = 1)
         ORDER BY category, name",
    )?;
    let rows = stmt.query_map(
        params![filter.category.as_deref(), filter.include_inactive],
        map_treatment,
    )?;
    rows.map(|r| r.map_err(DatabaseError::from)).collect()
}

pub fn update_treatment(conn: &Connection, t: &Treatment) -> Result<(), DatabaseError> {
    let changed = conn.execute(
        "UPDATE treatments SET name = ?2, description = ?3, category = ?4, price_cents = ?5,
             duration_minutes = ?6, is_active = ?7, updated_at = ?8
         WHERE id = ?1",
        params![
            t.id.to_string(),
            t.name,
            t.description,
            t.category,
            t.price_cents,
            t.duration_minutes,
            t.is_active,
            format_timestamp(&Utc::now()),
        ],
    )?;
    if changed == 0 {
        return Err(DatabaseError::not_found("Treatment", t.id));
    }
    Ok(())
}
