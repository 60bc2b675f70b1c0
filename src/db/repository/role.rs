use rusqlite::{params, Connection, OptionalExtension};
use uuid::Uuid;

use super::{format_timestamp, timestamp_col, uuid_col};
use crate::db::DatabaseError;
use crate::models::*;

fn map_title(row: &rusqlite::Row<'_>) -> rusqlite::Result<StaffTitle> {
    Ok(StaffTitle {
        id: uuid_col(row, 0)?,
        name: row.get(1)?,
        base_role: row.get(2)?,
        description: row.get(3)?,
        is_active: row.get(4)?,
        created_at: timestamp_col(row, 5)?,
    })
}

pub fn insert_staff_title(conn: &Connection, title: &StaffTitle) -> Result<(), DatabaseError> {
    conn.execute(
        "INSERT INTO roles (id, name, base_role, description, is_active, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![
            title.id.to_string(),
            title.name,
            title.base_role,
            title.description,
            title.is_active,
            format_timestamp(&title.created_at),
        ],
    )?;
    Ok(())
}

pub fn get_staff_title(conn: &Connection, id: &Uuid) -> Result<Option<StaffTitle>, DatabaseError> {
    Ok(conn
        .query_row(
            "SELECT id, name, base_role, description, is_active, created_at FROM roles WHERE id = ?1",
            params![id.to_string()],
            map_title,
        )
        .optional()?)
}

pub fn list_staff_titles(conn: &Connection, include_inactive: bool) -> Result<Vec<StaffTitle>, DatabaseError> {
    let mut stmt = conn.prepare(
        "SELECT id, name, base_role, description, is_active, created_at FROM roles
         WHERE (?1 = 1 OR is_active = 1)
         ORDER BY base_role, name",
    )?;
    let rows = stmt.query_map(params![include_inactive], map_title)?;
    rows.map(|r| r.map_err(DatabaseError::from)).collect()
}

pub fn update_staff_title(conn: &Connection, title: &StaffTitle) -> Result<(), DatabaseError> {
    let changed = conn.execute(
        "UPDATE roles SET name = ?2, base_role = ?3, description = ?4, is_active = ?5 WHERE id = ?1",
        params![
            title.id.to_string(),
            title.name,
            title.base_role,
            title.description,
            title.is_active,
        ],
    )?;
    if changed == 0 {
        return Err(DatabaseError::not_found("Role", title.id));
    }
    Ok(())
}

pub fn count_staff_titles(conn: &Connection) -> Result<i64, DatabaseError> {
    Ok(conn.query_row("SELECT COUNT(*) FROM roles", [], |row| row.get(0))?)
}
