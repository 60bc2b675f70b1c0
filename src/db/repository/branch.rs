use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};
use uuid::Uuid;

use super::{format_timestamp, timestamp_col, uuid_col};
use crate::db::DatabaseError;
use crate::models::*;

fn map_branch(row: &rusqlite::Row<'_>) -> rusqlite::Result<Branch> {
    Ok(Branch {
        id: uuid_col(row, 0)?,
        name: row.get(1)?,
        address: row.get(2)?,
        phone: row.get(3)?,
        email: row.get(4)?,
        is_active: row.get(5)?,
        created_at: timestamp_col(row, 6)?,
        updated_at: timestamp_col(row, 7)?,
    })
}

pub fn insert_branch(conn: &Connection, branch: &Branch) -> Result<(), DatabaseError> {
    conn.execute(
        "INSERT INTO branches (id, name, address, phone, email, is_active, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        params![
            branch.id.to_string(),
            branch.name,
            branch.address,
            branch.phone,
            branch.email,
            branch.is_active,
            format_timestamp(&branch.created_at),
            format_timestamp(&branch.updated_at),
        ],
    )?;
    Ok(())
}

pub fn get_branch(conn: &Connection, id: &Uuid) -> Result<Option<Branch>, DatabaseError> {
    Ok(conn
        .query_row(
            "SELECT id, name, address, phone, email, is_active, created_at, updated_at
             FROM branches WHERE id = ?1",
            params![id.to_string()],
            map_branch,
        )
        .optional()?)
}

pub fn list_branches(conn: &Connection, include_inactive: bool) -> Result<Vec<Branch>, DatabaseError> {
    let mut stmt = conn.prepare(
        "SELECT id, name, address, phone, email, is_active, created_at, updated_at
         FROM branches WHERE (?1 = 1 OR is_active = 1) ORDER BY name",
    )?;
    let rows = stmt.query_map(params![include_inactive], map_branch)?;
    rows.map(|r| r.map_err(DatabaseError::from)).collect()
}

pub fn update_branch(conn: &Connection, branch: &Branch) -> Result<(), DatabaseError> {
    let changed = conn.execute(
        "UPDATE branches SET name = ?2, address = ?3, phone = ?4, email = ?5, is_active = ?6,
             updated_at = ?7
         WHERE id = ?1",
        params![
            branch.id.to_string(),
            branch.name,
            branch.address,
            branch.phone,
            branch.email,
            branch.is_active,
            format_timestamp(&Utc::now()),
        ],
    )?;
    if changed == 0 {
        return Err(DatabaseError::not_found("Branch", branch.id));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::repository::fixtures;
    use crate::db::sqlite::open_memory_database;

    #[test]
    fn soft_deleted_branch_hidden_from_default_list() {
        let conn = open_memory_database().unwrap();
        let mut north = fixtures::branch(&conn, "North");
        fixtures::branch(&conn, "Central");
        north.is_active = false;
        update_branch(&conn, &north).unwrap();

        let names: Vec<String> = list_branches(&conn, false)
            .unwrap()
            .into_iter()
            .map(|b| b.name)
            .collect();
        assert_eq!(names, vec!["Central".to_string()]);
        assert_eq!(list_branches(&conn, true).unwrap().len(), 2);
    }
}
