use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use uuid::Uuid;

use super::{format_timestamp, opt_id, opt_timestamp_col, opt_uuid_col, timestamp_col, uuid_col};
use crate::db::DatabaseError;
use crate::models::*;

const USER_COLUMNS: &str = "id, email, password_hash, full_name, phone, role, staff_title_id,
     branch_id, profile_picture, is_active, last_login_at, created_at, updated_at";

fn map_user(row: &rusqlite::Row<'_>) -> rusqlite::Result<User> {
    Ok(User {
        id: uuid_col(row, 0)?,
        email: row.get(1)?,
        password_hash: row.get(2)?,
        full_name: row.get(3)?,
        phone: row.get(4)?,
        role: row.get(5)?,
        staff_title_id: opt_uuid_col(row, 6)?,
        branch_id: opt_uuid_col(row, 7)?,
        profile_picture: row.get(8)?,
        is_active: row.get(9)?,
        last_login_at: opt_timestamp_col(row, 10)?,
        created_at: timestamp_col(row, 11)?,
        updated_at: timestamp_col(row, 12)?,
    })
}

pub fn insert_user(conn: &Connection, user: &User) -> Result<(), DatabaseError> {
    conn.execute(
        "INSERT INTO users (id, email, password_hash, full_name, phone, role, staff_title_id,
             branch_id, profile_picture, is_active, last_login_at, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
        params![
            user.id.to_string(),
            user.email,
            user.password_hash,
            user.full_name,
            user.phone,
            user.role,
            opt_id(&user.staff_title_id),
            opt_id(&user.branch_id),
            user.profile_picture,
            user.is_active,
            user.last_login_at.as_ref().map(format_timestamp),
            format_timestamp(&user.created_at),
            format_timestamp(&user.updated_at),
        ],
    )?;
    Ok(())
}

pub fn get_user(conn: &Connection, id: &Uuid) -> Result<Option<User>, DatabaseError> {
    let sql = format!("SELECT {USER_COLUMNS} FROM users WHERE id = ?1");
    Ok(conn
        .query_row(&sql, params![id.to_string()], map_user)
        .optional()?)
}

pub fn get_user_by_email(conn: &Connection, email: &str) -> Result<Option<User>, DatabaseError> {
    let sql = format!("SELECT {USER_COLUMNS} FROM users WHERE email = ?1 COLLATE NOCASE");
    Ok(conn.query_row(&sql, params![email.trim()], map_user).optional()?)
}

pub fn list_users(conn: &Connection, filter: &UserFilter) -> Result<Vec<User>, DatabaseError> {
    let sql = format!(
        "SELECT {USER_COLUMNS} FROM users
         WHERE (?1 IS NULL OR role = ?1)
           AND (?2 IS NULL OR branch_id = ?2)
           AND (?3 = 1 OR is_active = 1)
         ORDER BY full_name COLLATE NOCASE"
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(
        params![
            filter.role.map(|r| r.as_str()),
            opt_id(&filter.branch_id),
            filter.include_inactive,
        ],
        map_user,
    )?;
    rows.map(|r| r.map_err(DatabaseError::from)).collect()
}

/// Persist every mutable profile field of an existing user.
pub fn update_user(conn: &Connection, user: &User) -> Result<(), DatabaseError> {
    let changed = conn.execute(
        "UPDATE users SET email = ?2, full_name = ?3, phone = ?4, role = ?5,
             staff_title_id = ?6, branch_id = ?7, profile_picture = ?8, is_active = ?9,
             updated_at = ?10
         WHERE id = ?1",
        params![
            user.id.to_string(),
            user.email,
            user.full_name,
            user.phone,
            user.role,
            opt_id(&user.staff_title_id),
            opt_id(&user.branch_id),
            user.profile_picture,
            user.is_active,
            format_timestamp(&Utc::now()),
        ],
    )?;
    if changed == 0 {
        return Err(DatabaseError::not_found("User", user.id));
    }
    Ok(())
}

pub fn update_password_hash(conn: &Connection, id: &Uuid, hash: &str) -> Result<(), DatabaseError> {
    let changed = conn.execute(
        "UPDATE users SET password_hash = ?2, updated_at = ?3 WHERE id = ?1",
        params![id.to_string(), hash, format_timestamp(&Utc::now())],
    )?;
    if changed == 0 {
        return Err(DatabaseError::not_found("User", id));
    }
    Ok(())
}

pub fn touch_last_login(conn: &Connection, id: &Uuid, at: &DateTime<Utc>) -> Result<(), DatabaseError> {
    conn.execute(
        "UPDATE users SET last_login_at = ?2 WHERE id = ?1",
        params![id.to_string(), format_timestamp(at)],
    )?;
    Ok(())
}

pub fn count_active_users_with_role(conn: &Connection, role: UserRole) -> Result<i64, DatabaseError> {
    Ok(conn.query_row(
        "SELECT COUNT(*) FROM users WHERE role = ?1 AND is_active = 1",
        params![role],
        |row| row.get(0),
    )?)
}

/// Active non-patient accounts attached to a branch.
pub fn count_active_staff_in_branch(conn: &Connection, branch_id: &Uuid) -> Result<i64, DatabaseError> {
    Ok(conn.query_row(
        "SELECT COUNT(*) FROM users
         WHERE branch_id = ?1 AND is_active = 1 AND role != 'patient'",
        params![branch_id.to_string()],
        |row| row.get(0),
    )?)
}
