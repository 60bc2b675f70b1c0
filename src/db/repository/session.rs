use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use uuid::Uuid;

use super::{format_timestamp, get_user};
use crate::db::DatabaseError;
use crate::models::User;

/// Store a session keyed by the SHA-256 hash of its bearer token.
pub fn insert_session(
    conn: &Connection,
    token_hash: &str,
    user_id: &Uuid,
    expires_at: &DateTime<Utc>,
) -> Result<(), DatabaseError> {
    conn.execute(
        "INSERT INTO sessions (token_hash, user_id, created_at, expires_at) VALUES (?1, ?2, ?3, ?4)",
        params![
            token_hash,
            user_id.to_string(),
            format_timestamp(&Utc::now()),
            format_timestamp(expires_at),
        ],
    )?;
    Ok(())
}

/// Resolve an unexpired session to its (active) user.
pub fn find_session_user(
    conn: &Connection,
    token_hash: &str,
    now: &DateTime<Utc>,
) -> Result<Option<User>, DatabaseError> {
    let user_id: Option<String> = conn
        .query_row(
            "SELECT user_id FROM sessions WHERE token_hash = ?1 AND expires_at > ?2",
            params![token_hash, format_timestamp(now)],
            |row| row.get(0),
        )
        .optional()?;
    let Some(user_id) = user_id else {
        return Ok(None);
    };
    let id = Uuid::parse_str(&user_id)
        .map_err(|_| DatabaseError::ConstraintViolation("corrupt session user id".into()))?;
    Ok(get_user(conn, &id)?.filter(|u| u.is_active))
}

pub fn delete_session(conn: &Connection, token_hash: &str) -> Result<bool, DatabaseError> {
    Ok(conn.execute("DELETE FROM sessions WHERE token_hash = ?1", params![token_hash])? > 0)
}

pub fn delete_user_sessions(conn: &Connection, user_id: &Uuid) -> Result<usize, DatabaseError> {
    Ok(conn.execute("DELETE FROM sessions WHERE user_id = ?1", params![user_id.to_string()])?)
}

pub fn prune_expired_sessions(conn: &Connection, now: &DateTime<Utc>) -> Result<usize, DatabaseError> {
    Ok(conn.execute(
        "DELETE FROM sessions WHERE expires_at <= ?1",
        params![format_timestamp(now)],
    )?)
}
