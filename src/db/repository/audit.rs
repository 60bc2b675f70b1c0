use chrono::Utc;
use rusqlite::{params, Connection};
use uuid::Uuid;

use crate::db::DatabaseError;
use crate::models::{AuditFilter, AuditRecord};

/// Default and maximum page size for audit queries.
const AUDIT_PAGE_DEFAULT: i64 = 100;
const AUDIT_PAGE_MAX: i64 = 1000;

/// One audit row before insertion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewAuditEntry {
    /// UTC, `YYYY-MM-DD HH:MM:SS`.
    pub timestamp: String,
    pub user_id: Option<String>,
    pub action: String,
    pub entity_type: String,
    pub entity_id: Option<String>,
    pub details: Option<String>,
}

/// Insert a batch of audit entries into the audit_log table.
pub fn insert_audit_entries(conn: &Connection, entries: &[NewAuditEntry]) -> Result<(), DatabaseError> {
    let mut stmt = conn.prepare(
        "INSERT INTO audit_log (timestamp, user_id, action, entity_type, entity_id, details)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
    )?;
    for e in entries {
        stmt.execute(params![
            e.timestamp,
            e.user_id,
            e.action,
            e.entity_type,
            e.entity_id,
            e.details
        ])?;
    }
    Ok(())
}

/// Timestamp format shared by audit rows and SQLite's `datetime('now')`.
pub const AUDIT_TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Write a single business-operation audit row immediately.
pub fn record_audit(
    conn: &Connection,
    user_id: Option<&Uuid>,
    action: &str,
    entity_type: &str,
    entity_id: Option<&str>,
    details: Option<String>,
) -> Result<(), DatabaseError> {
    insert_audit_entries(
        conn,
        &[NewAuditEntry {
            timestamp: Utc::now().format(AUDIT_TIMESTAMP_FORMAT).to_string(),
            user_id: user_id.map(|u| u.to_string()),
            action: action.to_string(),
            entity_type: entity_type.to_string(),
            entity_id: entity_id.map(str::to_string),
            details,
        }],
    )
}

/// Prune audit entries older than the given number of days.
pub fn prune_audit_log(conn: &Connection, retention_days: i64) -> Result<usize, DatabaseError> {
    let deleted = conn.execute(
        "DELETE FROM audit_log WHERE timestamp < datetime('now', ?1)",
        params![format!("-{retention_days} days")],
    )?;
    Ok(deleted)
}

/// Most recent audit rows first.
pub fn list_audit(conn: &Connection, filter: &AuditFilter) -> Result<Vec<AuditRecord>, DatabaseError> {
    let limit = filter
        .limit
        .unwrap_or(AUDIT_PAGE_DEFAULT)
        .clamp(1, AUDIT_PAGE_MAX);
    let mut stmt = conn.prepare(
        "SELECT id, timestamp, user_id, action, entity_type, entity_id, details FROM audit_log
         WHERE (?1 IS NULL OR user_id = ?1) AND (?2 IS NULL OR entity_type = ?2)
         ORDER BY timestamp DESC, id DESC
         LIMIT ?3",
    )?;
    let rows = stmt
        .query_map(
            params![filter.user_id.as_deref(), filter.entity_type.as_deref(), limit],
            |row| {
                Ok(AuditRecord {
                    id: row.get(0)?,
                    timestamp: row.get(1)?,
                    user_id: row.get(2)?,
                    action: row.get(3)?,
                    entity_type: row.get(4)?,
                    entity_id: row.get(5)?,
                    details: row.get(6)?,
                })
            },
        )?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::sqlite::open_memory_database;

    fn entry(ts: &str, user: &str, entity_type: &str) -> NewAuditEntry {
        NewAuditEntry {
            timestamp: ts.into(),
            user_id: Some(user.into()),
            action: "update".into(),
            entity_type: entity_type.into(),
            entity_id: None,
            details: None,
        }
    }

    #[test]
    fn list_orders_newest_first_and_filters() {
        let conn = open_memory_database().unwrap();
        insert_audit_entries(
            &conn,
            &[
                entry("2030-01-01 09:00:00", "u1", "patient"),
                entry("2030-01-02 09:00:00", "u1", "invoice"),
                entry("2030-01-03 09:00:00", "u2", "patient"),
            ],
        )
        .unwrap();

        let all = list_audit(&conn, &AuditFilter::default()).unwrap();
        assert_eq!(all.len(), 3);
        assert_eq!(all[0].timestamp, "2030-01-03 09:00:00");

        let u1_patients = list_audit(
            &conn,
            &AuditFilter {
                user_id: Some("u1".into()),
                entity_type: Some("patient".into()),
                limit: None,
            },
        )
        .unwrap();
        assert_eq!(u1_patients.len(), 1);

        let limited = list_audit(
            &conn,
            &AuditFilter {
                limit: Some(0),
                ..Default::default()
            },
        )
        .unwrap();
        assert_eq!(limited.len(), 1);
    }

    #[test]
    fn record_audit_writes_immediately() {
        let conn = open_memory_database().unwrap();
        let actor = Uuid::new_v4();
        record_audit(&conn, Some(&actor), "approve", "appointment", Some("a-1"), None).unwrap();
        let rows = list_audit(&conn, &AuditFilter::default()).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].user_id, Some(actor.to_string()));
        assert_eq!(rows[0].entity_id.as_deref(), Some("a-1"));
    }

    #[test]
    fn prune_drops_only_old_rows() {
        let conn = open_memory_database().unwrap();
        let recent = Utc::now().format(AUDIT_TIMESTAMP_FORMAT).to_string();
        insert_audit_entries(
            &conn,
            &[entry("2001-01-01 00:00:00", "u1", "x"), entry(&recent, "u1", "x")],
        )
        .unwrap();
        assert_eq!(prune_audit_log(&conn, 365).unwrap(), 1);
        assert_eq!(list_audit(&conn, &AuditFilter::default()).unwrap().len(), 1);
    }
}
