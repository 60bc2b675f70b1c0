use chrono::NaiveDate;
use rusqlite::{params, Connection};

use super::format_date;
use crate::db::DatabaseError;

/// Record that a reminder of `kind` went out for `target_id` on `day`.
/// Returns `false` when one was already recorded for that day.
pub fn record_reminder(
    conn: &Connection,
    kind: &str,
    target_id: &str,
    day: &NaiveDate,
) -> Result<bool, DatabaseError> {
    let inserted = conn.execute(
        "INSERT OR IGNORE INTO reminder_log (kind, target_id, sent_on) VALUES (?1, ?2, ?3)",
        params![kind, target_id, format_date(day)],
    )?;
    Ok(inserted > 0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::sqlite::open_memory_database;

    #[test]
    fn second_record_same_day_is_ignored() {
        let conn = open_memory_database().unwrap();
        let day = NaiveDate::from_ymd_opt(2030, 5, 1).unwrap();
        assert!(record_reminder(&conn, "overdue_invoice", "inv-1", &day).unwrap());
        assert!(!record_reminder(&conn, "overdue_invoice", "inv-1", &day).unwrap());
        let next = day.succ_opt().unwrap();
        assert!(record_reminder(&conn, "overdue_invoice", "inv-1", &next).unwrap());
    }
}
