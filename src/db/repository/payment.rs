use rusqlite::{params, Connection};
use uuid::Uuid;

use super::{format_timestamp, opt_id, opt_uuid_col, timestamp_col, uuid_col};
use crate::db::DatabaseError;
use crate::models::*;

pub fn insert_payment(conn: &Connection, p: &Payment) -> Result<(), DatabaseError> {
    conn.execute(
        "INSERT INTO payments (id, invoice_id, amount_cents, method, reference, received_by, paid_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![
            p.id.to_string(),
            p.invoice_id.to_string(),
            p.amount_cents,
            p.method,
            p.reference,
            opt_id(&p.received_by),
            format_timestamp(&p.paid_at),
        ],
    )?;
    Ok(())
}

pub fn list_payments_for_invoice(conn: &Connection, invoice_id: &Uuid) -> Result<Vec<Payment>, DatabaseError> {
    let mut stmt = conn.prepare(
        "SELECT id, invoice_id, amount_cents, method, reference, received_by, paid_at
         FROM payments WHERE invoice_id = ?1 ORDER BY paid_at",
    )?;
    let rows = stmt.query_map(params![invoice_id.to_string()], |row| {
        Ok(Payment {
            id: uuid_col(row, 0)?,
            invoice_id: uuid_col(row, 1)?,
            amount_cents: row.get(2)?,
            method: row.get(3)?,
            reference: row.get(4)?,
            received_by: opt_uuid_col(row, 5)?,
            paid_at: timestamp_col(row, 6)?,
        })
    })?;
    rows.map(|r| r.map_err(DatabaseError::from)).collect()
}
