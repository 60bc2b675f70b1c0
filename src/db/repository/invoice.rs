use chrono::{NaiveDate, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use uuid::Uuid;

use super::{date_col, format_date, format_timestamp, opt_id, opt_uuid_col, timestamp_col, uuid_col};
use crate::db::DatabaseError;
use crate::models::*;

const INVOICE_COLUMNS: &str = "id, invoice_number, patient_id, branch_id, appointment_id,
     subtotal_cents, discount_cents, tax_cents, total_cents, insurance_covered_cents,
     amount_paid_cents, status, due_date, notes, created_by, created_at, updated_at";

fn map_invoice(row: &rusqlite::Row<'_>) -> rusqlite::Result<Invoice> {
    Ok(Invoice {
        id: uuid_col(row, 0)?,
        invoice_number: row.get(1)?,
        patient_id: uuid_col(row, 2)?,
        branch_id: uuid_col(row, 3)?,
        appointment_id: opt_uuid_col(row, 4)?,
        subtotal_cents: row.get(5)?,
        discount_cents: row.get(6)?,
        tax_cents: row.get(7)?,
        total_cents: row.get(8)?,
        insurance_covered_cents: row.get(9)?,
        amount_paid_cents: row.get(10)?,
        status: row.get(11)?,
        due_date: date_col(row, 12)?,
        notes: row.get(13)?,
        created_by: uuid_col(row, 14)?,
        created_at: timestamp_col(row, 15)?,
        updated_at: timestamp_col(row, 16)?,
    })
}

/// Insert an invoice with its line items atomically.
pub fn insert_invoice(conn: &Connection, inv: &Invoice, items: &[InvoiceItem]) -> Result<(), DatabaseError> {
    let tx = conn.unchecked_transaction()?;
    tx.execute(
        "INSERT INTO invoices (id, invoice_number, patient_id, branch_id, appointment_id,
             subtotal_cents, discount_cents, tax_cents, total_cents, insurance_covered_cents,
             amount_paid_cents, status, due_date, notes, created_by, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17)",
        params![
            inv.id.to_string(),
            inv.invoice_number,
            inv.patient_id.to_string(),
            inv.branch_id.to_string(),
            opt_id(&inv.appointment_id),
            inv.subtotal_cents,
            inv.discount_cents,
            inv.tax_cents,
            inv.total_cents,
            inv.insurance_covered_cents,
            inv.amount_paid_cents,
            inv.status,
            format_date(&inv.due_date),
            inv.notes,
            inv.created_by.to_string(),
            format_timestamp(&inv.created_at),
            format_timestamp(&inv.updated_at),
        ],
    )?;
    {
        let mut stmt = tx.prepare(
            "INSERT INTO invoice_items (id, invoice_id, treatment_id, description, quantity,
                 unit_price_cents, line_total_cents)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        )?;
        for item in items {
            stmt.execute(params![
                item.id.to_string(),
                inv.id.to_string(),
                opt_id(&item.treatment_id),
                item.description,
                item.quantity,
                item.unit_price_cents,
                item.line_total_cents,
            ])?;
        }
    }
    tx.commit()?;
    Ok(())
}

pub fn get_invoice(conn: &Connection, id: &Uuid) -> Result<Option<Invoice>, DatabaseError> {
    let sql = format!("SELECT {INVOICE_COLUMNS} FROM invoices WHERE id = ?1");
    Ok(conn.query_row(&sql, params![id.to_string()], map_invoice).optional()?)
}

pub fn list_invoices(conn: &Connection, filter: &InvoiceFilter) -> Result<Vec<Invoice>, DatabaseError> {
    let sql = format!(
        "SELECT {INVOICE_COLUMNS} FROM invoices
         WHERE (?1 IS NULL OR status = ?1)
           AND (?2 IS NULL OR patient_id = ?2)
           AND (?3 IS NULL OR branch_id = ?3)
         ORDER BY created_at DESC, invoice_number DESC"
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(
        params![
            filter.status.map(|s| s.as_str()),
            opt_id(&filter.patient_id),
            opt_id(&filter.branch_id),
        ],
        map_invoice,
    )?;
    rows.map(|r| r.map_err(DatabaseError::from)).collect()
}

pub fn list_invoice_items(conn: &Connection, invoice_id: &Uuid) -> Result<Vec<InvoiceItem>, DatabaseError> {
    let mut stmt = conn.prepare(
        "SELECT id, invoice_id, treatment_id, description, quantity, unit_price_cents, line_total_cents
         FROM invoice_items WHERE invoice_id = ?1 ORDER BY rowid",
    )?;
    let rows = stmt.query_map(params![invoice_id.to_string()], |row| {
        Ok(InvoiceItem {
            id: uuid_col(row, 0)?,
            invoice_id: uuid_col(row, 1)?,
            treatment_id: opt_uuid_col(row, 2)?,
            description: row.get(3)?,
            quantity: row.get(4)?,
            unit_price_cents: row.get(5)?,
            line_total_cents: row.get(6)?,
        })
    })?;
    rows.map(|r| r.map_err(DatabaseError::from)).collect()
}

/// Persist the payment-driven fields of an invoice.
pub fn update_invoice_balance(
    conn: &Connection,
    id: &Uuid,
    amount_paid_cents: i64,
    insurance_covered_cents: i64,
    status: InvoiceStatus,
) -> Result<(), DatabaseError> {
    let changed = conn.execute(
        "UPDATE invoices SET amount_paid_cents = ?2, insurance_covered_cents = ?3, status = ?4,
             updated_at = ?5
         WHERE id = ?1",
        params![
            id.to_string(),
            amount_paid_cents,
            insurance_covered_cents,
            status,
            format_timestamp(&Utc::now()),
        ],
    )?;
    if changed == 0 {
        return Err(DatabaseError::not_found("Invoice", id));
    }
    Ok(())
}

pub fn set_invoice_status(conn: &Connection, id: &Uuid, status: InvoiceStatus) -> Result<(), DatabaseError> {
    let changed = conn.execute(
        "UPDATE invoices SET status = ?2, updated_at = ?3 WHERE id = ?1",
        params![id.to_string(), status, format_timestamp(&Utc::now())],
    )?;
    if changed == 0 {
        return Err(DatabaseError::not_found("Invoice", id));
    }
    Ok(())
}

/// Next `INV-YYYYMMDD-NNNN` number for `date`.
pub fn next_invoice_number(conn: &Connection, date: &NaiveDate) -> Result<String, DatabaseError> {
    let prefix = format!("INV-{}-", date.format("%Y%m%d"));
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM invoices WHERE invoice_number LIKE ?1 || '%'",
        params![prefix],
        |row| row.get(0),
    )?;
    Ok(format!("{prefix}{:04}", count + 1))
}

/// Open invoices whose due date is before `today`.
pub fn list_past_due(conn: &Connection, today: &NaiveDate) -> Result<Vec<Invoice>, DatabaseError> {
    let sql = format!(
        "SELECT {INVOICE_COLUMNS} FROM invoices
         WHERE status IN ('unpaid', 'partially_paid', 'overdue') AND due_date < ?1
         ORDER BY due_date"
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(params![format_date(today)], map_invoice)?;
    rows.map(|r| r.map_err(DatabaseError::from)).collect()
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::db::repository::fixtures;
    use crate::db::sqlite::open_memory_database;

    pub(crate) fn invoice(patient: &Patient, branch: &Branch, creator: &User, total: i64) -> Invoice {
        let now = Utc::now();
        Invoice {
            id: Uuid::new_v4(),
            invoice_number: format!("INV-TEST-{}", &Uuid::new_v4().simple().to_string()[..6]),
            patient_id: patient.id,
            branch_id: branch.id,
            appointment_id: None,
            subtotal_cents: total,
            discount_cents: 0,
            tax_cents: 0,
            total_cents: total,
            insurance_covered_cents: 0,
            amount_paid_cents: 0,
            status: InvoiceStatus::Unpaid,
            due_date: NaiveDate::from_ymd_opt(2030, 1, 31).unwrap(),
            notes: None,
            created_by: creator.id,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn invoice_with_items_round_trips() {
        let conn = open_memory_database().unwrap();
        let branch = fixtures::branch(&conn, "Main");
        let clerk = fixtures::user(&conn, "clerk@c.test", UserRole::Receptionist, Some(branch.id));
        let patient = fixtures::patient(&conn, "Ola", "Nord", Some(branch.id));
        let inv = invoice(&patient, &branch, &clerk, 12_000);
        let items = vec![
            InvoiceItem {
                id: Uuid::new_v4(),
                invoice_id: inv.id,
                treatment_id: None,
                description: "Consultation".into(),
                quantity: 1,
                unit_price_cents: 8_000,
                line_total_cents: 8_000,
            },
            InvoiceItem {
                id: Uuid::new_v4(),
                invoice_id: inv.id,
                treatment_id: None,
                description: "Dressing".into(),
                quantity: 2,
                unit_price_cents: 2_000,
                line_total_cents: 4_000,
            },
        ];
        insert_invoice(&conn, &inv, &items).unwrap();

        let loaded = get_invoice(&conn, &inv.id).unwrap().unwrap();
        assert_eq!(loaded.total_cents, 12_000);
        assert_eq!(loaded.status, InvoiceStatus::Unpaid);
        let lines = list_invoice_items(&conn, &inv.id).unwrap();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0].description, "Consultation");
    }

    #[test]
    fn invoice_numbers_increment_per_day() {
        let conn = open_memory_database().unwrap();
        let branch = fixtures::branch(&conn, "Main");
        let clerk = fixtures::user(&conn, "clerk@c.test", UserRole::Receptionist, Some(branch.id));
        let patient = fixtures::patient(&conn, "Ola", "Nord", Some(branch.id));
        let day = NaiveDate::from_ymd_opt(2030, 2, 1).unwrap();

        let first = next_invoice_number(&conn, &day).unwrap();
        assert_eq!(first, "INV-20300201-0001");
        let mut inv = invoice(&patient, &branch, &clerk, 100);
        inv.invoice_number = first;
        insert_invoice(&conn, &inv, &[]).unwrap();
        assert_eq!(next_invoice_number(&conn, &day).unwrap(), "INV-20300201-0002");
        let other_day = NaiveDate::from_ymd_opt(2030, 2, 2).unwrap();
        assert_eq!(next_invoice_number(&conn, &other_day).unwrap(), "INV-20300202-0001");
    }

    #[test]
    fn past_due_skips_paid_and_cancelled() {
        let conn = open_memory_database().unwrap();
        let branch = fixtures::branch(&conn, "Main");
        let clerk = fixtures::user(&conn, "clerk@c.test", UserRole::Receptionist, Some(branch.id));
        let patient = fixtures::patient(&conn, "Ola", "Nord", Some(branch.id));
        let open = invoice(&patient, &branch, &clerk, 100);
        let mut paid = invoice(&patient, &branch, &clerk, 100);
        paid.status = InvoiceStatus::Paid;
        let mut cancelled = invoice(&patient, &branch, &clerk, 100);
        cancelled.status = InvoiceStatus::Cancelled;
        for inv in [&open, &paid, &cancelled] {
            insert_invoice(&conn, inv, &[]).unwrap();
        }
        let today = NaiveDate::from_ymd_opt(2030, 2, 15).unwrap();
        let due = list_past_due(&conn, &today).unwrap();
        assert_eq!(due.len(), 1);
        assert_eq!(due[0].id, open.id);
    }
}
