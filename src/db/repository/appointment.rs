use chrono::{Duration, NaiveDate, NaiveDateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use uuid::Uuid;

use super::{
    datetime_col, format_date, format_datetime, format_timestamp, opt_id, opt_uuid_col,
    timestamp_col, uuid_col,
};
use crate::db::DatabaseError;
use crate::models::*;

const APPOINTMENT_COLUMNS: &str = "id, patient_id, doctor_id, branch_id, scheduled_at,
     duration_minutes, reason, notes, status, is_walk_in, created_by, decided_by,
     decision_note, reminder_sent, created_at, updated_at";

fn map_appointment(row: &rusqlite::Row<'_>) -> rusqlite::Result<Appointment> {
    Ok(Appointment {
        id: uuid_col(row, 0)?,
        patient_id: uuid_col(row, 1)?,
        doctor_id: uuid_col(row, 2)?,
        branch_id: uuid_col(row, 3)?,
        scheduled_at: datetime_col(row, 4)?,
        duration_minutes: row.get(5)?,
        reason: row.get(6)?,
        notes: row.get(7)?,
        status: row.get(8)?,
        is_walk_in: row.get(9)?,
        created_by: uuid_col(row, 10)?,
        decided_by: opt_uuid_col(row, 11)?,
        decision_note: row.get(12)?,
        reminder_sent: row.get(13)?,
        created_at: timestamp_col(row, 14)?,
        updated_at: timestamp_col(row, 15)?,
    })
}

pub fn insert_appointment(conn: &Connection, a: &Appointment) -> Result<(), DatabaseError> {
    conn.execute(
        "INSERT INTO appointments (id, patient_id, doctor_id, branch_id, scheduled_at,
             duration_minutes, reason, notes, status, is_walk_in, created_by, decided_by,
             decision_note, reminder_sent, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16)",
        params![
            a.id.to_string(),
            a.patient_id.to_string(),
            a.doctor_id.to_string(),
            a.branch_id.to_string(),
            format_datetime(&a.scheduled_at),
            a.duration_minutes,
            a.reason,
            a.notes,
            a.status,
            a.is_walk_in,
            a.created_by.to_string(),
            opt_id(&a.decided_by),
            a.decision_note,
            a.reminder_sent,
            format_timestamp(&a.created_at),
            format_timestamp(&a.updated_at),
        ],
    )?;
    Ok(())
}

pub fn get_appointment(conn: &Connection, id: &Uuid) -> Result<Option<Appointment>, DatabaseError> {
    let sql = format!("SELECT {APPOINTMENT_COLUMNS} FROM appointments WHERE id = ?1");
    Ok(conn
        .query_row(&sql, params![id.to_string()], map_appointment)
        .optional()?)
}

pub fn list_appointments(
    conn: &Connection,
    filter: &AppointmentFilter,
) -> Result<Vec<Appointment>, DatabaseError> {
    let sql = format!(
        "SELECT {APPOINTMENT_COLUMNS} FROM appointments
         WHERE (?1 IS NULL OR status = ?1)
           AND (?2 IS NULL OR doctor_id = ?2)
           AND (?3 IS NULL OR patient_id = ?3)
           AND (?4 IS NULL OR branch_id = ?4)
           AND (?5 IS NULL OR substr(scheduled_at, 1, 10) >= ?5)
           AND (?6 IS NULL OR substr(scheduled_at, 1, 10) <= ?6)
         ORDER BY scheduled_at"
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(
        params![
            filter.status.map(|s| s.as_str()),
            opt_id(&filter.doctor_id),
            opt_id(&filter.patient_id),
            opt_id(&filter.branch_id),
            filter.from.as_ref().map(format_date),
            filter.to.as_ref().map(format_date),
        ],
        map_appointment,
    )?;
    rows.map(|r| r.map_err(DatabaseError::from)).collect()
}

/// Persist schedule, status and decision fields of an existing appointment.
pub fn update_appointment(conn: &Connection, a: &Appointment) -> Result<(), DatabaseError> {
    let changed = conn.execute(
        "UPDATE appointments SET doctor_id = ?2, branch_id = ?3, scheduled_at = ?4,
             duration_minutes = ?5, reason = ?6, notes = ?7, status = ?8, decided_by = ?9,
             decision_note = ?10, reminder_sent = ?11, updated_at = ?12
         WHERE id = ?1",
        params![
            a.id.to_string(),
            a.doctor_id.to_string(),
            a.branch_id.to_string(),
            format_datetime(&a.scheduled_at),
            a.duration_minutes,
            a.reason,
            a.notes,
            a.status,
            opt_id(&a.decided_by),
            a.decision_note,
            a.reminder_sent,
            format_timestamp(&Utc::now()),
        ],
    )?;
    if changed == 0 {
        return Err(DatabaseError::not_found("Appointment", a.id));
    }
    Ok(())
}

/// Slot-blocking appointments of `doctor_id` starting strictly within
/// `window_minutes` of `at`, excluding `exclude`.
pub fn find_doctor_conflicts(
    conn: &Connection,
    doctor_id: &Uuid,
    at: &NaiveDateTime,
    window_minutes: i64,
    exclude: Option<&Uuid>,
) -> Result<Vec<Appointment>, DatabaseError> {
    let lower = *at - Duration::minutes(window_minutes);
    let upper = *at + Duration::minutes(window_minutes);
    let sql = format!(
        "SELECT {APPOINTMENT_COLUMNS} FROM appointments
         WHERE doctor_id = ?1
           AND status IN ('pending', 'approved', 'emergency')
           AND scheduled_at > ?2 AND scheduled_at < ?3
           AND (?4 IS NULL OR id != ?4)
         ORDER BY scheduled_at"
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(
        params![
            doctor_id.to_string(),
            format_datetime(&lower),
            format_datetime(&upper),
            exclude.map(|id| id.to_string()),
        ],
        map_appointment,
    )?;
    rows.map(|r| r.map_err(DatabaseError::from)).collect()
}

/// Approved appointments on `date` that have not been reminded yet.
pub fn list_unreminded_on(conn: &Connection, date: &NaiveDate) -> Result<Vec<Appointment>, DatabaseError> {
    let sql = format!(
        "SELECT {APPOINTMENT_COLUMNS} FROM appointments
         WHERE status = 'approved' AND reminder_sent = 0
           AND substr(scheduled_at, 1, 10) = ?1
         ORDER BY scheduled_at"
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(params![format_date(date)], map_appointment)?;
    rows.map(|r| r.map_err(DatabaseError::from)).collect()
}

pub fn mark_reminder_sent(conn: &Connection, id: &Uuid) -> Result<(), DatabaseError> {
    conn.execute(
        "UPDATE appointments SET reminder_sent = 1 WHERE id = ?1",
        params![id.to_string()],
    )?;
    Ok(())
}

pub fn insert_appointment_treatment(
    conn: &Connection,
    appointment_id: &Uuid,
    treatment_id: &Uuid,
    quantity: i64,
    notes: Option<&str>,
) -> Result<Uuid, DatabaseError> {
    let id = Uuid::new_v4();
    conn.execute(
        "INSERT INTO appointment_treatments (id, appointment_id, treatment_id, quantity, notes)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![
            id.to_string(),
            appointment_id.to_string(),
            treatment_id.to_string(),
            quantity,
            notes,
        ],
    )?;
    Ok(id)
}

/// Treatments recorded on an appointment, priced from the catalogue.
pub fn list_appointment_treatments(
    conn: &Connection,
    appointment_id: &Uuid,
) -> Result<Vec<AppointmentTreatment>, DatabaseError> {
    let mut stmt = conn.prepare(
        "SELECT at.id, at.appointment_id, at.treatment_id, t.name, t.price_cents, at.quantity, at.notes
         FROM appointment_treatments at
         JOIN treatments t ON t.id = at.treatment_id
         WHERE at.appointment_id = ?1
         ORDER BY t.name",
    )?;
    let rows = stmt.query_map(params![appointment_id.to_string()], |row| {
        Ok(AppointmentTreatment {
            id: uuid_col(row, 0)?,
            appointment_id: uuid_col(row, 1)?,
            treatment_id: uuid_col(row, 2)?,
            treatment_name: row.get(3)?,
            unit_price_cents: row.get(4)?,
            quantity: row.get(5)?,
            notes: row.get(6)?,
        })
    })?;
    rows.map(|r| r.map_err(DatabaseError::from)).collect()
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::db::repository::fixtures;
    use crate::db::sqlite::open_memory_database;

    pub(crate) fn at(s: &str) -> NaiveDateTime {
        NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M").unwrap()
    }

    pub(crate) fn appointment(
        patient: &Patient,
        doctor: &User,
        branch: &Branch,
        scheduled_at: NaiveDateTime,
        status: AppointmentStatus,
    ) -> Appointment {
        let now = Utc::now();
        Appointment {
            id: Uuid::new_v4(),
            patient_id: patient.id,
            doctor_id: doctor.id,
            branch_id: branch.id,
            scheduled_at,
            duration_minutes: 30,
            reason: "Check-up".into(),
            notes: None,
            status,
            is_walk_in: false,
            created_by: doctor.id,
            decided_by: None,
            decision_note: None,
            reminder_sent: false,
            created_at: now,
            updated_at: now,
        }
    }

    fn seed(conn: &Connection) -> (Branch, User, Patient) {
        let branch = fixtures::branch(conn, "Main");
        let doctor = fixtures::user(conn, "doc@c.test", UserRole::Doctor, Some(branch.id));
        let patient = fixtures::patient(conn, "Eva", "Lind", Some(branch.id));
        (branch, doctor, patient)
    }

    #[test]
    fn conflicts_respect_window_and_status() {
        let conn = open_memory_database().unwrap();
        let (branch, doctor, patient) = seed(&conn);
        let booked = appointment(&patient, &doctor, &branch, at("2030-03-04 10:00"), AppointmentStatus::Approved);
        insert_appointment(&conn, &booked).unwrap();
        let cancelled = appointment(&patient, &doctor, &branch, at("2030-03-04 11:00"), AppointmentStatus::Cancelled);
        insert_appointment(&conn, &cancelled).unwrap();

        let hits = find_doctor_conflicts(&conn, &doctor.id, &at("2030-03-04 10:20"), 30, None).unwrap();
        assert_eq!(hits.len(), 1);
        // Exactly one window away is free
        let edge = find_doctor_conflicts(&conn, &doctor.id, &at("2030-03-04 10:30"), 30, None).unwrap();
        assert!(edge.is_empty());
        // Cancelled appointments do not block
        let freed = find_doctor_conflicts(&conn, &doctor.id, &at("2030-03-04 11:00"), 30, None).unwrap();
        assert!(freed.is_empty());
        // Rescheduling ignores itself
        let own = find_doctor_conflicts(&conn, &doctor.id, &at("2030-03-04 10:00"), 30, Some(&booked.id)).unwrap();
        assert!(own.is_empty());
    }

    #[test]
    fn list_filters_by_date_range_and_status() {
        let conn = open_memory_database().unwrap();
        let (branch, doctor, patient) = seed(&conn);
        for (when, status) in [
            ("2030-03-04 09:00", AppointmentStatus::Pending),
            ("2030-03-05 09:00", AppointmentStatus::Approved),
            ("2030-03-06 09:00", AppointmentStatus::Approved),
        ] {
            insert_appointment(&conn, &appointment(&patient, &doctor, &branch, at(when), status)).unwrap();
        }
        let filter = AppointmentFilter {
            status: Some(AppointmentStatus::Approved),
            from: NaiveDate::from_ymd_opt(2030, 3, 4),
            to: NaiveDate::from_ymd_opt(2030, 3, 5),
            ..Default::default()
        };
        let found = list_appointments(&conn, &filter).unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].scheduled_at, at("2030-03-05 09:00"));
    }

    #[test]
    fn reminder_candidates_are_marked_once() {
        let conn = open_memory_database().unwrap();
        let (branch, doctor, patient) = seed(&conn);
        let appt = appointment(&patient, &doctor, &branch, at("2030-03-05 14:00"), AppointmentStatus::Approved);
        insert_appointment(&conn, &appt).unwrap();
        let day = NaiveDate::from_ymd_opt(2030, 3, 5).unwrap();

        assert_eq!(list_unreminded_on(&conn, &day).unwrap().len(), 1);
        mark_reminder_sent(&conn, &appt.id).unwrap();
        assert!(list_unreminded_on(&conn, &day).unwrap().is_empty());
    }

    #[test]
    fn recorded_treatments_carry_catalogue_price() {
        let conn = open_memory_database().unwrap();
        let (branch, doctor, patient) = seed(&conn);
        let appt = appointment(&patient, &doctor, &branch, at("2030-03-05 14:00"), AppointmentStatus::Approved);
        insert_appointment(&conn, &appt).unwrap();
        let cleaning = fixtures::treatment(&conn, "Cleaning", 4_500);
        insert_appointment_treatment(&conn, &appt.id, &cleaning.id, 2, Some("both arches")).unwrap();

        let lines = list_appointment_treatments(&conn, &appt.id).unwrap();
        assert_eq!(lines.len(), 1);
        assert_eq!(lines[0].unit_price_cents, 4_500);
        assert_eq!(lines[0].quantity, 2);
    }
}
