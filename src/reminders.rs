//! Daily reminder job.
//!
//! Once a day, at the configured local hour, the scheduler:
//! 1. reminds patients of tomorrow's approved appointments (once per
//!    appointment, tracked by `reminder_sent`)
//! 2. flags past-due invoices as overdue and notifies the patient once per
//!    invoice per day (tracked in `reminder_log`)

use std::sync::Arc;
use std::time::Duration;

use chrono::{Local, NaiveDate, NaiveDateTime, NaiveTime};
use rusqlite::Connection;
use serde::Serialize;
use tokio::sync::oneshot;

use crate::billing::{mark_overdue, BillingError};
use crate::core_state::CoreState;
use crate::db::{self, DatabaseError};
use crate::notifications::{self, Notifier};

const OVERDUE_KIND: &str = "overdue_invoice";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ReminderReport {
    pub reminders_sent: usize,
    pub overdue_flagged: usize,
    pub overdue_notified: usize,
}

#[derive(Debug, thiserror::Error)]
pub enum ReminderError {
    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),
    #[error("Billing error: {0}")]
    Billing(#[from] BillingError),
}

/// Run both daily jobs for `today`. Safe to run more than once a day.
pub fn run_daily(
    conn: &Connection,
    notifier: &dyn Notifier,
    today: NaiveDate,
) -> Result<ReminderReport, ReminderError> {
    let mut report = ReminderReport::default();

    if let Some(tomorrow) = today.succ_opt() {
        for appt in db::list_unreminded_on(conn, &tomorrow)? {
            let Some(patient) = db::get_patient(conn, &appt.patient_id)? else {
                tracing::warn!(appointment_id = %appt.id, "Reminder skipped: patient missing");
                continue;
            };
            let message = notifications::appointment_reminder(&patient, &appt);
            notifications::dispatch(notifier, &patient, &message);
            // Marked even when delivery failed so a broken address is not retried all day.
            db::mark_reminder_sent(conn, &appt.id)?;
            report.reminders_sent += 1;
        }
    }

    let overdue = mark_overdue(conn, today)?;
    report.overdue_flagged = overdue.len();
    for invoice in &overdue {
        if !db::record_reminder(conn, OVERDUE_KIND, &invoice.id.to_string(), &today)? {
            continue;
        }
        let Some(patient) = db::get_patient(conn, &invoice.patient_id)? else {
            continue;
        };
        let message = notifications::invoice_overdue(&patient, invoice, today);
        if notifications::dispatch(notifier, &patient, &message) > 0 {
            report.overdue_notified += 1;
        }
    }

    tracing::info!(
        reminders = report.reminders_sent,
        overdue = report.overdue_flagged,
        notified = report.overdue_notified,
        "Daily reminders completed"
    );
    Ok(report)
}

/// First occurrence of `hour:00` strictly after `now`.
pub fn next_run_after(now: NaiveDateTime, hour: u32) -> NaiveDateTime {
    let at = NaiveTime::from_hms_opt(hour.min(23), 0, 0).unwrap_or(NaiveTime::MIN);
    let today = now.date().and_time(at);
    if today > now {
        today
    } else {
        today + chrono::Duration::days(1)
    }
}

/// Handle for the background reminder task. Dropping it stops the task.
pub struct ReminderSchedulerHandle {
    shutdown_tx: Option<oneshot::Sender<()>>,
}

impl ReminderSchedulerHandle {
    pub fn shutdown(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
    }
}

impl Drop for ReminderSchedulerHandle {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Spawn the daily reminder task. Must be called inside a tokio runtime.
pub fn start_reminder_scheduler(core: Arc<CoreState>) -> ReminderSchedulerHandle {
    let (shutdown_tx, mut shutdown_rx) = oneshot::channel::<()>();
    let hour = core.config.reminder_hour;

    tokio::spawn(async move {
        tracing::info!(hour, "Reminder scheduler started");
        loop {
            let now = Local::now().naive_local();
            let wait = (next_run_after(now, hour) - now)
                .to_std()
                .unwrap_or(Duration::from_secs(60));

            tokio::select! {
                _ = &mut shutdown_rx => break,
                () = tokio::time::sleep(wait) => {}
            }

            let core = core.clone();
            let outcome = tokio::task::spawn_blocking(move || {
                let conn = core.open_db().map_err(|e| e.to_string())?;
                run_daily(&conn, core.notifier(), Local::now().date_naive()).map_err(|e| e.to_string())
            })
            .await;
            match outcome {
                Ok(Ok(_)) => {}
                Ok(Err(e)) => tracing::error!("Daily reminders failed: {e}"),
                Err(e) => tracing::error!("Daily reminder task panicked: {e}"),
            }
        }
        tracing::info!("Reminder scheduler shutting down");
    });

    ReminderSchedulerHandle {
        shutdown_tx: Some(shutdown_tx),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::repository::appointment::tests::{appointment, at};
    use crate::db::repository::fixtures;
    use crate::db::repository::invoice::tests::invoice;
    use crate::db::sqlite::open_memory_database;
    use crate::models::*;
    use crate::notifications::tests::RecordingNotifier;

    fn day(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    #[test]
    fn reminds_tomorrows_approved_appointments_once() {
        let conn = open_memory_database().unwrap();
        let branch = fixtures::branch(&conn, "Main");
        let doctor = fixtures::user(&conn, "doc@c.test", UserRole::Doctor, Some(branch.id));
        let patient = fixtures::patient(&conn, "Ivy", "Hart", Some(branch.id));

        let tomorrow = appointment(&patient, &doctor, &branch, at("2030-04-03 10:00"), AppointmentStatus::Approved);
        let pending = appointment(&patient, &doctor, &branch, at("2030-04-03 11:00"), AppointmentStatus::Pending);
        let later = appointment(&patient, &doctor, &branch, at("2030-04-04 10:00"), AppointmentStatus::Approved);
        for a in [&tomorrow, &pending, &later] {
            db::insert_appointment(&conn, a).unwrap();
        }

        let notifier = RecordingNotifier::default();
        let report = run_daily(&conn, &notifier, day("2030-04-02")).unwrap();
        assert_eq!(report.reminders_sent, 1);
        // Fixture patients have both email and phone.
        assert_eq!(notifier.count(), 2);
        assert!(db::get_appointment(&conn, &tomorrow.id).unwrap().unwrap().reminder_sent);

        let again = run_daily(&conn, &notifier, day("2030-04-02")).unwrap();
        assert_eq!(again.reminders_sent, 0);
        assert_eq!(notifier.count(), 2);
    }

    #[test]
    fn overdue_invoices_are_flagged_and_notified_once_per_day() {
        let conn = open_memory_database().unwrap();
        let branch = fixtures::branch(&conn, "Main");
        let clerk = fixtures::user(&conn, "clerk@c.test", UserRole::Receptionist, Some(branch.id));
        let patient = fixtures::patient(&conn, "Ivy", "Hart", Some(branch.id));

        let mut inv = invoice(&patient, &branch, &clerk, 5000);
        inv.due_date = day("2030-03-01");
        db::insert_invoice(&conn, &inv, &[]).unwrap();

        let notifier = RecordingNotifier {
            fail_sms: true,
            ..Default::default()
        };
        let first = run_daily(&conn, &notifier, day("2030-04-02")).unwrap();
        assert_eq!(first.overdue_flagged, 1);
        assert_eq!(first.overdue_notified, 1);
        assert_eq!(notifier.count(), 1);
        assert_eq!(
            db::get_invoice(&conn, &inv.id).unwrap().unwrap().status,
            InvoiceStatus::Overdue
        );

        let same_day = run_daily(&conn, &notifier, day("2030-04-02")).unwrap();
        assert_eq!(same_day.overdue_flagged, 1);
        assert_eq!(same_day.overdue_notified, 0);

        let next_day = run_daily(&conn, &notifier, day("2030-04-03")).unwrap();
        assert_eq!(next_day.overdue_notified, 1);
    }

    #[test]
    fn next_run_rolls_to_tomorrow_once_the_hour_has_passed() {
        let now = at("2030-04-02 07:30");
        assert_eq!(next_run_after(now, 8), at("2030-04-02 08:00"));
        assert_eq!(next_run_after(now, 7), at("2030-04-03 07:00"));
        assert_eq!(next_run_after(at("2030-04-02 08:00"), 8), at("2030-04-03 08:00"));
    }

    #[tokio::test]
    async fn scheduler_stops_on_shutdown() {
        let dir = tempfile::tempdir().unwrap();
        let core = Arc::new(CoreState::new(crate::config::AppConfig::for_data_dir(dir.path())));
        let mut handle = start_reminder_scheduler(core);
        handle.shutdown();
        handle.shutdown();
    }
}
