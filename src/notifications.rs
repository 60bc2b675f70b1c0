//! Outbound patient notifications.
//!
//! Delivery goes through the [`Notifier`] trait. The shipped
//! [`LogNotifier`] writes each message to the tracing log; an email or SMS
//! gateway plugs in behind the same trait. Every send is best-effort:
//! [`dispatch`] logs failures and never returns them to the caller.

use chrono::NaiveDate;
use serde::Serialize;

use crate::billing::format_cents;
use crate::models::{Appointment, Invoice, Patient};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Channel {
    Email,
    Sms,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Notification {
    pub channel: Channel,
    pub recipient: String,
    pub subject: String,
    pub body: String,
}

#[derive(Debug, thiserror::Error)]
pub enum NotifyError {
    #[error("No address for {0:?} delivery")]
    MissingRecipient(Channel),
    #[error("Delivery failed: {0}")]
    Delivery(String),
}

pub trait Notifier: Send + Sync {
    fn send(&self, notification: &Notification) -> Result<(), NotifyError>;
}

/// Writes notifications to the log instead of a gateway.
#[derive(Debug, Default)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn send(&self, n: &Notification) -> Result<(), NotifyError> {
        if n.recipient.is_empty() {
            return Err(NotifyError::MissingRecipient(n.channel));
        }
        tracing::info!(
            channel = ?n.channel,
            recipient = %n.recipient,
            subject = %n.subject,
            "Notification sent"
        );
        Ok(())
    }
}

/// A message addressed to a patient, before channel fan-out.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub subject: String,
    pub body: String,
}

/// Send `message` to every channel the patient has an address for.
/// Returns the number of successful deliveries.
pub fn dispatch(notifier: &dyn Notifier, patient: &Patient, message: &Message) -> usize {
    let mut targets = Vec::with_capacity(2);
    if let Some(email) = patient.email.as_deref().filter(|e| !e.is_empty()) {
        targets.push((Channel::Email, email.to_string()));
    }
    if let Some(phone) = patient.phone.as_deref().filter(|p| !p.is_empty()) {
        targets.push((Channel::Sms, phone.to_string()));
    }
    if targets.is_empty() {
        tracing::warn!(patient_id = %patient.id, "Patient has no contact details, notification dropped");
        return 0;
    }

    let mut delivered = 0;
    for (channel, recipient) in targets {
        let notification = Notification {
            channel,
            recipient,
            subject: message.subject.clone(),
            body: message.body.clone(),
        };
        match notifier.send(&notification) {
            Ok(()) => delivered += 1,
            Err(e) => tracing::warn!(patient_id = %patient.id, ?channel, "Notification failed: {e}"),
        }
    }
    delivered
}

// ── Templates ───────────────────────────────────────────────

fn when(appt: &Appointment) -> String {
    appt.scheduled_at.format("%A %d %B %Y at %H:%M").to_string()
}

pub fn appointment_approved(patient: &Patient, appt: &Appointment) -> Message {
    Message {
        subject: "Your appointment is confirmed".into(),
        body: format!(
            "Dear {}, your appointment on {} has been approved.",
            patient.full_name(),
            when(appt)
        ),
    }
}

pub fn appointment_rejected(patient: &Patient, appt: &Appointment, reason: &str) -> Message {
    Message {
        subject: "Your appointment request was declined".into(),
        body: format!(
            "Dear {}, your appointment request for {} could not be accepted. Reason: {}",
            patient.full_name(),
            when(appt),
            reason
        ),
    }
}

pub fn appointment_cancelled(patient: &Patient, appt: &Appointment) -> Message {
    Message {
        subject: "Your appointment was cancelled".into(),
        body: format!(
            "Dear {}, your appointment on {} has been cancelled.",
            patient.full_name(),
            when(appt)
        ),
    }
}

pub fn appointment_reminder(patient: &Patient, appt: &Appointment) -> Message {
    Message {
        subject: "Appointment reminder".into(),
        body: format!(
            "Dear {}, this is a reminder of your appointment tomorrow, {}.",
            patient.full_name(),
            when(appt)
        ),
    }
}

pub fn invoice_overdue(patient: &Patient, invoice: &Invoice, today: NaiveDate) -> Message {
    let days = (today - invoice.due_date).num_days();
    Message {
        subject: format!("Invoice {} is overdue", invoice.invoice_number),
        body: format!(
            "Dear {}, invoice {} was due on {} ({} days ago). Outstanding balance: {}.",
            patient.full_name(),
            invoice.invoice_number,
            invoice.due_date.format("%Y-%m-%d"),
            days,
            format_cents(invoice.balance_cents())
        ),
    }
}
