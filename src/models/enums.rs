use crate::db::DatabaseError;
use serde::{Deserialize, Serialize};

/// Macro to generate enum with as_str + std::str::FromStr pattern
macro_rules! str_enum {
    ($name:ident { $($variant:ident => $s:literal),+ $(,)? }) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(rename_all = "snake_case")]
        pub enum $name {
            $($variant),+
        }

        impl $name {
            pub fn as_str(&self) -> &'static str {
                match self {
                    $(Self::$variant => $s),+
                }
            }

            pub const ALL: &'static [$name] = &[$(Self::$variant),+];
        }

        impl std::str::FromStr for $name {
            type Err = DatabaseError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($s => Ok(Self::$variant)),+,
                    _ => Err(DatabaseError::InvalidEnum {
                        field: stringify!($name).into(),
                        value: s.into(),
                    }),
                }
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl rusqlite::ToSql for $name {
            fn to_sql(&self) -> rusqlite::Result<rusqlite::types::ToSqlOutput<'_>> {
                Ok(rusqlite::types::ToSqlOutput::from(self.as_str()))
            }
        }

        impl rusqlite::types::FromSql for $name {
            fn column_result(
                value: rusqlite::types::ValueRef<'_>,
            ) -> rusqlite::types::FromSqlResult<Self> {
                let s = value.as_str()?;
                s.parse()
                    .map_err(|e| rusqlite::types::FromSqlError::Other(Box::new(e)))
            }
        }
    };
}

str_enum!(UserRole {
    Patient => "patient",
    Doctor => "doctor",
    Receptionist => "receptionist",
    BranchManager => "branch_manager",
    SystemAdministrator => "system_administrator",
});

str_enum!(AppointmentStatus {
    Pending => "pending",
    Approved => "approved",
    Rejected => "rejected",
    Cancelled => "cancelled",
    Completed => "completed",
    Emergency => "emergency",
});

str_enum!(InvoiceStatus {
    Unpaid => "unpaid",
    PartiallyPaid => "partially_paid",
    Paid => "paid",
    Overdue => "overdue",
    Cancelled => "cancelled",
});

str_enum!(PaymentMethod {
    Cash => "cash",
    Card => "card",
    BankTransfer => "bank_transfer",
    Insurance => "insurance",
    Online => "online",
});

str_enum!(ClaimStatus {
    Submitted => "submitted",
    UnderReview => "under_review",
    Approved => "approved",
    Rejected => "rejected",
    Paid => "paid",
});

str_enum!(Gender {
    Male => "male",
    Female => "female",
    Other => "other",
    Unspecified => "unspecified",
});

impl UserRole {
    pub fn is_staff(self) -> bool {
        self != Self::Patient
    }

    pub fn is_admin(self) -> bool {
        self == Self::SystemAdministrator
    }

    /// Front-desk style management of bookings for a branch.
    pub fn can_manage_appointments(self) -> bool {
        matches!(
            self,
            Self::Receptionist | Self::BranchManager | Self::SystemAdministrator
        )
    }

    /// Approve / reject pending bookings.
    pub fn can_decide_appointments(self) -> bool {
        self == Self::Doctor || self.can_manage_appointments()
    }

    pub fn can_manage_billing(self) -> bool {
        matches!(
            self,
            Self::Receptionist | Self::BranchManager | Self::SystemAdministrator
        )
    }

    /// Treatment catalogue and staff titles.
    pub fn can_manage_catalogue(self) -> bool {
        matches!(self, Self::BranchManager | Self::SystemAdministrator)
    }

    /// Roles bound to a single branch.
    pub fn is_branch_scoped(self) -> bool {
        matches!(self, Self::Receptionist | Self::BranchManager)
    }
}

impl AppointmentStatus {
    /// Statuses that occupy a doctor's slot.
    pub const BLOCKING: &'static [AppointmentStatus] =
        &[Self::Pending, Self::Approved, Self::Emergency];

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Rejected | Self::Cancelled | Self::Completed)
    }

    pub fn can_transition_to(self, next: AppointmentStatus) -> bool {
        use AppointmentStatus::*;
        matches!(
            (self, next),
            (Pending, Approved)
                | (Pending, Rejected)
                | (Pending, Cancelled)
                | (Approved, Completed)
                | (Approved, Cancelled)
                | (Emergency, Completed)
                | (Emergency, Cancelled)
        )
    }
}

impl InvoiceStatus {
    /// Invoices that still expect money.
    pub fn is_open(self) -> bool {
        matches!(self, Self::Unpaid | Self::PartiallyPaid | Self::Overdue)
    }
}

impl ClaimStatus {
    pub fn can_transition_to(self, next: ClaimStatus) -> bool {
        use ClaimStatus::*;
        matches!(
            (self, next),
            (Submitted, UnderReview)
                | (Submitted, Approved)
                | (Submitted, Rejected)
                | (UnderReview, Approved)
                | (UnderReview, Rejected)
                | (Approved, Paid)
        )
    }

    /// Claims counted against a policy's annual limit.
    pub fn counts_against_limit(self) -> bool {
        matches!(self, Self::Submitted | Self::UnderReview | Self::Approved | Self::Paid)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn user_role_round_trip() {
        for (variant, s) in [
            (UserRole::Patient, "patient"),
            (UserRole::Doctor, "doctor"),
            (UserRole::Receptionist, "receptionist"),
            (UserRole::BranchManager, "branch_manager"),
            (UserRole::SystemAdministrator, "system_administrator"),
        ] {
            assert_eq!(variant.as_str(), s);
            assert_eq!(UserRole::from_str(s).unwrap(), variant);
        }
    }

    #[test]
    fn serde_uses_snake_case() {
        let json = serde_json::to_string(&AppointmentStatus::Emergency).unwrap();
        assert_eq!(json, "\"emergency\"");
        let parsed: InvoiceStatus = serde_json::from_str("\"partially_paid\"").unwrap();
        assert_eq!(parsed, InvoiceStatus::PartiallyPaid);
    }

    #[test]
    fn invalid_enum_returns_error() {
        assert!(AppointmentStatus::from_str("invalid").is_err());
        assert!(UserRole::from_str("Doctor").is_err());
        assert!(PaymentMethod::from_str("").is_err());
    }

    #[test]
    fn pending_appointment_can_be_decided() {
        assert!(AppointmentStatus::Pending.can_transition_to(AppointmentStatus::Approved));
        assert!(AppointmentStatus::Pending.can_transition_to(AppointmentStatus::Rejected));
        assert!(AppointmentStatus::Pending.can_transition_to(AppointmentStatus::Cancelled));
        assert!(!AppointmentStatus::Pending.can_transition_to(AppointmentStatus::Completed));
    }

    #[test]
    fn terminal_statuses_have_no_exits() {
        for from in [
            AppointmentStatus::Rejected,
            AppointmentStatus::Cancelled,
            AppointmentStatus::Completed,
        ] {
            assert!(from.is_terminal());
            for to in AppointmentStatus::ALL {
                assert!(!from.can_transition_to(*to), "{from} -> {to}");
            }
        }
    }

    #[test]
    fn emergency_skips_approval() {
        assert!(AppointmentStatus::Emergency.can_transition_to(AppointmentStatus::Completed));
        assert!(!AppointmentStatus::Emergency.can_transition_to(AppointmentStatus::Approved));
    }

    #[test]
    fn role_permissions() {
        assert!(!UserRole::Patient.is_staff());
        assert!(UserRole::Doctor.can_decide_appointments());
        assert!(!UserRole::Doctor.can_manage_appointments());
        assert!(!UserRole::Doctor.can_manage_billing());
        assert!(UserRole::Receptionist.can_manage_billing());
        assert!(!UserRole::Receptionist.can_manage_catalogue());
        assert!(UserRole::BranchManager.is_branch_scoped());
        assert!(!UserRole::SystemAdministrator.is_branch_scoped());
    }

    #[test]
    fn claim_paid_only_after_approval() {
        assert!(ClaimStatus::Approved.can_transition_to(ClaimStatus::Paid));
        assert!(!ClaimStatus::Submitted.can_transition_to(ClaimStatus::Paid));
        assert!(!ClaimStatus::Rejected.can_transition_to(ClaimStatus::Approved));
        assert!(!ClaimStatus::Rejected.counts_against_limit());
    }
}
