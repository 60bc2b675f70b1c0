//! First-start data: the initial administrator and default staff titles.

use chrono::Utc;
use rusqlite::Connection;
use uuid::Uuid;

use crate::auth::{self, AuthError};
use crate::config::AppConfig;
use crate::db::{self, DatabaseError};
use crate::models::{StaffTitle, User, UserRole};

/// Titles created on an empty `roles` table.
const DEFAULT_TITLES: &[(&str, UserRole, &str)] = &[
    ("General Practitioner", UserRole::Doctor, "Primary care physician"),
    ("Dentist", UserRole::Doctor, "Dental care"),
    ("Front Desk", UserRole::Receptionist, "Bookings, walk-ins and payments"),
    ("Billing Clerk", UserRole::Receptionist, "Invoices and insurance claims"),
    ("Clinic Manager", UserRole::BranchManager, "Runs a single branch"),
    ("IT Administrator", UserRole::SystemAdministrator, "Full system access"),
];

/// Create the configured administrator when no active administrator
/// exists. Returns the new account, if one was created.
pub fn ensure_admin(conn: &Connection, config: &AppConfig) -> Result<Option<User>, AuthError> {
    if db::count_active_users_with_role(conn, UserRole::SystemAdministrator)? > 0 {
        return Ok(None);
    }
    let (Some(email), Some(password)) = (config.admin_email.as_deref(), config.admin_password.as_deref()) else {
        tracing::warn!("No administrator exists; set MEDSYNC_ADMIN_EMAIL and MEDSYNC_ADMIN_PASSWORD");
        return Ok(None);
    };

    let email = email.trim().to_lowercase();
    if !email.contains('@') {
        return Err(AuthError::Invalid("Administrator email is invalid".into()));
    }
    auth::validate_password(password)?;
    if db::get_user_by_email(conn, &email)?.is_some() {
        return Err(AuthError::EmailTaken);
    }

    let now = Utc::now();
    let admin = User {
        id: Uuid::new_v4(),
        email,
        password_hash: auth::hash_password(password),
        full_name: "System Administrator".into(),
        phone: None,
        role: UserRole::SystemAdministrator,
        staff_title_id: None,
        branch_id: None,
        profile_picture: None,
        is_active: true,
        last_login_at: None,
        created_at: now,
        updated_at: now,
    };
    db::insert_user(conn, &admin)?;
    db::record_audit(conn, None, "bootstrap_admin", "user", Some(&admin.id.to_string()), None)?;
    tracing::info!(user_id = %admin.id, "Administrator account created");
    Ok(Some(admin))
}

/// Seed [`DEFAULT_TITLES`] when no titles exist. Returns how many were added.
pub fn seed_staff_titles(conn: &Connection) -> Result<usize, DatabaseError> {
    if db::count_staff_titles(conn)? > 0 {
        return Ok(0);
    }
    let now = Utc::now();
    for (name, base_role, description) in DEFAULT_TITLES {
        db::insert_staff_title(
            conn,
            &StaffTitle {
                id: Uuid::new_v4(),
                name: (*name).to_string(),
                base_role: *base_role,
                description: Some((*description).to_string()),
                is_active: true,
                created_at: now,
            },
        )?;
    }
    tracing::info!(count = DEFAULT_TITLES.len(), "Seeded default staff titles");
    Ok(DEFAULT_TITLES.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::sqlite::open_memory_database;

    fn config(email: Option<&str>, password: Option<&str>) -> AppConfig {
        AppConfig {
            admin_email: email.map(String::from),
            admin_password: password.map(String::from),
            ..AppConfig::default()
        }
    }

    #[test]
    fn creates_admin_once() {
        let conn = open_memory_database().unwrap();
        let cfg = config(Some("Root@Clinic.test"), Some("correct-horse"));

        let admin = ensure_admin(&conn, &cfg).unwrap().expect("admin created");
        assert_eq!(admin.email, "root@clinic.test");
        assert!(auth::verify_password("correct-horse", &admin.password_hash));

        assert!(ensure_admin(&conn, &cfg).unwrap().is_none());
        assert_eq!(
            db::count_active_users_with_role(&conn, UserRole::SystemAdministrator).unwrap(),
            1
        );
    }

    #[test]
    fn skips_admin_without_credentials() {
        let conn = open_memory_database().unwrap();
        assert!(ensure_admin(&conn, &config(None, None)).unwrap().is_none());
    }

    #[test]
    fn rejects_weak_admin_password() {
        let conn = open_memory_database().unwrap();
        let err = ensure_admin(&conn, &config(Some("a@b.test"), Some("short"))).unwrap_err();
        assert!(matches!(err, AuthError::WeakPassword));
    }

    #[test]
    fn seeds_titles_only_into_empty_table() {
        let conn = open_memory_database().unwrap();
        assert_eq!(seed_staff_titles(&conn).unwrap(), DEFAULT_TITLES.len());
        assert_eq!(seed_staff_titles(&conn).unwrap(), 0);
        let titles = db::list_staff_titles(&conn, false).unwrap();
        assert_eq!(titles.len(), DEFAULT_TITLES.len());
        assert!(titles.iter().all(|t| t.base_role.is_staff()));
    }
}
