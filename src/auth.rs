//! Passwords, session tokens and login throttling.
//!
//! Passwords are stored as `pbkdf2-sha256$<iterations>$<salt>$<hash>` with
//! URL-safe base64 fields. Bearer tokens are random 32-byte strings handed
//! to the client once; only their SHA-256 digest is persisted in `sessions`.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::{NaiveDate, Utc};
use pbkdf2::pbkdf2_hmac;
use rusqlite::Connection;
use serde::Deserialize;
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;
use uuid::Uuid;

use crate::db::{self, DatabaseError};
use crate::models::{Gender, Patient, User, UserRole};

pub const MIN_PASSWORD_LENGTH: usize = 8;

#[cfg(not(test))]
const PASSWORD_ITERATIONS: u32 = 600_000;
#[cfg(test)]
const PASSWORD_ITERATIONS: u32 = 1_000;

const SALT_LENGTH: usize = 16;
const HASH_LENGTH: usize = 32;
const HASH_SCHEME: &str = "pbkdf2-sha256";

/// Failures allowed before an email is locked out.
const MAX_FAILED_LOGINS: u32 = 5;
const LOCKOUT_DURATION: Duration = Duration::from_secs(15 * 60);

#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("Invalid email or password")]
    InvalidCredentials,
    #[error("Account is disabled")]
    AccountDisabled,
    #[error("Too many failed attempts, retry in {retry_after_secs}s")]
    LockedOut { retry_after_secs: u64 },
    #[error("Password must be at least {MIN_PASSWORD_LENGTH} characters")]
    WeakPassword,
    #[error("Email is already registered")]
    EmailTaken,
    #[error("{0}")]
    Invalid(String),
    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),
}

// ═══════════════════════════════════════════════════════════
// Password hashing
// ═══════════════════════════════════════════════════════════

pub fn validate_password(password: &str) -> Result<(), AuthError> {
    if password.chars().count() < MIN_PASSWORD_LENGTH {
        return Err(AuthError::WeakPassword);
    }
    Ok(())
}

/// Hash a password with a fresh random salt.
pub fn hash_password(password: &str) -> String {
    let salt: [u8; SALT_LENGTH] = rand::random();
    let mut out = [0u8; HASH_LENGTH];
    pbkdf2_hmac::<Sha256>(password.as_bytes(), &salt, PASSWORD_ITERATIONS, &mut out);
    format!(
        "{HASH_SCHEME}${PASSWORD_ITERATIONS}${}${}",
        URL_SAFE_NO_PAD.encode(salt),
        URL_SAFE_NO_PAD.encode(out)
    )
}

/// Check a password against a stored hash. Malformed hashes never verify.
pub fn verify_password(password: &str, stored: &str) -> bool {
    let mut parts = stored.split('$');
    let (Some(HASH_SCHEME), Some(iterations), Some(salt), Some(expected), None) = (
        parts.next(),
        parts.next(),
        parts.next(),
        parts.next(),
        parts.next(),
    ) else {
        return false;
    };
    let Ok(iterations) = iterations.parse::<u32>() else {
        return false;
    };
    let (Ok(salt), Ok(expected)) = (URL_SAFE_NO_PAD.decode(salt), URL_SAFE_NO_PAD.decode(expected)) else {
        return false;
    };
    if iterations == 0 || expected.len() != HASH_LENGTH {
        return false;
    }

    let mut actual = [0u8; HASH_LENGTH];
    pbkdf2_hmac::<Sha256>(password.as_bytes(), &salt, iterations, &mut actual);
    actual.as_slice().ct_eq(expected.as_slice()).into()
}

// ═══════════════════════════════════════════════════════════
// Session tokens
// ═══════════════════════════════════════════════════════════

/// Generate a random bearer token (URL-safe base64, 32 bytes of entropy).
pub fn generate_token() -> String {
    let bytes: [u8; 32] = rand::random();
    URL_SAFE_NO_PAD.encode(bytes)
}

/// Digest stored in `sessions.token_hash`.
pub fn hash_token(token: &str) -> String {
    let digest = Sha256::digest(token.as_bytes());
    URL_SAFE_NO_PAD.encode(digest)
}

/// Create a session row for `user` and return the raw token.
pub fn issue_session(conn: &Connection, user: &User, ttl_hours: i64) -> Result<String, AuthError> {
    let token = generate_token();
    let expires_at = Utc::now() + chrono::Duration::hours(ttl_hours);
    db::insert_session(conn, &hash_token(&token), &user.id, &expires_at)?;
    Ok(token)
}

/// Resolve a bearer token to its (active) user.
pub fn authenticate(conn: &Connection, token: &str) -> Result<Option<User>, AuthError> {
    Ok(db::find_session_user(conn, &hash_token(token), &Utc::now())?)
}

/// Verify credentials and open a session. Unknown email and wrong
/// password are indistinguishable to the caller.
pub fn login(
    conn: &Connection,
    lockout: &LoginLockout,
    email: &str,
    password: &str,
    ttl_hours: i64,
) -> Result<(String, User), AuthError> {
    let key = email.trim().to_lowercase();
    lockout.check(&key)?;

    let user = match db::get_user_by_email(conn, &key)? {
        Some(user) if verify_password(password, &user.password_hash) => user,
        _ => {
            lockout.record_failure(&key);
            return Err(AuthError::InvalidCredentials);
        }
    };
    if !user.is_active {
        return Err(AuthError::AccountDisabled);
    }

    lockout.record_success(&key);
    let now = Utc::now();
    db::touch_last_login(conn, &user.id, &now)?;
    let token = issue_session(conn, &user, ttl_hours)?;
    let user = User {
        last_login_at: Some(now),
        ..user
    };
    Ok((token, user))
}

pub fn logout(conn: &Connection, token: &str) -> Result<bool, AuthError> {
    Ok(db::delete_session(conn, &hash_token(token))?)
}

/// Replace a user's password after checking the current one.
/// All existing sessions are revoked.
pub fn change_password(conn: &Connection, user: &User, current: &str, new: &str) -> Result<(), AuthError> {
    if !verify_password(current, &user.password_hash) {
        return Err(AuthError::InvalidCredentials);
    }
    validate_password(new)?;
    db::update_password_hash(conn, &user.id, &hash_password(new))?;
    db::delete_user_sessions(conn, &user.id)?;
    Ok(())
}

// ═══════════════════════════════════════════════════════════
// Patient self-registration
// ═══════════════════════════════════════════════════════════

#[derive(Debug, Clone, Deserialize)]
pub struct RegisterRequest {
    pub email: String,
    pub password: String,
    pub first_name: String,
    pub last_name: String,
    pub date_of_birth: NaiveDate,
    #[serde(default)]
    pub gender: Option<Gender>,
    pub phone: Option<String>,
    pub branch_id: Option<Uuid>,
}

/// Create a patient account (user + linked patient row) and sign it in.
pub fn register_patient(
    conn: &Connection,
    req: &RegisterRequest,
    ttl_hours: i64,
) -> Result<(String, User, Patient), AuthError> {
    let email = req.email.trim().to_lowercase();
    if !email.contains('@') {
        return Err(AuthError::Invalid("A valid email is required".into()));
    }
    if req.first_name.trim().is_empty() || req.last_name.trim().is_empty() {
        return Err(AuthError::Invalid("First and last name are required".into()));
    }
    if req.date_of_birth > Utc::now().date_naive() {
        return Err(AuthError::Invalid("Date of birth cannot be in the future".into()));
    }
    validate_password(&req.password)?;
    if db::get_user_by_email(conn, &email)?.is_some() {
        return Err(AuthError::EmailTaken);
    }

    let now = Utc::now();
    let user = User {
        id: Uuid::new_v4(),
        email: email.clone(),
        password_hash: hash_password(&req.password),
        full_name: format!("{} {}", req.first_name.trim(), req.last_name.trim()),
        phone: req.phone.clone(),
        role: UserRole::Patient,
        staff_title_id: None,
        branch_id: req.branch_id,
        profile_picture: None,
        is_active: true,
        last_login_at: None,
        created_at: now,
        updated_at: now,
    };
    let patient = Patient {
        id: Uuid::new_v4(),
        user_id: Some(user.id),
        branch_id: req.branch_id,
        first_name: req.first_name.trim().to_string(),
        last_name: req.last_name.trim().to_string(),
        date_of_birth: req.date_of_birth,
        gender: req.gender.unwrap_or(Gender::Unspecified),
        phone: req.phone.clone(),
        email: Some(email),
        address: None,
        blood_type: None,
        allergies: None,
        medical_history: None,
        emergency_contact_name: None,
        emergency_contact_phone: None,
        is_active: true,
        created_at: now,
        updated_at: now,
    };

    let tx = conn.unchecked_transaction().map_err(DatabaseError::from)?;
    db::insert_user(&tx, &user).map_err(|e| {
        if e.is_unique_violation() {
            AuthError::EmailTaken
        } else {
            AuthError::Database(e)
        }
    })?;
    db::insert_patient(&tx, &patient)?;
    tx.commit().map_err(DatabaseError::from)?;

    let token = issue_session(conn, &user, ttl_hours)?;
    Ok((token, user, patient))
}

// ═══════════════════════════════════════════════════════════
// Branch scoping
// ═══════════════════════════════════════════════════════════

/// Whether `actor` may act on a row belonging to `branch_id`.
///
/// Receptionists and branch managers are confined to their own branch;
/// rows with no branch are visible to all staff.
pub fn can_access_branch(actor: &User, branch_id: Option<&Uuid>) -> bool {
    match branch_id {
        None => true,
        Some(branch) => !actor.role.is_branch_scoped() || actor.branch_id.as_ref() == Some(branch),
    }
}

// ═══════════════════════════════════════════════════════════
// Login lockout
// ═══════════════════════════════════════════════════════════

#[derive(Debug, Default)]
struct FailureRecord {
    failures: u32,
    locked_until: Option<Instant>,
}

/// Per-email failed login tracker.
#[derive(Debug, Default)]
pub struct LoginLockout {
    records: std::sync::Mutex<HashMap<String, FailureRecord>>,
}

impl LoginLockout {
    pub fn new() -> Self {
        Self::default()
    }

    /// `Err` while the key is locked.
    pub fn check(&self, key: &str) -> Result<(), AuthError> {
        self.check_at(key, Instant::now())
    }

    fn check_at(&self, key: &str, now: Instant) -> Result<(), AuthError> {
        let Ok(mut records) = self.records.lock() else {
            return Ok(());
        };
        let Some(record) = records.get_mut(key) else {
            return Ok(());
        };
        match record.locked_until {
            Some(until) if now < until => Err(AuthError::LockedOut {
                retry_after_secs: (until - now).as_secs().max(1),
            }),
            Some(_) => {
                records.remove(key);
                Ok(())
            }
            None => Ok(()),
        }
    }

    pub fn record_failure(&self, key: &str) {
        self.record_failure_at(key, Instant::now());
    }

    fn record_failure_at(&self, key: &str, now: Instant) {
        if let Ok(mut records) = self.records.lock() {
            let record = records.entry(key.to_string()).or_default();
            record.failures += 1;
            if record.failures >= MAX_FAILED_LOGINS {
                tracing::warn!(email = key, "Login locked after repeated failures");
                record.locked_until = Some(now + LOCKOUT_DURATION);
            }
        }
    }

    pub fn record_success(&self, key: &str) {
        if let Ok(mut records) = self.records.lock() {
            records.remove(key);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::repository::fixtures;
    use crate::db::sqlite::open_memory_database;

    fn user_with_password(conn: &Connection, email: &str, password: &str) -> User {
        let user = fixtures::user(conn, email, UserRole::Receptionist, None);
        db::update_password_hash(conn, &user.id, &hash_password(password)).unwrap();
        db::get_user(conn, &user.id).unwrap().unwrap()
    }

    #[test]
    fn password_hash_verifies() {
        let hash = hash_password("correct horse");
        assert!(hash.starts_with("pbkdf2-sha256$"));
        assert!(verify_password("correct horse", &hash));
        assert!(!verify_password("wrong horse", &hash));
    }

    #[test]
    fn same_password_gets_distinct_salts() {
        assert_ne!(hash_password("password1"), hash_password("password1"));
    }

    #[test]
    fn malformed_hash_never_verifies() {
        assert!(!verify_password("x", ""));
        assert!(!verify_password("x", "pbkdf2-sha256$abc$def$ghi"));
        assert!(!verify_password("x", "bcrypt$10$aa$bb"));
    }

    #[test]
    fn short_password_rejected() {
        assert!(matches!(validate_password("short"), Err(AuthError::WeakPassword)));
        assert!(validate_password("long enough").is_ok());
    }

    #[test]
    fn token_hash_is_stable() {
        let token = generate_token();
        assert_eq!(hash_token(&token), hash_token(&token));
        assert_ne!(hash_token(&token), token);
    }

    #[test]
    fn login_issues_working_session() {
        let conn = open_memory_database().unwrap();
        let user = user_with_password(&conn, "desk@clinic.test", "front-desk-1");
        let lockout = LoginLockout::new();

        let (token, logged_in) = login(&conn, &lockout, "Desk@Clinic.test", "front-desk-1", 1).unwrap();
        assert_eq!(logged_in.id, user.id);
        assert!(logged_in.last_login_at.is_some());

        let resolved = authenticate(&conn, &token).unwrap().unwrap();
        assert_eq!(resolved.id, user.id);

        assert!(logout(&conn, &token).unwrap());
        assert!(authenticate(&conn, &token).unwrap().is_none());
    }

    #[test]
    fn unknown_email_and_wrong_password_look_alike() {
        let conn = open_memory_database().unwrap();
        user_with_password(&conn, "desk@clinic.test", "front-desk-1");
        let lockout = LoginLockout::new();
        assert!(matches!(
            login(&conn, &lockout, "nobody@clinic.test", "whatever1", 1),
            Err(AuthError::InvalidCredentials)
        ));
        assert!(matches!(
            login(&conn, &lockout, "desk@clinic.test", "whatever1", 1),
            Err(AuthError::InvalidCredentials)
        ));
    }

    #[test]
    fn disabled_account_cannot_login() {
        let conn = open_memory_database().unwrap();
        let mut user = user_with_password(&conn, "gone@clinic.test", "front-desk-1");
        user.is_active = false;
        db::update_user(&conn, &user).unwrap();
        assert!(matches!(
            login(&conn, &LoginLockout::new(), "gone@clinic.test", "front-desk-1", 1),
            Err(AuthError::AccountDisabled)
        ));
    }

    #[test]
    fn lockout_after_repeated_failures() {
        let conn = open_memory_database().unwrap();
        user_with_password(&conn, "desk@clinic.test", "front-desk-1");
        let lockout = LoginLockout::new();
        for _ in 0..MAX_FAILED_LOGINS {
            let _ = login(&conn, &lockout, "desk@clinic.test", "nope-nope", 1);
        }
        // Correct password is refused while locked.
        assert!(matches!(
            login(&conn, &lockout, "desk@clinic.test", "front-desk-1", 1),
            Err(AuthError::LockedOut { .. })
        ));
    }

    #[test]
    fn lockout_expires() {
        let lockout = LoginLockout::new();
        let start = Instant::now();
        for _ in 0..MAX_FAILED_LOGINS {
            lockout.record_failure_at("a@b.c", start);
        }
        assert!(lockout.check_at("a@b.c", start + Duration::from_secs(60)).is_err());
        assert!(lockout
            .check_at("a@b.c", start + LOCKOUT_DURATION + Duration::from_secs(1))
            .is_ok());
    }

    #[test]
    fn change_password_revokes_sessions() {
        let conn = open_memory_database().unwrap();
        let user = user_with_password(&conn, "doc@clinic.test", "old-password");
        let token = issue_session(&conn, &user, 1).unwrap();

        assert!(matches!(
            change_password(&conn, &user, "not-it", "new-password"),
            Err(AuthError::InvalidCredentials)
        ));
        change_password(&conn, &user, "old-password", "new-password").unwrap();
        assert!(authenticate(&conn, &token).unwrap().is_none());

        let reloaded = db::get_user(&conn, &user.id).unwrap().unwrap();
        assert!(verify_password("new-password", &reloaded.password_hash));
    }

    #[test]
    fn branch_scope_confines_front_desk() {
        let conn = open_memory_database().unwrap();
        let north = fixtures::branch(&conn, "North");
        let south = fixtures::branch(&conn, "South");
        let desk = fixtures::user(&conn, "desk@n.test", UserRole::Receptionist, Some(north.id));
        let admin = fixtures::user(&conn, "root@n.test", UserRole::SystemAdministrator, None);

        assert!(can_access_branch(&desk, Some(&north.id)));
        assert!(!can_access_branch(&desk, Some(&south.id)));
        assert!(can_access_branch(&desk, None));
        assert!(can_access_branch(&admin, Some(&south.id)));
    }

    fn registration(email: &str) -> RegisterRequest {
        RegisterRequest {
            email: email.into(),
            password: "patient-pass".into(),
            first_name: "Ada".into(),
            last_name: "Byron".into(),
            date_of_birth: NaiveDate::from_ymd_opt(1990, 12, 10).unwrap(),
            gender: None,
            phone: Some("+15550199".into()),
            branch_id: None,
        }
    }

    #[test]
    fn register_creates_linked_patient() {
        let conn = open_memory_database().unwrap();
        let (token, user, patient) = register_patient(&conn, &registration("Ada@Example.com"), 1).unwrap();
        assert_eq!(user.role, UserRole::Patient);
        assert_eq!(user.email, "ada@example.com");
        assert_eq!(patient.user_id, Some(user.id));
        assert_eq!(
            db::get_patient_by_user(&conn, &user.id).unwrap().unwrap().id,
            patient.id
        );
        assert!(authenticate(&conn, &token).unwrap().is_some());
    }

    #[test]
    fn register_rejects_duplicate_email() {
        let conn = open_memory_database().unwrap();
        register_patient(&conn, &registration("ada@example.com"), 1).unwrap();
        assert!(matches!(
            register_patient(&conn, &registration("ADA@example.com"), 1),
            Err(AuthError::EmailTaken)
        ));
    }
}
