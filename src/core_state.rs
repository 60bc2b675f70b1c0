//! Shared application state.
//!
//! `CoreState` is created once at startup and shared behind an `Arc` by the
//! HTTP layer and the reminder scheduler. Database connections are opened
//! per operation; the struct itself only holds configuration and the small
//! amount of in-memory state that must outlive a request.

use std::sync::{Arc, Mutex};

use chrono::Utc;

use crate::auth::LoginLockout;
use crate::config::AppConfig;
use crate::db::{self, NewAuditEntry, AUDIT_TIMESTAMP_FORMAT};
use crate::notifications::{LogNotifier, Notifier};

/// Maximum audit buffer size before flush.
const AUDIT_BUFFER_CAPACITY: usize = 100;

/// Days of audit history kept on flush.
const AUDIT_RETENTION_DAYS: i64 = 365;

pub struct CoreState {
    pub config: AppConfig,
    /// Buffered request-level access log.
    audit: AuditLogger,
    notifier: Arc<dyn Notifier>,
    pub login_lockout: LoginLockout,
}

impl CoreState {
    pub fn new(config: AppConfig) -> Self {
        Self::with_notifier(config, Arc::new(LogNotifier))
    }

    pub fn with_notifier(config: AppConfig, notifier: Arc<dyn Notifier>) -> Self {
        Self {
            config,
            audit: AuditLogger::new(),
            notifier,
            login_lockout: LoginLockout::new(),
        }
    }

    /// Open a database connection (migrations applied).
    pub fn open_db(&self) -> Result<rusqlite::Connection, CoreError> {
        db::open_database(&self.config.db_path).map_err(CoreError::Database)
    }

    pub fn notifier(&self) -> &dyn Notifier {
        self.notifier.as_ref()
    }

    // ── Audit logging ───────────────────────────────────────

    /// Buffer an access event. Auto-flushes to DB when the buffer is full.
    pub fn log_access(&self, user_id: Option<String>, action: &str, entity: &str) {
        let needs_flush = self.audit.log(user_id, action, entity);
        if needs_flush {
            if let Err(e) = self.flush_and_prune_audit() {
                tracing::warn!("Auto-flush audit failed: {e}");
            }
        }
    }

    /// Current audit buffer contents.
    pub fn audit_entries(&self) -> Vec<NewAuditEntry> {
        self.audit.entries()
    }

    /// Flush the audit buffer and prune entries past retention.
    pub fn flush_and_prune_audit(&self) -> Result<usize, CoreError> {
        let conn = self.open_db()?;
        let flushed = self.audit.flush_to_db(&conn)?;
        if let Err(e) = db::prune_audit_log(&conn, AUDIT_RETENTION_DAYS) {
            tracing::warn!("Failed to prune audit log: {e}");
        }
        Ok(flushed)
    }
}

/// Errors from CoreState operations.
#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    #[error("Database error: {0}")]
    Database(#[from] db::DatabaseError),
}

// ═══════════════════════════════════════════════════════════
// Audit logger
// ═══════════════════════════════════════════════════════════

/// In-memory audit log buffer. Entries are flushed to SQLite
/// when the buffer reaches capacity or on explicit flush.
pub struct AuditLogger {
    buffer: Mutex<Vec<NewAuditEntry>>,
}

impl AuditLogger {
    pub fn new() -> Self {
        Self {
            buffer: Mutex::new(Vec::with_capacity(AUDIT_BUFFER_CAPACITY)),
        }
    }

    /// Log an access event to the in-memory buffer.
    /// Returns `true` if the buffer has reached flush threshold.
    pub fn log(&self, user_id: Option<String>, action: &str, entity: &str) -> bool {
        if let Ok(mut buf) = self.buffer.lock() {
            buf.push(NewAuditEntry {
                timestamp: Utc::now().format(AUDIT_TIMESTAMP_FORMAT).to_string(),
                user_id,
                action: action.to_string(),
                entity_type: "http_request".to_string(),
                entity_id: None,
                details: Some(entity.to_string()),
            });
            buf.len() >= AUDIT_BUFFER_CAPACITY
        } else {
            false
        }
    }

    pub fn entries(&self) -> Vec<NewAuditEntry> {
        self.buffer
            .lock()
            .map(|buf| buf.clone())
            .unwrap_or_default()
    }

    pub fn drain(&self) -> Vec<NewAuditEntry> {
        self.buffer
            .lock()
            .map(|mut buf| buf.drain(..).collect())
            .unwrap_or_default()
    }

    pub fn buffer_len(&self) -> usize {
        self.buffer.lock().map(|buf| buf.len()).unwrap_or(0)
    }

    pub fn flush_to_db(&self, conn: &rusqlite::Connection) -> Result<usize, CoreError> {
        let entries = self.drain();
        if entries.is_empty() {
            return Ok(0);
        }
        db::insert_audit_entries(conn, &entries)?;
        tracing::debug!(count = entries.len(), "Flushed audit entries to database");
        Ok(entries.len())
    }
}

impl Default for AuditLogger {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::sqlite::open_memory_database;
    use crate::models::AuditFilter;

    #[test]
    fn audit_logger_records_entries() {
        let logger = AuditLogger::new();
        logger.log(Some("u1".into()), "GET /api/patients", "status:200");
        assert_eq!(logger.buffer_len(), 1);

        let entries = logger.entries();
        assert_eq!(entries[0].action, "GET /api/patients");
        assert_eq!(entries[0].details.as_deref(), Some("status:200"));
        assert_eq!(entries[0].user_id.as_deref(), Some("u1"));
    }

    #[test]
    fn audit_log_returns_true_at_capacity() {
        let logger = AuditLogger::new();
        for i in 0..(AUDIT_BUFFER_CAPACITY - 1) {
            assert!(!logger.log(None, &format!("action_{i}"), "status:200"));
        }
        assert!(logger.log(None, "action_final", "status:200"));
    }

    #[test]
    fn audit_flush_to_db_persists_and_clears() {
        let conn = open_memory_database().unwrap();
        let logger = AuditLogger::new();
        logger.log(None, "POST /api/auth/login", "status:200");
        logger.log(Some("u2".into()), "GET /api/invoices", "status:403");

        assert_eq!(logger.flush_to_db(&conn).unwrap(), 2);
        assert_eq!(logger.buffer_len(), 0);
        assert_eq!(db::list_audit(&conn, &AuditFilter::default()).unwrap().len(), 2);
        assert_eq!(logger.flush_to_db(&conn).unwrap(), 0);
    }

    #[test]
    fn core_state_flushes_to_its_database() {
        let dir = tempfile::tempdir().unwrap();
        let core = CoreState::new(AppConfig::for_data_dir(dir.path()));
        core.log_access(Some("u1".into()), "GET /api/branches", "status:200");
        assert_eq!(core.audit_entries().len(), 1);

        assert_eq!(core.flush_and_prune_audit().unwrap(), 1);
        assert!(core.audit_entries().is_empty());

        let conn = core.open_db().unwrap();
        let rows = db::list_audit(&conn, &AuditFilter::default()).unwrap();
        assert_eq!(rows[0].entity_type, "http_request");
    }
}
