//! Shared types for the API layer.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use crate::api::error::ApiError;
use crate::core_state::CoreState;
use crate::models::{User, UserRole};

const REQUESTS_PER_MINUTE: u32 = 300;
const REQUESTS_PER_HOUR: u32 = 5000;
const WINDOW: Duration = Duration::from_secs(3600);
const SWEEP_INTERVAL: Duration = Duration::from_secs(60);

// ═══════════════════════════════════════════════════════════
// API context — shared state for the router
// ═══════════════════════════════════════════════════════════

/// Shared context for all API routes and middleware.
/// Wraps `CoreState` plus API-specific caches.
#[derive(Clone)]
pub struct ApiContext {
    pub core: Arc<CoreState>,
    pub rate_limiter: Arc<Mutex<RateLimiter>>,
}

impl ApiContext {
    pub fn new(core: Arc<CoreState>) -> Self {
        Self {
            core,
            rate_limiter: Arc::new(Mutex::new(RateLimiter::new())),
        }
    }
}

// ═══════════════════════════════════════════════════════════
// Authenticated caller — injected by auth middleware
// ═══════════════════════════════════════════════════════════

/// The signed-in user behind a request, plus the bearer token used.
#[derive(Debug, Clone)]
pub struct AuthUser {
    pub user: User,
    pub token: String,
}

impl AuthUser {
    pub fn require_staff(&self) -> Result<(), ApiError> {
        if !self.user.role.is_staff() {
            return Err(ApiError::Forbidden("Staff only".into()));
        }
        Ok(())
    }

    pub fn require_admin(&self) -> Result<(), ApiError> {
        if !self.user.role.is_admin() {
            return Err(ApiError::Forbidden("Administrators only".into()));
        }
        Ok(())
    }

    pub fn require_any(&self, roles: &[UserRole]) -> Result<(), ApiError> {
        if !roles.contains(&self.user.role) {
            return Err(ApiError::Forbidden("Your role cannot perform this action".into()));
        }
        Ok(())
    }

    /// The caller's own branch. Accounts without one are refused.
    pub fn own_branch(&self) -> Result<uuid::Uuid, ApiError> {
        self.user
            .branch_id
            .ok_or_else(|| ApiError::Forbidden("Your account is not assigned to a branch".into()))
    }

    /// Branch filter for list/report queries: branch-scoped roles are pinned
    /// to their own branch, everyone else gets what they asked for.
    pub fn scoped_branch(&self, requested: Option<uuid::Uuid>) -> Result<Option<uuid::Uuid>, ApiError> {
        if self.user.role.is_branch_scoped() {
            return self.own_branch().map(Some);
        }
        Ok(requested)
    }
}

// ═══════════════════════════════════════════════════════════
// Rate limiter — per-caller sliding window
// ═══════════════════════════════════════════════════════════

/// Per-caller rate limiter with per-minute and per-hour limits.
pub struct RateLimiter {
    windows: HashMap<String, Vec<Instant>>,
    per_minute: u32,
    per_hour: u32,
    last_sweep: Instant,
}

impl RateLimiter {
    pub fn new() -> Self {
        Self::with_limits(REQUESTS_PER_MINUTE, REQUESTS_PER_HOUR)
    }

    pub fn with_limits(per_minute: u32, per_hour: u32) -> Self {
        Self {
            windows: HashMap::new(),
            per_minute,
            per_hour,
            last_sweep: Instant::now(),
        }
    }

    /// Check if a caller is within rate limits. Returns `Ok(())` or
    /// `Err(retry_after_secs)` if exceeded.
    pub fn check(&mut self, key: &str) -> Result<(), u64> {
        let now = Instant::now();
        if now.duration_since(self.last_sweep) >= SWEEP_INTERVAL {
            self.sweep(now);
        }
        let entries = self.windows.entry(key.to_string()).or_default();

        entries.retain(|ts| now.duration_since(*ts) < WINDOW);

        let last_minute = entries
            .iter()
            .filter(|ts| now.duration_since(**ts) < Duration::from_secs(60))
            .count() as u32;
        if last_minute >= self.per_minute {
            return Err(60);
        }

        if entries.len() as u32 >= self.per_hour {
            return Err(3600);
        }

        entries.push(now);
        Ok(())
    }

    /// Drop callers with no request inside the hourly window. Every login
    /// mints a new token, so stale keys would otherwise pile up.
    pub(crate) fn sweep(&mut self, now: Instant) {
        self.windows.retain(|_, entries| {
            entries.retain(|ts| now.saturating_duration_since(*ts) < WINDOW);
            !entries.is_empty()
        });
        self.last_sweep = now;
    }

    pub(crate) fn tracked_callers(&self) -> usize {
        self.windows.len()
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rate_limiter_allows_under_limit() {
        let mut limiter = RateLimiter::new();
        assert!(limiter.check("token:abc").is_ok());
        assert!(limiter.check("token:abc").is_ok());
    }

    #[test]
    fn rate_limiter_rejects_over_per_minute() {
        let mut limiter = RateLimiter::with_limits(2, 1000);
        assert!(limiter.check("anonymous").is_ok());
        assert!(limiter.check("anonymous").is_ok());
        assert_eq!(limiter.check("anonymous"), Err(60));
    }

    #[test]
    fn rate_limiter_rejects_over_per_hour() {
        let mut limiter = RateLimiter::with_limits(100, 3);
        for _ in 0..3 {
            assert!(limiter.check("k").is_ok());
        }
        assert_eq!(limiter.check("k"), Err(3600));
    }

    #[test]
    fn rate_limiter_isolates_callers() {
        let mut limiter = RateLimiter::with_limits(1, 1000);
        assert!(limiter.check("token:a").is_ok());
        assert!(limiter.check("token:b").is_ok());
        assert_eq!(limiter.check("token:a"), Err(60));
    }

    #[test]
    fn rate_limiter_forgets_idle_callers() {
        let mut limiter = RateLimiter::with_limits(10, 100);
        for i in 0..5 {
            assert!(limiter.check(&format!("token:{i}")).is_ok());
        }
        assert_eq!(limiter.tracked_callers(), 5);

        limiter.sweep(Instant::now());
        assert_eq!(limiter.tracked_callers(), 5);

        limiter.sweep(Instant::now() + WINDOW + Duration::from_secs(1));
        assert_eq!(limiter.tracked_callers(), 0);
    }

    fn caller(role: UserRole, branch_id: Option<uuid::Uuid>) -> AuthUser {
        let now = chrono::Utc::now();
        AuthUser {
            user: User {
                id: uuid::Uuid::new_v4(),
                email: "x@clinic.test".into(),
                password_hash: String::new(),
                full_name: "X".into(),
                phone: None,
                role,
                staff_title_id: None,
                branch_id,
                profile_picture: None,
                is_active: true,
                last_login_at: None,
                created_at: now,
                updated_at: now,
            },
            token: "t".into(),
        }
    }

    #[test]
    fn scoped_branch_pins_branch_staff() {
        let home = uuid::Uuid::new_v4();
        let other = Some(uuid::Uuid::new_v4());

        let clerk = caller(UserRole::Receptionist, Some(home));
        assert_eq!(clerk.scoped_branch(other).unwrap(), Some(home));
        assert_eq!(clerk.scoped_branch(None).unwrap(), Some(home));

        let admin = caller(UserRole::SystemAdministrator, None);
        assert_eq!(admin.scoped_branch(other).unwrap(), other);
        assert_eq!(admin.scoped_branch(None).unwrap(), None);
    }

    #[test]
    fn scoped_branch_refuses_branchless_staff() {
        let manager = caller(UserRole::BranchManager, None);
        assert!(matches!(manager.scoped_branch(None), Err(ApiError::Forbidden(_))));
        assert!(manager.own_branch().is_err());
    }
}
