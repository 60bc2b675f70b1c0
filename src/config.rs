use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;

/// Application-level constants
pub const APP_NAME: &str = "MedSync";
pub const APP_VERSION: &str = env!("CARGO_PKG_VERSION");

const DEFAULT_BIND: &str = "127.0.0.1:8080";
const DEFAULT_SESSION_TTL_HOURS: i64 = 12;
const DEFAULT_OPENING_HOUR: u32 = 8;
const DEFAULT_CLOSING_HOUR: u32 = 18;
const DEFAULT_CONFLICT_WINDOW_MINUTES: i64 = 30;
const DEFAULT_REMINDER_HOUR: u32 = 8;
/// Percent applied to (subtotal - discount) when an invoice gives no rate.
const DEFAULT_TAX_RATE_PERCENT: f64 = 0.0;
const DEFAULT_PAYMENT_TERMS_DAYS: i64 = 30;

/// Default tracing filter when `RUST_LOG` is unset.
pub fn default_log_filter() -> &'static str {
    "medsync=info,medsync_lib=info,tower_http=info"
}

/// Get the application data directory (~/MedSync/).
/// Falls back to the working directory when no home is known.
pub fn app_data_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(APP_NAME)
}

/// Runtime configuration, read once at startup.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub bind: SocketAddr,
    pub db_path: PathBuf,
    pub uploads_dir: PathBuf,
    pub session_ttl_hours: i64,
    pub opening_hour: u32,
    pub closing_hour: u32,
    pub conflict_window_minutes: i64,
    pub reminder_hour: u32,
    pub tax_rate_percent: f64,
    pub payment_terms_days: i64,
    pub cors_origin: Option<String>,
    pub admin_email: Option<String>,
    pub admin_password: Option<String>,
}

impl Default for AppConfig {
    fn default() -> Self {
        let data = app_data_dir();
        Self {
            bind: SocketAddr::from(([127, 0, 0, 1], 8080)),
            db_path: data.join("medsync.db"),
            uploads_dir: data.join("uploads"),
            session_ttl_hours: DEFAULT_SESSION_TTL_HOURS,
            opening_hour: DEFAULT_OPENING_HOUR,
            closing_hour: DEFAULT_CLOSING_HOUR,
            conflict_window_minutes: DEFAULT_CONFLICT_WINDOW_MINUTES,
            reminder_hour: DEFAULT_REMINDER_HOUR,
            tax_rate_percent: DEFAULT_TAX_RATE_PERCENT,
            payment_terms_days: DEFAULT_PAYMENT_TERMS_DAYS,
            cors_origin: None,
            admin_email: None,
            admin_password: None,
        }
    }
}

impl AppConfig {
    /// Read `MEDSYNC_*` environment variables over the defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build a config from an arbitrary key lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let mut config = Self {
            bind: parse_or("MEDSYNC_BIND", get("MEDSYNC_BIND"), defaults.bind),
            db_path: get("MEDSYNC_DB_PATH").map(PathBuf::from).unwrap_or(defaults.db_path),
            uploads_dir: get("MEDSYNC_UPLOADS_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.uploads_dir),
            session_ttl_hours: parse_or(
                "MEDSYNC_SESSION_TTL_HOURS",
                get("MEDSYNC_SESSION_TTL_HOURS"),
                defaults.session_ttl_hours,
            ),
            opening_hour: parse_or("MEDSYNC_OPENING_HOUR", get("MEDSYNC_OPENING_HOUR"), defaults.opening_hour),
            closing_hour: parse_or("MEDSYNC_CLOSING_HOUR", get("MEDSYNC_CLOSING_HOUR"), defaults.closing_hour),
            conflict_window_minutes: parse_or(
                "MEDSYNC_CONFLICT_WINDOW_MINUTES",
                get("MEDSYNC_CONFLICT_WINDOW_MINUTES"),
                defaults.conflict_window_minutes,
            ),
            reminder_hour: parse_or("MEDSYNC_REMINDER_HOUR", get("MEDSYNC_REMINDER_HOUR"), defaults.reminder_hour),
            tax_rate_percent: parse_or(
                "MEDSYNC_TAX_RATE_PERCENT",
                get("MEDSYNC_TAX_RATE_PERCENT"),
                defaults.tax_rate_percent,
            ),
            payment_terms_days: parse_or(
                "MEDSYNC_PAYMENT_TERMS_DAYS",
                get("MEDSYNC_PAYMENT_TERMS_DAYS"),
                defaults.payment_terms_days,
            ),
            cors_origin: get("MEDSYNC_CORS_ORIGIN"),
            admin_email: get("MEDSYNC_ADMIN_EMAIL"),
            admin_password: get("MEDSYNC_ADMIN_PASSWORD"),
        };

        if config.session_ttl_hours <= 0 {
            tracing::warn!(value = config.session_ttl_hours, "Session TTL must be positive, using default");
            config.session_ttl_hours = DEFAULT_SESSION_TTL_HOURS;
        }
        if config.opening_hour >= config.closing_hour || config.closing_hour > 24 {
            tracing::warn!(
                opening = config.opening_hour,
                closing = config.closing_hour,
                "Invalid working hours, using defaults"
            );
            config.opening_hour = DEFAULT_OPENING_HOUR;
            config.closing_hour = DEFAULT_CLOSING_HOUR;
        }
        if config.reminder_hour > 23 {
            tracing::warn!(value = config.reminder_hour, "Reminder hour out of range, using default");
            config.reminder_hour = DEFAULT_REMINDER_HOUR;
        }
        if config.conflict_window_minutes < 0 {
            config.conflict_window_minutes = DEFAULT_CONFLICT_WINDOW_MINUTES;
        }
        if !(0.0..=100.0).contains(&config.tax_rate_percent) {
            config.tax_rate_percent = DEFAULT_TAX_RATE_PERCENT;
        }
        config
    }

    /// Config rooted in a scratch directory, for tests and tools.
    pub fn for_data_dir(dir: &std::path::Path) -> Self {
        Self {
            db_path: dir.join("medsync.db"),
            uploads_dir: dir.join("uploads"),
            ..Self::default()
        }
    }
}

fn parse_or<T: FromStr + Copy + std::fmt::Debug>(key: &str, raw: Option<String>, default: T) -> T {
    match raw {
        None => default,
        Some(raw) => raw.parse().unwrap_or_else(|_| {
            tracing::warn!(key, value = %raw, ?default, "Invalid configuration value, using default");
            default
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn app_data_dir_named_after_app() {
        assert!(app_data_dir().ends_with("MedSync"));
    }

    #[test]
    fn defaults_when_nothing_set() {
        let config = AppConfig::from_lookup(|_| None);
        assert_eq!(config.bind.to_string(), DEFAULT_BIND);
        assert_eq!(config.session_ttl_hours, 12);
        assert_eq!((config.opening_hour, config.closing_hour), (8, 18));
        assert_eq!(config.conflict_window_minutes, 30);
        assert!(config.cors_origin.is_none());
    }

    #[test]
    fn reads_overrides() {
        let config = AppConfig::from_lookup(lookup(&[
            ("MEDSYNC_BIND", "0.0.0.0:9000"),
            ("MEDSYNC_DB_PATH", "/tmp/clinic.db"),
            ("MEDSYNC_OPENING_HOUR", "9"),
            ("MEDSYNC_CLOSING_HOUR", "17"),
            ("MEDSYNC_ADMIN_EMAIL", "root@clinic.test"),
        ]));
        assert_eq!(config.bind.port(), 9000);
        assert_eq!(config.db_path, PathBuf::from("/tmp/clinic.db"));
        assert_eq!((config.opening_hour, config.closing_hour), (9, 17));
        assert_eq!(config.admin_email.as_deref(), Some("root@clinic.test"));
    }

    #[test]
    fn invalid_values_fall_back() {
        let config = AppConfig::from_lookup(lookup(&[
            ("MEDSYNC_SESSION_TTL_HOURS", "forever"),
            ("MEDSYNC_OPENING_HOUR", "19"),
            ("MEDSYNC_REMINDER_HOUR", "30"),
            ("MEDSYNC_BIND", "not-an-address"),
        ]));
        assert_eq!(config.session_ttl_hours, 12);
        assert_eq!((config.opening_hour, config.closing_hour), (8, 18));
        assert_eq!(config.reminder_hour, 8);
        assert_eq!(config.bind.to_string(), DEFAULT_BIND);
    }

    #[test]
    fn blank_values_are_ignored() {
        let config = AppConfig::from_lookup(lookup(&[("MEDSYNC_CORS_ORIGIN", "  ")]));
        assert!(config.cors_origin.is_none());
    }

    #[test]
    fn app_version_matches_cargo() {
        assert_eq!(APP_VERSION, "0.1.0");
    }
}
