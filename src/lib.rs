pub mod api;
pub mod auth;
pub mod billing;
pub mod bootstrap;
pub mod config;
pub mod core_state;
pub mod db;
pub mod models;
pub mod notifications;
pub mod reminders;
pub mod reports;
pub mod scheduling;

use std::sync::Arc;

use tracing_subscriber::EnvFilter;

use crate::config::AppConfig;
use crate::core_state::CoreState;

/// Start the server and block until ctrl-c.
pub fn run() -> Result<(), String> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(config::default_log_filter())),
        )
        .init();

    tracing::info!("{} starting v{}", config::APP_NAME, config::APP_VERSION);

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|e| format!("Cannot start async runtime: {e}"))?;
    runtime.block_on(serve_forever(AppConfig::from_env()))
}

async fn serve_forever(config: AppConfig) -> Result<(), String> {
    let bind = config.bind;
    let core = Arc::new(CoreState::new(config));

    {
        // Opening the database applies pending migrations.
        let conn = core.open_db().map_err(|e| format!("Cannot open database: {e}"))?;
        tracing::info!(path = %core.config.db_path.display(), "Database ready");
        bootstrap::ensure_admin(&conn, &core.config).map_err(|e| format!("Admin bootstrap failed: {e}"))?;
        bootstrap::seed_staff_titles(&conn).map_err(|e| format!("Seeding staff titles failed: {e}"))?;
        match db::prune_expired_sessions(&conn, &chrono::Utc::now()) {
            Ok(0) => {}
            Ok(n) => tracing::info!(count = n, "Pruned expired sessions"),
            Err(e) => tracing::warn!("Session pruning failed: {e}"),
        }
    }

    let mut reminders = reminders::start_reminder_scheduler(core.clone());

    let shutdown = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Cannot listen for ctrl-c: {e}");
        }
        tracing::info!("Shutdown requested");
    };
    let served = api::serve(core.clone(), bind, shutdown).await;

    reminders.shutdown();
    match core.flush_and_prune_audit() {
        Ok(n) => tracing::info!(flushed = n, "Audit buffer flushed"),
        Err(e) => tracing::warn!("Final audit flush failed: {e}"),
    }
    served
}
