//! Record store connection.
//!
//! Everything the manager persists goes through one SeaORM pool opened here.
//! The pool is opened with retry, the schema is brought up to date before any
//! repository touches it, and `/healthz` uses the `SELECT 1` check below.

use std::time::Duration;

use anyhow::{Context, Result};
use migration::{Migrator, MigratorTrait};
use sea_orm::{ConnectOptions, ConnectionTrait, Database, DatabaseConnection, Statement};
use tokio::time::sleep;

use crate::config::AppConfig;

#[derive(Debug, thiserror::Error)]
pub enum DatabaseError {
    #[error("record store unreachable after {attempts} attempts: {source}")]
    Unreachable {
        attempts: u32,
        #[source]
        source: sea_orm::DbErr,
    },
    #[error("invalid record store configuration: {message}")]
    InvalidConfiguration { message: String },
}

/// Backoff for the initial connection: the delay doubles after each failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectRetry {
    pub attempts: u32,
    pub initial_delay: Duration,
}

impl Default for ConnectRetry {
    fn default() -> Self {
        Self {
            attempts: 5,
            initial_delay: Duration::from_millis(100),
        }
    }
}

impl ConnectRetry {
    /// Delay before retry `n` (1-based; the first attempt has no delay).
    pub fn delay_before(&self, attempt: u32) -> Duration {
        let doublings = attempt.saturating_sub(2).min(16);
        self.initial_delay.saturating_mul(1 << doublings)
    }
}

/// Backend name for logs; never includes credentials.
pub fn backend_label(database_url: &str) -> &'static str {
    match database_url.split(':').next() {
        Some("postgres" | "postgresql") => "postgres",
        Some("sqlite") => "sqlite",
        _ => "unknown",
    }
}

/// Open the pool with the default retry policy.
///
/// ```no_run
/// use portal_integrations::{config::AppConfig, db::init_pool};
///
/// #[tokio::main]
/// async fn main() -> anyhow::Result<()> {
///     let db = init_pool(&AppConfig::default()).await?;
///     Ok(())
/// }
/// ```
pub async fn init_pool(cfg: &AppConfig) -> Result<DatabaseConnection> {
    init_pool_with_retry(cfg, ConnectRetry::default()).await
}

pub async fn init_pool_with_retry(
    cfg: &AppConfig,
    retry: ConnectRetry,
) -> Result<DatabaseConnection> {
    if cfg.database_url.trim().is_empty() {
        return Err(DatabaseError::InvalidConfiguration {
            message: "PORTAL_DATABASE_URL is empty".to_string(),
        }
        .into());
    }

    let backend = backend_label(&cfg.database_url);
    let mut opt = ConnectOptions::new(&cfg.database_url);
    opt.max_connections(cfg.db_max_connections)
        .acquire_timeout(Duration::from_millis(cfg.db_acquire_timeout_ms))
        .idle_timeout(Duration::from_secs(600))
        .max_lifetime(Duration::from_secs(1800))
        .sqlx_logging(true)
        .sqlx_logging_level(log::LevelFilter::Debug);

    let attempts = retry.attempts.max(1);
    let mut attempt = 1;
    loop {
        match Database::connect(opt.clone()).await {
            Ok(conn) => {
                log::info!(
                    "Record store connected (backend={}, pool_size={}, attempt={})",
                    backend,
                    cfg.db_max_connections,
                    attempt
                );
                return Ok(conn);
            }
            Err(e) if attempt >= attempts => {
                log::error!("Record store ({}) unreachable: {}", backend, e);
                return Err(DatabaseError::Unreachable {
                    attempts,
                    source: e,
                }
                .into());
            }
            Err(e) => {
                attempt += 1;
                let delay = retry.delay_before(attempt);
                log::warn!(
                    "Record store ({}) connection failed: {}; retrying in {:?}",
                    backend,
                    e,
                    delay
                );
                sleep(delay).await;
            }
        }
    }
}

/// Apply pending migrations; returns how many were applied.
pub async fn run_migrations(db: &DatabaseConnection) -> Result<usize> {
    let pending = Migrator::get_pending_migrations(db)
        .await
        .context("Failed to list pending migrations")?
        .len();

    if pending == 0 {
        log::info!("Record store schema is up to date");
        return Ok(0);
    }

    Migrator::up(db, None)
        .await
        .context("Failed to apply database migrations")?;
    log::info!("Applied {} record store migration(s)", pending);
    Ok(pending)
}

/// Open the pool and bring the schema up to date; used by every CLI command
/// that touches the store.
pub async fn connect_and_migrate(cfg: &AppConfig) -> Result<DatabaseConnection> {
    let db = init_pool(cfg).await?;
    run_migrations(&db).await?;
    Ok(db)
}

/// `SELECT 1` against the pool.
pub async fn health_check(db: &DatabaseConnection) -> Result<()> {
    let stmt = Statement::from_string(db.get_database_backend(), "SELECT 1".to_string());
    db.query_one(stmt)
        .await
        .context("Record store health check failed")?;
    Ok(())
}
