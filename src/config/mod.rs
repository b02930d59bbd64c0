//! Configuration loading for the portal integration manager.
//!
//! Loads layered `.env` files and environment variables prefixed with
//! `PORTAL_`, producing a typed [`AppConfig`].

use std::{collections::BTreeMap, env, net::SocketAddr, path::PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Application configuration derived from `PORTAL_*` environment variables.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub struct AppConfig {
    #[serde(default = "default_profile")]
    pub profile: String,
    #[serde(default = "default_api_bind_addr")]
    pub api_bind_addr: String,
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default = "default_log_format")]
    pub log_format: String,
    #[serde(default = "default_database_url")]
    pub database_url: String,
    #[serde(default = "default_db_max_connections")]
    pub db_max_connections: u32,
    #[serde(default = "default_db_acquire_timeout_ms")]
    pub db_acquire_timeout_ms: u64,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub operator_tokens: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub crypto_key: Option<Vec<u8>>,
    #[serde(default = "default_export_base_url")]
    pub export_base_url: String,
    #[serde(default)]
    pub sync_worker: SyncWorkerConfig,
    #[serde(default)]
    pub health: HealthConfig,
    #[serde(default)]
    pub maintenance: MaintenanceConfig,
}

/// Sync worker parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub struct SyncWorkerConfig {
    /// Maximum number of sync jobs processed at the same time (default: 4)
    ///
    /// Environment variable: `PORTAL_SYNC_WORKER_CONCURRENCY`
    #[serde(default = "default_sync_worker_concurrency")]
    pub concurrency: usize,

    /// Delay between progress steps of the stepped sync engine (default: 100)
    ///
    /// Environment variable: `PORTAL_SYNC_WORKER_STEP_DELAY_MS`
    #[serde(default = "default_sync_worker_step_delay_ms")]
    pub step_delay_ms: u64,
}

/// Service health aggregation parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub struct HealthConfig {
    /// Maximum number of probes in flight at once (default: 16)
    ///
    /// Environment variable: `PORTAL_HEALTH_PROBE_CONCURRENCY`
    #[serde(default = "default_health_probe_concurrency")]
    pub probe_concurrency: usize,

    /// Extra tables to register read-only probes for
    ///
    /// Environment variable: `PORTAL_HEALTH_PROBE_TABLES` (comma-separated)
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub probe_tables: Vec<String>,

    /// Successful probes slower than this are reported as degraded
    ///
    /// Environment variable: `PORTAL_HEALTH_SLOW_PROBE_MS`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub slow_probe_ms: Option<u64>,
}

/// Maintenance runner and scheduler parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub struct MaintenanceConfig {
    /// Seconds between scheduled maintenance runs; 0 disables the scheduler
    ///
    /// Environment variable: `PORTAL_MAINTENANCE_INTERVAL_SECONDS`
    #[serde(default)]
    pub interval_seconds: u64,

    /// Completed sync jobs older than this many days are purged (default: 30)
    ///
    /// Environment variable: `PORTAL_MAINTENANCE_SYNC_JOB_RETENTION_DAYS`
    #[serde(default = "default_sync_job_retention_days")]
    pub sync_job_retention_days: u32,

    /// Timeout for a single integration endpoint check (default: 5000)
    ///
    /// Environment variable: `PORTAL_MAINTENANCE_INTEGRATION_CHECK_TIMEOUT_MS`
    #[serde(default = "default_integration_check_timeout_ms")]
    pub integration_check_timeout_ms: u64,

    /// Endpoint that processes scheduled reminders when POSTed to
    ///
    /// Environment variable: `PORTAL_MAINTENANCE_REMINDERS_URL`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reminders_url: Option<String>,

    /// Endpoint that processes scheduled reports when POSTed to
    ///
    /// Environment variable: `PORTAL_MAINTENANCE_REPORTS_URL`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reports_url: Option<String>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            profile: default_profile(),
            api_bind_addr: default_api_bind_addr(),
            log_level: default_log_level(),
            log_format: default_log_format(),
            database_url: default_database_url(),
            db_max_connections: default_db_max_connections(),
            db_acquire_timeout_ms: default_db_acquire_timeout_ms(),
            operator_tokens: Vec::new(),
            crypto_key: None,
            export_base_url: default_export_base_url(),
            sync_worker: SyncWorkerConfig::default(),
            health: HealthConfig::default(),
            maintenance: MaintenanceConfig::default(),
        }
    }
}

impl Default for SyncWorkerConfig {
    fn default() -> Self {
        Self {
            concurrency: default_sync_worker_concurrency(),
            step_delay_ms: default_sync_worker_step_delay_ms(),
        }
    }
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            probe_concurrency: default_health_probe_concurrency(),
            probe_tables: Vec::new(),
            slow_probe_ms: None,
        }
    }
}

impl Default for MaintenanceConfig {
    fn default() -> Self {
        Self {
            interval_seconds: 0,
            sync_job_retention_days: default_sync_job_retention_days(),
            integration_check_timeout_ms: default_integration_check_timeout_ms(),
            reminders_url: None,
            reports_url: None,
        }
    }
}

impl SyncWorkerConfig {
    /// Validate sync worker bounds
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.concurrency == 0 || self.concurrency > 64 {
            return Err(ConfigError::InvalidSyncWorkerConcurrency {
                value: self.concurrency,
            });
        }

        if self.step_delay_ms > 60_000 {
            return Err(ConfigError::InvalidSyncWorkerStepDelay {
                value: self.step_delay_ms,
            });
        }

        Ok(())
    }
}

impl HealthConfig {
    /// Validate health probe settings
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.probe_concurrency == 0 {
            return Err(ConfigError::InvalidHealthProbeConcurrency {
                value: self.probe_concurrency,
            });
        }

        for table in &self.probe_tables {
            if !is_valid_table_name(table) {
                return Err(ConfigError::InvalidHealthProbeTable {
                    table: table.clone(),
                });
            }
        }

        Ok(())
    }
}

impl MaintenanceConfig {
    /// Validate maintenance settings
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.interval_seconds != 0
            && (self.interval_seconds < 60 || self.interval_seconds > 604_800)
        {
            return Err(ConfigError::InvalidMaintenanceInterval {
                value: self.interval_seconds,
            });
        }

        if self.sync_job_retention_days == 0 {
            return Err(ConfigError::InvalidSyncJobRetention {
                value: self.sync_job_retention_days,
            });
        }

        if self.integration_check_timeout_ms == 0 {
            return Err(ConfigError::InvalidIntegrationCheckTimeout {
                value: self.integration_check_timeout_ms,
            });
        }

        for (field, value) in [
            ("reminders_url", &self.reminders_url),
            ("reports_url", &self.reports_url),
        ] {
            if let Some(raw) = value
                && url::Url::parse(raw).is_err()
            {
                return Err(ConfigError::InvalidMaintenanceUrl {
                    field,
                    value: raw.clone(),
                });
            }
        }

        Ok(())
    }
}

impl AppConfig {
    /// Returns the configured bind address as a socket address.
    pub fn bind_addr(&self) -> Result<SocketAddr, std::net::AddrParseError> {
        self.api_bind_addr.parse()
    }

    /// Returns a redacted JSON representation (secrets are redacted).
    pub fn redacted_json(&self) -> serde_json::Result<String> {
        let mut config = self.clone();
        if !config.operator_tokens.is_empty() {
            config.operator_tokens = vec!["[REDACTED]".to_string()];
        }
        if config.crypto_key.is_some() {
            config.crypto_key = Some(b"[REDACTED]".to_vec());
        }
        serde_json::to_string_pretty(&config)
    }

    /// Validates the configuration, returning an error if required settings are missing.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if let Some(ref key) = self.crypto_key
            && key.len() != 32
        {
            return Err(ConfigError::InvalidCryptoKeyLength { length: key.len() });
        }

        // Operator tokens guard the admin API everywhere except local development.
        if !matches!(self.profile.as_str(), "local" | "test") && self.operator_tokens.is_empty() {
            return Err(ConfigError::MissingOperatorTokens);
        }

        if self.database_url.trim().is_empty() {
            return Err(ConfigError::MissingDatabaseUrl);
        }

        self.sync_worker.validate()?;
        self.health.validate()?;
        self.maintenance.validate()?;

        Ok(())
    }
}

fn default_profile() -> String {
    "local".to_string()
}

fn default_api_bind_addr() -> String {
    "0.0.0.0:8080".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "json".to_string()
}

fn default_database_url() -> String {
    "sqlite://portal.db?mode=rwc".to_string()
}

fn default_db_max_connections() -> u32 {
    10
}

fn default_db_acquire_timeout_ms() -> u64 {
    5000
}

fn default_export_base_url() -> String {
    "/exports".to_string()
}

fn default_sync_worker_concurrency() -> usize {
    4
}

fn default_sync_worker_step_delay_ms() -> u64 {
    100
}

fn default_health_probe_concurrency() -> usize {
    16
}

fn default_sync_job_retention_days() -> u32 {
    30
}

fn default_integration_check_timeout_ms() -> u64 {
    5000
}

/// Errors raised while loading or validating configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read env file {path}: {source}")]
    EnvFile {
        path: PathBuf,
        #[source]
        source: dotenvy::Error,
    },
    #[error("invalid api bind address '{value}': {source}")]
    InvalidBindAddr {
        value: String,
        #[source]
        source: std::net::AddrParseError,
    },
    #[error("crypto key must be valid base64: {error}")]
    InvalidCryptoKeyBase64 { error: String },
    #[error("crypto key must decode to 32 bytes, got {length}")]
    InvalidCryptoKeyLength { length: usize },
    #[error("at least one operator token is required for this profile")]
    MissingOperatorTokens,
    #[error("database url must not be empty")]
    MissingDatabaseUrl,
    #[error("sync worker concurrency must be between 1 and 64, got {value}")]
    InvalidSyncWorkerConcurrency { value: usize },
    #[error("sync worker step delay must be at most 60000ms, got {value}")]
    InvalidSyncWorkerStepDelay { value: u64 },
    #[error("health probe concurrency must be at least 1, got {value}")]
    InvalidHealthProbeConcurrency { value: usize },
    #[error("invalid health probe table name: {table}")]
    InvalidHealthProbeTable { table: String },
    #[error("maintenance interval must be 0 or between 60 and 604800 seconds, got {value}")]
    InvalidMaintenanceInterval { value: u64 },
    #[error("sync job retention must be at least one day, got {value}")]
    InvalidSyncJobRetention { value: u32 },
    #[error("integration check timeout must be positive, got {value}")]
    InvalidIntegrationCheckTimeout { value: u64 },
    #[error("invalid maintenance {field}: {value}")]
    InvalidMaintenanceUrl { field: &'static str, value: String },
}

/// Table names become part of probe SQL, so only plain identifiers are accepted.
pub fn is_valid_table_name(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(first) if first.is_ascii_alphabetic() || first == '_' => {}
        _ => return false,
    }
    name.len() <= 63 && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.and_then(|val| {
        let trimmed = val.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(trimmed.to_string())
        }
    })
}

/// Loads configuration using layered `.env` files and `PORTAL_*` env vars.
pub struct ConfigLoader {
    base_dir: PathBuf,
}

impl ConfigLoader {
    /// Creates a new loader rooted at the current working directory.
    pub fn new() -> Self {
        Self {
            base_dir: env::current_dir().unwrap_or_else(|_| PathBuf::from(".")),
        }
    }

    /// Creates a loader rooted at the provided directory (useful for tests).
    pub fn with_base_dir(base_dir: PathBuf) -> Self {
        Self { base_dir }
    }

    /// Loads, validates and returns the configuration.
    pub fn load(&self) -> Result<AppConfig, ConfigError> {
        let (mut layered, profile_hint) = self.collect_layered_env()?;

        // Overlay process environment last so it wins.
        for (key, value) in env::vars() {
            if let Some(stripped) = key.strip_prefix("PORTAL_") {
                layered.insert(stripped.to_string(), value);
            }
        }

        let profile = layered
            .remove("PROFILE")
            .filter(|v| !v.is_empty())
            .unwrap_or(profile_hint);
        let api_bind_addr = layered
            .remove("API_BIND_ADDR")
            .filter(|v| !v.is_empty())
            .unwrap_or_else(default_api_bind_addr);
        let log_level = layered
            .remove("LOG_LEVEL")
            .filter(|v| !v.is_empty())
            .unwrap_or_else(default_log_level);
        let log_format = layered
            .remove("LOG_FORMAT")
            .filter(|v| !v.is_empty())
            .unwrap_or_else(default_log_format);
        let database_url = layered
            .remove("DATABASE_URL")
            .filter(|v| !v.is_empty())
            .unwrap_or_else(default_database_url);
        let db_max_connections = layered
            .remove("DB_MAX_CONNECTIONS")
            .and_then(|v| v.parse().ok())
            .unwrap_or_else(default_db_max_connections);
        let db_acquire_timeout_ms = layered
            .remove("DB_ACQUIRE_TIMEOUT_MS")
            .and_then(|v| v.parse().ok())
            .unwrap_or_else(default_db_acquire_timeout_ms);

        // Support both a comma-separated list and a single token
        let operator_tokens = if let Some(tokens) = layered.remove("OPERATOR_TOKENS") {
            split_list(&tokens)
        } else if let Some(token) = layered.remove("OPERATOR_TOKEN") {
            vec![token]
        } else {
            Vec::new()
        };

        let crypto_key = match non_empty(layered.remove("CRYPTO_KEY")) {
            Some(key_str) => {
                use base64::{Engine as _, engine::general_purpose};
                Some(general_purpose::STANDARD.decode(&key_str).map_err(|e| {
                    ConfigError::InvalidCryptoKeyBase64 {
                        error: e.to_string(),
                    }
                })?)
            }
            None => None,
        };

        let export_base_url = layered
            .remove("EXPORT_BASE_URL")
            .filter(|v| !v.is_empty())
            .unwrap_or_else(default_export_base_url);

        let sync_worker = SyncWorkerConfig {
            concurrency: layered
                .remove("SYNC_WORKER_CONCURRENCY")
                .and_then(|v| v.parse().ok())
                .unwrap_or_else(default_sync_worker_concurrency),
            step_delay_ms: layered
                .remove("SYNC_WORKER_STEP_DELAY_MS")
                .and_then(|v| v.parse().ok())
                .unwrap_or_else(default_sync_worker_step_delay_ms),
        };

        let health = HealthConfig {
            probe_concurrency: layered
                .remove("HEALTH_PROBE_CONCURRENCY")
                .and_then(|v| v.parse().ok())
                .unwrap_or_else(default_health_probe_concurrency),
            probe_tables: layered
                .remove("HEALTH_PROBE_TABLES")
                .map(|tables| split_list(&tables))
                .unwrap_or_default(),
            slow_probe_ms: layered
                .remove("HEALTH_SLOW_PROBE_MS")
                .and_then(|v| v.parse().ok()),
        };

        let maintenance = MaintenanceConfig {
            interval_seconds: layered
                .remove("MAINTENANCE_INTERVAL_SECONDS")
                .and_then(|v| v.parse().ok())
                .unwrap_or_default(),
            sync_job_retention_days: layered
                .remove("MAINTENANCE_SYNC_JOB_RETENTION_DAYS")
                .and_then(|v| v.parse().ok())
                .unwrap_or_else(default_sync_job_retention_days),
            integration_check_timeout_ms: layered
                .remove("MAINTENANCE_INTEGRATION_CHECK_TIMEOUT_MS")
                .and_then(|v| v.parse().ok())
                .unwrap_or_else(default_integration_check_timeout_ms),
            reminders_url: non_empty(layered.remove("MAINTENANCE_REMINDERS_URL")),
            reports_url: non_empty(layered.remove("MAINTENANCE_REPORTS_URL")),
        };

        let config = AppConfig {
            profile,
            api_bind_addr,
            log_level,
            log_format,
            database_url,
            db_max_connections,
            db_acquire_timeout_ms,
            operator_tokens,
            crypto_key,
            export_base_url,
            sync_worker,
            health,
            maintenance,
        };

        config.validate()?;

        match config.bind_addr() {
            Ok(_) => Ok(config),
            Err(source) => Err(ConfigError::InvalidBindAddr {
                value: config.api_bind_addr.clone(),
                source,
            }),
        }
    }

    fn collect_layered_env(&self) -> Result<(BTreeMap<String, String>, String), ConfigError> {
        let mut values = BTreeMap::new();

        self.merge_dotenv(self.base_dir.join(".env"), &mut values)?;
        self.merge_dotenv(self.base_dir.join(".env.local"), &mut values)?;

        let profile = env::var("PORTAL_PROFILE")
            .ok()
            .or_else(|| values.get("PROFILE").cloned())
            .unwrap_or_else(default_profile);

        self.merge_dotenv(
            self.base_dir.join(format!(".env.{}", &profile)),
            &mut values,
        )?;
        self.merge_dotenv(
            self.base_dir.join(format!(".env.{}.local", &profile)),
            &mut values,
        )?;

        Ok((values, profile))
    }

    fn merge_dotenv(
        &self,
        path: PathBuf,
        values: &mut BTreeMap<String, String>,
    ) -> Result<(), ConfigError> {
        match dotenvy::from_path_iter(&path) {
            Ok(iter) => {
                for item in iter {
                    let (key, value) = item.map_err(|source| ConfigError::EnvFile {
                        path: path.clone(),
                        source,
                    })?;
                    if let Some(stripped) = key.strip_prefix("PORTAL_") {
                        values.insert(stripped.to_string(), value);
                    }
                }
                Ok(())
            }
            Err(dotenvy::Error::Io(ref io_err))
                if io_err.kind() == std::io::ErrorKind::NotFound =>
            {
                Ok(())
            }
            Err(err) => Err(ConfigError::EnvFile { path, source: err }),
        }
    }
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}
