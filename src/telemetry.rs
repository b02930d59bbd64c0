//! Logging for the integration manager.
//!
//! One subscriber per process, with `log::` records from sqlx and sea-orm
//! bridged into it. Admin API requests run inside a [`TraceContext`] so that
//! error bodies and the `x-trace-id` response header carry the same ID.

use std::any::type_name_of_val;
use std::sync::atomic::{AtomicBool, Ordering};

use log::LevelFilter;
use thiserror::Error;
use tokio::task_local;
use tracing_log::LogTracer;
use tracing_subscriber::{
    EnvFilter, fmt,
    layer::Layer,
    layer::SubscriberExt,
    util::{SubscriberInitExt, TryInitError},
};
use uuid::Uuid;

use crate::config::AppConfig;

/// Longest caller-supplied trace ID that is echoed back
pub const MAX_TRACE_ID_LEN: usize = 128;

/// Correlation ID for one admin API request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TraceContext {
    pub trace_id: String,
}

impl TraceContext {
    /// Use the caller's ID when it is printable and reasonably short;
    /// otherwise mint a new one.
    pub fn from_header(value: Option<&str>) -> Self {
        let trace_id = value
            .map(str::trim)
            .filter(|v| {
                !v.is_empty()
                    && v.len() <= MAX_TRACE_ID_LEN
                    && v.chars().all(|c| c.is_ascii_graphic())
            })
            .map(str::to_string)
            .unwrap_or_else(|| Uuid::new_v4().to_string());
        Self { trace_id }
    }
}

task_local! {
    static ACTIVE_TRACE_CONTEXT: TraceContext;
}

#[derive(Debug, Error)]
pub enum TelemetryInitError {
    #[error("failed to install log tracer bridge: {0}")]
    LogTracer(#[from] log::SetLoggerError),
    #[error("failed to install tracing subscriber: {0}")]
    Subscriber(#[from] TryInitError),
}

static TELEMETRY_INITIALIZED: AtomicBool = AtomicBool::new(false);

/// Filter used when `RUST_LOG` is unset. sqlx statement logs stay at `warn`
/// unless the service itself runs at `debug` or `trace`.
pub fn default_filter_directives(log_level: &str) -> String {
    let level = log_level.trim().to_ascii_lowercase();
    let sqlx = if matches!(level.as_str(), "debug" | "trace") {
        level.as_str()
    } else {
        "warn"
    };
    format!("{level},sqlx={sqlx},sea_orm_migration=info")
}

pub fn init_tracing(config: &AppConfig) -> Result<(), TelemetryInitError> {
    if TELEMETRY_INITIALIZED
        .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
        .is_err()
    {
        return Ok(());
    }

    if let Err(err) = LogTracer::builder()
        .with_max_level(LevelFilter::Trace)
        .init()
    {
        let logger_type = type_name_of_val(log::logger());
        if !logger_type.contains("LogTracer") {
            eprintln!(
                "Warning: failed to install log tracer bridge: {}. sqlx and sea-orm logs will be lost.",
                err
            );
        }
    }

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_filter_directives(&config.log_level)));

    let fmt_layer = match config.log_format.as_str() {
        "pretty" => fmt::layer().pretty().boxed(),
        _ => fmt::layer().json().with_current_span(false).boxed(),
    };

    if let Err(err) = tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .try_init()
    {
        TELEMETRY_INITIALIZED.store(false, Ordering::SeqCst);
        eprintln!(
            "Warning: failed to set global tracing subscriber: {}. Default subscriber remains in effect.",
            err
        );
        return Ok(());
    }

    tracing::info!(
        profile = %config.profile,
        log_format = %config.log_format,
        "Telemetry initialized"
    );
    Ok(())
}

pub async fn with_trace_context<Fut, R>(context: TraceContext, future: Fut) -> R
where
    Fut: std::future::Future<Output = R>,
{
    ACTIVE_TRACE_CONTEXT.scope(context, future).await
}

/// Trace ID of the request the current task is serving, if any
pub fn current_trace_id() -> Option<String> {
    ACTIVE_TRACE_CONTEXT
        .try_with(|ctx| ctx.trace_id.clone())
        .ok()
}
