//! # Server Configuration
//!
//! Router assembly for the admin API and the process lifecycle of `serve`:
//! migrations, the sync worker, the maintenance scheduler and graceful
//! shutdown.

use std::sync::Arc;
use std::time::Duration;

use axum::{
    Router,
    extract::Request,
    http::{HeaderName, HeaderValue},
    middleware::{self, Next},
    response::Response,
    routing::get,
    routing::post,
};
use sea_orm::DatabaseConnection;
use tokio_util::sync::CancellationToken;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};
use utoipa::{
    Modify, OpenApi,
    openapi::security::{HttpAuthScheme, HttpBuilder, SecurityScheme},
};
use utoipa_swagger_ui::SwaggerUi;

use crate::auth::auth_middleware;
use crate::config::AppConfig;
use crate::error::ManagerError;
use crate::handlers;
use crate::manager::IntegrationManager;
use crate::repositories::SyncJobRepository;
use crate::scheduler::MaintenanceScheduler;
use crate::sync_worker::{SteppedSyncEngine, SyncJobProcessor, SyncQueue, SyncWorker};
use crate::telemetry::{TraceContext, with_trace_context};

/// Header carrying the request correlation ID in both directions
pub const TRACE_ID_HEADER: &str = "x-trace-id";

/// Application state containing shared resources
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub db: DatabaseConnection,
    pub manager: Arc<IntegrationManager>,
}

/// Build the manager together with the worker that drains its sync queue.
///
/// The worker is returned unstarted; one-shot CLI commands simply drop it.
pub fn build_runtime(
    config: &AppConfig,
    db: DatabaseConnection,
) -> Result<(Arc<IntegrationManager>, SyncWorker), ManagerError> {
    let (queue, receiver) = SyncQueue::channel();
    let manager = IntegrationManager::builder(db.clone(), config).build(queue)?;

    let jobs = SyncJobRepository::new(db);
    let engine = Arc::new(SteppedSyncEngine::new(Duration::from_millis(
        config.sync_worker.step_delay_ms,
    )));
    let processor = SyncJobProcessor::new(jobs.clone(), engine);
    let worker = SyncWorker::new(processor, jobs, receiver, &config.sync_worker);

    Ok((Arc::new(manager), worker))
}

/// Creates and configures the Axum application router
pub fn create_app(state: AppState) -> Router {
    let protected = Router::new()
        .route("/system/health", get(handlers::system::system_health))
        .route(
            "/system/services",
            get(handlers::system::list_service_statuses),
        )
        .route(
            "/integrations",
            get(handlers::integrations::list_integrations)
                .post(handlers::integrations::create_integration),
        )
        .route(
            "/integrations/{id}",
            get(handlers::integrations::get_integration)
                .patch(handlers::integrations::update_integration),
        )
        .route(
            "/sync-jobs",
            get(handlers::sync_jobs::list_sync_jobs).post(handlers::sync_jobs::create_sync_job),
        )
        .route("/sync-jobs/{id}", get(handlers::sync_jobs::get_sync_job))
        .route(
            "/maintenance/run",
            post(handlers::operations::run_maintenance),
        )
        .route(
            "/bulk-operations",
            post(handlers::operations::execute_bulk_operation),
        )
        .route_layer(middleware::from_fn_with_state(
            Arc::clone(&state.config),
            auth_middleware,
        ));

    Router::new()
        .route("/", get(handlers::root))
        .route("/healthz", get(handlers::healthz))
        .merge(protected)
        .layer(middleware::from_fn(trace_context_middleware))
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .with_state(state)
        .merge(SwaggerUi::new("/docs").url("/openapi.json", ApiDoc::openapi()))
}

/// Scope each request in a trace context so error bodies carry the same ID
/// that is echoed back in the response header.
async fn trace_context_middleware(request: Request, next: Next) -> Response {
    let context = TraceContext::from_header(
        request
            .headers()
            .get(TRACE_ID_HEADER)
            .and_then(|value| value.to_str().ok()),
    );
    let trace_id = context.trace_id.clone();

    let mut response = with_trace_context(context, next.run(request)).await;

    if let Ok(value) = HeaderValue::from_str(&trace_id) {
        response
            .headers_mut()
            .insert(HeaderName::from_static(TRACE_ID_HEADER), value);
    }
    response
}

/// Starts the server with the given configuration
pub async fn run_server(config: AppConfig, db: DatabaseConnection) -> anyhow::Result<()> {
    crate::db::run_migrations(&db).await?;

    let (manager, worker) = build_runtime(&config, db.clone())?;
    let shutdown = CancellationToken::new();

    let worker_handle = tokio::spawn(worker.run(shutdown.clone()));

    let scheduler_handle = if config.maintenance.interval_seconds > 0 {
        let scheduler = MaintenanceScheduler::new(
            Arc::clone(&manager),
            Duration::from_secs(config.maintenance.interval_seconds),
        );
        Some(tokio::spawn(scheduler.run(shutdown.clone())))
    } else {
        info!("Maintenance scheduler disabled");
        None
    };

    let addr = config
        .bind_addr()
        .map_err(|e| anyhow::anyhow!("Invalid server address: {}", e))?;

    let state = AppState {
        config: Arc::new(config),
        db,
        manager,
    };
    let profile = state.config.profile.clone();
    let app = create_app(state);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(%addr, %profile, "Server listening");

    let signal_token = shutdown.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!(error = %e, "Failed to listen for shutdown signal");
            }
            info!("Shutdown signal received");
            signal_token.cancel();
        })
        .await?;

    shutdown.cancel();
    if let Err(e) = worker_handle.await {
        warn!(error = %e, "Sync worker task ended abnormally");
    }
    if let Some(handle) = scheduler_handle
        && let Err(e) = handle.await
    {
        warn!(error = %e, "Maintenance scheduler task ended abnormally");
    }

    info!("Server stopped");
    Ok(())
}

struct SecurityAddon;

impl Modify for SecurityAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        let components = openapi.components.get_or_insert_with(Default::default);
        components.add_security_scheme(
            "bearer_auth",
            SecurityScheme::Http(HttpBuilder::new().scheme(HttpAuthScheme::Bearer).build()),
        );
    }
}

/// OpenAPI documentation
#[derive(OpenApi)]
#[openapi(
    paths(
        crate::handlers::root,
        crate::handlers::healthz,
        crate::handlers::system::system_health,
        crate::handlers::system::list_service_statuses,
        crate::handlers::integrations::list_integrations,
        crate::handlers::integrations::create_integration,
        crate::handlers::integrations::get_integration,
        crate::handlers::integrations::update_integration,
        crate::handlers::sync_jobs::list_sync_jobs,
        crate::handlers::sync_jobs::create_sync_job,
        crate::handlers::sync_jobs::get_sync_job,
        crate::handlers::operations::run_maintenance,
        crate::handlers::operations::execute_bulk_operation,
    ),
    components(
        schemas(
            crate::models::ServiceInfo,
            crate::error::ApiError,
            crate::health::SystemHealthDashboard,
            crate::models::SystemIntegration,
            crate::models::DataSyncJob,
            crate::maintenance::MaintenanceReport,
            crate::bulk::BulkOperationResult,
        )
    ),
    modifiers(&SecurityAddon),
    tags(
        (name = "root", description = "Service information and liveness"),
        (name = "system", description = "Service health aggregation"),
        (name = "integrations", description = "Integration registry"),
        (name = "sync-jobs", description = "Data sync jobs"),
        (name = "operations", description = "Maintenance and bulk operations"),
    ),
    info(
        title = "Portal Integrations API",
        description = "Admin API for service health, integrations, sync jobs and maintenance",
        version = env!("CARGO_PKG_VERSION"),
    )
)]
pub struct ApiDoc;
