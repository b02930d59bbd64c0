//! Maintenance and bulk operation handlers.

use axum::{
    extract::{State, rejection::JsonRejection},
    response::Json,
};

use crate::auth::OperatorAuth;
use crate::bulk::{BulkOperationRequest, BulkOperationResult};
use crate::error::ApiError;
use crate::maintenance::MaintenanceReport;
use crate::server::AppState;

/// Run every maintenance task once.
///
/// Always answers 200; failed tasks are listed in `tasks_failed`.
#[utoipa::path(
    post,
    path = "/maintenance/run",
    security(("bearer_auth" = [])),
    responses(
        (status = 200, description = "Maintenance report", body = MaintenanceReport, example = json!({
            "tasks_completed": ["cleanup_old_sync_jobs", "update_integration_health", "process_scheduled_reports", "record_system_metrics"],
            "tasks_failed": ["process_scheduled_reminders"],
            "total_duration_ms": 184
        })),
        (status = 401, description = "Missing or invalid bearer token", body = ApiError)
    ),
    tag = "operations"
)]
pub async fn run_maintenance(
    State(state): State<AppState>,
    _operator_auth: OperatorAuth,
) -> Json<MaintenanceReport> {
    Json(state.manager.run_maintenance_tasks().await)
}

#[utoipa::path(
    post,
    path = "/bulk-operations",
    security(("bearer_auth" = [])),
    request_body = BulkOperationRequest,
    responses(
        (status = 200, description = "Bulk operation result", body = BulkOperationResult),
        (status = 400, description = "Unsupported operation type or invalid tables", body = ApiError),
        (status = 401, description = "Missing or invalid bearer token", body = ApiError)
    ),
    tag = "operations"
)]
pub async fn execute_bulk_operation(
    State(state): State<AppState>,
    _operator_auth: OperatorAuth,
    payload: Result<Json<BulkOperationRequest>, JsonRejection>,
) -> Result<Json<BulkOperationResult>, ApiError> {
    let Json(request) = payload?;
    Ok(Json(state.manager.execute_bulk_operation(request).await?))
}
