//! System health handlers.

use axum::{extract::State, response::Json};

use crate::auth::OperatorAuth;
use crate::error::ApiError;
use crate::health::{ServiceStatus, SystemHealthDashboard};
use crate::server::AppState;

/// Full health dashboard: probe results, integrations, recent sync jobs and counters
#[utoipa::path(
    get,
    path = "/system/health",
    security(("bearer_auth" = [])),
    responses(
        (status = 200, description = "System health dashboard", body = SystemHealthDashboard),
        (status = 401, description = "Missing or invalid bearer token", body = ApiError),
        (status = 500, description = "Internal server error", body = ApiError)
    ),
    tag = "system"
)]
pub async fn system_health(
    State(state): State<AppState>,
    _operator_auth: OperatorAuth,
) -> Result<Json<SystemHealthDashboard>, ApiError> {
    let dashboard = state.manager.system_health_dashboard().await?;
    Ok(Json(dashboard))
}

/// Probe every registered service
#[utoipa::path(
    get,
    path = "/system/services",
    security(("bearer_auth" = [])),
    responses(
        (status = 200, description = "One status per registered service, in registry order", body = [ServiceStatus]),
        (status = 401, description = "Missing or invalid bearer token", body = ApiError)
    ),
    tag = "system"
)]
pub async fn list_service_statuses(
    State(state): State<AppState>,
    _operator_auth: OperatorAuth,
) -> Json<Vec<ServiceStatus>> {
    Json(state.manager.check_all_services().await)
}
