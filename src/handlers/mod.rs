//! # API Handlers
//!
//! HTTP endpoint handlers for the integration manager's admin API.

pub mod integrations;
pub mod operations;
pub mod sync_jobs;
pub mod system;

use axum::{extract::State, http::StatusCode, response::Json};
use serde::Serialize;
use utoipa::ToSchema;

use crate::models::ServiceInfo;
use crate::server::AppState;

/// Root handler that returns basic service information
#[utoipa::path(
    get,
    path = "/",
    responses(
        (status = 200, description = "Service information", body = ServiceInfo)
    ),
    tag = "root"
)]
pub async fn root() -> Json<ServiceInfo> {
    Json(ServiceInfo::default())
}

/// Liveness response
#[derive(Debug, Serialize, ToSchema)]
pub struct HealthzResponse {
    #[schema(example = "ok")]
    pub status: &'static str,
}

/// Liveness probe backed by a trivial database query
#[utoipa::path(
    get,
    path = "/healthz",
    responses(
        (status = 200, description = "Service and database reachable", body = HealthzResponse),
        (status = 503, description = "Database unreachable", body = HealthzResponse)
    ),
    tag = "root"
)]
pub async fn healthz(State(state): State<AppState>) -> (StatusCode, Json<HealthzResponse>) {
    match crate::db::health_check(&state.db).await {
        Ok(()) => (StatusCode::OK, Json(HealthzResponse { status: "ok" })),
        Err(e) => {
            tracing::warn!(error = %e, "Liveness check failed");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(HealthzResponse {
                    status: "unavailable",
                }),
            )
        }
    }
}
