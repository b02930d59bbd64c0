//! # Sync Job Handlers
//!
//! Creating a sync job only records it as `pending` and queues it; the
//! background worker drives it to `completed` or `failed`. Clients poll the
//! job to follow progress.

use axum::{
    extract::{
        Path, Query, State,
        rejection::{JsonRejection, PathRejection, QueryRejection},
    },
    http::StatusCode,
    response::Json,
};
use serde::Deserialize;
use serde_json::json;
use utoipa::IntoParams;
use uuid::Uuid;

use super::integrations::parse_id;
use crate::auth::OperatorAuth;
use crate::error::{ApiError, validation_error};
use crate::manager::NewSyncJob;
use crate::models::{DataSyncJob, SyncJobStatus, SyncJobType};
use crate::repositories::SyncJobFilter;
use crate::server::AppState;

const DEFAULT_LIMIT: u64 = 50;
const MAX_LIMIT: u64 = 100;

/// Query parameters for listing sync jobs
#[derive(Debug, Default, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct ListSyncJobsQuery {
    /// Only jobs for this integration
    pub integration_id: Option<Uuid>,
    /// Only jobs in this state
    pub status: Option<SyncJobStatus>,
    /// Only jobs of this type
    pub job_type: Option<SyncJobType>,
    /// Maximum number of jobs (default 50, max 100)
    pub limit: Option<u64>,
}

impl ListSyncJobsQuery {
    fn into_filter(self) -> Result<SyncJobFilter, ApiError> {
        let limit = self.limit.unwrap_or(DEFAULT_LIMIT);
        if limit == 0 || limit > MAX_LIMIT {
            return Err(validation_error(
                "Invalid query parameters",
                json!({ "limit": format!("Must be between 1 and {}", MAX_LIMIT) }),
            ));
        }

        Ok(SyncJobFilter {
            integration_id: self.integration_id,
            status: self.status,
            job_type: self.job_type,
            limit: Some(limit),
        })
    }
}

/// List sync jobs, newest first
#[utoipa::path(
    get,
    path = "/sync-jobs",
    security(("bearer_auth" = [])),
    params(ListSyncJobsQuery),
    responses(
        (status = 200, description = "Sync jobs matching the filters", body = [DataSyncJob]),
        (status = 400, description = "Invalid query parameters", body = ApiError),
        (status = 401, description = "Missing or invalid bearer token", body = ApiError)
    ),
    tag = "sync-jobs"
)]
pub async fn list_sync_jobs(
    State(state): State<AppState>,
    _operator_auth: OperatorAuth,
    query: Result<Query<ListSyncJobsQuery>, QueryRejection>,
) -> Result<Json<Vec<DataSyncJob>>, ApiError> {
    let Query(query) = query.map_err(|e| {
        validation_error("Invalid query parameters", json!({ "query": e.body_text() }))
    })?;
    let filter = query.into_filter()?;
    Ok(Json(state.manager.list_sync_jobs(filter).await?))
}

/// Create a sync job and queue it for the background worker
#[utoipa::path(
    post,
    path = "/sync-jobs",
    security(("bearer_auth" = [])),
    request_body = NewSyncJob,
    responses(
        (status = 202, description = "Sync job accepted in pending state", body = DataSyncJob),
        (status = 400, description = "Invalid request body", body = ApiError),
        (status = 404, description = "Integration not found", body = ApiError)
    ),
    tag = "sync-jobs"
)]
pub async fn create_sync_job(
    State(state): State<AppState>,
    _operator_auth: OperatorAuth,
    payload: Result<Json<NewSyncJob>, JsonRejection>,
) -> Result<(StatusCode, Json<DataSyncJob>), ApiError> {
    let Json(request) = payload?;
    let job = state.manager.create_sync_job(request).await?;
    Ok((StatusCode::ACCEPTED, Json(job)))
}

#[utoipa::path(
    get,
    path = "/sync-jobs/{id}",
    security(("bearer_auth" = [])),
    params(("id" = Uuid, Path, description = "Sync job ID")),
    responses(
        (status = 200, description = "Sync job", body = DataSyncJob),
        (status = 400, description = "Malformed ID", body = ApiError),
        (status = 404, description = "Sync job not found", body = ApiError)
    ),
    tag = "sync-jobs"
)]
pub async fn get_sync_job(
    State(state): State<AppState>,
    _operator_auth: OperatorAuth,
    path: Result<Path<Uuid>, PathRejection>,
) -> Result<Json<DataSyncJob>, ApiError> {
    let id = parse_id(path)?;
    Ok(Json(state.manager.get_sync_job(id).await?))
}
