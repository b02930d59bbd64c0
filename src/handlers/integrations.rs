//! # Integration Handlers
//!
//! Registration, listing and partial update of system integrations. API keys
//! are write-only: responses carry `has_api_key` instead.

use axum::{
    extract::{Path, State, rejection::JsonRejection, rejection::PathRejection},
    http::StatusCode,
    response::Json,
};
use serde_json::json;
use uuid::Uuid;

use crate::auth::OperatorAuth;
use crate::error::{ApiError, validation_error};
use crate::manager::{IntegrationUpdate, NewIntegration};
use crate::models::SystemIntegration;
use crate::server::AppState;

pub(crate) fn parse_id(path: Result<Path<Uuid>, PathRejection>) -> Result<Uuid, ApiError> {
    path.map(|Path(id)| id).map_err(|_| {
        validation_error("Invalid identifier", json!({ "id": "Must be a valid UUID" }))
    })
}

/// List all integrations, alphabetical by name
#[utoipa::path(
    get,
    path = "/integrations",
    security(("bearer_auth" = [])),
    responses(
        (status = 200, description = "All integrations", body = [SystemIntegration]),
        (status = 401, description = "Missing or invalid bearer token", body = ApiError),
        (status = 500, description = "Internal server error", body = ApiError)
    ),
    tag = "integrations"
)]
pub async fn list_integrations(
    State(state): State<AppState>,
    _operator_auth: OperatorAuth,
) -> Result<Json<Vec<SystemIntegration>>, ApiError> {
    Ok(Json(state.manager.list_integrations().await?))
}

/// Register a new integration
#[utoipa::path(
    post,
    path = "/integrations",
    security(("bearer_auth" = [])),
    request_body = NewIntegration,
    responses(
        (status = 201, description = "Integration registered", body = SystemIntegration, example = json!({
            "id": "550e8400-e29b-41d4-a716-446655440000",
            "name": "Prayer Times API",
            "type": "external",
            "status": "active",
            "endpoint": "https://api.example.org/times",
            "has_api_key": true,
            "configuration": {"region": "eu"},
            "last_sync": null,
            "error_count": 0,
            "created_at": "2026-01-05T09:00:00Z",
            "updated_at": "2026-01-05T09:00:00Z"
        })),
        (status = 400, description = "Invalid request body", body = ApiError),
        (status = 401, description = "Missing or invalid bearer token", body = ApiError),
        (status = 409, description = "An integration with this name already exists", body = ApiError)
    ),
    tag = "integrations"
)]
pub async fn create_integration(
    State(state): State<AppState>,
    _operator_auth: OperatorAuth,
    payload: Result<Json<NewIntegration>, JsonRejection>,
) -> Result<(StatusCode, Json<SystemIntegration>), ApiError> {
    let Json(request) = payload?;
    let integration = state.manager.create_integration(request).await?;
    Ok((StatusCode::CREATED, Json(integration)))
}

#[utoipa::path(
    get,
    path = "/integrations/{id}",
    security(("bearer_auth" = [])),
    params(("id" = Uuid, Path, description = "Integration ID")),
    responses(
        (status = 200, description = "Integration", body = SystemIntegration),
        (status = 400, description = "Malformed ID", body = ApiError),
        (status = 404, description = "Integration not found", body = ApiError)
    ),
    tag = "integrations"
)]
pub async fn get_integration(
    State(state): State<AppState>,
    _operator_auth: OperatorAuth,
    path: Result<Path<Uuid>, PathRejection>,
) -> Result<Json<SystemIntegration>, ApiError> {
    let id = parse_id(path)?;
    Ok(Json(state.manager.get_integration(id).await?))
}

/// Merge-update an integration; fields left out of the body are unchanged
#[utoipa::path(
    patch,
    path = "/integrations/{id}",
    security(("bearer_auth" = [])),
    params(("id" = Uuid, Path, description = "Integration ID")),
    request_body = IntegrationUpdate,
    responses(
        (status = 200, description = "Updated integration", body = SystemIntegration),
        (status = 400, description = "Invalid request", body = ApiError),
        (status = 404, description = "Integration not found", body = ApiError)
    ),
    tag = "integrations"
)]
pub async fn update_integration(
    State(state): State<AppState>,
    _operator_auth: OperatorAuth,
    path: Result<Path<Uuid>, PathRejection>,
    payload: Result<Json<IntegrationUpdate>, JsonRejection>,
) -> Result<Json<SystemIntegration>, ApiError> {
    let id = parse_id(path)?;
    let Json(update) = payload?;
    Ok(Json(state.manager.update_integration(id, update).await?))
}
