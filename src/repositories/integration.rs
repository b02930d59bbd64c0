//! # Integration Repository
//!
//! Record store operations for the `system_integrations` table. Writes always
//! stamp `updated_at`; there is no optimistic concurrency check, so the last
//! writer wins.

use chrono::{DateTime, Utc};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, QueryOrder, Set,
};
use serde_json::Value as JsonValue;
use uuid::Uuid;

use crate::error::ManagerError;
use crate::models::system_integration::{ActiveModel, Column, Entity, Model};
use crate::models::{IntegrationStatus, IntegrationType};

/// Values for a freshly registered integration.
///
/// The ID is chosen by the caller because the API key ciphertext is bound to it.
#[derive(Debug, Clone)]
pub struct NewIntegrationRecord {
    pub id: Uuid,
    pub name: String,
    pub integration_type: IntegrationType,
    pub endpoint: Option<String>,
    pub api_key_ciphertext: Option<Vec<u8>>,
    pub configuration: JsonValue,
}

/// Partial update; `None` leaves the stored column untouched.
#[derive(Debug, Clone, Default)]
pub struct IntegrationChanges {
    pub name: Option<String>,
    pub integration_type: Option<IntegrationType>,
    pub status: Option<IntegrationStatus>,
    pub endpoint: Option<String>,
    pub api_key_ciphertext: Option<Vec<u8>>,
    pub configuration: Option<JsonValue>,
}

impl IntegrationChanges {
    pub fn is_empty(&self) -> bool {
        self.name.is_none()
            && self.integration_type.is_none()
            && self.status.is_none()
            && self.endpoint.is_none()
            && self.api_key_ciphertext.is_none()
            && self.configuration.is_none()
    }
}

#[derive(Debug, Clone)]
pub struct IntegrationRepository {
    db: DatabaseConnection,
}

impl IntegrationRepository {
    pub fn new(db: DatabaseConnection) -> Self {
        Self { db }
    }

    /// All integrations, alphabetical by name
    pub async fn list_by_name(&self) -> Result<Vec<Model>, ManagerError> {
        Entity::find()
            .order_by_asc(Column::Name)
            .all(&self.db)
            .await
            .map_err(|e| {
                tracing::error!(error = %e, "Failed to list integrations");
                e.into()
            })
    }

    /// Integrations currently flagged with the given status
    pub async fn list_by_status(
        &self,
        status: IntegrationStatus,
    ) -> Result<Vec<Model>, ManagerError> {
        let rows = Entity::find()
            .filter(Column::Status.eq(status.as_str()))
            .order_by_asc(Column::Name)
            .all(&self.db)
            .await?;
        Ok(rows)
    }

    pub async fn find(&self, id: Uuid) -> Result<Option<Model>, ManagerError> {
        Entity::find_by_id(id).one(&self.db).await.map_err(|e| {
            tracing::error!(integration_id = %id, error = %e, "Failed to find integration");
            e.into()
        })
    }

    /// Insert a new integration as `active` with a zero error count
    pub async fn insert(&self, record: NewIntegrationRecord) -> Result<Model, ManagerError> {
        let now = Utc::now().fixed_offset();

        let integration = ActiveModel {
            id: Set(record.id),
            name: Set(record.name),
            integration_type: Set(record.integration_type.as_str().to_string()),
            status: Set(IntegrationStatus::Active.as_str().to_string()),
            endpoint: Set(record.endpoint),
            api_key_ciphertext: Set(record.api_key_ciphertext),
            configuration: Set(record.configuration),
            last_sync: Set(None),
            error_count: Set(0),
            created_at: Set(now),
            updated_at: Set(now),
        };

        let model = integration.insert(&self.db).await.map_err(|e| {
            tracing::error!(integration_id = %record.id, error = %e, "Failed to create integration");
            ManagerError::from(e)
        })?;

        tracing::info!(
            integration_id = %model.id,
            name = %model.name,
            integration_type = %model.integration_type,
            "Integration registered"
        );

        Ok(model)
    }

    /// Merge the given changes into the stored row, always stamping `updated_at`
    pub async fn update(
        &self,
        id: Uuid,
        changes: IntegrationChanges,
    ) -> Result<Model, ManagerError> {
        let existing = self
            .find(id)
            .await?
            .ok_or_else(|| ManagerError::not_found("integration", id))?;

        let mut active: ActiveModel = existing.into();
        if let Some(name) = changes.name {
            active.name = Set(name);
        }
        if let Some(integration_type) = changes.integration_type {
            active.integration_type = Set(integration_type.as_str().to_string());
        }
        if let Some(status) = changes.status {
            active.status = Set(status.as_str().to_string());
        }
        if let Some(endpoint) = changes.endpoint {
            active.endpoint = Set(Some(endpoint));
        }
        if let Some(ciphertext) = changes.api_key_ciphertext {
            active.api_key_ciphertext = Set(Some(ciphertext));
        }
        if let Some(configuration) = changes.configuration {
            active.configuration = Set(configuration);
        }
        active.updated_at = Set(Utc::now().fixed_offset());

        active.update(&self.db).await.map_err(|e| {
            tracing::error!(integration_id = %id, error = %e, "Failed to update integration");
            e.into()
        })
    }

    /// Store the outcome of a health check: new status, `last_sync`, and one
    /// more error on the counter when the check failed.
    pub async fn record_health_result(
        &self,
        id: Uuid,
        status: IntegrationStatus,
        checked_at: DateTime<Utc>,
    ) -> Result<Model, ManagerError> {
        let existing = self
            .find(id)
            .await?
            .ok_or_else(|| ManagerError::not_found("integration", id))?;

        let error_count = if status == IntegrationStatus::Error {
            existing.error_count.saturating_add(1)
        } else {
            existing.error_count
        };

        let mut active: ActiveModel = existing.into();
        active.status = Set(status.as_str().to_string());
        active.last_sync = Set(Some(checked_at.fixed_offset()));
        active.error_count = Set(error_count);
        active.updated_at = Set(Utc::now().fixed_offset());

        let model = active.update(&self.db).await?;
        Ok(model)
    }
}
