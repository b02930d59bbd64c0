//! Analytics event repository: append-only writes to `analytics_events`.

use chrono::Utc;
use sea_orm::{ActiveModelTrait, DatabaseConnection, EntityTrait, QueryOrder, QuerySelect, Set};
use serde_json::Value as JsonValue;
use uuid::Uuid;

use crate::error::ManagerError;
use crate::models::analytics_event::{ActiveModel, Column, Entity, Model};

#[derive(Debug, Clone)]
pub struct AnalyticsEventRepository {
    db: DatabaseConnection,
}

impl AnalyticsEventRepository {
    pub fn new(db: DatabaseConnection) -> Self {
        Self { db }
    }

    pub async fn insert(
        &self,
        event_name: &str,
        category: &str,
        payload: JsonValue,
    ) -> Result<Model, ManagerError> {
        let event = ActiveModel {
            id: Set(Uuid::new_v4()),
            event_name: Set(event_name.to_string()),
            category: Set(category.to_string()),
            payload: Set(payload),
            created_at: Set(Utc::now().fixed_offset()),
        };

        Ok(event.insert(&self.db).await?)
    }

    /// Most recent events first
    pub async fn list_recent(&self, limit: u64) -> Result<Vec<Model>, ManagerError> {
        let rows = Entity::find()
            .order_by_desc(Column::CreatedAt)
            .limit(limit)
            .all(&self.db)
            .await?;
        Ok(rows)
    }
}
