//! # SyncJob Repository
//!
//! Record store operations for the `data_sync_jobs` table. State transitions
//! are conditional updates filtered on the expected current status, so a job
//! can only move `pending -> running -> completed | failed` and a terminal row
//! is never rewritten.

use chrono::{DateTime, Utc};
use sea_orm::prelude::Expr;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, PaginatorTrait, QueryFilter,
    QueryOrder, QuerySelect, Set,
};
use uuid::Uuid;

use crate::error::ManagerError;
use crate::models::data_sync_job::{ActiveModel, Column, Entity, Model};
use crate::models::{SyncJobStatus, SyncJobType};

/// Filters for listing sync jobs; all optional.
#[derive(Debug, Clone, Default)]
pub struct SyncJobFilter {
    pub integration_id: Option<Uuid>,
    pub status: Option<SyncJobStatus>,
    pub job_type: Option<SyncJobType>,
    pub limit: Option<u64>,
}

#[derive(Debug, Clone)]
pub struct SyncJobRepository {
    db: DatabaseConnection,
}

impl SyncJobRepository {
    pub fn new(db: DatabaseConnection) -> Self {
        Self { db }
    }

    /// Insert a job in `pending` with zeroed progress counters
    pub async fn insert_pending(
        &self,
        integration_id: Uuid,
        job_type: SyncJobType,
        total_records: i64,
    ) -> Result<Model, ManagerError> {
        let job = ActiveModel {
            id: Set(Uuid::new_v4()),
            integration_id: Set(integration_id),
            job_type: Set(job_type.as_str().to_string()),
            status: Set(SyncJobStatus::Pending.as_str().to_string()),
            progress_percentage: Set(0),
            records_processed: Set(0),
            total_records: Set(total_records),
            error_message: Set(None),
            started_at: Set(None),
            completed_at: Set(None),
            created_at: Set(Utc::now().fixed_offset()),
        };

        let result = job.insert(&self.db).await.map_err(|e| {
            tracing::error!(integration_id = %integration_id, error = %e, "Failed to create sync job");
            ManagerError::from(e)
        })?;

        tracing::info!(
            job_id = %result.id,
            integration_id = %integration_id,
            job_type = %result.job_type,
            total_records,
            "Sync job created"
        );

        Ok(result)
    }

    pub async fn find(&self, id: Uuid) -> Result<Option<Model>, ManagerError> {
        Entity::find_by_id(id).one(&self.db).await.map_err(|e| {
            tracing::error!(job_id = %id, error = %e, "Failed to find sync job");
            e.into()
        })
    }

    /// Filtered listing, newest first
    pub async fn list(&self, filter: SyncJobFilter) -> Result<Vec<Model>, ManagerError> {
        let mut query = Entity::find()
            .order_by_desc(Column::CreatedAt)
            .order_by_desc(Column::Id);

        if let Some(integration_id) = filter.integration_id {
            query = query.filter(Column::IntegrationId.eq(integration_id));
        }
        if let Some(status) = filter.status {
            query = query.filter(Column::Status.eq(status.as_str()));
        }
        if let Some(job_type) = filter.job_type {
            query = query.filter(Column::JobType.eq(job_type.as_str()));
        }
        if let Some(limit) = filter.limit {
            query = query.limit(limit);
        }

        query.all(&self.db).await.map_err(|e| {
            tracing::error!(error = %e, "Failed to list sync jobs");
            e.into()
        })
    }

    /// Jobs in the given status, oldest first
    pub async fn list_by_status(&self, status: SyncJobStatus) -> Result<Vec<Model>, ManagerError> {
        let rows = Entity::find()
            .filter(Column::Status.eq(status.as_str()))
            .order_by_asc(Column::CreatedAt)
            .all(&self.db)
            .await?;
        Ok(rows)
    }

    pub async fn count_by_status(&self, status: SyncJobStatus) -> Result<u64, ManagerError> {
        let count = Entity::find()
            .filter(Column::Status.eq(status.as_str()))
            .count(&self.db)
            .await?;
        Ok(count)
    }

    /// Move a job from `pending` to `running`, stamping `started_at`.
    ///
    /// Returns `false` when the job was not pending (already claimed, finished,
    /// or missing); the caller must then leave it alone.
    pub async fn claim_pending(&self, id: Uuid) -> Result<bool, ManagerError> {
        let now = Utc::now().fixed_offset();

        let result = Entity::update_many()
            .col_expr(Column::Status, Expr::value(SyncJobStatus::Running.as_str()))
            .col_expr(Column::StartedAt, Expr::value(now))
            .filter(Column::Id.eq(id))
            .filter(Column::Status.eq(SyncJobStatus::Pending.as_str()))
            .exec(&self.db)
            .await?;

        Ok(result.rows_affected == 1)
    }

    /// Write one progress step of a running job
    pub async fn write_progress(
        &self,
        id: Uuid,
        progress_percentage: i32,
        records_processed: i64,
    ) -> Result<(), ManagerError> {
        let result = Entity::update_many()
            .col_expr(Column::ProgressPercentage, Expr::value(progress_percentage))
            .col_expr(Column::RecordsProcessed, Expr::value(records_processed))
            .filter(Column::Id.eq(id))
            .filter(Column::Status.eq(SyncJobStatus::Running.as_str()))
            .exec(&self.db)
            .await?;

        if result.rows_affected == 0 {
            return Err(ManagerError::SyncEngine(format!(
                "sync job {} is no longer running",
                id
            )));
        }
        Ok(())
    }

    /// Terminal success: progress 100 and every record processed
    pub async fn complete(&self, id: Uuid, total_records: i64) -> Result<(), ManagerError> {
        let now = Utc::now().fixed_offset();

        let result = Entity::update_many()
            .col_expr(Column::Status, Expr::value(SyncJobStatus::Completed.as_str()))
            .col_expr(Column::ProgressPercentage, Expr::value(100))
            .col_expr(Column::RecordsProcessed, Expr::value(total_records))
            .col_expr(Column::CompletedAt, Expr::value(now))
            .filter(Column::Id.eq(id))
            .filter(Column::Status.eq(SyncJobStatus::Running.as_str()))
            .exec(&self.db)
            .await?;

        if result.rows_affected == 0 {
            return Err(ManagerError::SyncEngine(format!(
                "sync job {} is no longer running",
                id
            )));
        }
        Ok(())
    }

    /// Terminal failure with the captured message.
    ///
    /// Returns `false` if the job was not running, in which case nothing is written.
    pub async fn fail(&self, id: Uuid, message: &str) -> Result<bool, ManagerError> {
        let now = Utc::now().fixed_offset();

        let result = Entity::update_many()
            .col_expr(Column::Status, Expr::value(SyncJobStatus::Failed.as_str()))
            .col_expr(Column::ErrorMessage, Expr::value(message))
            .col_expr(Column::CompletedAt, Expr::value(now))
            .filter(Column::Id.eq(id))
            .filter(Column::Status.eq(SyncJobStatus::Running.as_str()))
            .exec(&self.db)
            .await?;

        Ok(result.rows_affected == 1)
    }

    /// Delete `completed` jobs created before the cutoff. Failed jobs are kept.
    pub async fn purge_completed_before(
        &self,
        cutoff: DateTime<Utc>,
    ) -> Result<u64, ManagerError> {
        let result = Entity::delete_many()
            .filter(Column::Status.eq(SyncJobStatus::Completed.as_str()))
            .filter(Column::CreatedAt.lt(cutoff.fixed_offset()))
            .exec(&self.db)
            .await?;

        Ok(result.rows_affected)
    }
}
