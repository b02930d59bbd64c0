//! DataSyncJob entity model
//!
//! SeaORM entity for the data_sync_jobs table: one import, export, sync or
//! backup run against a registered integration, with its progress counters.

use super::system_integration::Entity as SystemIntegration;
use sea_orm::ActiveModelBehavior;
use sea_orm::entity::prelude::*;
use sea_orm::prelude::DateTimeWithTimeZone;
use uuid::Uuid;

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
#[sea_orm(table_name = "data_sync_jobs")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,

    /// Integration this job runs against
    pub integration_id: Uuid,

    /// One of import, export, sync, backup
    pub job_type: String,

    /// One of pending, running, completed, failed
    pub status: String,

    /// 0..=100, non-decreasing while the job runs
    pub progress_percentage: i32,

    pub records_processed: i64,

    pub total_records: i64,

    pub error_message: Option<String>,

    pub started_at: Option<DateTimeWithTimeZone>,

    /// Set on both terminal transitions (completed and failed)
    pub completed_at: Option<DateTimeWithTimeZone>,

    pub created_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "SystemIntegration",
        from = "Column::IntegrationId",
        to = "super::system_integration::Column::Id"
    )]
    SystemIntegration,
}

impl Related<SystemIntegration> for Entity {
    fn to() -> RelationDef {
        Relation::SystemIntegration.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
