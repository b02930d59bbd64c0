//! SystemIntegration entity model
//!
//! SeaORM entity for the system_integrations table, the registry of internal,
//! external and third-party endpoints that sync jobs run against.

use sea_orm::ActiveModelBehavior;
use sea_orm::entity::prelude::*;
use sea_orm::prelude::DateTimeWithTimeZone;
use serde_json::Value as JsonValue;
use uuid::Uuid;

#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "system_integrations")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,

    /// Unique display name, also the listing sort key
    #[sea_orm(unique)]
    pub name: String,

    /// One of internal, external, third_party
    pub integration_type: String,

    /// One of active, inactive, error
    pub status: String,

    pub endpoint: Option<String>,

    /// AES-256-GCM ciphertext of the API key, see `crate::crypto`
    pub api_key_ciphertext: Option<Vec<u8>>,

    /// Opaque key-value configuration
    #[sea_orm(column_type = "JsonBinary")]
    pub configuration: JsonValue,

    pub last_sync: Option<DateTimeWithTimeZone>,

    pub error_count: i32,

    pub created_at: DateTimeWithTimeZone,

    pub updated_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::data_sync_job::Entity")]
    DataSyncJobs,
}

impl Related<super::data_sync_job::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::DataSyncJobs.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
