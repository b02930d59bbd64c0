//! # Data Models
//!
//! SeaORM entities for the tables the integration manager owns, the typed
//! enums stored in their text columns, and the serializable views returned to
//! callers.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::error::ManagerError;

pub mod analytics_event;
pub mod data_sync_job;
pub mod system_integration;

pub use analytics_event::Entity as AnalyticsEvent;
pub use data_sync_job::Entity as DataSyncJobEntity;
pub use system_integration::Entity as SystemIntegrationEntity;

/// Basic service information response
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ServiceInfo {
    /// The name of the service
    pub service: String,
    /// The version of the service
    pub version: String,
}

impl Default for ServiceInfo {
    fn default() -> Self {
        Self {
            service: "portal-integrations".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

/// Where an integration lives relative to the portal
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum IntegrationType {
    Internal,
    External,
    ThirdParty,
}

impl IntegrationType {
    pub fn as_str(&self) -> &'static str {
        match self {
            IntegrationType::Internal => "internal",
            IntegrationType::External => "external",
            IntegrationType::ThirdParty => "third_party",
        }
    }
}

impl FromStr for IntegrationType {
    type Err = ManagerError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "internal" => Ok(IntegrationType::Internal),
            "external" => Ok(IntegrationType::External),
            "third_party" => Ok(IntegrationType::ThirdParty),
            other => Err(ManagerError::invalid_input(format!(
                "unknown integration type '{}'",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum IntegrationStatus {
    Active,
    Inactive,
    Error,
}

impl IntegrationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            IntegrationStatus::Active => "active",
            IntegrationStatus::Inactive => "inactive",
            IntegrationStatus::Error => "error",
        }
    }
}

impl FromStr for IntegrationStatus {
    type Err = ManagerError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "active" => Ok(IntegrationStatus::Active),
            "inactive" => Ok(IntegrationStatus::Inactive),
            "error" => Ok(IntegrationStatus::Error),
            other => Err(ManagerError::invalid_input(format!(
                "unknown integration status '{}'",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum SyncJobType {
    Import,
    Export,
    Sync,
    Backup,
}

impl SyncJobType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncJobType::Import => "import",
            SyncJobType::Export => "export",
            SyncJobType::Sync => "sync",
            SyncJobType::Backup => "backup",
        }
    }
}

impl FromStr for SyncJobType {
    type Err = ManagerError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "import" => Ok(SyncJobType::Import),
            "export" => Ok(SyncJobType::Export),
            "sync" => Ok(SyncJobType::Sync),
            "backup" => Ok(SyncJobType::Backup),
            other => Err(ManagerError::invalid_input(format!(
                "unknown sync job type '{}'",
                other
            ))),
        }
    }
}

/// Sync job lifecycle: `pending -> running -> completed | failed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum SyncJobStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

impl SyncJobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncJobStatus::Pending => "pending",
            SyncJobStatus::Running => "running",
            SyncJobStatus::Completed => "completed",
            SyncJobStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, SyncJobStatus::Completed | SyncJobStatus::Failed)
    }
}

impl FromStr for SyncJobStatus {
    type Err = ManagerError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "pending" => Ok(SyncJobStatus::Pending),
            "running" => Ok(SyncJobStatus::Running),
            "completed" => Ok(SyncJobStatus::Completed),
            "failed" => Ok(SyncJobStatus::Failed),
            other => Err(ManagerError::invalid_input(format!(
                "unknown sync job status '{}'",
                other
            ))),
        }
    }
}

macro_rules! display_as_str {
    ($($ty:ty),+) => {
        $(impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        })+
    };
}

display_as_str!(IntegrationType, IntegrationStatus, SyncJobType, SyncJobStatus);

/// A registered integration as returned to callers. The API key itself never
/// leaves the store; only its presence is reported.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct SystemIntegration {
    pub id: Uuid,
    pub name: String,
    #[serde(rename = "type")]
    pub integration_type: IntegrationType,
    pub status: IntegrationStatus,
    pub endpoint: Option<String>,
    pub has_api_key: bool,
    #[schema(value_type = Object)]
    pub configuration: serde_json::Value,
    pub last_sync: Option<DateTime<Utc>>,
    pub error_count: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TryFrom<system_integration::Model> for SystemIntegration {
    type Error = ManagerError;

    fn try_from(model: system_integration::Model) -> Result<Self, Self::Error> {
        Ok(Self {
            id: model.id,
            integration_type: model.integration_type.parse()?,
            status: model.status.parse()?,
            name: model.name,
            endpoint: model.endpoint,
            has_api_key: model.api_key_ciphertext.is_some(),
            configuration: model.configuration,
            last_sync: model.last_sync.map(|dt| dt.with_timezone(&Utc)),
            error_count: model.error_count,
            created_at: model.created_at.with_timezone(&Utc),
            updated_at: model.updated_at.with_timezone(&Utc),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct DataSyncJob {
    pub id: Uuid,
    pub integration_id: Uuid,
    pub job_type: SyncJobType,
    pub status: SyncJobStatus,
    pub progress_percentage: i32,
    pub records_processed: i64,
    pub total_records: i64,
    pub error_message: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl TryFrom<data_sync_job::Model> for DataSyncJob {
    type Error = ManagerError;

    fn try_from(model: data_sync_job::Model) -> Result<Self, Self::Error> {
        Ok(Self {
            id: model.id,
            integration_id: model.integration_id,
            job_type: model.job_type.parse()?,
            status: model.status.parse()?,
            progress_percentage: model.progress_percentage,
            records_processed: model.records_processed,
            total_records: model.total_records,
            error_message: model.error_message,
            started_at: model.started_at.map(|dt| dt.with_timezone(&Utc)),
            completed_at: model.completed_at.map(|dt| dt.with_timezone(&Utc)),
            created_at: model.created_at.with_timezone(&Utc),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_enum_string_forms_match_serde() {
        for status in [
            SyncJobStatus::Pending,
            SyncJobStatus::Running,
            SyncJobStatus::Completed,
            SyncJobStatus::Failed,
        ] {
            let serialized = serde_json::to_value(status).unwrap();
            assert_eq!(serialized, json!(status.as_str()));
            assert_eq!(status.as_str().parse::<SyncJobStatus>().unwrap(), status);
        }

        assert_eq!(
            serde_json::to_value(IntegrationType::ThirdParty).unwrap(),
            json!("third_party")
        );
    }

    #[test]
    fn test_unknown_values_rejected() {
        assert!("queued".parse::<SyncJobStatus>().is_err());
        assert!("saas".parse::<IntegrationType>().is_err());
        assert!("paused".parse::<IntegrationStatus>().is_err());
        assert!("restore".parse::<SyncJobType>().is_err());
    }

    #[test]
    fn test_terminal_states() {
        assert!(!SyncJobStatus::Pending.is_terminal());
        assert!(!SyncJobStatus::Running.is_terminal());
        assert!(SyncJobStatus::Completed.is_terminal());
        assert!(SyncJobStatus::Failed.is_terminal());
    }

    #[test]
    fn test_integration_view_hides_api_key() {
        let now = Utc::now().fixed_offset();
        let model = system_integration::Model {
            id: Uuid::new_v4(),
            name: "Prayer Times API".to_string(),
            integration_type: "external".to_string(),
            status: "active".to_string(),
            endpoint: Some("https://example.org/times".to_string()),
            api_key_ciphertext: Some(vec![1, 2, 3]),
            configuration: json!({"region": "eu"}),
            last_sync: None,
            error_count: 0,
            created_at: now,
            updated_at: now,
        };

        let view = SystemIntegration::try_from(model).unwrap();
        assert!(view.has_api_key);

        let serialized = serde_json::to_value(&view).unwrap();
        assert_eq!(serialized["type"], json!("external"));
        assert!(serialized.get("api_key_ciphertext").is_none());
    }
}
