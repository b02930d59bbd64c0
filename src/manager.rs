//! # Integration Manager
//!
//! In-process API of the integration layer: service health, integration and
//! sync job bookkeeping, maintenance runs, and bulk operations. All
//! dependencies are handed in at construction; the builder fills in the
//! store-backed defaults for anything not supplied.

use std::sync::Arc;

use sea_orm::DatabaseConnection;
use serde::{Deserialize, Serialize};
use serde_json::{Value as JsonValue, json};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::analytics::{self, EventTracker, StoreEventTracker};
use crate::bulk::{
    BulkOperationDispatcher, BulkOperationRequest, BulkOperationResult, SimulatedTableOperator,
    TableOperator,
};
use crate::config::AppConfig;
use crate::crypto::{self, CryptoKey};
use crate::error::ManagerError;
use crate::health::{HealthAggregator, ServiceStatus, SystemHealthDashboard};
use crate::maintenance::{MaintenanceCollaborators, MaintenanceReport, MaintenanceRunner};
use crate::models::{
    DataSyncJob, IntegrationStatus, IntegrationType, SyncJobStatus, SyncJobType,
    SystemIntegration,
};
use crate::repositories::{
    AnalyticsEventRepository, IntegrationChanges, IntegrationRepository, NewIntegrationRecord,
    SyncJobFilter, SyncJobRepository,
};
use crate::services::ServiceRegistry;
use crate::sync_worker::SyncQueue;

/// Number of sync jobs shown on the health dashboard
pub const DASHBOARD_RECENT_SYNC_JOBS: u64 = 10;

/// Registration request for a new integration
#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct NewIntegration {
    pub name: String,
    #[serde(rename = "type")]
    pub integration_type: IntegrationType,
    #[serde(default)]
    pub endpoint: Option<String>,
    /// Stored encrypted; never returned
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default)]
    #[schema(value_type = Object)]
    pub configuration: Option<JsonValue>,
}

/// Partial update of an integration; absent fields are left unchanged
#[derive(Debug, Clone, Default, Deserialize, ToSchema)]
pub struct IntegrationUpdate {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default, rename = "type")]
    pub integration_type: Option<IntegrationType>,
    #[serde(default)]
    pub status: Option<IntegrationStatus>,
    #[serde(default)]
    pub endpoint: Option<String>,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default)]
    #[schema(value_type = Option<Object>)]
    pub configuration: Option<JsonValue>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct NewSyncJob {
    pub integration_id: Uuid,
    pub job_type: SyncJobType,
    #[serde(default)]
    pub total_records: Option<i64>,
}

pub struct IntegrationManager {
    integrations: IntegrationRepository,
    jobs: SyncJobRepository,
    health: HealthAggregator,
    maintenance: MaintenanceRunner,
    bulk: BulkOperationDispatcher,
    queue: SyncQueue,
    tracker: Arc<dyn EventTracker>,
    crypto_key: Option<CryptoKey>,
}

impl IntegrationManager {
    pub fn builder(db: DatabaseConnection, config: &AppConfig) -> IntegrationManagerBuilder<'_> {
        IntegrationManagerBuilder {
            db,
            config,
            registry: None,
            tracker: None,
            collaborators: None,
            table_operator: None,
        }
    }

    pub fn registry(&self) -> &Arc<ServiceRegistry> {
        self.health.registry()
    }

    /// Probe every registered service; one status per service, in registry order
    pub async fn check_all_services(&self) -> Vec<ServiceStatus> {
        self.health.check_all_services().await
    }

    pub async fn system_health_dashboard(&self) -> Result<SystemHealthDashboard, ManagerError> {
        let api_services = self.health.check_all_services().await;
        let integrations = self.list_integrations().await?;
        let recent_sync_jobs = self
            .list_sync_jobs(SyncJobFilter {
                limit: Some(DASHBOARD_RECENT_SYNC_JOBS),
                ..Default::default()
            })
            .await?;
        let running = self.jobs.count_by_status(SyncJobStatus::Running).await?;
        let pending = self.jobs.count_by_status(SyncJobStatus::Pending).await?;

        Ok(SystemHealthDashboard::assemble(
            api_services,
            integrations,
            recent_sync_jobs,
            running,
            pending,
        ))
    }

    /// All integrations, alphabetical by name
    pub async fn list_integrations(&self) -> Result<Vec<SystemIntegration>, ManagerError> {
        self.integrations
            .list_by_name()
            .await?
            .into_iter()
            .map(SystemIntegration::try_from)
            .collect()
    }

    pub async fn get_integration(&self, id: Uuid) -> Result<SystemIntegration, ManagerError> {
        let model = self
            .integrations
            .find(id)
            .await?
            .ok_or_else(|| ManagerError::not_found("integration", id))?;
        SystemIntegration::try_from(model)
    }

    /// Register an integration as `active` with no errors recorded
    pub async fn create_integration(
        &self,
        request: NewIntegration,
    ) -> Result<SystemIntegration, ManagerError> {
        let name = validate_name(&request.name)?;
        if let Some(endpoint) = &request.endpoint {
            validate_endpoint(endpoint)?;
        }
        let configuration = validate_configuration(request.configuration)?;

        let id = Uuid::new_v4();
        let api_key_ciphertext = match request.api_key.as_deref() {
            Some(api_key) => Some(self.encrypt_api_key(id, api_key)?),
            None => None,
        };

        let model = self
            .integrations
            .insert(NewIntegrationRecord {
                id,
                name,
                integration_type: request.integration_type,
                endpoint: request.endpoint,
                api_key_ciphertext,
                configuration,
            })
            .await?;
        let integration = SystemIntegration::try_from(model)?;

        analytics::track_best_effort(
            &self.tracker,
            analytics::EVENT_INTEGRATION_CREATED,
            analytics::CATEGORY_INTEGRATION,
            json!({
                "integration_id": integration.id,
                "type": integration.integration_type.as_str(),
            }),
        );

        Ok(integration)
    }

    /// Merge the given fields into the integration. Last writer wins.
    pub async fn update_integration(
        &self,
        id: Uuid,
        update: IntegrationUpdate,
    ) -> Result<SystemIntegration, ManagerError> {
        let name = update.name.as_deref().map(validate_name).transpose()?;
        if let Some(endpoint) = &update.endpoint {
            validate_endpoint(endpoint)?;
        }
        let configuration = match update.configuration {
            Some(value) => Some(validate_configuration(Some(value))?),
            None => None,
        };
        let api_key_ciphertext = match update.api_key.as_deref() {
            Some(api_key) => Some(self.encrypt_api_key(id, api_key)?),
            None => None,
        };

        let model = self
            .integrations
            .update(
                id,
                IntegrationChanges {
                    name,
                    integration_type: update.integration_type,
                    status: update.status,
                    endpoint: update.endpoint,
                    api_key_ciphertext,
                    configuration,
                },
            )
            .await?;

        tracing::info!(integration_id = %id, "Integration updated");
        SystemIntegration::try_from(model)
    }

    /// Insert a `pending` job and hand it to the sync worker. Returns as soon as
    /// the job is queued; progress is observed through [`Self::get_sync_job`].
    pub async fn create_sync_job(&self, request: NewSyncJob) -> Result<DataSyncJob, ManagerError> {
        let total_records = request.total_records.unwrap_or(0);
        if total_records < 0 {
            return Err(ManagerError::invalid_input(
                "total_records must not be negative",
            ));
        }

        if self.integrations.find(request.integration_id).await?.is_none() {
            return Err(ManagerError::not_found(
                "integration",
                request.integration_id,
            ));
        }

        let model = self
            .jobs
            .insert_pending(request.integration_id, request.job_type, total_records)
            .await?;
        let job = DataSyncJob::try_from(model)?;

        self.queue.enqueue(job.id);

        analytics::track_best_effort(
            &self.tracker,
            analytics::EVENT_SYNC_JOB_CREATED,
            analytics::CATEGORY_INTEGRATION,
            json!({
                "job_id": job.id,
                "integration_id": job.integration_id,
                "job_type": job.job_type.as_str(),
                "total_records": job.total_records,
            }),
        );

        Ok(job)
    }

    pub async fn get_sync_job(&self, id: Uuid) -> Result<DataSyncJob, ManagerError> {
        let model = self
            .jobs
            .find(id)
            .await?
            .ok_or_else(|| ManagerError::not_found("sync job", id))?;
        DataSyncJob::try_from(model)
    }

    /// Filtered sync jobs, newest first
    pub async fn list_sync_jobs(
        &self,
        filter: SyncJobFilter,
    ) -> Result<Vec<DataSyncJob>, ManagerError> {
        self.jobs
            .list(filter)
            .await?
            .into_iter()
            .map(DataSyncJob::try_from)
            .collect()
    }

    pub async fn run_maintenance_tasks(&self) -> MaintenanceReport {
        self.maintenance.run().await
    }

    pub async fn execute_bulk_operation(
        &self,
        request: BulkOperationRequest,
    ) -> Result<BulkOperationResult, ManagerError> {
        self.bulk.execute(request).await
    }

    fn encrypt_api_key(&self, id: Uuid, api_key: &str) -> Result<Vec<u8>, ManagerError> {
        let key = self.crypto_key.as_ref().ok_or_else(|| {
            ManagerError::invalid_input("API keys cannot be stored: no crypto key is configured")
        })?;
        Ok(crypto::encrypt_api_key(key, id, api_key)?)
    }
}

pub struct IntegrationManagerBuilder<'a> {
    db: DatabaseConnection,
    config: &'a AppConfig,
    registry: Option<ServiceRegistry>,
    tracker: Option<Arc<dyn EventTracker>>,
    collaborators: Option<MaintenanceCollaborators>,
    table_operator: Option<Arc<dyn TableOperator>>,
}

impl IntegrationManagerBuilder<'_> {
    pub fn registry(mut self, registry: ServiceRegistry) -> Self {
        self.registry = Some(registry);
        self
    }

    pub fn tracker(mut self, tracker: Arc<dyn EventTracker>) -> Self {
        self.tracker = Some(tracker);
        self
    }

    pub fn maintenance_collaborators(mut self, collaborators: MaintenanceCollaborators) -> Self {
        self.collaborators = Some(collaborators);
        self
    }

    pub fn table_operator(mut self, operator: Arc<dyn TableOperator>) -> Self {
        self.table_operator = Some(operator);
        self
    }

    pub fn build(self, queue: SyncQueue) -> Result<IntegrationManager, ManagerError> {
        let config = self.config;
        let integrations = IntegrationRepository::new(self.db.clone());
        let jobs = SyncJobRepository::new(self.db.clone());

        let registry = match self.registry {
            Some(registry) => registry,
            None => {
                ServiceRegistry::with_store_probes(self.db.clone(), &config.health.probe_tables)
                    .map_err(|e| ManagerError::invalid_input(e.to_string()))?
            }
        };

        let tracker = self.tracker.unwrap_or_else(|| {
            Arc::new(StoreEventTracker::new(AnalyticsEventRepository::new(
                self.db.clone(),
            )))
        });

        let collaborators = match self.collaborators {
            Some(collaborators) => collaborators,
            None => MaintenanceCollaborators::from_config(
                &config.maintenance,
                integrations.clone(),
                jobs.clone(),
            )?,
        };

        let operator = self
            .table_operator
            .unwrap_or_else(|| Arc::new(SimulatedTableOperator));

        let crypto_key = config.crypto_key.clone().map(CryptoKey::new).transpose()?;

        Ok(IntegrationManager {
            health: HealthAggregator::new(Arc::new(registry), &config.health),
            maintenance: MaintenanceRunner::new(
                integrations.clone(),
                jobs.clone(),
                collaborators,
                Arc::clone(&tracker),
                crypto_key.clone(),
                config.maintenance.sync_job_retention_days,
            ),
            bulk: BulkOperationDispatcher::new(
                operator,
                Arc::clone(&tracker),
                config.export_base_url.clone(),
            ),
            integrations,
            jobs,
            queue,
            tracker,
            crypto_key,
        })
    }
}

fn validate_name(name: &str) -> Result<String, ManagerError> {
    let trimmed = name.trim();
    if trimmed.is_empty() {
        return Err(ManagerError::invalid_input("name must not be empty"));
    }
    if trimmed.len() > 255 {
        return Err(ManagerError::invalid_input(
            "name must be at most 255 characters",
        ));
    }
    Ok(trimmed.to_string())
}

fn validate_endpoint(endpoint: &str) -> Result<(), ManagerError> {
    let url = url::Url::parse(endpoint).map_err(|e| {
        ManagerError::invalid_input(format!("invalid endpoint '{}': {}", endpoint, e))
    })?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(ManagerError::invalid_input(format!(
            "endpoint must use http or https, got '{}'",
            url.scheme()
        )));
    }
    Ok(())
}

/// Configuration is an opaque key-value map; a missing one becomes `{}`.
fn validate_configuration(value: Option<JsonValue>) -> Result<JsonValue, ManagerError> {
    match value {
        None | Some(JsonValue::Null) => Ok(json!({})),
        Some(JsonValue::Object(map)) => Ok(JsonValue::Object(map)),
        Some(_) => Err(ManagerError::invalid_input(
            "configuration must be a JSON object",
        )),
    }
}
