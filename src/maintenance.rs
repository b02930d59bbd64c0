//! # Maintenance Tasks
//!
//! Five upkeep tasks run in a fixed order. Every task runs even when an earlier
//! one fails; the report lists which tasks completed and which failed. Effects
//! of a task that fails halfway are not rolled back.
//!
//! The tasks that reach outside the record store go through collaborator
//! traits so they can be replaced in tests and deployments:
//! [`IntegrationHealthCheck`], [`ScheduledProcessor`] and [`MetricsRecorder`].

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::Utc;
use metrics::{counter, gauge, histogram};
use serde::{Deserialize, Serialize};
use serde_json::json;
use utoipa::ToSchema;
use uuid::Uuid;
use zeroize::Zeroizing;

use crate::analytics::{self, EventTracker};
use crate::config::MaintenanceConfig;
use crate::crypto::{self, CryptoKey};
use crate::error::ManagerError;
use crate::models::{IntegrationStatus, SyncJobStatus, SystemIntegration};
use crate::repositories::{IntegrationRepository, SyncJobRepository};

pub const TASK_CLEANUP_OLD_SYNC_JOBS: &str = "cleanup_old_sync_jobs";
pub const TASK_UPDATE_INTEGRATION_HEALTH: &str = "update_integration_health";
pub const TASK_PROCESS_SCHEDULED_REMINDERS: &str = "process_scheduled_reminders";
pub const TASK_PROCESS_SCHEDULED_REPORTS: &str = "process_scheduled_reports";
pub const TASK_RECORD_SYSTEM_METRICS: &str = "record_system_metrics";

/// Task IDs in execution order
pub const MAINTENANCE_TASKS: [&str; 5] = [
    TASK_CLEANUP_OLD_SYNC_JOBS,
    TASK_UPDATE_INTEGRATION_HEALTH,
    TASK_PROCESS_SCHEDULED_REMINDERS,
    TASK_PROCESS_SCHEDULED_REPORTS,
    TASK_RECORD_SYSTEM_METRICS,
];

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct MaintenanceReport {
    pub tasks_completed: Vec<String>,
    pub tasks_failed: Vec<String>,
    pub total_duration_ms: u64,
}

/// Decides whether an integration is reachable
#[async_trait]
pub trait IntegrationHealthCheck: Send + Sync {
    /// `api_key` is the integration's decrypted key, if it has one.
    async fn check(
        &self,
        integration: &SystemIntegration,
        api_key: Option<&str>,
    ) -> IntegrationStatus;
}

/// Checks an integration by requesting its endpoint.
///
/// Success and redirect responses count as `active`; any other status, a
/// timeout, or a connection error counts as `error`. Integrations without an
/// endpoint have nothing to check and are reported `active`. The API key, when
/// present, is sent as a bearer token.
#[derive(Debug, Clone)]
pub struct HttpIntegrationHealthCheck {
    client: reqwest::Client,
}

impl HttpIntegrationHealthCheck {
    pub fn new(timeout: Duration) -> Result<Self, ManagerError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("portal-integrations/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| ManagerError::collaborator("integration health check", e))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl IntegrationHealthCheck for HttpIntegrationHealthCheck {
    async fn check(
        &self,
        integration: &SystemIntegration,
        api_key: Option<&str>,
    ) -> IntegrationStatus {
        let Some(endpoint) = integration.endpoint.as_deref() else {
            return IntegrationStatus::Active;
        };

        let mut request = self.client.get(endpoint);
        if let Some(api_key) = api_key {
            request = request.bearer_auth(api_key);
        }

        match request.send().await {
            Ok(response)
                if response.status().is_success() || response.status().is_redirection() =>
            {
                IntegrationStatus::Active
            }
            Ok(response) => {
                tracing::warn!(
                    integration_id = %integration.id,
                    status = response.status().as_u16(),
                    "Integration endpoint returned an error status"
                );
                IntegrationStatus::Error
            }
            Err(e) => {
                tracing::warn!(
                    integration_id = %integration.id,
                    error = %e,
                    "Integration endpoint unreachable"
                );
                IntegrationStatus::Error
            }
        }
    }
}

/// A downstream batch processor triggered once per maintenance run
#[async_trait]
pub trait ScheduledProcessor: Send + Sync {
    async fn process(&self) -> Result<(), ManagerError>;
}

/// Triggers a processor by POSTing to its URL; any non-2xx response fails.
#[derive(Debug, Clone)]
pub struct HttpTrigger {
    name: String,
    url: String,
    client: reqwest::Client,
}

impl HttpTrigger {
    pub fn new(
        name: impl Into<String>,
        url: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, ManagerError> {
        let name = name.into();
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ManagerError::collaborator(name.clone(), e))?;
        Ok(Self {
            name,
            url: url.into(),
            client,
        })
    }
}

#[async_trait]
impl ScheduledProcessor for HttpTrigger {
    async fn process(&self) -> Result<(), ManagerError> {
        let response = self
            .client
            .post(&self.url)
            .header("Accept", "application/json")
            .send()
            .await
            .map_err(|e| ManagerError::collaborator(self.name.clone(), e))?;

        if response.status().is_success() {
            Ok(())
        } else {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            Err(ManagerError::collaborator(
                self.name.clone(),
                format!("trigger returned {}: {}", status, body),
            ))
        }
    }
}

/// Stand-in for a processor with no configured URL; succeeds without doing anything.
#[derive(Debug, Clone)]
pub struct DisabledProcessor {
    name: &'static str,
}

impl DisabledProcessor {
    pub fn new(name: &'static str) -> Self {
        Self { name }
    }
}

#[async_trait]
impl ScheduledProcessor for DisabledProcessor {
    async fn process(&self) -> Result<(), ManagerError> {
        tracing::debug!(processor = self.name, "Processor not configured; nothing to trigger");
        Ok(())
    }
}

#[async_trait]
pub trait MetricsRecorder: Send + Sync {
    async fn record(&self) -> Result<(), ManagerError>;
}

/// Publishes integration and sync job counts as gauges
#[derive(Debug, Clone)]
pub struct StoreMetricsRecorder {
    integrations: IntegrationRepository,
    jobs: SyncJobRepository,
}

impl StoreMetricsRecorder {
    pub fn new(integrations: IntegrationRepository, jobs: SyncJobRepository) -> Self {
        Self { integrations, jobs }
    }
}

#[async_trait]
impl MetricsRecorder for StoreMetricsRecorder {
    async fn record(&self) -> Result<(), ManagerError> {
        for status in [
            IntegrationStatus::Active,
            IntegrationStatus::Inactive,
            IntegrationStatus::Error,
        ] {
            let count = self.integrations.list_by_status(status).await?.len();
            gauge!("integrations", "status" => status.as_str()).set(count as f64);
        }

        for status in [
            SyncJobStatus::Pending,
            SyncJobStatus::Running,
            SyncJobStatus::Completed,
            SyncJobStatus::Failed,
        ] {
            let count = self.jobs.count_by_status(status).await?;
            gauge!("sync_jobs", "status" => status.as_str()).set(count as f64);
        }

        Ok(())
    }
}

/// External collaborators of the maintenance runner
#[derive(Clone)]
pub struct MaintenanceCollaborators {
    pub health_check: Arc<dyn IntegrationHealthCheck>,
    pub reminders: Arc<dyn ScheduledProcessor>,
    pub reports: Arc<dyn ScheduledProcessor>,
    pub metrics: Arc<dyn MetricsRecorder>,
}

impl MaintenanceCollaborators {
    /// HTTP-backed collaborators; a processor without a URL is disabled.
    pub fn from_config(
        config: &MaintenanceConfig,
        integrations: IntegrationRepository,
        jobs: SyncJobRepository,
    ) -> Result<Self, ManagerError> {
        let timeout = Duration::from_millis(config.integration_check_timeout_ms);

        Ok(Self {
            health_check: Arc::new(HttpIntegrationHealthCheck::new(timeout)?),
            reminders: scheduled_processor(
                "reminders",
                config.reminders_url.as_deref(),
                timeout,
            )?,
            reports: scheduled_processor("reports", config.reports_url.as_deref(), timeout)?,
            metrics: Arc::new(StoreMetricsRecorder::new(integrations, jobs)),
        })
    }
}

fn scheduled_processor(
    name: &'static str,
    url: Option<&str>,
    timeout: Duration,
) -> Result<Arc<dyn ScheduledProcessor>, ManagerError> {
    let processor: Arc<dyn ScheduledProcessor> = match url {
        Some(url) => Arc::new(HttpTrigger::new(name, url, timeout)?),
        None => Arc::new(DisabledProcessor::new(name)),
    };
    Ok(processor)
}

pub struct MaintenanceRunner {
    integrations: IntegrationRepository,
    jobs: SyncJobRepository,
    collaborators: MaintenanceCollaborators,
    tracker: Arc<dyn EventTracker>,
    crypto_key: Option<CryptoKey>,
    retention: chrono::Duration,
}

impl MaintenanceRunner {
    pub fn new(
        integrations: IntegrationRepository,
        jobs: SyncJobRepository,
        collaborators: MaintenanceCollaborators,
        tracker: Arc<dyn EventTracker>,
        crypto_key: Option<CryptoKey>,
        retention_days: u32,
    ) -> Self {
        Self {
            integrations,
            jobs,
            collaborators,
            tracker,
            crypto_key,
            retention: chrono::Duration::days(i64::from(retention_days)),
        }
    }

    /// Run all tasks in order and report the outcome of each.
    pub async fn run(&self) -> MaintenanceReport {
        let started = Instant::now();
        let mut report = MaintenanceReport {
            tasks_completed: Vec::new(),
            tasks_failed: Vec::new(),
            total_duration_ms: 0,
        };

        for task in MAINTENANCE_TASKS {
            let task_started = Instant::now();
            match self.run_task(task).await {
                Ok(()) => {
                    tracing::debug!(
                        task,
                        elapsed = ?task_started.elapsed(),
                        "Maintenance task completed"
                    );
                    counter!("maintenance_tasks_total", "task" => task, "outcome" => "completed")
                        .increment(1);
                    report.tasks_completed.push(task.to_string());
                }
                Err(e) => {
                    tracing::warn!(task, error = %e, "Maintenance task failed");
                    counter!("maintenance_tasks_total", "task" => task, "outcome" => "failed")
                        .increment(1);
                    report.tasks_failed.push(task.to_string());
                }
            }
        }

        report.total_duration_ms =
            u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
        histogram!("maintenance_run_duration_ms").record(report.total_duration_ms as f64);

        tracing::info!(
            completed = report.tasks_completed.len(),
            failed = report.tasks_failed.len(),
            total_duration_ms = report.total_duration_ms,
            "Maintenance run finished"
        );

        analytics::track_best_effort(
            &self.tracker,
            analytics::EVENT_MAINTENANCE_COMPLETED,
            analytics::CATEGORY_SYSTEM,
            json!({
                "tasks_completed": report.tasks_completed.len(),
                "tasks_failed": report.tasks_failed.len(),
                "total_duration_ms": report.total_duration_ms,
            }),
        );

        report
    }

    async fn run_task(&self, task: &str) -> Result<(), ManagerError> {
        match task {
            TASK_CLEANUP_OLD_SYNC_JOBS => self.cleanup_old_sync_jobs().await,
            TASK_UPDATE_INTEGRATION_HEALTH => self.update_integration_health().await,
            TASK_PROCESS_SCHEDULED_REMINDERS => self.collaborators.reminders.process().await,
            TASK_PROCESS_SCHEDULED_REPORTS => self.collaborators.reports.process().await,
            TASK_RECORD_SYSTEM_METRICS => self.collaborators.metrics.record().await,
            other => Err(ManagerError::invalid_input(format!(
                "unknown maintenance task '{}'",
                other
            ))),
        }
    }

    async fn cleanup_old_sync_jobs(&self) -> Result<(), ManagerError> {
        let cutoff = Utc::now() - self.retention;
        let purged = self.jobs.purge_completed_before(cutoff).await?;
        tracing::info!(purged, %cutoff, "Purged completed sync jobs");
        Ok(())
    }

    /// Re-check every integration not switched off by an operator.
    async fn update_integration_health(&self) -> Result<(), ManagerError> {
        let integrations = self.integrations.list_by_name().await?;

        for model in integrations {
            let ciphertext = model.api_key_ciphertext.clone();
            let integration = SystemIntegration::try_from(model)?;
            if integration.status == IntegrationStatus::Inactive {
                continue;
            }

            let status = match self.api_key(integration.id, ciphertext.as_deref()) {
                Ok(api_key) => {
                    self.collaborators
                        .health_check
                        .check(&integration, api_key.as_deref().map(String::as_str))
                        .await
                }
                Err(e) => {
                    tracing::warn!(
                        integration_id = %integration.id,
                        error = %e,
                        "Stored API key unusable"
                    );
                    IntegrationStatus::Error
                }
            };
            self.integrations
                .record_health_result(integration.id, status, Utc::now())
                .await?;

            if status != integration.status {
                tracing::info!(
                    integration_id = %integration.id,
                    from = %integration.status,
                    to = %status,
                    "Integration health changed"
                );
            }
        }

        Ok(())
    }

    fn api_key(
        &self,
        integration_id: Uuid,
        ciphertext: Option<&[u8]>,
    ) -> Result<Option<Zeroizing<String>>, ManagerError> {
        let Some(ciphertext) = ciphertext else {
            return Ok(None);
        };
        let key = self.crypto_key.as_ref().ok_or_else(|| {
            ManagerError::invalid_input("integration has an API key but no crypto key is configured")
        })?;
        let api_key = crypto::decrypt_api_key(key, integration_id, ciphertext)?;
        Ok(Some(Zeroizing::new(api_key)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_task_order() {
        assert_eq!(
            MAINTENANCE_TASKS,
            [
                "cleanup_old_sync_jobs",
                "update_integration_health",
                "process_scheduled_reminders",
                "process_scheduled_reports",
                "record_system_metrics",
            ]
        );
    }

    #[tokio::test]
    async fn test_disabled_processor_succeeds() {
        assert!(DisabledProcessor::new("reports").process().await.is_ok());
    }

    #[tokio::test]
    async fn test_endpointless_integration_is_active() {
        let check = HttpIntegrationHealthCheck::new(Duration::from_millis(100)).unwrap();
        let now = Utc::now();
        let integration = SystemIntegration {
            id: Uuid::new_v4(),
            name: "Hijri Calendar".to_string(),
            integration_type: crate::models::IntegrationType::Internal,
            status: IntegrationStatus::Error,
            endpoint: None,
            has_api_key: false,
            configuration: json!({}),
            last_sync: None,
            error_count: 2,
            created_at: now,
            updated_at: now,
        };

        assert_eq!(
            check.check(&integration, None).await,
            IntegrationStatus::Active
        );
    }
}
