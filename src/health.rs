//! # Service Health Aggregation
//!
//! Fans a probe out to every registered service, collects the results in
//! registry order, and rolls them up into the overall status shown on the
//! health dashboard.
//!
//! Each probe runs in its own tokio task, so an error or a panic in one probe
//! is reported as an `outage` for that service and never reaches the others.
//! A semaphore caps how many probes run at once.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use metrics::{counter, histogram};
use serde::{Deserialize, Serialize};
use tokio::sync::Semaphore;
use utoipa::ToSchema;

use crate::config::HealthConfig;
use crate::models::{DataSyncJob, IntegrationStatus, SystemIntegration};
use crate::services::{RegisteredService, ServiceRegistry};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum ServiceState {
    Operational,
    Degraded,
    Outage,
}

/// Result of probing one service. Computed on demand, never stored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct ServiceStatus {
    pub name: String,
    pub status: ServiceState,
    pub last_checked: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response_time_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

impl ServiceStatus {
    fn new(name: String, status: ServiceState, elapsed: Duration, error: Option<String>) -> Self {
        Self {
            name,
            status,
            last_checked: Utc::now(),
            response_time_ms: Some(u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX)),
            error_message: error,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum OverallStatus {
    Healthy,
    Degraded,
    Critical,
}

impl OverallStatus {
    /// `critical` if any service is in outage, else `degraded` if any is
    /// degraded, else `healthy`.
    pub fn from_statuses(statuses: &[ServiceStatus]) -> Self {
        if statuses.iter().any(|s| s.status == ServiceState::Outage) {
            OverallStatus::Critical
        } else if statuses.iter().any(|s| s.status == ServiceState::Degraded) {
            OverallStatus::Degraded
        } else {
            OverallStatus::Healthy
        }
    }
}

/// Probes every service in a [`ServiceRegistry`].
#[derive(Debug, Clone)]
pub struct HealthAggregator {
    registry: Arc<ServiceRegistry>,
    probe_concurrency: usize,
    slow_probe: Option<Duration>,
}

impl HealthAggregator {
    pub fn new(registry: Arc<ServiceRegistry>, config: &HealthConfig) -> Self {
        Self {
            registry,
            probe_concurrency: config.probe_concurrency.max(1),
            slow_probe: config.slow_probe_ms.map(Duration::from_millis),
        }
    }

    pub fn registry(&self) -> &Arc<ServiceRegistry> {
        &self.registry
    }

    /// Probe all registered services concurrently.
    ///
    /// The result has one entry per registered service, in registry order,
    /// whatever order the probes finish in. No timeout is applied: a probe
    /// that never returns holds up the whole report.
    pub async fn check_all_services(&self) -> Vec<ServiceStatus> {
        let semaphore = Arc::new(Semaphore::new(self.probe_concurrency));

        let handles: Vec<_> = self
            .registry
            .iter()
            .map(|(name, service)| {
                let name = name.to_string();
                let service = Arc::clone(service);
                let semaphore = Arc::clone(&semaphore);
                let slow_probe = self.slow_probe;
                let spawned_at = Instant::now();

                let handle = tokio::spawn(async move {
                    let _permit = semaphore.acquire_owned().await.ok();
                    run_probe(name, service, slow_probe).await
                });
                (spawned_at, handle)
            })
            .collect();

        let mut statuses = Vec::with_capacity(handles.len());
        for ((name, _), (spawned_at, handle)) in self.registry.iter().zip(handles) {
            let status = match handle.await {
                Ok(status) => status,
                Err(join_error) => {
                    let message = if join_error.is_panic() {
                        "probe panicked".to_string()
                    } else {
                        join_error.to_string()
                    };
                    tracing::warn!(service = name, error = %message, "Health probe aborted");
                    counter!("health_probe_failures_total", "service" => name.to_string())
                        .increment(1);
                    ServiceStatus::new(
                        name.to_string(),
                        ServiceState::Outage,
                        spawned_at.elapsed(),
                        Some(message),
                    )
                }
            };
            statuses.push(status);
        }

        statuses
    }
}

async fn run_probe(
    name: String,
    service: Arc<dyn RegisteredService>,
    slow_probe: Option<Duration>,
) -> ServiceStatus {
    let started = Instant::now();
    let result = service.probe().await;
    let elapsed = started.elapsed();

    histogram!("health_probe_duration_ms", "service" => name.clone())
        .record(elapsed.as_secs_f64() * 1000.0);

    match result {
        Ok(()) => {
            let state = match slow_probe {
                Some(threshold) if elapsed > threshold => {
                    tracing::info!(service = %name, ?elapsed, "Health probe slow");
                    ServiceState::Degraded
                }
                _ => ServiceState::Operational,
            };
            ServiceStatus::new(name, state, elapsed, None)
        }
        Err(error) => {
            tracing::warn!(service = %name, error = %error, ?elapsed, "Health probe failed");
            counter!("health_probe_failures_total", "service" => name.clone()).increment(1);
            ServiceStatus::new(name, ServiceState::Outage, elapsed, Some(error.to_string()))
        }
    }
}

/// Counters shown alongside the probe results on the dashboard
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct SystemMetrics {
    pub total_services: usize,
    pub operational_services: usize,
    pub degraded_services: usize,
    pub outage_services: usize,
    pub average_response_time_ms: f64,
    /// Share of services in outage, 0.0 to 1.0
    pub error_rate: f64,
    pub active_integrations: usize,
    pub running_sync_jobs: u64,
    pub pending_sync_jobs: u64,
}

impl SystemMetrics {
    pub fn compute(
        statuses: &[ServiceStatus],
        integrations: &[SystemIntegration],
        running_sync_jobs: u64,
        pending_sync_jobs: u64,
    ) -> Self {
        let count = |state: ServiceState| statuses.iter().filter(|s| s.status == state).count();
        let total_services = statuses.len();
        let outage_services = count(ServiceState::Outage);

        let timings: Vec<u64> = statuses.iter().filter_map(|s| s.response_time_ms).collect();
        let average_response_time_ms = if timings.is_empty() {
            0.0
        } else {
            timings.iter().sum::<u64>() as f64 / timings.len() as f64
        };

        let error_rate = if total_services == 0 {
            0.0
        } else {
            outage_services as f64 / total_services as f64
        };

        Self {
            total_services,
            operational_services: count(ServiceState::Operational),
            degraded_services: count(ServiceState::Degraded),
            outage_services,
            average_response_time_ms,
            error_rate,
            active_integrations: integrations
                .iter()
                .filter(|i| i.status == IntegrationStatus::Active)
                .count(),
            running_sync_jobs,
            pending_sync_jobs,
        }
    }
}

/// Point-in-time view of the whole system, derived on demand
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct SystemHealthDashboard {
    pub overall_status: OverallStatus,
    pub api_services: Vec<ServiceStatus>,
    pub integrations: Vec<SystemIntegration>,
    pub recent_sync_jobs: Vec<DataSyncJob>,
    pub system_metrics: SystemMetrics,
    pub generated_at: DateTime<Utc>,
}

impl SystemHealthDashboard {
    pub fn assemble(
        api_services: Vec<ServiceStatus>,
        integrations: Vec<SystemIntegration>,
        recent_sync_jobs: Vec<DataSyncJob>,
        running_sync_jobs: u64,
        pending_sync_jobs: u64,
    ) -> Self {
        let system_metrics = SystemMetrics::compute(
            &api_services,
            &integrations,
            running_sync_jobs,
            pending_sync_jobs,
        );

        Self {
            overall_status: OverallStatus::from_statuses(&api_services),
            api_services,
            integrations,
            recent_sync_jobs,
            system_metrics,
            generated_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn status(name: &str, state: ServiceState, ms: u64) -> ServiceStatus {
        ServiceStatus {
            name: name.to_string(),
            status: state,
            last_checked: Utc::now(),
            response_time_ms: Some(ms),
            error_message: None,
        }
    }

    #[test]
    fn test_overall_status_rollup() {
        use ServiceState::*;

        let cases = [
            (vec![], OverallStatus::Healthy),
            (vec![Operational, Operational], OverallStatus::Healthy),
            (vec![Operational, Degraded], OverallStatus::Degraded),
            (vec![Outage, Operational], OverallStatus::Critical),
            (vec![Degraded, Outage], OverallStatus::Critical),
        ];

        for (states, expected) in cases {
            let statuses: Vec<_> = states
                .iter()
                .enumerate()
                .map(|(i, state)| status(&format!("svc{i}"), *state, 1))
                .collect();
            assert_eq!(
                OverallStatus::from_statuses(&statuses),
                expected,
                "states: {:?}",
                states
            );
        }
    }

    #[test]
    fn test_system_metrics() {
        let statuses = vec![
            status("database", ServiceState::Operational, 10),
            status("data_sync_jobs", ServiceState::Degraded, 20),
            status("reports", ServiceState::Outage, 30),
            status("members", ServiceState::Operational, 40),
        ];

        let metrics = SystemMetrics::compute(&statuses, &[], 2, 5);

        assert_eq!(metrics.total_services, 4);
        assert_eq!(metrics.operational_services, 2);
        assert_eq!(metrics.degraded_services, 1);
        assert_eq!(metrics.outage_services, 1);
        assert_eq!(metrics.average_response_time_ms, 25.0);
        assert_eq!(metrics.error_rate, 0.25);
        assert_eq!(metrics.running_sync_jobs, 2);
        assert_eq!(metrics.pending_sync_jobs, 5);
    }

    #[test]
    fn test_metrics_for_empty_registry() {
        let metrics = SystemMetrics::compute(&[], &[], 0, 0);
        assert_eq!(metrics.average_response_time_ms, 0.0);
        assert_eq!(metrics.error_rate, 0.0);
    }

    #[test]
    fn test_status_serialization_omits_missing_fields() {
        let mut ok = status("database", ServiceState::Operational, 3);
        ok.response_time_ms = None;

        let value = serde_json::to_value(&ok).unwrap();
        assert_eq!(value["status"], "operational");
        assert!(value.get("error_message").is_none());
        assert!(value.get("response_time_ms").is_none());
    }

    struct Slow;

    #[async_trait::async_trait]
    impl RegisteredService for Slow {
        async fn probe(&self) -> Result<(), crate::error::ManagerError> {
            tokio::time::sleep(Duration::from_millis(30)).await;
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_slow_probe_reported_degraded() {
        let registry = ServiceRegistry::builder()
            .register("reports", Arc::new(Slow))
            .unwrap()
            .build();
        let config = HealthConfig {
            slow_probe_ms: Some(5),
            ..HealthConfig::default()
        };

        let statuses = HealthAggregator::new(Arc::new(registry), &config)
            .check_all_services()
            .await;

        assert_eq!(statuses[0].status, ServiceState::Degraded);
        assert!(statuses[0].response_time_ms.unwrap() >= 5);
    }
}
