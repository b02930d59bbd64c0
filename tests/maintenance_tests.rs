//! Maintenance runs: task isolation, sync job cleanup and integration health.

mod test_utils;

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, Utc};
use portal_integrations::{
    error::ManagerError,
    maintenance::{
        IntegrationHealthCheck, MAINTENANCE_TASKS, MaintenanceCollaborators, MetricsRecorder,
        ScheduledProcessor, TASK_PROCESS_SCHEDULED_REMINDERS, TASK_PROCESS_SCHEDULED_REPORTS,
        TASK_RECORD_SYSTEM_METRICS,
    },
    manager::{IntegrationManager, NewIntegration},
    models::{
        IntegrationStatus, IntegrationType, SyncJobStatus, SyncJobType, SystemIntegration,
        data_sync_job::{Column as JobColumn, Entity as JobEntity},
    },
    repositories::SyncJobRepository,
    sync_worker::SyncQueue,
};
use sea_orm::{ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, sea_query::Expr};
use test_utils::{FailingTracker, RecordingTracker, insert_integration, setup_test_db, test_config};
use uuid::Uuid;

struct FixedHealth(IntegrationStatus);

#[async_trait]
impl IntegrationHealthCheck for FixedHealth {
    async fn check(
        &self,
        _integration: &SystemIntegration,
        _api_key: Option<&str>,
    ) -> IntegrationStatus {
        self.0
    }
}

/// Health check that remembers the API key it was handed
#[derive(Default)]
struct KeyCapturingHealth {
    keys: Mutex<Vec<Option<String>>>,
}

#[async_trait]
impl IntegrationHealthCheck for KeyCapturingHealth {
    async fn check(
        &self,
        _integration: &SystemIntegration,
        api_key: Option<&str>,
    ) -> IntegrationStatus {
        self.keys.lock().unwrap().push(api_key.map(str::to_string));
        IntegrationStatus::Active
    }
}

struct Processor {
    fail: bool,
}

#[async_trait]
impl ScheduledProcessor for Processor {
    async fn process(&self) -> Result<(), ManagerError> {
        if self.fail {
            Err(ManagerError::collaborator("reminders", "queue unavailable"))
        } else {
            Ok(())
        }
    }
}

struct Metrics {
    fail: bool,
}

#[async_trait]
impl MetricsRecorder for Metrics {
    async fn record(&self) -> Result<(), ManagerError> {
        if self.fail {
            Err(ManagerError::collaborator("metrics", "sink rejected sample"))
        } else {
            Ok(())
        }
    }
}

fn collaborators(failing_task: Option<&str>) -> MaintenanceCollaborators {
    MaintenanceCollaborators {
        health_check: Arc::new(FixedHealth(IntegrationStatus::Active)),
        reminders: Arc::new(Processor {
            fail: failing_task == Some(TASK_PROCESS_SCHEDULED_REMINDERS),
        }),
        reports: Arc::new(Processor {
            fail: failing_task == Some(TASK_PROCESS_SCHEDULED_REPORTS),
        }),
        metrics: Arc::new(Metrics {
            fail: failing_task == Some(TASK_RECORD_SYSTEM_METRICS),
        }),
    }
}

fn manager(
    db: &DatabaseConnection,
    collaborators: MaintenanceCollaborators,
    tracker: RecordingTracker,
) -> anyhow::Result<IntegrationManager> {
    let (queue, _receiver) = SyncQueue::channel();
    Ok(IntegrationManager::builder(db.clone(), &test_config())
        .maintenance_collaborators(collaborators)
        .tracker(Arc::new(tracker))
        .build(queue)?)
}

async fn backdate_job(db: &DatabaseConnection, id: Uuid, days: i64) -> anyhow::Result<()> {
    let created_at = (Utc::now() - ChronoDuration::days(days)).fixed_offset();
    JobEntity::update_many()
        .col_expr(JobColumn::CreatedAt, Expr::value(created_at))
        .filter(JobColumn::Id.eq(id))
        .exec(db)
        .await?;
    Ok(())
}

#[tokio::test]
async fn failing_third_task_does_not_stop_the_others() -> anyhow::Result<()> {
    let db = setup_test_db().await?;
    let tracker = RecordingTracker::default();
    let manager = manager(
        &db,
        collaborators(Some(TASK_PROCESS_SCHEDULED_REMINDERS)),
        tracker.clone(),
    )?;

    let report = manager.run_maintenance_tasks().await;

    assert_eq!(MAINTENANCE_TASKS[2], TASK_PROCESS_SCHEDULED_REMINDERS);
    assert_eq!(report.tasks_failed, vec![TASK_PROCESS_SCHEDULED_REMINDERS]);
    let expected_completed: Vec<&str> = MAINTENANCE_TASKS
        .iter()
        .copied()
        .filter(|task| *task != TASK_PROCESS_SCHEDULED_REMINDERS)
        .collect();
    assert_eq!(report.tasks_completed, expected_completed);
    assert_eq!(report.tasks_completed.len() + report.tasks_failed.len(), 5);

    let events = tracker.wait_for_events(1).await;
    let (_, category, payload) = events
        .iter()
        .find(|(name, _, _)| name == "maintenance_tasks_completed")
        .expect("maintenance event recorded");
    assert_eq!(category, "system");
    assert_eq!(payload["tasks_failed"], 1);
    Ok(())
}

#[tokio::test]
async fn each_collaborator_failure_is_isolated() -> anyhow::Result<()> {
    for failing in [
        TASK_PROCESS_SCHEDULED_REMINDERS,
        TASK_PROCESS_SCHEDULED_REPORTS,
        TASK_RECORD_SYSTEM_METRICS,
    ] {
        let db = setup_test_db().await?;
        let manager = manager(&db, collaborators(Some(failing)), RecordingTracker::default())?;

        let report = manager.run_maintenance_tasks().await;

        assert_eq!(report.tasks_failed, vec![failing]);
        assert_eq!(report.tasks_completed.len(), 4);
    }
    Ok(())
}

#[tokio::test]
async fn analytics_outage_does_not_fail_the_run() -> anyhow::Result<()> {
    let db = setup_test_db().await?;
    let (queue, _receiver) = SyncQueue::channel();
    let manager = IntegrationManager::builder(db.clone(), &test_config())
        .maintenance_collaborators(collaborators(None))
        .tracker(Arc::new(FailingTracker))
        .build(queue)?;

    let report = manager.run_maintenance_tasks().await;

    assert!(report.tasks_failed.is_empty());
    assert_eq!(report.tasks_completed.len(), 5);
    Ok(())
}

#[tokio::test]
async fn cleanup_purges_only_old_completed_jobs() -> anyhow::Result<()> {
    let db = setup_test_db().await?;
    let integration_id =
        insert_integration(&db, "Member Sync", None, IntegrationStatus::Active).await?;
    let jobs = SyncJobRepository::new(db.clone());

    let mut finished = Vec::new();
    for _ in 0..2 {
        let job = jobs
            .insert_pending(integration_id, SyncJobType::Sync, 10)
            .await?;
        jobs.claim_pending(job.id).await?;
        jobs.complete(job.id, 10).await?;
        finished.push(job.id);
    }
    let old_failed = jobs
        .insert_pending(integration_id, SyncJobType::Sync, 10)
        .await?;
    jobs.claim_pending(old_failed.id).await?;
    jobs.fail(old_failed.id, "timeout").await?;

    backdate_job(&db, finished[0], 45).await?;
    backdate_job(&db, old_failed.id, 45).await?;

    let manager = manager(&db, collaborators(None), RecordingTracker::default())?;
    let report = manager.run_maintenance_tasks().await;
    assert!(report.tasks_failed.is_empty());

    assert!(jobs.find(finished[0]).await?.is_none());
    assert!(jobs.find(finished[1]).await?.is_some());
    let kept = jobs.find(old_failed.id).await?.unwrap();
    assert_eq!(kept.status, SyncJobStatus::Failed.as_str());
    Ok(())
}

#[tokio::test]
async fn health_update_records_check_results() -> anyhow::Result<()> {
    let db = setup_test_db().await?;
    let checked = insert_integration(
        &db,
        "Prayer Times",
        Some("https://times.example.org/health"),
        IntegrationStatus::Active,
    )
    .await?;
    let switched_off = insert_integration(
        &db,
        "Legacy Mailer",
        Some("https://mailer.example.org/health"),
        IntegrationStatus::Inactive,
    )
    .await?;

    let collaborators = MaintenanceCollaborators {
        health_check: Arc::new(FixedHealth(IntegrationStatus::Error)),
        ..collaborators(None)
    };
    let manager = manager(&db, collaborators, RecordingTracker::default())?;

    manager.run_maintenance_tasks().await;
    manager.run_maintenance_tasks().await;

    let failing = manager.get_integration(checked).await?;
    assert_eq!(failing.status, IntegrationStatus::Error);
    assert_eq!(failing.error_count, 2);
    assert!(failing.last_sync.is_some());

    let untouched = manager.get_integration(switched_off).await?;
    assert_eq!(untouched.status, IntegrationStatus::Inactive);
    assert_eq!(untouched.error_count, 0);
    assert!(untouched.last_sync.is_none());
    Ok(())
}

#[tokio::test]
async fn recovered_integration_returns_to_active() -> anyhow::Result<()> {
    let db = setup_test_db().await?;
    let id = insert_integration(
        &db,
        "Donation Gateway",
        Some("https://pay.example.org/health"),
        IntegrationStatus::Error,
    )
    .await?;

    let manager = manager(&db, collaborators(None), RecordingTracker::default())?;
    manager.run_maintenance_tasks().await;

    let integration = manager.get_integration(id).await?;
    assert_eq!(integration.status, IntegrationStatus::Active);
    assert_eq!(integration.error_count, 0);
    Ok(())
}

#[tokio::test]
async fn store_backed_collaborators_complete_every_task() -> anyhow::Result<()> {
    let db = setup_test_db().await?;
    insert_integration(&db, "No Endpoint", None, IntegrationStatus::Active).await?;

    let (queue, _receiver) = SyncQueue::channel();
    let manager = IntegrationManager::builder(db.clone(), &test_config()).build(queue)?;

    let report = manager.run_maintenance_tasks().await;

    assert_eq!(report.tasks_completed, MAINTENANCE_TASKS.to_vec());
    assert!(report.tasks_failed.is_empty());
    Ok(())
}

fn keyed_manager(
    db: &DatabaseConnection,
    crypto_key: Option<Vec<u8>>,
    health_check: Arc<dyn IntegrationHealthCheck>,
) -> anyhow::Result<IntegrationManager> {
    let config = portal_integrations::config::AppConfig {
        crypto_key,
        ..test_config()
    };
    let (queue, _receiver) = SyncQueue::channel();
    Ok(IntegrationManager::builder(db.clone(), &config)
        .maintenance_collaborators(MaintenanceCollaborators {
            health_check,
            ..collaborators(None)
        })
        .tracker(Arc::new(RecordingTracker::default()))
        .build(queue)?)
}

fn keyed_integration(name: &str, api_key: Option<&str>) -> NewIntegration {
    NewIntegration {
        name: name.to_string(),
        integration_type: IntegrationType::ThirdParty,
        endpoint: Some("https://api.example.org/health".to_string()),
        api_key: api_key.map(str::to_string),
        configuration: None,
    }
}

#[tokio::test]
async fn health_update_hands_decrypted_api_key_to_check() -> anyhow::Result<()> {
    let db = setup_test_db().await?;
    let health = Arc::new(KeyCapturingHealth::default());
    let manager = keyed_manager(&db, Some(vec![5u8; 32]), health.clone())?;

    manager
        .create_integration(keyed_integration("Donations API", Some("sk_live_donations")))
        .await?;
    manager
        .create_integration(keyed_integration("Public Feed", None))
        .await?;

    let report = manager.run_maintenance_tasks().await;
    assert!(report.tasks_failed.is_empty());

    let keys = health.keys.lock().unwrap().clone();
    assert_eq!(keys, vec![Some("sk_live_donations".to_string()), None]);
    Ok(())
}

#[tokio::test]
async fn undecryptable_api_key_marks_integration_error() -> anyhow::Result<()> {
    let db = setup_test_db().await?;
    let writer = keyed_manager(
        &db,
        Some(vec![5u8; 32]),
        Arc::new(FixedHealth(IntegrationStatus::Active)),
    )?;
    let created = writer
        .create_integration(keyed_integration("Streaming API", Some("sk_stream")))
        .await?;

    let health = Arc::new(KeyCapturingHealth::default());
    let rotated = keyed_manager(&db, Some(vec![6u8; 32]), health.clone())?;
    let report = rotated.run_maintenance_tasks().await;

    assert!(report.tasks_failed.is_empty());
    assert!(health.keys.lock().unwrap().is_empty());
    let integration = rotated.get_integration(created.id).await?;
    assert_eq!(integration.status, IntegrationStatus::Error);
    assert_eq!(integration.error_count, 1);
    Ok(())
}
