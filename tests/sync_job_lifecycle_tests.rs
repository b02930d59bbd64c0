//! Sync job lifecycle: creation, background processing, progress and recovery.

mod test_utils;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use portal_integrations::{
    error::ManagerError,
    manager::{IntegrationManager, NewSyncJob},
    models::{DataSyncJob, IntegrationStatus, SyncJobStatus, SyncJobType},
    repositories::{SyncJobFilter, SyncJobRepository},
    sync_worker::{
        INTERRUPTED_MESSAGE, PANICKED_MESSAGE, SteppedSyncEngine, SyncEngine, SyncJobProcessor, SyncOutcome,
        SyncQueue, SyncWorker,
    },
};
use sea_orm::DatabaseConnection;
use test_utils::{RecordingTracker, insert_integration, setup_test_db, test_config};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Engine that fails once the job reaches the given progress
struct FailingAt(i32);

#[async_trait]
impl SyncEngine for FailingAt {
    async fn advance(&self, _job: &DataSyncJob, progress: i32) -> Result<(), ManagerError> {
        if progress >= self.0 {
            return Err(ManagerError::SyncEngine("upstream rejected batch".to_string()));
        }
        Ok(())
    }
}

/// Engine that panics once the job reaches the given progress
struct PanickingAt(i32);

#[async_trait]
impl SyncEngine for PanickingAt {
    async fn advance(&self, _job: &DataSyncJob, progress: i32) -> Result<(), ManagerError> {
        if progress >= self.0 {
            panic!("engine crashed at {progress}%");
        }
        Ok(())
    }
}

struct Harness {
    db: DatabaseConnection,
    manager: IntegrationManager,
    tracker: RecordingTracker,
    shutdown: CancellationToken,
}

async fn start(engine: Arc<dyn SyncEngine>) -> anyhow::Result<Harness> {
    let db = setup_test_db().await?;
    let config = test_config();
    let tracker = RecordingTracker::default();

    let (queue, receiver) = SyncQueue::channel();
    let manager = IntegrationManager::builder(db.clone(), &config)
        .tracker(Arc::new(tracker.clone()))
        .build(queue)?;

    let jobs = SyncJobRepository::new(db.clone());
    let processor = SyncJobProcessor::new(jobs.clone(), engine);
    let worker = SyncWorker::new(processor, jobs, receiver, &config.sync_worker);
    let shutdown = CancellationToken::new();
    tokio::spawn(worker.run(shutdown.clone()));

    Ok(Harness {
        db,
        manager,
        tracker,
        shutdown,
    })
}

async fn wait_for_terminal(
    manager: &IntegrationManager,
    id: Uuid,
) -> anyhow::Result<(DataSyncJob, Vec<i32>)> {
    let mut observed = Vec::new();
    for _ in 0..500 {
        let job = manager.get_sync_job(id).await?;
        if job.status == SyncJobStatus::Running {
            observed.push(job.progress_percentage);
        }
        if job.status.is_terminal() {
            return Ok((job, observed));
        }
        tokio::time::sleep(Duration::from_millis(2)).await;
    }
    anyhow::bail!("sync job {} never reached a terminal state", id)
}

#[tokio::test]
async fn created_job_completes_with_all_records() -> anyhow::Result<()> {
    let harness = start(Arc::new(SteppedSyncEngine::new(Duration::from_millis(5)))).await?;
    let integration_id =
        insert_integration(&harness.db, "Member Directory", None, IntegrationStatus::Active)
            .await?;

    let created = harness
        .manager
        .create_sync_job(NewSyncJob {
            integration_id,
            job_type: SyncJobType::Sync,
            total_records: Some(100),
        })
        .await?;
    assert_eq!(created.status, SyncJobStatus::Pending);
    assert_eq!(created.progress_percentage, 0);
    assert!(created.started_at.is_none());

    let (job, observed) = wait_for_terminal(&harness.manager, created.id).await?;

    assert_eq!(job.status, SyncJobStatus::Completed);
    assert_eq!(job.progress_percentage, 100);
    assert_eq!(job.records_processed, 100);
    assert!(job.started_at.is_some());
    assert!(job.completed_at.is_some());
    assert!(job.error_message.is_none());
    assert!(
        observed.windows(2).all(|pair| pair[0] <= pair[1]),
        "progress went backwards: {:?}",
        observed
    );
    assert!(
        harness
            .tracker
            .wait_for_events(1)
            .await
            .iter()
            .any(|(name, _, _)| name == "sync_job_created")
    );

    harness.shutdown.cancel();
    Ok(())
}

#[tokio::test]
async fn engine_failure_marks_job_failed() -> anyhow::Result<()> {
    let harness = start(Arc::new(FailingAt(50))).await?;
    let integration_id =
        insert_integration(&harness.db, "Event Calendar", None, IntegrationStatus::Active).await?;

    let created = harness
        .manager
        .create_sync_job(NewSyncJob {
            integration_id,
            job_type: SyncJobType::Import,
            total_records: Some(200),
        })
        .await?;

    let (job, _) = wait_for_terminal(&harness.manager, created.id).await?;

    assert_eq!(job.status, SyncJobStatus::Failed);
    assert!(job.completed_at.is_some());
    assert!(
        job.error_message
            .as_deref()
            .unwrap_or_default()
            .contains("upstream rejected batch")
    );
    assert_eq!(job.progress_percentage, 40);
    assert_eq!(job.records_processed, 80);

    harness.shutdown.cancel();
    Ok(())
}

#[tokio::test]
async fn engine_panic_marks_job_failed() -> anyhow::Result<()> {
    let harness = start(Arc::new(PanickingAt(30))).await?;
    let integration_id =
        insert_integration(&harness.db, "Library Catalogue", None, IntegrationStatus::Active)
            .await?;

    let created = harness
        .manager
        .create_sync_job(NewSyncJob {
            integration_id,
            job_type: SyncJobType::Export,
            total_records: Some(50),
        })
        .await?;

    let (job, _) = wait_for_terminal(&harness.manager, created.id).await?;

    assert_eq!(job.status, SyncJobStatus::Failed);
    assert_eq!(job.error_message.as_deref(), Some(PANICKED_MESSAGE));
    assert!(job.completed_at.is_some());
    assert_eq!(job.progress_percentage, 20);

    harness.shutdown.cancel();
    Ok(())
}

#[tokio::test]
async fn very_large_totals_complete_without_overflow() -> anyhow::Result<()> {
    let harness = start(Arc::new(SteppedSyncEngine::new(Duration::ZERO))).await?;
    let integration_id =
        insert_integration(&harness.db, "Archive Mirror", None, IntegrationStatus::Active)
            .await?;
    let total = i64::MAX / 50;

    let created = harness
        .manager
        .create_sync_job(NewSyncJob {
            integration_id,
            job_type: SyncJobType::Backup,
            total_records: Some(total),
        })
        .await?;

    let (job, observed) = wait_for_terminal(&harness.manager, created.id).await?;

    assert_eq!(job.status, SyncJobStatus::Completed);
    assert_eq!(job.progress_percentage, 100);
    assert_eq!(job.records_processed, total);
    assert!(observed.windows(2).all(|pair| pair[0] <= pair[1]));

    harness.shutdown.cancel();
    Ok(())
}

#[tokio::test]
async fn job_defaults_to_zero_records() -> anyhow::Result<()> {
    let harness = start(Arc::new(SteppedSyncEngine::new(Duration::ZERO))).await?;
    let integration_id =
        insert_integration(&harness.db, "Backups", None, IntegrationStatus::Active).await?;

    let created = harness
        .manager
        .create_sync_job(NewSyncJob {
            integration_id,
            job_type: SyncJobType::Backup,
            total_records: None,
        })
        .await?;
    let (job, _) = wait_for_terminal(&harness.manager, created.id).await?;

    assert_eq!(job.status, SyncJobStatus::Completed);
    assert_eq!(job.total_records, 0);
    assert_eq!(job.records_processed, 0);

    harness.shutdown.cancel();
    Ok(())
}

#[tokio::test]
async fn invalid_sync_job_requests_are_rejected() -> anyhow::Result<()> {
    let harness = start(Arc::new(SteppedSyncEngine::new(Duration::ZERO))).await?;
    let integration_id =
        insert_integration(&harness.db, "Donations", None, IntegrationStatus::Active).await?;

    let negative = harness
        .manager
        .create_sync_job(NewSyncJob {
            integration_id,
            job_type: SyncJobType::Export,
            total_records: Some(-1),
        })
        .await;
    assert!(matches!(negative, Err(ManagerError::InvalidInput(_))));

    let missing = harness
        .manager
        .create_sync_job(NewSyncJob {
            integration_id: Uuid::new_v4(),
            job_type: SyncJobType::Export,
            total_records: Some(10),
        })
        .await;
    assert!(matches!(missing, Err(ManagerError::NotFound { .. })));

    let jobs = harness
        .manager
        .list_sync_jobs(SyncJobFilter::default())
        .await?;
    assert!(jobs.is_empty());

    harness.shutdown.cancel();
    Ok(())
}

#[tokio::test]
async fn job_is_processed_only_once() -> anyhow::Result<()> {
    let db = setup_test_db().await?;
    let integration_id =
        insert_integration(&db, "Volunteers", None, IntegrationStatus::Active).await?;
    let jobs = SyncJobRepository::new(db.clone());
    let job = jobs
        .insert_pending(integration_id, SyncJobType::Sync, 10)
        .await?;

    let processor =
        SyncJobProcessor::new(jobs.clone(), Arc::new(SteppedSyncEngine::new(Duration::ZERO)));

    assert_eq!(
        processor.process_sync_job(job.id).await?,
        SyncOutcome::Completed
    );
    assert_eq!(
        processor.process_sync_job(job.id).await?,
        SyncOutcome::Skipped
    );
    assert_eq!(
        processor.process_sync_job(Uuid::new_v4()).await?,
        SyncOutcome::Skipped
    );
    Ok(())
}

#[tokio::test]
async fn recovery_fails_interrupted_jobs_and_returns_pending() -> anyhow::Result<()> {
    let db = setup_test_db().await?;
    let config = test_config();
    let integration_id =
        insert_integration(&db, "Newsletter", None, IntegrationStatus::Active).await?;
    let jobs = SyncJobRepository::new(db.clone());

    let interrupted = jobs
        .insert_pending(integration_id, SyncJobType::Import, 50)
        .await?;
    assert!(jobs.claim_pending(interrupted.id).await?);
    jobs.write_progress(interrupted.id, 30, 15).await?;
    let waiting = jobs
        .insert_pending(integration_id, SyncJobType::Export, 5)
        .await?;

    let (_queue, receiver) = SyncQueue::channel();
    let processor = SyncJobProcessor::new(
        jobs.clone(),
        Arc::new(SteppedSyncEngine::new(Duration::ZERO)),
    );
    let worker = SyncWorker::new(processor, jobs.clone(), receiver, &config.sync_worker);

    let pending = worker.recover().await?;
    assert_eq!(pending, vec![waiting.id]);

    let failed = DataSyncJob::try_from(jobs.find(interrupted.id).await?.unwrap())?;
    assert_eq!(failed.status, SyncJobStatus::Failed);
    assert_eq!(failed.error_message.as_deref(), Some(INTERRUPTED_MESSAGE));
    assert_eq!(failed.progress_percentage, 30);
    assert!(failed.completed_at.is_some());
    Ok(())
}

#[tokio::test]
async fn pending_jobs_left_by_previous_run_are_processed_on_start() -> anyhow::Result<()> {
    let db = setup_test_db().await?;
    let config = test_config();
    let integration_id =
        insert_integration(&db, "Archive", None, IntegrationStatus::Active).await?;
    let jobs = SyncJobRepository::new(db.clone());
    let leftover = jobs
        .insert_pending(integration_id, SyncJobType::Backup, 20)
        .await?;

    let (queue, receiver) = SyncQueue::channel();
    let manager = IntegrationManager::builder(db.clone(), &config).build(queue)?;
    let processor = SyncJobProcessor::new(
        jobs.clone(),
        Arc::new(SteppedSyncEngine::new(Duration::ZERO)),
    );
    let worker = SyncWorker::new(processor, jobs, receiver, &config.sync_worker);
    let shutdown = CancellationToken::new();
    tokio::spawn(worker.run(shutdown.clone()));

    let (job, _) = wait_for_terminal(&manager, leftover.id).await?;
    assert_eq!(job.status, SyncJobStatus::Completed);
    assert_eq!(job.records_processed, 20);

    shutdown.cancel();
    Ok(())
}

#[tokio::test]
async fn list_filters_and_orders_newest_first() -> anyhow::Result<()> {
    let db = setup_test_db().await?;
    let first = insert_integration(&db, "First", None, IntegrationStatus::Active).await?;
    let second = insert_integration(&db, "Second", None, IntegrationStatus::Active).await?;
    let jobs = SyncJobRepository::new(db.clone());

    let oldest = jobs.insert_pending(first, SyncJobType::Import, 1).await?;
    tokio::time::sleep(Duration::from_millis(5)).await;
    let middle = jobs.insert_pending(second, SyncJobType::Export, 1).await?;
    tokio::time::sleep(Duration::from_millis(5)).await;
    let newest = jobs.insert_pending(first, SyncJobType::Export, 1).await?;

    let all = jobs.list(SyncJobFilter::default()).await?;
    let ids: Vec<Uuid> = all.iter().map(|j| j.id).collect();
    assert_eq!(ids, vec![newest.id, middle.id, oldest.id]);

    let for_first = jobs
        .list(SyncJobFilter {
            integration_id: Some(first),
            ..Default::default()
        })
        .await?;
    assert_eq!(for_first.len(), 2);

    let exports = jobs
        .list(SyncJobFilter {
            job_type: Some(SyncJobType::Export),
            limit: Some(1),
            ..Default::default()
        })
        .await?;
    assert_eq!(exports.len(), 1);
    assert_eq!(exports[0].id, newest.id);
    Ok(())
}
