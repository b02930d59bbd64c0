//! Sync Worker
//!
//! Background worker that runs data sync jobs. Creating a job only inserts a
//! `pending` row and pushes its ID onto the [`SyncQueue`]; the [`SyncWorker`]
//! loop dequeues IDs and drives each job through
//! `pending -> running -> completed | failed`, writing progress after every
//! step so readers see `progress_percentage` only ever increase.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use metrics::{counter, histogram};
use tokio::sync::{Semaphore, mpsc};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use crate::config::SyncWorkerConfig;
use crate::error::ManagerError;
use crate::models::{DataSyncJob, SyncJobStatus};
use crate::repositories::SyncJobRepository;

/// Progress is written at 0, 10, ..., 100.
pub const PROGRESS_STEP: i32 = 10;

/// Message stored on jobs found `running` when the worker starts
pub const INTERRUPTED_MESSAGE: &str = "interrupted before completion";

/// Message stored on jobs whose processing task panicked
pub const PANICKED_MESSAGE: &str = "sync job processing panicked";

/// Records processed once a job reaches `progress` percent of `total`.
fn records_at(total: i64, progress: i32) -> i64 {
    let records = i128::from(total) * i128::from(progress) / 100;
    i64::try_from(records).unwrap_or(total)
}

/// Performs the actual data movement for a sync job, one progress step at a time.
#[async_trait]
pub trait SyncEngine: Send + Sync {
    /// Do the work that brings `job` up to `progress_percentage`.
    async fn advance(
        &self,
        job: &DataSyncJob,
        progress_percentage: i32,
    ) -> Result<(), ManagerError>;
}

/// Placeholder engine: moves no data, only waits between steps.
#[derive(Debug, Clone)]
pub struct SteppedSyncEngine {
    step_delay: Duration,
}

impl SteppedSyncEngine {
    pub fn new(step_delay: Duration) -> Self {
        Self { step_delay }
    }
}

#[async_trait]
impl SyncEngine for SteppedSyncEngine {
    async fn advance(
        &self,
        _job: &DataSyncJob,
        progress_percentage: i32,
    ) -> Result<(), ManagerError> {
        if progress_percentage > 0 && !self.step_delay.is_zero() {
            tokio::time::sleep(self.step_delay).await;
        }
        Ok(())
    }
}

/// Sending half of the sync job queue. Cloning is cheap.
#[derive(Debug, Clone)]
pub struct SyncQueue {
    sender: mpsc::UnboundedSender<Uuid>,
}

impl SyncQueue {
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<Uuid>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (Self { sender }, receiver)
    }

    /// Hand a job to the worker without waiting for it to run.
    ///
    /// Returns `false` if no worker is listening. The job then stays `pending`
    /// and is picked up by the next worker start.
    pub fn enqueue(&self, job_id: Uuid) -> bool {
        match self.sender.send(job_id) {
            Ok(()) => true,
            Err(_) => {
                warn!(job_id = %job_id, "Sync worker not running; job left pending");
                false
            }
        }
    }
}

/// How a single processing attempt ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncOutcome {
    Completed,
    Failed(String),
    /// The job was not `pending`, so another attempt owns it or it is finished
    Skipped,
}

/// Runs one job to a terminal state
#[derive(Clone)]
pub struct SyncJobProcessor {
    jobs: SyncJobRepository,
    engine: Arc<dyn SyncEngine>,
}

impl SyncJobProcessor {
    pub fn new(jobs: SyncJobRepository, engine: Arc<dyn SyncEngine>) -> Self {
        Self { jobs, engine }
    }

    /// Claim the job and run it to `completed` or `failed`.
    ///
    /// Only errors writing the `failed` state itself are returned; everything
    /// that goes wrong after the claim ends up on the job row.
    #[instrument(skip_all, fields(job_id = %job_id))]
    pub async fn process_sync_job(&self, job_id: Uuid) -> Result<SyncOutcome, ManagerError> {
        if !self.jobs.claim_pending(job_id).await? {
            debug!("Sync job not pending; skipping");
            return Ok(SyncOutcome::Skipped);
        }

        let started = Instant::now();
        info!("Sync job running");

        let outcome = match self.run_claimed(job_id).await {
            Ok(()) => {
                info!(elapsed = ?started.elapsed(), "Sync job completed");
                SyncOutcome::Completed
            }
            Err(e) => {
                let message = e.to_string();
                warn!(error = %message, "Sync job failed");
                self.jobs.fail(job_id, &message).await?;
                SyncOutcome::Failed(message)
            }
        };

        let label = match outcome {
            SyncOutcome::Completed => "completed",
            _ => "failed",
        };
        counter!("sync_jobs_total", "outcome" => label).increment(1);
        histogram!("sync_job_duration_seconds").record(started.elapsed().as_secs_f64());

        Ok(outcome)
    }

    async fn run_claimed(&self, job_id: Uuid) -> Result<(), ManagerError> {
        let model = self
            .jobs
            .find(job_id)
            .await?
            .ok_or_else(|| ManagerError::not_found("sync job", job_id))?;
        let job = DataSyncJob::try_from(model)?;

        for progress in (0..=100).step_by(PROGRESS_STEP as usize) {
            self.engine.advance(&job, progress).await?;
            let records = records_at(job.total_records, progress);
            self.jobs.write_progress(job_id, progress, records).await?;
        }

        self.jobs.complete(job_id, job.total_records).await
    }
}

/// Background loop consuming the sync job queue
pub struct SyncWorker {
    processor: SyncJobProcessor,
    jobs: SyncJobRepository,
    receiver: mpsc::UnboundedReceiver<Uuid>,
    concurrency: usize,
}

impl SyncWorker {
    pub fn new(
        processor: SyncJobProcessor,
        jobs: SyncJobRepository,
        receiver: mpsc::UnboundedReceiver<Uuid>,
        config: &SyncWorkerConfig,
    ) -> Self {
        Self {
            processor,
            jobs,
            receiver,
            concurrency: config.concurrency.max(1),
        }
    }

    /// Settle jobs left behind by a previous process: `running` jobs are failed
    /// and the IDs of `pending` jobs are returned so they can be processed.
    pub async fn recover(&self) -> Result<Vec<Uuid>, ManagerError> {
        let stale = self.jobs.list_by_status(SyncJobStatus::Running).await?;
        for job in &stale {
            if self.jobs.fail(job.id, INTERRUPTED_MESSAGE).await? {
                warn!(job_id = %job.id, "Failed sync job interrupted by restart");
            }
        }

        let pending: Vec<Uuid> = self
            .jobs
            .list_by_status(SyncJobStatus::Pending)
            .await?
            .into_iter()
            .map(|job| job.id)
            .collect();

        if !stale.is_empty() || !pending.is_empty() {
            info!(
                interrupted = stale.len(),
                pending = pending.len(),
                "Recovered sync jobs from previous run"
            );
        }

        Ok(pending)
    }

    /// Run until `shutdown` is cancelled or every queue handle is dropped.
    ///
    /// Jobs already in flight at shutdown are allowed to finish.
    pub async fn run(mut self, shutdown: CancellationToken) {
        info!(concurrency = self.concurrency, "Starting sync worker");

        let backlog = match self.recover().await {
            Ok(ids) => ids,
            Err(e) => {
                error!(error = %e, "Sync job recovery failed");
                Vec::new()
            }
        };
        let mut backlog = backlog.into_iter();

        let semaphore = Arc::new(Semaphore::new(self.concurrency));
        let mut in_flight = JoinSet::new();

        loop {
            let next = match backlog.next() {
                Some(job_id) => Some(job_id),
                None => tokio::select! {
                    _ = shutdown.cancelled() => break,
                    Some(_) = in_flight.join_next(), if !in_flight.is_empty() => continue,
                    job_id = self.receiver.recv() => job_id,
                },
            };

            let Some(job_id) = next else {
                debug!("Sync queue closed");
                break;
            };

            let permit = tokio::select! {
                _ = shutdown.cancelled() => break,
                permit = Arc::clone(&semaphore).acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => break,
                },
            };

            let processor = self.processor.clone();
            let jobs = self.jobs.clone();
            in_flight.spawn(async move {
                let _permit = permit;
                let attempt =
                    tokio::spawn(async move { processor.process_sync_job(job_id).await });
                match attempt.await {
                    Ok(Ok(_)) => {}
                    Ok(Err(e)) => {
                        error!(job_id = %job_id, error = %e, "Failed to record sync job outcome");
                    }
                    Err(join_error) => {
                        let message = if join_error.is_panic() {
                            PANICKED_MESSAGE.to_string()
                        } else {
                            join_error.to_string()
                        };
                        error!(job_id = %job_id, error = %message, "Sync job task aborted");
                        counter!("sync_jobs_total", "outcome" => "failed").increment(1);
                        if let Err(e) = jobs.fail(job_id, &message).await {
                            error!(job_id = %job_id, error = %e, "Failed to record sync job outcome");
                        }
                    }
                }
            });
        }

        while in_flight.join_next().await.is_some() {}
        info!("Sync worker stopped");
    }
}
