//! Analytics collaborator.
//!
//! Events are telemetry: callers go through [`track_best_effort`], which never
//! lets a tracking failure reach the operation that emitted the event.

use std::sync::Arc;

use async_trait::async_trait;
use metrics::counter;
use serde_json::Value as JsonValue;
use tokio::task::JoinHandle;

use crate::error::ManagerError;
use crate::repositories::AnalyticsEventRepository;

pub const EVENT_INTEGRATION_CREATED: &str = "integration_created";
pub const EVENT_SYNC_JOB_CREATED: &str = "sync_job_created";
pub const EVENT_MAINTENANCE_COMPLETED: &str = "maintenance_tasks_completed";
pub const EVENT_BULK_OPERATION_COMPLETED: &str = "bulk_operation_completed";

pub const CATEGORY_INTEGRATION: &str = "integration";
pub const CATEGORY_SYSTEM: &str = "system";

/// Sink for analytics events
#[async_trait]
pub trait EventTracker: Send + Sync {
    async fn track(
        &self,
        event_name: &str,
        category: &str,
        payload: JsonValue,
    ) -> Result<(), ManagerError>;
}

/// Tracker persisting events to the `analytics_events` table
#[derive(Debug, Clone)]
pub struct StoreEventTracker {
    repo: AnalyticsEventRepository,
}

impl StoreEventTracker {
    pub fn new(repo: AnalyticsEventRepository) -> Self {
        Self { repo }
    }
}

#[async_trait]
impl EventTracker for StoreEventTracker {
    async fn track(
        &self,
        event_name: &str,
        category: &str,
        payload: JsonValue,
    ) -> Result<(), ManagerError> {
        self.repo.insert(event_name, category, payload).await?;
        Ok(())
    }
}

/// Tracker that drops every event
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopEventTracker;

#[async_trait]
impl EventTracker for NoopEventTracker {
    async fn track(&self, _: &str, _: &str, _: JsonValue) -> Result<(), ManagerError> {
        Ok(())
    }
}

/// Emit an event in the background, swallowing any failure.
///
/// The write runs on its own task so a slow or hung sink never delays the
/// operation that emitted the event. The handle is only useful to tests.
pub fn track_best_effort(
    tracker: &Arc<dyn EventTracker>,
    event_name: &'static str,
    category: &'static str,
    payload: JsonValue,
) -> JoinHandle<()> {
    let tracker = Arc::clone(tracker);
    tokio::spawn(async move {
        if let Err(error) = tracker.track(event_name, category, payload).await {
            counter!("analytics_events_dropped_total", "event" => event_name).increment(1);
            tracing::debug!(event = event_name, error = %error, "Analytics event dropped");
        }
    })
}
