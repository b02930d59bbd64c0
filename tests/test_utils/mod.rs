//! Test utilities for database testing.
//!
//! In-memory SQLite with all migrations applied, plus small fixtures shared by
//! the integration test binaries.

#![allow(dead_code)]

use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use migration::{Migrator, MigratorTrait};
use portal_integrations::{
    analytics::EventTracker,
    config::AppConfig,
    error::ManagerError,
    models::{IntegrationStatus, IntegrationType},
    repositories::{IntegrationChanges, IntegrationRepository, NewIntegrationRecord},
};
use sea_orm::{ConnectOptions, Database, DatabaseConnection};
use serde_json::{Value, json};
use uuid::Uuid;

/// Sets up an in-memory SQLite database with all migrations applied.
///
/// The pool is capped at one connection: every SQLite `:memory:` connection
/// is its own database.
pub async fn setup_test_db() -> Result<DatabaseConnection> {
    let mut options = ConnectOptions::new("sqlite::memory:");
    options.max_connections(1).sqlx_logging(false);
    let db = Database::connect(options).await?;

    Migrator::up(&db, None).await?;

    Ok(db)
}

/// Configuration for tests: no auth, a crypto key, zero sync step delay.
pub fn test_config() -> AppConfig {
    let mut config = AppConfig {
        profile: "test".to_string(),
        crypto_key: Some(vec![42u8; 32]),
        ..Default::default()
    };
    config.sync_worker.step_delay_ms = 0;
    config
}

/// Inserts an integration directly through the repository.
pub async fn insert_integration(
    db: &DatabaseConnection,
    name: &str,
    endpoint: Option<&str>,
    status: IntegrationStatus,
) -> Result<Uuid> {
    let repo = IntegrationRepository::new(db.clone());
    let id = Uuid::new_v4();
    repo.insert(NewIntegrationRecord {
        id,
        name: name.to_string(),
        integration_type: IntegrationType::External,
        endpoint: endpoint.map(str::to_string),
        api_key_ciphertext: None,
        configuration: json!({}),
    })
    .await?;

    if status != IntegrationStatus::Active {
        repo.update(
            id,
            IntegrationChanges {
                status: Some(status),
                ..Default::default()
            },
        )
        .await?;
    }

    Ok(id)
}

/// Event tracker that remembers every event it was given.
#[derive(Debug, Default, Clone)]
pub struct RecordingTracker {
    events: Arc<Mutex<Vec<(String, String, Value)>>>,
}

impl RecordingTracker {
    pub fn events(&self) -> Vec<(String, String, Value)> {
        self.events.lock().unwrap().clone()
    }

    /// Events are written in the background; wait until at least `count`
    /// have arrived.
    pub async fn wait_for_events(&self, count: usize) -> Vec<(String, String, Value)> {
        for _ in 0..200 {
            let events = self.events();
            if events.len() >= count {
                return events;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("expected {count} analytics events, got {:?}", self.events());
    }
}

#[async_trait]
impl EventTracker for RecordingTracker {
    async fn track(
        &self,
        event_name: &str,
        category: &str,
        payload: Value,
    ) -> Result<(), ManagerError> {
        self.events.lock().unwrap().push((
            event_name.to_string(),
            category.to_string(),
            payload,
        ));
        Ok(())
    }
}

/// Event tracker whose writes never finish.
#[derive(Debug, Default, Clone, Copy)]
pub struct HangingTracker;

#[async_trait]
impl EventTracker for HangingTracker {
    async fn track(&self, _: &str, _: &str, _: Value) -> Result<(), ManagerError> {
        tokio::time::sleep(Duration::from_secs(3600)).await;
        Ok(())
    }
}

/// Event tracker whose store is always down.
#[derive(Debug, Default, Clone, Copy)]
pub struct FailingTracker;

#[async_trait]
impl EventTracker for FailingTracker {
    async fn track(&self, _: &str, _: &str, _: Value) -> Result<(), ManagerError> {
        Err(ManagerError::Unavailable("analytics store down".to_string()))
    }
}
