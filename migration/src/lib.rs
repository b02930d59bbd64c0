//! Database migrations for the portal integration manager.
//!
//! This module contains all database migrations using SeaORM Migration.

pub use sea_orm_migration::prelude::*;

mod m2026_01_05_090000_create_system_integrations;
mod m2026_01_05_090100_create_data_sync_jobs;
mod m2026_01_05_090200_create_analytics_events;

pub struct Migrator;

#[async_trait::async_trait]
impl MigratorTrait for Migrator {
    fn migrations() -> Vec<Box<dyn MigrationTrait>> {
        vec![
            Box::new(m2026_01_05_090000_create_system_integrations::Migration),
            Box::new(m2026_01_05_090100_create_data_sync_jobs::Migration),
            Box::new(m2026_01_05_090200_create_analytics_events::Migration),
        ]
    }
}
