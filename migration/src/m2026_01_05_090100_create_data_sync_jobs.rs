//! Migration to create the data_sync_jobs table.
//!
//! Sync jobs track one import/export/sync/backup run against an integration,
//! including its progress counters and terminal timestamps.

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(DataSyncJobs::Table)
                    .if_not_exists()
                    .col(ColumnDef::new(DataSyncJobs::Id).uuid().not_null().primary_key())
                    .col(ColumnDef::new(DataSyncJobs::IntegrationId).uuid().not_null())
                    .col(ColumnDef::new(DataSyncJobs::JobType).text().not_null())
                    .col(
                        ColumnDef::new(DataSyncJobs::Status)
                            .text()
                            .not_null()
                            .default("pending"),
                    )
                    .col(
                        ColumnDef::new(DataSyncJobs::ProgressPercentage)
                            .integer()
                            .not_null()
                            .default(0),
                    )
                    .col(
                        ColumnDef::new(DataSyncJobs::RecordsProcessed)
                            .big_integer()
                            .not_null()
                            .default(0),
                    )
                    .col(
                        ColumnDef::new(DataSyncJobs::TotalRecords)
                            .big_integer()
                            .not_null()
                            .default(0),
                    )
                    .col(ColumnDef::new(DataSyncJobs::ErrorMessage).text().null())
                    .col(
                        ColumnDef::new(DataSyncJobs::StartedAt)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(DataSyncJobs::CompletedAt)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(DataSyncJobs::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_data_sync_jobs_integration_id")
                            .from(DataSyncJobs::Table, DataSyncJobs::IntegrationId)
                            .to(SystemIntegrations::Table, SystemIntegrations::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_data_sync_jobs_status_created")
                    .table(DataSyncJobs::Table)
                    .col(DataSyncJobs::Status)
                    .col(DataSyncJobs::CreatedAt)
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_data_sync_jobs_integration_created")
                    .table(DataSyncJobs::Table)
                    .col(DataSyncJobs::IntegrationId)
                    .col(DataSyncJobs::CreatedAt)
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_index(
                Index::drop()
                    .name("idx_data_sync_jobs_status_created")
                    .to_owned(),
            )
            .await?;

        manager
            .drop_index(
                Index::drop()
                    .name("idx_data_sync_jobs_integration_created")
                    .to_owned(),
            )
            .await?;

        manager
            .drop_table(Table::drop().table(DataSyncJobs::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum DataSyncJobs {
    Table,
    Id,
    IntegrationId,
    JobType,
    Status,
    ProgressPercentage,
    RecordsProcessed,
    TotalRecords,
    ErrorMessage,
    StartedAt,
    CompletedAt,
    CreatedAt,
}

#[derive(DeriveIden)]
enum SystemIntegrations {
    Table,
    Id,
}
