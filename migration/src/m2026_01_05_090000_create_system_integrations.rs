//! Migration to create the system_integrations table.
//!
//! Each row is a registered internal, external or third-party endpoint that sync
//! jobs run against. API keys are stored only as ciphertext.

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(SystemIntegrations::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(SystemIntegrations::Id)
                            .uuid()
                            .not_null()
                            .primary_key(),
                    )
                    .col(
                        ColumnDef::new(SystemIntegrations::Name)
                            .text()
                            .not_null()
                            .unique_key(),
                    )
                    .col(
                        ColumnDef::new(SystemIntegrations::IntegrationType)
                            .text()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(SystemIntegrations::Status)
                            .text()
                            .not_null()
                            .default("active"),
                    )
                    .col(ColumnDef::new(SystemIntegrations::Endpoint).text().null())
                    .col(
                        ColumnDef::new(SystemIntegrations::ApiKeyCiphertext)
                            .binary()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(SystemIntegrations::Configuration)
                            .json_binary()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(SystemIntegrations::LastSync)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(SystemIntegrations::ErrorCount)
                            .integer()
                            .not_null()
                            .default(0),
                    )
                    .col(
                        ColumnDef::new(SystemIntegrations::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .col(
                        ColumnDef::new(SystemIntegrations::UpdatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .to_owned(),
            )
            .await
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(SystemIntegrations::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum SystemIntegrations {
    Table,
    Id,
    Name,
    IntegrationType,
    Status,
    Endpoint,
    ApiKeyCiphertext,
    Configuration,
    LastSync,
    ErrorCount,
    CreatedAt,
    UpdatedAt,
}
