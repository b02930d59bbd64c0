//! # Portal Integrations Entry Point
//!
//! `serve` (the default) runs the admin API with its background worker and
//! scheduler. The other subcommands are one-shot operator tools.

use anyhow::Context;
use clap::{Parser, Subcommand};
use portal_integrations::{
    config::{AppConfig, ConfigLoader},
    db,
    server::{build_runtime, run_server},
    telemetry,
};

#[derive(Parser)]
#[command(name = "portal-integrations")]
#[command(about = "Integration manager for the portal backend")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Run the admin API, sync worker and maintenance scheduler
    Serve,
    /// Apply pending database migrations and exit
    Migrate,
    /// Run every maintenance task once and print the report
    Maintenance,
    /// Print the system health dashboard
    Health,
    /// Print the effective configuration with secrets redacted
    Config,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Load and validate configuration from layered env files and variables
    let config = ConfigLoader::new().load().context("loading configuration")?;
    telemetry::init_tracing(&config)?;

    match cli.command.unwrap_or(Command::Serve) {
        Command::Serve => {
            tracing::info!(profile = %config.profile, "Loaded configuration");
            let db = db::init_pool(&config).await?;
            run_server(config, db).await
        }
        Command::Migrate => {
            let db = db::init_pool(&config).await?;
            let applied = db::run_migrations(&db).await?;
            println!("Applied {applied} migration(s)");
            Ok(())
        }
        Command::Maintenance => {
            let manager = one_shot_manager(&config).await?;
            let report = manager.run_maintenance_tasks().await;
            println!("{}", serde_json::to_string_pretty(&report)?);
            if report.tasks_failed.is_empty() {
                Ok(())
            } else {
                anyhow::bail!("{} maintenance task(s) failed", report.tasks_failed.len())
            }
        }
        Command::Health => {
            let manager = one_shot_manager(&config).await?;
            let dashboard = manager.system_health_dashboard().await?;
            println!("{}", serde_json::to_string_pretty(&dashboard)?);
            Ok(())
        }
        Command::Config => {
            println!("{}", config.redacted_json()?);
            Ok(())
        }
    }
}

async fn one_shot_manager(
    config: &AppConfig,
) -> anyhow::Result<std::sync::Arc<portal_integrations::manager::IntegrationManager>> {
    let db = db::connect_and_migrate(config).await?;
    let (manager, _worker) = build_runtime(config, db)?;
    Ok(manager)
}
