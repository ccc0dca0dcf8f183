use super::{Cli, Command};
use crate::backup::{BackupReport, BackupService, Scheduler};
use crate::config::{self, AppConfig};
use crate::database;
use crate::error::{AppError, CleanupError};
use crate::upload::{self, ObjectStore, S3Store};
use console::style;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::Notify;
use tracing::{info, warn};

pub async fn execute(cli: Cli) -> Result<(), AppError> {
    let config = config::load(cli.config.as_deref())?;
    info!(
        "Loaded configuration: {} database {} on {}:{}, bucket {}",
        config.database.engine,
        config.database.name,
        config.database.host,
        config.database.port,
        config.storage.bucket
    );

    match cli.command.unwrap_or(Command::Run) {
        Command::Run => run(config).await,
        Command::BackupNow => backup_now(config).await,
        Command::List => list(config).await,
    }
}

async fn connect(config: &AppConfig) -> Result<Arc<dyn ObjectStore>, AppError> {
    let store = S3Store::connect(&config.storage).await?;
    Ok(Arc::new(store))
}

/// The dump tool is only looked up to warn early; a missing tool still
/// surfaces as a failed run.
fn check_dump_tool(config: &AppConfig) {
    match database::locate_tool(config.database.engine) {
        Some(path) => info!("Using dump tool at {}", path.display()),
        None => warn!(
            "No {} dump tool found on PATH, backups will fail until it is installed",
            config.database.engine
        ),
    }
}

fn scheduler(config: &AppConfig, store: Arc<dyn ObjectStore>) -> Scheduler {
    let service = BackupService::new(config.database.clone(), store, &config.backup);
    Scheduler::new(config.backup.cron_expression.clone(), Arc::new(service))
}

async fn run(config: AppConfig) -> Result<(), AppError> {
    check_dump_tool(&config);
    let store = connect(&config).await?;
    let scheduler = scheduler(&config, store);

    let shutdown = Arc::new(Notify::new());
    let ctrl_c_count = Arc::new(AtomicUsize::new(0));
    {
        let shutdown = shutdown.clone();
        ctrlc::set_handler(move || {
            if ctrl_c_count.fetch_add(1, Ordering::SeqCst) == 0 {
                println!("\n\nShutdown signal received. Press Ctrl+C again to force exit...");
                shutdown.notify_one();
            } else {
                println!("\nForce exiting...");
                std::process::exit(130);
            }
        })?;
    }

    scheduler.start().await?;
    if let Some(trigger) = scheduler.active_trigger().await {
        info!("Recurring trigger {} armed", trigger);
    }
    println!(
        "DB Dumper started with cron expression: {}",
        style(&config.backup.cron_expression).cyan()
    );
    println!("Press Ctrl+C to exit.");

    shutdown.notified().await;
    if scheduler.is_running().await {
        println!("{}", style("Stopping scheduler...").yellow());
        scheduler.stop().await;
    }
    println!("{}", style("Goodbye!").green());
    Ok(())
}

async fn backup_now(config: AppConfig) -> Result<(), AppError> {
    check_dump_tool(&config);
    let store = connect(&config).await?;
    let report = scheduler(&config, store).run_now().await?;
    print_report(&report);
    Ok(())
}

fn print_report(report: &BackupReport) {
    println!("\n{}", style("=== Backup completed ===").cyan().bold());
    println!("  Key:      {}", style(&report.key).green());
    println!("  Size:     {:.2} MB ({} bytes)", report.bytes as f64 / 1024.0 / 1024.0, report.bytes);
    println!("  SHA-256:  {}", report.sha256);
    println!("  Duration: {:.1}s", report.duration.as_secs_f64());

    match &report.cleanup {
        Ok(summary) if summary.removed.is_empty() => {
            println!("  Cleanup:  nothing to remove ({} kept)", summary.kept)
        }
        Ok(summary) => {
            println!("  Cleanup:  removed {}, kept {}", summary.removed.len(), summary.kept);
            for key in &summary.removed {
                println!("            - {}", style(key).dim());
            }
        }
        Err(CleanupError::Partial { removed, failures }) => {
            println!(
                "  Cleanup:  {} removed, {}",
                removed.len(),
                style(format!("{} failed", failures.len())).yellow()
            );
            for failure in failures {
                println!("            - {}: {}", failure.key, style(&failure.reason).yellow());
            }
        }
        Err(e) => println!("  Cleanup:  {}", style(e).yellow()),
    }
}

async fn list(config: AppConfig) -> Result<(), AppError> {
    let store = connect(&config).await?;
    let backups = upload::list_backups(store.as_ref(), &config.backup.prefix).await?;

    if backups.is_empty() {
        println!("{}", style(format!("No backups under {}/ in {}", config.backup.prefix, store.name())).dim());
        return Ok(());
    }

    println!("\n{}", style(format!("=== Backups in {} ===", store.name())).cyan().bold());
    for entry in &backups {
        println!(
            "  {}  {}",
            style(entry.last_modified.format("%Y-%m-%d %H:%M:%S UTC")).dim(),
            entry.key
        );
    }
    println!("\n{} backup(s)", backups.len());
    Ok(())
}
