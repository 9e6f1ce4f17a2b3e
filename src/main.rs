//! # Catalog Sync Entry Point
//!
//! `run` starts the scheduler loop; the other subcommands run one operation
//! and exit.

use std::sync::Arc;

use anyhow::{Context, Result, bail};
use catalog_sync::{
    app::AppContext,
    catalog::{UpsertEngine, actor},
    config::ConfigLoader,
    db, jobs,
    repositories::ProductRepository,
    scheduler::CatalogScheduler,
    telemetry::{RunContext, init_tracing, with_run_context},
};
use clap::{Parser, Subcommand};
use serde::Serialize;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use uuid::Uuid;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Apply migrations and run the scheduler until interrupted
    Run,
    /// Apply pending database migrations
    Migrate,
    #[command(subcommand)]
    Import(ImportCommand),
    #[command(subcommand)]
    Sync(SyncCommand),
    #[command(subcommand)]
    Job(JobCommand),
    #[command(subcommand)]
    Quarantine(QuarantineCommand),
    #[command(subcommand)]
    Product(ProductCommand),
    /// Show operator notices
    Notices,
}

#[derive(Subcommand, Debug)]
enum ImportCommand {
    /// Start a full import unless one is running
    Start,
    /// Run one bounded slice of the active import
    Tick,
}

#[derive(Subcommand, Debug)]
enum SyncCommand {
    Incremental,
    /// Start a force re-sync if none is active, then run one slice
    Force,
    Outdated,
}

#[derive(Subcommand, Debug)]
enum JobCommand {
    Show { id: Uuid },
    List {
        #[arg(long)]
        source: Option<String>,
        #[arg(long, default_value_t = 20)]
        limit: u64,
    },
    Pause { id: Uuid },
    Resume { id: Uuid },
    Cancel { id: Uuid },
}

#[derive(Subcommand, Debug)]
enum QuarantineCommand {
    List,
    /// Clear one SKU, or every SKU when none is given
    Clear { sku: Option<String> },
}

#[derive(Subcommand, Debug)]
enum ProductCommand {
    /// Take a product out of stock without releasing its SKU
    Hold {
        sku: String,
        #[arg(long, default_value = "held by operator")]
        reason: String,
    },
    /// Bring a deprecated product back under its SKU
    Restore { sku: String },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = ConfigLoader::new()
        .load()
        .context("loading configuration")?;
    init_tracing(&config).context("initializing telemetry")?;
    info!(profile = %config.profile, "Configuration loaded");

    let app = AppContext::connect(config)
        .await
        .context("initializing application context")?;

    with_run_context(RunContext::new("cli"), execute(cli.command, app)).await
}

async fn execute(command: Command, app: AppContext) -> Result<()> {
    match command {
        Command::Run => {
            db::migrate(&app.db).await?;
            db::health_check(&app.db).await?;
            let shutdown = CancellationToken::new();
            let scheduler = CatalogScheduler::new(Arc::new(app));
            let handle = tokio::spawn(scheduler.run(shutdown.clone()));

            shutdown_signal().await;
            shutdown.cancel();
            handle
                .await
                .context("scheduler task panicked")?
                .context("scheduler stopped with an error")?;
        }
        Command::Migrate => {
            db::migrate(&app.db).await?;
            info!("Migrations applied");
        }
        Command::Import(ImportCommand::Start) => match app.import.start_import().await? {
            Some(job) => print_json(&job.progress(chrono::Utc::now()))?,
            None => println!("import already running; nothing started"),
        },
        Command::Import(ImportCommand::Tick) => {
            let outcome = app.import.run_import_tick().await?;
            println!("{outcome:?}");
        }
        Command::Sync(SyncCommand::Incremental) => {
            let outcome = app.sync.run_incremental_tick().await?;
            println!("{outcome:?}");
        }
        Command::Sync(SyncCommand::Force) => {
            if let Some(job) = app.sync.start_force_sync().await? {
                info!(job_id = %job.id, "Force sync queued");
            }
            let outcome = app.sync.run_force_sync_tick().await?;
            println!("{outcome:?}");
        }
        Command::Sync(SyncCommand::Outdated) => {
            let outcome = app.sync.run_outdated_sync_tick().await?;
            println!("{outcome:?}");
        }
        Command::Job(command) => job_command(&app, command).await?,
        Command::Quarantine(QuarantineCommand::List) => {
            let entries = app.quarantine.list(&app.db).await?;
            print_json(&entries)?;
        }
        Command::Quarantine(QuarantineCommand::Clear { sku: Some(sku) }) => {
            if !app.quarantine.clear(&app.db, &sku).await? {
                bail!("SKU {sku} is not quarantined");
            }
            println!("cleared {sku}");
        }
        Command::Quarantine(QuarantineCommand::Clear { sku: None }) => {
            let cleared = app.quarantine.clear_all(&app.db).await?;
            println!("cleared {cleared} SKUs");
        }
        Command::Product(command) => product_command(&app, command).await?,
        Command::Notices => print_json(&app.notices.list(&app.db).await?)?,
    }
    Ok(())
}

async fn job_command(app: &AppContext, command: JobCommand) -> Result<()> {
    let now = chrono::Utc::now();
    match command {
        JobCommand::Show { id } => print_json(&jobs::job_progress(&app.db, id).await?),
        JobCommand::List { source, limit } => {
            print_json(&jobs::recent_jobs(&app.db, source.as_deref(), limit).await?)
        }
        JobCommand::Pause { id } => print_json(&jobs::pause_job(&app.db, id).await?.progress(now)),
        JobCommand::Resume { id } => {
            print_json(&jobs::resume_job(&app.db, id).await?.progress(now))
        }
        JobCommand::Cancel { id } => {
            print_json(&jobs::cancel_job(&app.db, id).await?.progress(now))
        }
    }
}

async fn product_command(app: &AppContext, command: ProductCommand) -> Result<()> {
    match command {
        ProductCommand::Hold { sku, reason } => {
            let Some(product) = ProductRepository::find_by_sku(&app.db, &sku).await? else {
                bail!("no product with SKU {sku}");
            };
            if UpsertEngine::set_out_of_stock(&app.db, product.id, &reason, actor::OPERATOR).await? {
                println!("{sku} is now out of stock");
            } else {
                println!("{sku} was already held");
            }
        }
        ProductCommand::Restore { sku } => {
            let held = ProductRepository::find_by_sku(&app.db, &sku)
                .await?
                .filter(|product| product.deprecated);
            let product = match held {
                Some(product) => Some(product),
                None => ProductRepository::find_by_backup_sku(&app.db, &sku).await?,
            };
            let Some(product) = product else {
                bail!("no deprecated product was known as {sku}");
            };
            let restored = UpsertEngine::restore(&app.db, product.id, &sku).await?;
            println!("restored {sku} as product {}", restored.id);
        }
    }
    Ok(())
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Waits for SIGINT, or SIGTERM on Unix.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = signal::ctrl_c().await {
            error!(error = %err, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(err) => {
                error!(error = %err, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => info!("Received SIGINT, shutting down"),
        () = terminate => info!("Received SIGTERM, shutting down"),
    }
}
