//! secdet - security-detection task execution engine.
//!
//! Usage:
//!   secdet serve [--config <file>] [--catalog <file>]   Run the API and workers
//!   secdet validate [--config <file>] [--catalog <file>] Check configuration files
//!   secdet run --target <ip> [--case <id>]...            Run one task in-process

use clap::{Parser, Subcommand};
use secdet::api::{create_api_state, start_server};
use secdet::config::{EngineConfig, StorageConfig, YamlLoader, build_runner, load_catalog};
use secdet::events::{self, EventHandler, EventSender, LogHandler};
use secdet::{
    Broadcaster, CaseId, Dispatcher, InMemoryStorage, Orchestrator, Storage, SubmitRequest,
    TargetAddr, UserId, submit_task,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{error, info};

/// secdet - run security-detection scripts against a target
#[derive(Parser)]
#[command(name = "secdet")]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Serve the HTTP API and execute submitted tasks
    Serve {
        /// Engine configuration file (defaults apply when omitted)
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Case catalog to seed into storage at startup
        #[arg(long)]
        catalog: Option<PathBuf>,
    },

    /// Validate configuration files without running
    Validate {
        /// Engine configuration file
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Case catalog file
        #[arg(long)]
        catalog: Option<PathBuf>,
    },

    /// Submit one task, run it in-process and print the results
    Run {
        /// Target IPv4 address
        #[arg(long)]
        target: String,

        /// Case to run; repeat for several (default: every enabled case)
        #[arg(long = "case", value_name = "CASE_ID")]
        cases: Vec<i64>,

        /// Engine configuration file
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Case catalog to load
        #[arg(long)]
        catalog: Option<PathBuf>,

        /// Owning user id recorded on the task
        #[arg(long, default_value = "0")]
        user: i64,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Serve { config, catalog } => {
            let config = load_config(config.as_deref())?;
            match config.storage.clone() {
                StorageConfig::Memory => {
                    serve(Arc::new(InMemoryStorage::new()), config, catalog).await?
                }
                #[cfg(feature = "sqlite")]
                StorageConfig::Sqlite { path } => {
                    let storage = secdet::SqliteStorage::new(&path).await?;
                    info!("Using SQLite storage at {}", path);
                    serve(Arc::new(storage), config, catalog).await?
                }
                #[cfg(not(feature = "sqlite"))]
                StorageConfig::Sqlite { .. } => {
                    return Err("sqlite storage requires the `sqlite` feature".into());
                }
            }
        }
        Commands::Validate { config, catalog } => {
            validate(config.as_deref(), catalog.as_deref())?;
        }
        Commands::Run {
            target,
            cases,
            config,
            catalog,
            user,
        } => {
            let config = load_config(config.as_deref())?;
            run_once(config, catalog, &target, cases, user).await?;
        }
    }

    Ok(())
}

fn load_config(path: Option<&Path>) -> Result<EngineConfig, Box<dyn std::error::Error>> {
    match path {
        Some(path) => {
            info!("Loading configuration from: {}", path.display());
            Ok(YamlLoader::load_engine_config(path)?)
        }
        None => Ok(EngineConfig::default()),
    }
}

/// Run the API server and dispatcher until Ctrl+C.
async fn serve<S: Storage + 'static>(
    storage: Arc<S>,
    config: EngineConfig,
    catalog: Option<PathBuf>,
) -> Result<(), Box<dyn std::error::Error>> {
    if let Some(path) = catalog {
        let summary = load_catalog(&path, storage.as_ref()).await?;
        info!(
            "Catalog {}: {} new case(s), {} already present",
            path.display(),
            summary.cases_created,
            summary.cases_existing
        );
    }

    let broadcaster = Broadcaster::new();
    let (sender, receiver) = EventSender::channel();
    let handlers: Vec<Arc<dyn EventHandler>> =
        vec![Arc::new(LogHandler), Arc::new(broadcaster.clone())];
    let pump = tokio::spawn(events::pump(receiver, handlers));

    let orchestrator = Orchestrator::new(storage, build_runner(&config), sender);
    let (dispatch, dispatcher_task) = Dispatcher::new(orchestrator.clone())
        .with_concurrency(config.worker_concurrency)
        .with_queue_capacity(config.queue_capacity)
        .start();

    let state = create_api_state(orchestrator, broadcaster, dispatch.clone(), &config);
    let server = start_server(&config.api, state).await?;

    info!(
        "Scripts: {}, logs: {}, timeout: {}s, workers: {}",
        config.scripts_dir.display(),
        config.logs_dir.display(),
        config.script_timeout_secs,
        config.worker_concurrency
    );
    info!("Press Ctrl+C to stop");

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("Shutting down...");
        }
        _ = dispatcher_task => {
            error!("Dispatcher stopped unexpectedly");
        }
    }

    server.abort();
    if let Err(e) = dispatch.shutdown().await {
        error!("Dispatcher shutdown failed: {}", e);
    }
    pump.abort();

    info!("Goodbye!");
    Ok(())
}

/// Check configuration files without touching storage or scripts.
fn validate(config: Option<&Path>, catalog: Option<&Path>) -> Result<(), Box<dyn std::error::Error>> {
    if config.is_none() && catalog.is_none() {
        return Err("nothing to validate: pass --config and/or --catalog".into());
    }

    if let Some(path) = config {
        match YamlLoader::load_engine_config(path) {
            Ok(_) => info!("{}: OK", path.display()),
            Err(e) => {
                error!("Validation failed: {}", e);
                return Err(e.into());
            }
        }
    }

    if let Some(path) = catalog {
        match YamlLoader::load_catalog_config(path) {
            Ok(catalog) => {
                let cases: usize = catalog.categories.iter().map(|c| c.cases.len()).sum();
                info!(
                    "{}: OK ({} categories, {} cases)",
                    path.display(),
                    catalog.categories.len(),
                    cases
                );
            }
            Err(e) => {
                error!("Validation failed: {}", e);
                return Err(e.into());
            }
        }
    }

    Ok(())
}

/// Submit one task against in-memory storage, run it and print the outcome.
async fn run_once(
    config: EngineConfig,
    catalog: Option<PathBuf>,
    target: &str,
    cases: Vec<i64>,
    user: i64,
) -> Result<(), Box<dyn std::error::Error>> {
    let target = TargetAddr::parse(target)?;
    let storage = Arc::new(InMemoryStorage::new());
    if let Some(path) = catalog {
        load_catalog(&path, storage.as_ref()).await?;
    }

    let mut request = SubmitRequest::new(target, UserId::new(user));
    if !cases.is_empty() {
        request = request.with_cases(cases.into_iter().map(CaseId::new).collect());
    }
    let (task, _) = submit_task(storage.as_ref(), request).await?;

    let (sender, receiver) = EventSender::channel();
    let pump = tokio::spawn(events::pump(receiver, vec![Arc::new(LogHandler)]));
    let orchestrator = Orchestrator::new(storage.clone(), build_runner(&config), sender);

    let summary = orchestrator.run_task(task.id).await?;
    drop(orchestrator);
    let _ = pump.await;

    println!();
    println!("Task {} against {}: {}", task.id, target, summary.status);
    println!(
        "  passed: {}, failed: {}, errors: {}",
        summary.passed, summary.failed, summary.errors
    );
    for unit in storage.list_units(task.id).await? {
        let case = storage.get_case(unit.case_id).await.ok();
        let name = case.map_or_else(|| format!("case {}", unit.case_id), |c| c.name);
        match &unit.error_message {
            Some(message) => println!("  - {}: {} ({})", name, unit.status, message),
            None => println!("  - {}: {}", name, unit.status),
        }
        if let Some(log) = &unit.log_path {
            println!("      log: {}", log.display());
        }
    }

    Ok(())
}
