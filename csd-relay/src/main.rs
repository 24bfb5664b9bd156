//! csd-relay: JotForm to CSD portal relay
//!
//! Receives JotForm webhooks, maps them onto the CSD design portal's
//! project form, submits them, and retries transient failures.

use std::fs::OpenOptions;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use csd_common::config::LoggingConfig;
use csd_common::db::init_database;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use csd_relay::config::{ConfigOverrides, RelayConfig, ResolvedPaths};
use csd_relay::db::{mapping_history, submissions};
use csd_relay::mapping::{MappingConfiguration, MappingStore};
use csd_relay::portal::HttpPortalClient;
use csd_relay::services::{RetryPolicy, SubmissionPipeline};
use csd_relay::AppState;

/// Command-line arguments for csd-relay
#[derive(Parser, Debug)]
#[command(name = "csd-relay")]
#[command(about = "Relays JotForm submissions into the CSD design portal")]
#[command(version)]
struct Args {
    /// Path to csd-relay.toml
    #[arg(short, long, env = "CSD_RELAY_CONFIG")]
    config: Option<PathBuf>,

    /// Port to listen on
    #[arg(short, long, env = "CSD_RELAY_PORT")]
    port: Option<u16>,

    /// Folder holding the database and mapping file
    #[arg(short, long)]
    root_folder: Option<PathBuf>,

    /// SQLite database path
    #[arg(long, env = "CSD_RELAY_DATABASE")]
    database: Option<PathBuf>,

    /// Field mapping JSON path
    #[arg(long, env = "CSD_RELAY_MAPPING")]
    mapping: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug, Clone, Copy, PartialEq, Eq)]
enum Command {
    /// Run the relay service (default)
    Serve,
    /// Validate configuration, mapping, database and portal reachability, then exit
    Check,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let overrides = ConfigOverrides {
        port: args.port,
        root_folder: args.root_folder.clone(),
        database_path: args.database.clone(),
        mapping_file: args.mapping.clone(),
    };
    let (config, paths, source) =
        RelayConfig::load(args.config.as_deref(), &overrides).context("Failed to load configuration")?;

    init_tracing(&config.logging)?;

    info!(
        "Starting csd-relay v{} (git {}, built {}, {})",
        env!("CARGO_PKG_VERSION"),
        env!("GIT_HASH"),
        env!("BUILD_TIMESTAMP"),
        env!("BUILD_PROFILE")
    );
    match &source {
        Some(path) => info!("Configuration: {}", path.display()),
        None => info!("Configuration: built-in defaults"),
    }
    info!("Root folder: {}", paths.root_folder.display());
    info!("Database: {}", paths.database_path.display());
    info!("Field mapping: {}", paths.mapping_file.display());

    match args.command.unwrap_or(Command::Serve) {
        Command::Serve => serve(config, paths).await,
        Command::Check => check(config, paths).await,
    }
}

/// Console output always; a second, non-ANSI layer when a log file is configured
fn init_tracing(logging: &LoggingConfig) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(format!("{},tower_http=info", logging.level)))
        .context("Invalid [logging] level")?;

    let file_layer = match &logging.file {
        Some(path) => {
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("Failed to create log directory {}", parent.display()))?;
            }
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("Failed to open log file {}", path.display()))?;
            Some(
                tracing_subscriber::fmt::layer()
                    .with_ansi(false)
                    .with_writer(Mutex::new(file)),
            )
        }
        None => None,
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .with(file_layer)
        .init();

    Ok(())
}

async fn serve(config: RelayConfig, paths: ResolvedPaths) -> Result<()> {
    let db_pool = init_database(&paths.database_path)
        .await
        .context("Failed to open database")?;
    info!("Database connection established");

    submissions::recover_interrupted(&db_pool)
        .await
        .context("Failed to recover interrupted submissions")?;

    let mappings = Arc::new(
        MappingStore::load(&paths.mapping_file)
            .with_context(|| format!("Invalid field mapping {}", paths.mapping_file.display()))?,
    );
    mapping_history::record_if_changed(&db_pool, &*mappings.current().await, "loaded at startup")
        .await
        .context("Failed to record mapping history")?;

    let portal = Arc::new(HttpPortalClient::new(config.portal.clone()).context("Invalid [portal] configuration")?);
    info!("Portal: {}", config.portal.url);

    let pipeline = SubmissionPipeline::new(db_pool.clone(), mappings, portal);
    let policy = RetryPolicy::from(&config.retry);
    if config.webhook.secret.is_none() {
        warn!("No webhook secret configured; signatures will not be verified");
    }
    let state = AppState::new(pipeline, policy.clone(), config.webhook.clone());

    let cancel = CancellationToken::new();
    let scheduler = state.orchestrator.clone().spawn(policy, cancel.clone());

    let app = csd_relay::build_router(state);

    let addr = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;
    info!("Listening on http://{}", addr);
    info!("Webhook: http://{}/csd-webhook", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    cancel.cancel();
    if let Err(e) = scheduler.await {
        error!(error = %e, "Retry scheduler task ended abnormally");
    }
    db_pool.close().await;

    info!("Server shutdown complete");
    Ok(())
}

async fn check(config: RelayConfig, paths: ResolvedPaths) -> Result<()> {
    let mut failures = 0;

    match MappingConfiguration::load(&paths.mapping_file) {
        Ok(mapping) => {
            let summary = mapping.summary();
            info!(
                version = %summary.version,
                total = summary.total_fields,
                mapped = summary.mapped_fields,
                unmapped = summary.unmapped_fields,
                required = summary.required_fields,
                "Field mapping OK"
            );
        }
        Err(e) => {
            error!("Field mapping invalid: {}", e);
            failures += 1;
        }
    }

    match init_database(&paths.database_path).await {
        Ok(pool) => {
            info!("Database OK");
            pool.close().await;
        }
        Err(e) => {
            error!("Database unavailable: {}", e);
            failures += 1;
        }
    }

    match HttpPortalClient::new(config.portal.clone()) {
        Ok(client) => match client.check_connection().await {
            Ok(report) => info!(
                status = report.status,
                elapsed_ms = report.elapsed_ms,
                state_fields = ?report.state_fields_found,
                "Portal reachable"
            ),
            Err(e) => {
                error!("Portal check failed: {}", e);
                failures += 1;
            }
        },
        Err(e) => {
            error!("Portal configuration invalid: {}", e);
            failures += 1;
        }
    }

    if failures > 0 {
        bail!("{} check(s) failed", failures);
    }
    info!("All checks passed");
    Ok(())
}

/// Resolves on Ctrl+C or SIGTERM
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, shutting down");
        },
        _ = terminate => {
            info!("Received terminate signal, shutting down");
        },
    }
}
