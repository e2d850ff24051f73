//! Worker daemon
//!
//! Runs the agent-queue worker loop and the run reaper against the
//! configured database until SIGINT/SIGTERM.
//!
//! Collaborator wiring follows the configuration: `--dry-run` (or
//! `dry_run = true`) uses the built-in keyword classifier and recording
//! executors; otherwise the `[collaborators]` endpoints are required and
//! every collaborator call goes over HTTP.

use anyhow::{bail, Result};
use clap::Parser;
use docket_engine::collaborators::Collaborators;
use docket_engine::{AppContext, EngineConfig};
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Docket agent run-engine worker
#[derive(Debug, Parser)]
#[command(name = "docketd", version, about)]
struct Args {
    /// Path to a TOML configuration file
    #[arg(long, env = "DOCKET_CONFIG")]
    config: Option<String>,

    /// Path to the SQLite database (overrides the config file)
    #[arg(long, env = "DOCKET_DB")]
    database: Option<String>,

    /// Record side effects instead of dispatching them
    #[arg(long)]
    dry_run: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => EngineConfig::from_path(path)?,
        None => EngineConfig::default(),
    };
    if let Some(database) = args.database {
        config.database_path = database;
    }
    if args.dry_run {
        config.dry_run = true;
    }

    let collaborators = if config.dry_run {
        info!("Dry-run mode: side effects are recorded, not dispatched");
        Collaborators::dry_run()
    } else if let Some(endpoints) = &config.collaborators {
        info!(
            classifier = %endpoints.classifier_url,
            email = %endpoints.email_url,
            "Using remote collaborator endpoints"
        );
        Collaborators::remote(endpoints)
    } else {
        bail!(
            "no collaborator endpoints configured; add a [collaborators] section \
             to the config file or pass --dry-run"
        );
    };

    info!(database = %config.database_path, dry_run = config.dry_run, "Starting docketd");

    let ctx = AppContext::init(config, collaborators).await?;
    ctx.shutdown.install_signal_handlers();

    let worker = ctx.spawn_worker();
    let reaper = ctx.spawn_reaper();

    ctx.shutdown.wait().await;

    let _ = worker.await;
    let _ = reaper.await;
    ctx.teardown().await;

    info!("docketd stopped");
    Ok(())
}
