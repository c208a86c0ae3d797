// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! fleetsync command-line interface.
//!
//! `fleetsync replicate` runs the replication manager described by the YAML
//! configuration; `fleetsync restore-pattern` bulk-recovers databases
//! matching a pattern.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tokio::sync::watch;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use fleetsync::manager::IntegratedManager;
use fleetsync::remote::factory::s3_client_builder;
use fleetsync::remote::{S3RemoteClient, S3RemoteConfig};
use fleetsync::restore::{RestoreEngine, RestoreOptions};
use fleetsync::snapshot::SnapshotReplicator;
use fleetsync::{FleetConfig, FleetError, FleetMetrics};

const DEFAULT_CONFIG_PATH: &str = "/etc/fleetsync.yml";

#[derive(Parser)]
#[command(name = "fleetsync", version, about = "Replicate fleets of SQLite databases to object storage")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the replication manager for all configured databases.
    Replicate {
        /// Configuration file.
        #[arg(long, default_value = DEFAULT_CONFIG_PATH)]
        config: PathBuf,
        /// Disable environment-variable expansion in the configuration.
        #[arg(long)]
        no_expand_env: bool,
    },
    /// Restore every database matching a pattern.
    ///
    /// Patterns with a remote:// scheme discover backups by listing the
    /// bucket; any other pattern is matched against the configuration's
    /// databases list.
    RestorePattern {
        /// Pattern to match, e.g. "/data/**/*.db" or "remote://bucket/acme/**".
        pattern: String,
        /// Configuration file (config-backed discovery).
        #[arg(long)]
        config: Option<PathBuf>,
        /// Disable environment-variable expansion in the configuration.
        #[arg(long)]
        no_expand_env: bool,
        /// Base directory for restored databases. Defaults to original paths.
        #[arg(long)]
        output_dir: Option<PathBuf>,
        /// Number of parallel restore operations.
        #[arg(long, default_value_t = 10)]
        parallel: usize,
        /// Show progress during restore.
        #[arg(long)]
        progress: bool,
        /// Skip databases that already exist locally.
        #[arg(long)]
        if_db_not_exists: bool,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    let result = match cli.command {
        Command::Replicate {
            config,
            no_expand_env,
        } => run_replicate(&config, !no_expand_env).await.map(|()| 0),
        Command::RestorePattern {
            pattern,
            config,
            no_expand_env,
            output_dir,
            parallel,
            progress,
            if_db_not_exists,
        } => {
            let options = RestoreOptions {
                config_path: Some(config.unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH))),
                expand_env: !no_expand_env,
                output_dir,
                parallel,
                progress,
                if_db_not_exists,
            };
            run_restore(&pattern, &options).await
        }
    };

    match result {
        Ok(0) => ExitCode::SUCCESS,
        Ok(code) => ExitCode::from(code),
        Err(e) => {
            error!(error = %e, "command failed");
            ExitCode::FAILURE
        }
    }
}

async fn run_replicate(config_path: &PathBuf, expand_env: bool) -> Result<(), FleetError> {
    let config = FleetConfig::load(config_path, expand_env)?;
    if !config.enabled && config.snapshot.is_none() {
        return Err(FleetError::Config(
            "nothing to run: set `enabled: true` or configure a `snapshot` block".into(),
        ));
    }

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let mut snapshot_task = None;
    if let Some(snapshot_config) = config.snapshot.clone() {
        let mut remote_config = S3RemoteConfig::for_bucket(snapshot_config.bucket.clone());
        if !snapshot_config.region.is_empty() {
            remote_config.region = Some(snapshot_config.region.clone());
        }
        if !snapshot_config.endpoint.is_empty() {
            remote_config.endpoint = Some(snapshot_config.endpoint.clone());
        }
        let client = Arc::new(S3RemoteClient::connect(remote_config).await?);

        let replicator = SnapshotReplicator::new(snapshot_config, client, FleetMetrics::new());
        let rx = shutdown_rx.clone();
        let runner = Arc::clone(&replicator);
        snapshot_task = Some(tokio::spawn(async move { runner.run(rx).await }));
    }

    let mut facade = None;
    if config.enabled {
        let manager = IntegratedManager::new(config)?;
        manager.set_client_builder(s3_client_builder());
        Arc::clone(&manager).start().await?;
        facade = Some(manager);
    }

    info!("replication running; send SIGINT to stop");
    tokio::signal::ctrl_c()
        .await
        .map_err(FleetError::Io)?;
    info!("shutting down");

    let _ = shutdown_tx.send(true);
    if let Some(handle) = snapshot_task {
        let _ = handle.await;
    }
    if let Some(manager) = facade {
        manager.stop().await;
    }
    Ok(())
}

async fn run_restore(pattern: &str, options: &RestoreOptions) -> Result<u8, FleetError> {
    let engine = RestoreEngine::with_s3();
    let summary = engine.run(pattern, options).await?;

    println!(
        "total={} success={} errors={}",
        summary.total, summary.success, summary.errors
    );
    Ok(u8::from(!summary.is_success()))
}
