use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tokio::sync::mpsc;
use tracing::{error, info, level_filters::LevelFilter, trace};
use tracing_subscriber::{filter, layer::SubscriberExt, util::SubscriberInitExt};
use unitwatch::{
    actors::{
        collector::CollectorHandle,
        storage::{PersistPolicy, StorageHandle},
    },
    api::{ApiConfig, ApiState, spawn_api_server},
    collectors::{CommandRunner, ProcessRunner},
    config::read_config_file,
    health::HealthAggregator,
    storage::{StorageBackend, sqlite::SqliteBackend},
};

#[derive(Debug, Clone, Parser)]
#[command(version, about)]
struct Args {
    /// Config file
    #[arg(short, long, default_value = "./config.yaml")]
    config: PathBuf,

    /// More log output (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

fn init(verbose: u8) {
    let level = match verbose {
        0 => LevelFilter::INFO,
        1 => LevelFilter::DEBUG,
        _ => LevelFilter::TRACE,
    };

    let filter = filter::Targets::new().with_targets(vec![
        ("unitwatch", level),
        ("tower_http", level),
    ]);
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .compact()
                .with_ansi(false),
        )
        .with(filter)
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    let args = Args::parse();
    init(args.verbose);
    trace!("started with args: {args:?}");

    let config = read_config_file(&args.config)
        .with_context(|| format!("failed to load {}", args.config.display()))?;

    let backend: Arc<dyn StorageBackend> = Arc::new(
        SqliteBackend::new(&config.database.path)
            .await
            .context("failed to open the status database")?,
    );

    let (event_tx, event_rx) = mpsc::unbounded_channel();
    let storage = StorageHandle::spawn(
        Arc::clone(&backend),
        PersistPolicy::from(&config.store),
        event_rx,
    );

    let runner: Arc<dyn CommandRunner> = Arc::new(ProcessRunner);
    let mut collectors = Vec::with_capacity(config.collectors.len());
    for (index, collector) in config.collectors.iter().enumerate() {
        let handle =
            CollectorHandle::from_config(index, collector, Arc::clone(&runner), event_tx.clone())
                .with_context(|| format!("invalid collector #{index}"))?;
        info!(
            "started {} collector for {} nodes",
            handle.kind, handle.node_count
        );
        collectors.push(handle);
    }
    // The collectors own the remaining senders
    drop(event_tx);

    let aggregator = HealthAggregator::new(Arc::clone(&backend), config.groups());
    let api_config = ApiConfig::from_http(&config.http)?;
    let state = ApiState::new(
        aggregator,
        storage.clone(),
        Arc::clone(&backend),
        collectors.clone(),
    );
    let addr = spawn_api_server(api_config, state).await?;
    info!("health reports at http://{addr}/api/v1/system/health");

    shutdown_signal().await?;
    info!("shutting down");

    for collector in &collectors {
        if let Err(e) = collector.shutdown().await {
            error!("failed to stop {}: {:#}", collector.display_name, e);
        }
    }

    storage.shutdown().await?;
    backend.close().await?;

    info!("bye");
    Ok(())
}

/// Resolves on SIGINT or SIGTERM
async fn shutdown_signal() -> std::io::Result<()> {
    #[cfg(unix)]
    {
        let mut terminate =
            tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?;

        tokio::select! {
            result = tokio::signal::ctrl_c() => {
                info!("received SIGINT");
                result
            }
            _ = terminate.recv() => {
                info!("received SIGTERM");
                Ok(())
            }
        }
    }

    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await
    }
}
