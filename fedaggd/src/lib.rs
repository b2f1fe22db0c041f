//! `fedaggd` aggregates the shares clients submit over HTTP and posts the
//! aggregated model back to them once a round is complete.

pub mod api;
pub mod broadcast;
pub mod config;
pub mod envs;
mod metrics;

use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use fedagg_core::RoundCoordinator;
use fedagg_core::task::TaskGroup;
use fedagg_logging::{LOG_CONFIG, LOG_TASK, TracingSetup};
use tracing::{error, info};

use crate::broadcast::HttpBroadcast;
use crate::config::{AggregatorConfig, ServerOpts};

/// Version of the server code
pub const CODE_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Time we will wait before forcefully shutting down tasks
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(10);

pub async fn run() -> anyhow::Result<()> {
    if std::env::args().nth(1).as_deref() == Some("version-hash") {
        println!("{CODE_VERSION}");
        return Ok(());
    }

    let opts = ServerOpts::parse();

    let mut tracing_setup = TracingSetup::default();
    for directive in &opts.log_directives {
        tracing_setup.with_directive(directive);
    }
    tracing_setup.init()?;

    info!(target: LOG_CONFIG, "Starting fedaggd (version: {CODE_VERSION})");

    let cfg = AggregatorConfig::from_opts(opts)?;
    info!(
        target: LOG_CONFIG,
        server_index = cfg.server_index,
        quorum = cfg.quorum.get(),
        clients = cfg.clients.len(),
        fractional_bits = cfg.codec.fractional_bits(),
        "Loaded configuration"
    );

    let task_group = TaskGroup::new();
    task_group.install_kill_handler();

    if let Err(err) = start(&cfg, &task_group).await {
        error!(target: LOG_CONFIG, err = %format!("{err:#}"), "Failed to start, shutting down");
        task_group.shutdown_join_all(SHUTDOWN_TIMEOUT).await?;
        return Err(err);
    }

    task_group.make_handle().make_shutdown_rx().await;
    info!(target: LOG_TASK, "Shutdown called, waiting for tasks to finish");

    if let Err(err) = task_group.join_all(Some(SHUTDOWN_TIMEOUT)).await {
        error!(target: LOG_TASK, ?err, "Error while shutting down task group");
    }

    info!(target: LOG_TASK, "Shutdown complete");
    Ok(())
}

async fn start(cfg: &AggregatorConfig, task_group: &TaskGroup) -> anyhow::Result<()> {
    let broadcast = HttpBroadcast::new(cfg.clients.clone(), cfg.broadcast_timeout)?;
    let coordinator = Arc::new(RoundCoordinator::new(
        cfg.quorum,
        cfg.codec,
        Arc::new(broadcast),
    ));

    if let Some(bind_metrics) = cfg.metrics_bind {
        fedagg_metrics::spawn_api_server(bind_metrics, task_group.clone()).await?;
    }

    api::run_api_server(cfg.api_bind, coordinator, cfg.max_share_bytes, task_group).await?;

    Ok(())
}
