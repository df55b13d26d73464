#![doc = include_str!("../README.md")]

mod node;

use anyhow::Context;
use clap::Parser;
use ferroid_lease::{
    Error, IdGeneratorFactory, LeaseState, NodeAllocator, NodeLease, RedisLeaseStore,
    SnowflakeFactory,
};
use node::config::{CliArgs, NodeConfig};
use node::telemetry::init_telemetry;
use std::sync::Arc;
use tokio::{signal, sync::watch};

#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load from .env
    let _ = dotenvy::dotenv();
    let args = CliArgs::parse();
    let config = NodeConfig::try_from(args)?;

    init_telemetry(config.log_format)?;
    log_startup_info(&config);

    let store = RedisLeaseStore::connect(&config.redis_url)
        .await
        .context("failed to connect to the lease store")?;
    let allocator = NodeAllocator::new(Arc::new(store), config.lease.clone())?;

    let lease = match allocator.acquire_node_id().await {
        Ok(lease) => lease,
        Err(e) => {
            log_allocation_failure(&e);
            return Err(e).context("node ID allocation failed, aborting startup");
        }
    };

    let generator = SnowflakeFactory::default().build(lease.node_id())?;
    let first_id = generator.next_id(|_| std::thread::yield_now());
    tracing::info!(
        node_id = %lease.node_id(),
        key = lease.key(),
        first_id = ?first_id,
        "Node ready"
    );

    run_until_shutdown(lease, config.release_on_shutdown).await
}

/// Holds the lease until a shutdown signal arrives or the lease is lost.
async fn run_until_shutdown(lease: NodeLease, release: bool) -> anyhow::Result<()> {
    tokio::select! {
        res = shutdown_signal() => res?,
        cause = wait_for_loss(lease.subscribe()) => {
            let key = lease.key().to_string();
            lease.stop().await;
            match cause {
                Loss::Lost => {
                    tracing::error!(%key, "Lease lost, exiting so the node ID is not reused");
                }
                Loss::HeartbeatEnded => {
                    tracing::error!(%key, "Heartbeat task ended unexpectedly, exiting so the node ID is not reused");
                }
            }
            return Err(Error::LeaseLost { key }.into());
        }
    }

    tracing::info!("Shutdown signal received, terminating gracefully...");

    if release {
        if let Err(e) = lease.release().await {
            tracing::warn!("Failed to release lease: {e}");
        }
    } else {
        let final_state = lease.stop().await;
        tracing::info!(state = ?final_state, "Heartbeat stopped, lease left to expire");
    }

    tracing::info!("Node shut down successfully");
    Ok(())
}

#[derive(Debug, PartialEq, Eq)]
enum Loss {
    /// The renewer reported the lease as lost.
    Lost,
    /// The renewer went away without reporting a state.
    HeartbeatEnded,
}

/// Resolves once the lease can no longer be trusted.
async fn wait_for_loss(mut state: watch::Receiver<LeaseState>) -> Loss {
    match state.wait_for(|s| *s == LeaseState::Lost).await {
        Ok(_) => Loss::Lost,
        Err(_) => Loss::HeartbeatEnded,
    }
}

fn log_allocation_failure(err: &Error) {
    match err {
        Error::NodeSpaceExhausted { slots } => {
            tracing::error!(slots, "No node ID available: every slot is leased by a live process");
        }
        Error::StoreUnavailable { op, key, reason } => {
            tracing::error!(%op, %key, %reason, "Lease store unreachable during allocation");
        }
        other => tracing::error!("Node ID allocation failed: {other}"),
    }
}

fn log_startup_info(config: &NodeConfig) {
    if cfg!(debug_assertions) {
        tracing::info!("Starting node with full config: {config:#?}");
    } else {
        tracing::info!(
            "Starting node with {} slots under `{}`",
            config.lease.slots,
            config.lease.key_prefix
        );
    }
}

async fn shutdown_signal() -> anyhow::Result<()> {
    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .context("failed to install signal handler")?
            .recv()
            .await;
        anyhow::Ok(())
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<anyhow::Result<()>>();

    tokio::select! {
        res = signal::ctrl_c() => {
            res.context("failed to install Ctrl+C handler")?;
            tracing::info!("Received Ctrl+C signal");
        },
        res = terminate => {
            res?;
            tracing::info!("Received SIGTERM signal");
        },
    }
    Ok(())
}
