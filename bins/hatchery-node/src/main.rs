//! Hatchery node - reveals hatchable Starknet NFTs
//!
//! Runs the hatch resolver against one contract:
//!
//! - every `--poll-interval-ms`
//! - whenever `total_supply` grows past the last seen value
//!
//! Runs never overlap. SIGINT/SIGTERM stops the triggers and lets the
//! in-flight run finish, bounded by `--shutdown-timeout`.
//!
//! # Usage
//!
//! ```bash
//! RUST_LOG=hatchery=debug hatchery-node --network sepolia \
//!     --contract-address 0x...nft \
//!     --account-address 0x...owner --private-key 0x...key \
//!     --deployment-block 812345 \
//!     --metadata-cids ./metadata-cids.json
//! ```

mod config;

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use config::Config;
use hatchery::chain::rpc::{provider, StarknetChain, StarknetHatchContract};
use hatchery::publisher::{IpfsPublisher, IpfsPublisherConfig, MetadataCatalog};
use hatchery::{
    spawn_top_token_watcher, ChainReader, HatchContract, HatchStore, HatchStoreConfig,
    MetadataPublisher, Resolver, Scheduler,
};
use tokio_util::sync::CancellationToken;

const TARGET: &str = "hatchery::main";

#[tokio::main]
async fn main() -> Result<()> {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(true)
        .init();

    let config = Config::parse();
    run_node(config).await
}

async fn run_node(config: Config) -> Result<()> {
    // Fatal before touching the network or the ledger.
    let contract_address = config.contract()?;
    let signer = config.signer()?;
    let deployment = config.deployment()?;
    let rpc_url = config.rpc_url()?;

    tracing::info!(target: TARGET, "Starting hatchery node");
    tracing::info!(target: TARGET, "Network: {:?}", config.network);
    tracing::info!(target: TARGET, "RPC URL: {}", rpc_url);
    tracing::info!(target: TARGET, "Contract: {:#x}", contract_address);
    tracing::info!(target: TARGET, "Deployment: {:?}", deployment);
    tracing::info!(
        target: TARGET,
        "Confirmation wait: {} blocks",
        config.confirmation_wait_blocks
    );
    tracing::info!(target: TARGET, "Ledger: {}", config.db_path);

    let store = Arc::new(
        HatchStore::connect(HatchStoreConfig {
            path: config.db_path.clone(),
            ..HatchStoreConfig::default()
        })
        .await
        .context("Failed to open hatch ledger")?,
    );

    let chain: Arc<dyn ChainReader> =
        Arc::new(StarknetChain::new(provider(&rpc_url), contract_address));
    let contract: Arc<dyn HatchContract> = Arc::new(
        StarknetHatchContract::connect(&rpc_url, contract_address, signer, deployment).await?,
    );

    let catalog = match &config.metadata_cids {
        Some(path) => MetadataCatalog::load(path).await?,
        None => {
            tracing::warn!(
                target: TARGET,
                "No --metadata-cids catalog given, publishing will fail until one is configured"
            );
            MetadataCatalog::default()
        }
    };
    tracing::info!(target: TARGET, "Metadata catalog: {} entries", catalog.len());

    let publisher: Arc<dyn MetadataPublisher> = Arc::new(IpfsPublisher::new(
        IpfsPublisherConfig {
            api_url: config.ipfs_api_url()?,
            base_path: config.metadata_base_path.clone(),
        },
        catalog,
    )?);

    let resolver = Resolver::new(
        config.confirmation_wait_blocks,
        contract.clone(),
        chain,
        publisher,
        store.clone(),
    );

    let shutdown_token = CancellationToken::new();
    let (top_tokens, watcher_handle) = spawn_top_token_watcher(
        contract,
        config.top_token_poll_interval(),
        shutdown_token.clone(),
    );

    let scheduler = Scheduler::new(config.poll_interval(), shutdown_token.clone());
    let scheduler_handle =
        tokio::spawn(async move { scheduler.run(&resolver, top_tokens).await });

    wait_for_signal().await;
    shutdown_token.cancel();

    tracing::info!(target: TARGET, "Waiting for in-flight resolver run to complete...");

    let shutdown_timeout = config.shutdown_timeout;
    match tokio::time::timeout(Duration::from_secs(shutdown_timeout), scheduler_handle).await {
        Ok(Ok(stats)) => {
            tracing::info!(
                target: TARGET,
                runs = stats.runs,
                failed_runs = stats.failed_runs,
                coalesced_triggers = stats.coalesced_triggers,
                "Scheduler completed"
            );
        }
        Ok(Err(e)) => {
            tracing::error!(target: TARGET, "Scheduler panicked: {}", e);
        }
        Err(_) => {
            tracing::warn!(
                target: TARGET,
                "Resolver run did not complete within {}s timeout, forcing shutdown",
                shutdown_timeout
            );
        }
    }

    if let Err(e) = watcher_handle.await {
        tracing::error!(target: TARGET, "Top token watcher panicked: {}", e);
    }
    store.close().await;

    tracing::info!(target: TARGET, "Hatchery shutdown complete");
    Ok(())
}

async fn wait_for_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!(target: TARGET, "Received SIGINT (Ctrl+C), initiating graceful shutdown...");
        }
        _ = terminate => {
            tracing::info!(target: TARGET, "Received SIGTERM, initiating graceful shutdown...");
        }
    }
}
