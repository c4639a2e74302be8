//! Configuration for the hatch resolver node

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use hatchery::chain::rpc::OwnerSigner;
use hatchery::Deployment;
use starknet::core::types::Felt;
use url::Url;

/// Network the contract is deployed on. Picks the default RPC endpoint.
#[derive(Clone, Copy, Debug, Default, ValueEnum, PartialEq, Eq)]
pub enum Network {
    #[default]
    Mainnet,
    Sepolia,
    /// Local devnet (starknet-devnet / katana)
    Devnet,
}

impl Network {
    pub fn default_rpc_url(self) -> &'static str {
        match self {
            Self::Mainnet => "https://api.cartridge.gg/x/starknet/mainnet",
            Self::Sepolia => "https://api.cartridge.gg/x/starknet/sepolia",
            Self::Devnet => "http://localhost:5050",
        }
    }
}

/// Hatch resolver node
///
/// Watches a hatchable ERC721 contract, publishes revealed metadata once a
/// token has waited long enough after its mint, and points the contract's
/// base URI at it.
///
/// # Examples
///
/// ```bash
/// # Sepolia, deployment known by its transaction
/// hatchery-node --network sepolia \
///     --contract-address 0x...nft \
///     --account-address 0x...owner --private-key 0x...key \
///     --deployment-tx 0x...deploy \
///     --metadata-cids ./metadata-cids.json
///
/// # Local devnet, reveal right after mint
/// hatchery-node --network devnet --confirmation-wait-blocks 0 ...
/// ```
#[derive(Parser, Debug)]
#[command(name = "hatchery-node")]
#[command(about = "Reveal hatchable NFTs on Starknet", long_about = None)]
pub struct Config {
    /// Network used to pick the default RPC URL
    #[arg(long, env = "HATCHERY_NETWORK", value_enum, default_value = "mainnet")]
    pub network: Network,

    /// Starknet RPC URL (overrides the network default)
    #[arg(long, env = "STARKNET_RPC_URL")]
    pub rpc_url: Option<String>,

    /// Hatchable NFT contract address
    #[arg(long, env = "HATCHERY_CONTRACT_ADDRESS")]
    pub contract_address: Option<String>,

    /// Contract owner account that signs `set_base_uri`
    #[arg(long, env = "HATCHERY_ACCOUNT_ADDRESS")]
    pub account_address: Option<String>,

    /// Private key of the owner account
    #[arg(long, env = "HATCHERY_PRIVATE_KEY", hide_env_values = true)]
    pub private_key: Option<String>,

    /// Contract deployment transaction, used to find where mint scans start
    #[arg(long)]
    pub deployment_tx: Option<String>,

    /// Contract deployment block, used when the transaction is not given
    #[arg(long)]
    pub deployment_block: Option<u64>,

    /// Resolver timer period in milliseconds
    #[arg(long, env = "HATCHERY_POLL_INTERVAL_MS", default_value = "60000")]
    pub poll_interval_ms: u64,

    /// Blocks a token must wait after its mint before it can hatch
    #[arg(long, env = "HATCHERY_CONFIRMATION_WAIT_BLOCKS", default_value = "10")]
    pub confirmation_wait_blocks: u64,

    /// How often `total_supply` is polled for new mints, in milliseconds
    #[arg(long, default_value = "5000")]
    pub top_token_poll_ms: u64,

    /// SQLite ledger path (`:memory:` for a throwaway ledger)
    #[arg(long, env = "HATCHERY_DB_PATH", default_value = "./hatchery-data/hatchery.db")]
    pub db_path: String,

    /// IPFS HTTP API root
    #[arg(long, default_value = "http://127.0.0.1:5001")]
    pub ipfs_api_url: String,

    /// JSON catalog mapping token ids to their metadata CIDs
    #[arg(long)]
    pub metadata_cids: Option<PathBuf>,

    /// MFS directory the revealed metadata is written to
    #[arg(long, default_value = "/metadata")]
    pub metadata_base_path: String,

    /// Seconds to wait for an in-flight run on shutdown
    #[arg(long, default_value = "30")]
    pub shutdown_timeout: u64,
}

impl Config {
    /// Parse a hex address string to Felt
    pub fn parse_address(addr: &str) -> Result<Felt> {
        Felt::from_hex(addr).map_err(|e| anyhow::anyhow!("Invalid address {addr}: {e}"))
    }

    pub fn rpc_url(&self) -> Result<Url> {
        let raw = self
            .rpc_url
            .as_deref()
            .unwrap_or_else(|| self.network.default_rpc_url());
        Url::parse(raw).with_context(|| format!("Invalid RPC URL {raw}"))
    }

    pub fn ipfs_api_url(&self) -> Result<Url> {
        Url::parse(&self.ipfs_api_url)
            .with_context(|| format!("Invalid IPFS API URL {}", self.ipfs_api_url))
    }

    pub fn contract(&self) -> Result<Felt> {
        let raw = self
            .contract_address
            .as_deref()
            .context("Missing contract address (--contract-address / HATCHERY_CONTRACT_ADDRESS)")?;
        Self::parse_address(raw)
    }

    /// Owner credentials. The node must not start without them.
    pub fn signer(&self) -> Result<OwnerSigner> {
        let account = self
            .account_address
            .as_deref()
            .context("Missing owner account (--account-address / HATCHERY_ACCOUNT_ADDRESS)")?;
        let key = self
            .private_key
            .as_deref()
            .context("Missing owner private key (--private-key / HATCHERY_PRIVATE_KEY)")?;

        Ok(OwnerSigner {
            account_address: Self::parse_address(account)?,
            private_key: Felt::from_hex(key).map_err(|_| anyhow::anyhow!("Invalid private key"))?,
        })
    }

    pub fn deployment(&self) -> Result<Deployment> {
        if let Some(tx) = &self.deployment_tx {
            return Ok(Deployment::Transaction(Self::parse_address(tx)?));
        }
        Ok(self
            .deployment_block
            .map_or(Deployment::Unknown, Deployment::Block))
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn top_token_poll_interval(&self) -> Duration {
        Duration::from_millis(self.top_token_poll_ms)
    }
}
