//! Narrow views over the chain: read-only queries used by the resolver and
//! the single write call that moves the contract's base URI.

pub mod byte_array;
pub mod mint;
pub mod rpc;

use anyhow::Result;
use async_trait::async_trait;
use starknet::core::types::Felt;

pub use crate::store::BlockRef;
pub use mint::MintEvent;

/// Execution outcome of an included transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionOutcome {
    Succeeded,
    Reverted,
}

/// What the chain knows about a submitted transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransactionReceipt {
    /// `None` while the transaction is only pre-confirmed.
    pub block_number: Option<u64>,
    pub outcome: ExecutionOutcome,
}

/// Where the contract's history begins.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Deployment {
    Transaction(Felt),
    Block(u64),
    #[default]
    Unknown,
}

/// How far back to look when the deployment block cannot be determined.
pub const GENESIS_FALLBACK_DEPTH: u64 = 100;

#[async_trait]
pub trait ChainReader: Send + Sync {
    async fn block_number(&self) -> Result<u64>;

    /// Block header at `number`, `None` if the chain has not reached it.
    async fn block(&self, number: u64) -> Result<Option<BlockRef>>;

    /// Current head with its hash.
    async fn head(&self) -> Result<BlockRef> {
        let number = self.block_number().await?;
        self.block(number)
            .await?
            .ok_or_else(|| anyhow::anyhow!("head block {number} not available"))
    }

    /// `None` if the transaction is unknown to the node.
    async fn transaction_receipt(&self, tx_hash: Felt) -> Result<Option<TransactionReceipt>>;

    /// Inclusion block of `tx_hash`, if it has one.
    async fn transaction_block(&self, tx_hash: Felt) -> Result<Option<u64>> {
        Ok(self
            .transaction_receipt(tx_hash)
            .await?
            .and_then(|receipt| receipt.block_number))
    }

    /// Mints of the watched contract from `from_block` up to the head.
    async fn mint_events(&self, from_block: u64) -> Result<Vec<MintEvent>>;
}

#[async_trait]
pub trait HatchContract: Send + Sync {
    /// Number of tokens minted so far.
    async fn total_supply(&self) -> Result<u64>;

    /// Submits `set_base_uri` and returns the transaction hash without waiting
    /// for inclusion.
    async fn set_base_uri(&self, base_uri: &str) -> Result<Felt>;

    fn deployment(&self) -> Deployment {
        Deployment::Unknown
    }
}

/// First block worth scanning for this contract's mints.
pub async fn genesis_block(chain: &dyn ChainReader, deployment: Deployment) -> Result<u64> {
    match deployment {
        Deployment::Transaction(tx) => match chain.transaction_block(tx).await? {
            Some(block) => return Ok(block),
            None => {
                tracing::warn!(
                    target: "hatchery::chain",
                    tx_hash = %format!("{tx:#x}"),
                    "Deployment transaction not found, falling back to recent blocks"
                );
            }
        },
        Deployment::Block(block) => return Ok(block),
        Deployment::Unknown => {}
    }

    let head = chain.block_number().await?;
    Ok(head.saturating_sub(GENESIS_FALLBACK_DEPTH))
}
