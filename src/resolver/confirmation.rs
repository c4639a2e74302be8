//! Confirmation tracking for submitted `set_base_uri` transactions.
//!
//! A transaction counts as confirmed once its inclusion block is
//! [`CONFIRMING_BLOCKS`] deep. Execution success is not required; a reverted
//! batch is only reported.

use std::collections::HashSet;

use anyhow::{Context, Result};
use starknet::core::types::Felt;

use crate::chain::{ChainReader, ExecutionOutcome};
use crate::store::{HatchStore, PendingUpdateTx};

pub const CONFIRMING_BLOCKS: u64 = 3;

pub fn is_confirmed(inclusion_block: u64, current_height: u64) -> bool {
    inclusion_block
        .checked_add(CONFIRMING_BLOCKS)
        .is_some_and(|threshold| threshold <= current_height)
}

#[derive(Debug, Default)]
pub struct ConfirmationOutcome {
    /// Confirmed this run and removed from the store.
    pub confirmed: Vec<PendingUpdateTx>,
    /// Records without a transaction, removed from the store.
    pub evicted: Vec<PendingUpdateTx>,
    /// Still waiting for inclusion or depth.
    pub awaiting: Vec<PendingUpdateTx>,
}

impl ConfirmationOutcome {
    /// Transactions that tokens may still be waiting on.
    pub fn awaiting_txs(&self) -> HashSet<Felt> {
        self.awaiting.iter().filter_map(|p| p.pending_tx).collect()
    }
}

/// Checks every pending update record against the chain at `current_height`.
pub async fn confirm_pending(
    chain: &dyn ChainReader,
    store: &HatchStore,
    current_height: u64,
) -> Result<ConfirmationOutcome> {
    let mut outcome = ConfirmationOutcome::default();

    for pending in store.list_pending_transactions().await? {
        let Some(tx_hash) = pending.pending_tx else {
            store.remove_pending_transaction(pending.id).await?;
            tracing::debug!(
                target: "hatchery::resolver",
                id = pending.id,
                "Evicted pending update without transaction"
            );
            outcome.evicted.push(pending);
            continue;
        };

        let receipt = chain
            .transaction_receipt(tx_hash)
            .await
            .with_context(|| format!("Failed to fetch receipt for {tx_hash:#x}"))?;

        let included = receipt.and_then(|r| r.block_number.map(|block| (block, r.outcome)));
        match included {
            Some((block, result)) if is_confirmed(block, current_height) => {
                if result == ExecutionOutcome::Reverted {
                    tracing::warn!(
                        target: "hatchery::resolver",
                        tx_hash = %format!("{tx_hash:#x}"),
                        token_count = pending.token_count,
                        base_uri = %pending.base_uri,
                        "Base URI update reverted on chain, confirming it anyway"
                    );
                }
                store.remove_pending_transaction(pending.id).await?;
                tracing::info!(
                    target: "hatchery::resolver",
                    tx_hash = %format!("{tx_hash:#x}"),
                    block,
                    token_count = pending.token_count,
                    "Base URI update confirmed"
                );
                outcome.confirmed.push(pending);
            }
            _ => {
                tracing::debug!(
                    target: "hatchery::resolver",
                    tx_hash = %format!("{tx_hash:#x}"),
                    included_at = included.map(|(block, _)| block),
                    current_height,
                    "Base URI update awaiting confirmation"
                );
                outcome.awaiting.push(pending);
            }
        }
    }

    Ok(outcome)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_confirmation_depth() {
        assert!(!is_confirmed(11, 13));
        assert!(is_confirmed(11, 14));
        assert!(is_confirmed(10, 13));
        assert!(!is_confirmed(u64::MAX - 1, u64::MAX));
    }

    #[test]
    fn test_awaiting_txs_skips_empty_records() {
        let outcome = ConfirmationOutcome {
            awaiting: vec![
                PendingUpdateTx {
                    id: 1,
                    base_uri: "ipfs://a/".to_string(),
                    token_count: 2,
                    pending_tx: Some(Felt::from(7u64)),
                },
                PendingUpdateTx {
                    id: 2,
                    base_uri: "ipfs://b/".to_string(),
                    token_count: 3,
                    pending_tx: None,
                },
            ],
            ..ConfirmationOutcome::default()
        };
        assert_eq!(outcome.awaiting_txs(), HashSet::from([Felt::from(7u64)]));
    }
}
