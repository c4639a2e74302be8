//! Starknet JSON-RPC implementations of [`ChainReader`] and [`HatchContract`].

use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use starknet::accounts::{Account, ExecutionEncoding, SingleOwnerAccount};
use starknet::core::types::{
    BlockId, BlockTag, Call, EventFilter, ExecutionResult, Felt, FunctionCall,
    MaybePreConfirmedBlockWithTxHashes, ReceiptBlock, StarknetError,
};
use starknet::macros::selector;
use starknet::providers::jsonrpc::{HttpTransport, JsonRpcClient};
use starknet::providers::{Provider, ProviderError};
use starknet::signers::{LocalWallet, SigningKey};
use url::Url;

use super::{
    byte_array, mint, BlockRef, ChainReader, Deployment, ExecutionOutcome, HatchContract,
    MintEvent, TransactionReceipt,
};
use crate::retry::RetryPolicy;

const TARGET: &str = "hatchery::chain";

pub fn provider(rpc_url: &Url) -> Arc<JsonRpcClient<HttpTransport>> {
    Arc::new(JsonRpcClient::new(HttpTransport::new(rpc_url.clone())))
}

/// Read-only view of one contract through a JSON-RPC node.
pub struct StarknetChain {
    provider: Arc<JsonRpcClient<HttpTransport>>,
    contract: Felt,
    retry: RetryPolicy,
    /// Events per `starknet_getEvents` page.
    chunk_size: u64,
}

impl StarknetChain {
    pub fn new(provider: Arc<JsonRpcClient<HttpTransport>>, contract: Felt) -> Self {
        Self {
            provider,
            contract,
            retry: RetryPolicy::default(),
            chunk_size: 1000,
        }
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_chunk_size(mut self, chunk_size: u64) -> Self {
        self.chunk_size = chunk_size;
        self
    }
}

#[async_trait]
impl ChainReader for StarknetChain {
    async fn block_number(&self) -> Result<u64> {
        self.retry
            .execute("block_number", || async {
                Ok(self.provider.block_number().await?)
            })
            .await
    }

    async fn block(&self, number: u64) -> Result<Option<BlockRef>> {
        self.retry
            .execute("get_block", || async {
                match self
                    .provider
                    .get_block_with_tx_hashes(BlockId::Number(number))
                    .await
                {
                    Ok(MaybePreConfirmedBlockWithTxHashes::Block(block)) => Ok(Some(BlockRef {
                        number: block.block_number,
                        hash: block.block_hash,
                    })),
                    Ok(MaybePreConfirmedBlockWithTxHashes::PreConfirmedBlock(_))
                    | Err(ProviderError::StarknetError(StarknetError::BlockNotFound)) => Ok(None),
                    Err(err) => Err(err.into()),
                }
            })
            .await
    }

    async fn head(&self) -> Result<BlockRef> {
        let head = self
            .retry
            .execute("block_hash_and_number", || async {
                Ok(self.provider.block_hash_and_number().await?)
            })
            .await?;
        Ok(BlockRef {
            number: head.block_number,
            hash: head.block_hash,
        })
    }

    async fn transaction_receipt(&self, tx_hash: Felt) -> Result<Option<TransactionReceipt>> {
        self.retry
            .execute("get_transaction_receipt", || async {
                match self.provider.get_transaction_receipt(tx_hash).await {
                    Ok(receipt) => {
                        let block_number = match receipt.block {
                            ReceiptBlock::Block { block_number, .. } => Some(block_number),
                            _ => None,
                        };
                        let outcome = match receipt.receipt.execution_result() {
                            ExecutionResult::Succeeded => ExecutionOutcome::Succeeded,
                            ExecutionResult::Reverted { .. } => ExecutionOutcome::Reverted,
                        };
                        Ok(Some(TransactionReceipt {
                            block_number,
                            outcome,
                        }))
                    }
                    Err(ProviderError::StarknetError(StarknetError::TransactionHashNotFound)) => {
                        Ok(None)
                    }
                    Err(err) => Err(err.into()),
                }
            })
            .await
    }

    async fn mint_events(&self, from_block: u64) -> Result<Vec<MintEvent>> {
        let filter = EventFilter {
            from_block: Some(BlockId::Number(from_block)),
            to_block: Some(BlockId::Tag(BlockTag::Latest)),
            address: Some(self.contract),
            keys: Some(vec![vec![mint::transfer_selector()]]),
        };

        let mut mints = Vec::new();
        let mut continuation_token: Option<String> = None;
        let mut pages = 0u32;

        loop {
            let page = self
                .retry
                .execute("get_events", || {
                    let filter = filter.clone();
                    let token = continuation_token.clone();
                    async move {
                        Ok(self
                            .provider
                            .get_events(filter, token, self.chunk_size)
                            .await?)
                    }
                })
                .await
                .with_context(|| format!("Failed to fetch Transfer events from block {from_block}"))?;

            pages += 1;
            mints.extend(page.events.iter().filter_map(mint::decode_mint));

            match page.continuation_token {
                Some(token) => continuation_token = Some(token),
                None => break,
            }
        }

        tracing::debug!(
            target: TARGET,
            from_block,
            pages,
            mints = mints.len(),
            "Fetched mint events"
        );
        Ok(mints)
    }
}

/// Signing credentials for the contract owner.
#[derive(Clone)]
pub struct OwnerSigner {
    pub account_address: Felt,
    pub private_key: Felt,
}

impl std::fmt::Debug for OwnerSigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OwnerSigner")
            .field("account_address", &format!("{:#x}", self.account_address))
            .finish_non_exhaustive()
    }
}

/// The hatch contract, read through `provider` and written through the owner account.
pub struct StarknetHatchContract {
    provider: Arc<JsonRpcClient<HttpTransport>>,
    account: SingleOwnerAccount<JsonRpcClient<HttpTransport>, LocalWallet>,
    address: Felt,
    deployment: Deployment,
    retry: RetryPolicy,
}

impl StarknetHatchContract {
    /// Builds the owner account. Fails if the node cannot report its chain id.
    pub async fn connect(
        rpc_url: &Url,
        address: Felt,
        signer: OwnerSigner,
        deployment: Deployment,
    ) -> Result<Self> {
        let provider = provider(rpc_url);
        let chain_id = provider
            .chain_id()
            .await
            .context("Failed to fetch chain id")?;

        let wallet = LocalWallet::from(SigningKey::from_secret_scalar(signer.private_key));
        let account = SingleOwnerAccount::new(
            JsonRpcClient::new(HttpTransport::new(rpc_url.clone())),
            wallet,
            signer.account_address,
            chain_id,
            ExecutionEncoding::New,
        );

        tracing::info!(
            target: TARGET,
            contract = %format!("{address:#x}"),
            owner = %format!("{:#x}", signer.account_address),
            chain_id = %format!("{chain_id:#x}"),
            "Connected hatch contract"
        );

        Ok(Self {
            provider,
            account,
            address,
            deployment,
            retry: RetryPolicy::default(),
        })
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn address(&self) -> Felt {
        self.address
    }

    async fn call_total_supply(&self) -> Result<Vec<Felt>> {
        let mut last_err = None;
        for entry_point_selector in [selector!("total_supply"), selector!("totalSupply")] {
            let call = FunctionCall {
                contract_address: self.address,
                entry_point_selector,
                calldata: vec![],
            };
            match self
                .provider
                .call(call, BlockId::Tag(BlockTag::Latest))
                .await
            {
                Ok(result) => return Ok(result),
                Err(err) => last_err = Some(err),
            }
        }
        Err(last_err.map_or_else(
            || anyhow::anyhow!("total_supply call produced no result"),
            anyhow::Error::from,
        ))
    }
}

/// Reads a `u256` (or single felt) return value as `u64`.
pub(crate) fn u64_from_u256(result: &[Felt]) -> Result<u64> {
    let low = result
        .first()
        .copied()
        .ok_or_else(|| anyhow::anyhow!("empty u256 result"))?;
    if result.get(1).is_some_and(|high| *high != Felt::ZERO) {
        anyhow::bail!("u256 value exceeds u64");
    }
    u64::try_from(low).map_err(|_| anyhow::anyhow!("u256 low word {low:#x} exceeds u64"))
}

#[async_trait]
impl HatchContract for StarknetHatchContract {
    async fn total_supply(&self) -> Result<u64> {
        let result = self
            .retry
            .execute("total_supply", || self.call_total_supply())
            .await?;
        u64_from_u256(&result)
    }

    async fn set_base_uri(&self, base_uri: &str) -> Result<Felt> {
        let call = Call {
            to: self.address,
            selector: selector!("set_base_uri"),
            calldata: byte_array::encode(base_uri),
        };

        let sent = self
            .account
            .execute_v3(vec![call])
            .send()
            .await
            .context("Failed to submit set_base_uri")?;

        tracing::info!(
            target: TARGET,
            tx_hash = %format!("{:#x}", sent.transaction_hash),
            base_uri,
            "Submitted set_base_uri"
        );
        Ok(sent.transaction_hash)
    }

    fn deployment(&self) -> Deployment {
        self.deployment
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_u64_from_u256() {
        assert_eq!(u64_from_u256(&[Felt::from(12u64), Felt::ZERO]).unwrap(), 12);
        assert_eq!(u64_from_u256(&[Felt::from(3u64)]).unwrap(), 3);
        assert!(u64_from_u256(&[]).is_err());
        assert!(u64_from_u256(&[Felt::ONE, Felt::ONE]).is_err());
        assert!(u64_from_u256(&[Felt::from(u128::MAX), Felt::ZERO]).is_err());
    }

    #[test]
    fn test_owner_signer_debug_hides_key() {
        let signer = OwnerSigner {
            account_address: Felt::from(0x1234u64),
            private_key: Felt::from(0xdeadu64),
        };
        let rendered = format!("{signer:?}");
        assert!(rendered.contains("0x1234"));
        assert!(!rendered.contains("dead"));
    }
}
