#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::Mutex;

use anyhow::Result;
use async_trait::async_trait;
use hatchery::chain::{
    BlockRef, ChainReader, Deployment, ExecutionOutcome, HatchContract, MintEvent,
    TransactionReceipt,
};
use hatchery::{resolve, HatchStore, MetadataPublisher, ResolveReport, TokenFilter, TokenRecord};
use starknet::core::types::Felt;

#[derive(Debug, Clone)]
struct SubmittedTx {
    base_uri: String,
    included_at: Option<u64>,
    outcome: ExecutionOutcome,
}

#[derive(Debug, Default)]
struct NetworkState {
    head: u64,
    fork: u64,
    mints: Vec<MintEvent>,
    total_supply_override: Option<u64>,
    txs: HashMap<Felt, SubmittedTx>,
    tx_order: Vec<Felt>,
    base_uri: Option<String>,
    faults: Faults,
}

/// Switchable RPC failures.
#[derive(Debug, Default)]
struct Faults {
    receipts: bool,
    /// The next `set_base_uri` is broadcast but its response is lost.
    drop_submission_response: bool,
}

impl NetworkState {
    fn hash(&self, block: u64) -> Felt {
        Felt::from(self.fork * 1_000_000 + block + 1)
    }
}

/// In-memory chain with one hatchable contract on it.
#[derive(Debug)]
pub struct MockNetwork {
    state: Mutex<NetworkState>,
    deployment: Deployment,
}

impl MockNetwork {
    pub fn new(head: u64) -> Self {
        Self {
            state: Mutex::new(NetworkState {
                head,
                ..NetworkState::default()
            }),
            deployment: Deployment::Block(1),
        }
    }

    pub fn set_head(&self, head: u64) {
        self.state.lock().unwrap().head = head;
    }

    pub fn head(&self) -> u64 {
        self.state.lock().unwrap().head
    }

    /// Mints the next token id in the current head block.
    pub fn mint(&self) -> u64 {
        let mut state = self.state.lock().unwrap();
        let token_id = state.mints.len() as u64 + 1;
        let block_number = state.head;
        let block_hash = state.hash(block_number);
        state.mints.push(MintEvent {
            token_id,
            block_number,
            block_hash,
        });
        token_id
    }

    pub fn set_total_supply(&self, supply: u64) {
        self.state.lock().unwrap().total_supply_override = Some(supply);
    }

    /// Replaces every block hash, as a deep reorganisation would.
    pub fn reorg(&self) {
        let mut state = self.state.lock().unwrap();
        state.fork += 1;
        let fork = state.fork;
        for mint in &mut state.mints {
            mint.block_hash = Felt::from(fork * 1_000_000 + mint.block_number + 1);
        }
    }

    pub fn include(&self, tx: Felt, block: u64) {
        let mut state = self.state.lock().unwrap();
        let base_uri = {
            let included = state.txs.get_mut(&tx).expect("unknown transaction");
            included.included_at = Some(block);
            included.base_uri.clone()
        };
        state.base_uri = Some(base_uri);
    }

    pub fn include_reverted(&self, tx: Felt, block: u64) {
        let mut state = self.state.lock().unwrap();
        let included = state.txs.get_mut(&tx).expect("unknown transaction");
        included.included_at = Some(block);
        included.outcome = ExecutionOutcome::Reverted;
    }

    /// Makes every receipt lookup fail until switched off.
    pub fn fail_receipts(&self, fail: bool) {
        self.state.lock().unwrap().faults.receipts = fail;
    }

    /// Broadcasts the next `set_base_uri` but reports an error to the caller.
    pub fn drop_next_submission_response(&self) {
        self.state.lock().unwrap().faults.drop_submission_response = true;
    }

    pub fn submissions(&self) -> Vec<Felt> {
        self.state.lock().unwrap().tx_order.clone()
    }

    pub fn submitted_base_uri(&self, tx: Felt) -> Option<String> {
        self.state
            .lock()
            .unwrap()
            .txs
            .get(&tx)
            .map(|t| t.base_uri.clone())
    }

    /// `tokenURI` as the contract would answer it.
    pub fn token_uri(&self, token_id: u64) -> Option<String> {
        let state = self.state.lock().unwrap();
        state.base_uri.as_ref().map(|base| format!("{base}{token_id}"))
    }
}

#[async_trait]
impl ChainReader for MockNetwork {
    async fn block_number(&self) -> Result<u64> {
        Ok(self.head())
    }

    async fn block(&self, number: u64) -> Result<Option<BlockRef>> {
        let state = self.state.lock().unwrap();
        Ok((number <= state.head).then(|| BlockRef {
            number,
            hash: state.hash(number),
        }))
    }

    async fn transaction_receipt(&self, tx_hash: Felt) -> Result<Option<TransactionReceipt>> {
        let state = self.state.lock().unwrap();
        if state.faults.receipts {
            anyhow::bail!("receipt endpoint unavailable");
        }
        Ok(state.txs.get(&tx_hash).map(|tx| TransactionReceipt {
            block_number: tx.included_at,
            outcome: tx.outcome,
        }))
    }

    async fn mint_events(&self, from_block: u64) -> Result<Vec<MintEvent>> {
        let state = self.state.lock().unwrap();
        Ok(state
            .mints
            .iter()
            .filter(|m| m.block_number >= from_block && m.block_number <= state.head)
            .copied()
            .collect())
    }
}

#[async_trait]
impl HatchContract for MockNetwork {
    async fn total_supply(&self) -> Result<u64> {
        let state = self.state.lock().unwrap();
        Ok(state
            .total_supply_override
            .unwrap_or(state.mints.len() as u64))
    }

    async fn set_base_uri(&self, base_uri: &str) -> Result<Felt> {
        let mut state = self.state.lock().unwrap();
        let tx = Felt::from(0xf000u64 + state.tx_order.len() as u64);
        state.txs.insert(
            tx,
            SubmittedTx {
                base_uri: base_uri.to_string(),
                included_at: None,
                outcome: ExecutionOutcome::Succeeded,
            },
        );
        state.tx_order.push(tx);
        if std::mem::take(&mut state.faults.drop_submission_response) {
            anyhow::bail!("connection reset after broadcasting {tx:#x}");
        }
        Ok(tx)
    }

    fn deployment(&self) -> Deployment {
        self.deployment
    }
}

/// Hands out `ipfs://cid-{n}/` for the n-th publish call.
#[derive(Debug, Default)]
pub struct RecordingPublisher {
    calls: Mutex<Vec<(u64, u64)>>,
}

impl RecordingPublisher {
    pub fn calls(&self) -> Vec<(u64, u64)> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl MetadataPublisher for RecordingPublisher {
    async fn publish_range(&self, from_exclusive: u64, to_inclusive: u64) -> Result<String> {
        let mut calls = self.calls.lock().unwrap();
        calls.push((from_exclusive, to_inclusive));
        Ok(format!("ipfs://cid-{}/", calls.len()))
    }
}

pub struct Harness {
    pub network: MockNetwork,
    pub publisher: RecordingPublisher,
    pub store: HatchStore,
    pub wait: u64,
}

impl Harness {
    pub async fn new(head: u64, wait: u64) -> Self {
        Self {
            network: MockNetwork::new(head),
            publisher: RecordingPublisher::default(),
            store: HatchStore::in_memory().await.unwrap(),
            wait,
        }
    }

    pub async fn resolve(&self) -> ResolveReport {
        self.try_resolve().await.unwrap()
    }

    pub async fn try_resolve(&self) -> Result<ResolveReport> {
        resolve(
            self.wait,
            &self.network,
            &self.network,
            &self.publisher,
            &self.store,
        )
        .await
    }

    pub async fn token_ids(&self) -> Vec<u64> {
        self.tokens().await.into_iter().map(|t| t.token_id).collect()
    }

    pub async fn tokens(&self) -> Vec<TokenRecord> {
        self.store
            .iterate_tokens(TokenFilter::All)
            .collect_remaining()
            .await
            .unwrap()
    }

    /// Everything the resolver can write, for before/after comparisons.
    pub async fn snapshot(&self) -> LedgerSnapshot {
        LedgerSnapshot {
            tokens: self.tokens().await,
            pending: self
                .store
                .list_pending_transactions()
                .await
                .unwrap()
                .into_iter()
                .map(|p| (p.id, p.token_count, p.pending_tx, p.base_uri))
                .collect(),
            watermark: self
                .store
                .get_last_scanned_block()
                .await
                .unwrap()
                .map(|w| (w.id, w.token_id, w.block, w.block_hash)),
        }
    }
}

#[derive(Debug, PartialEq, Eq)]
pub struct LedgerSnapshot {
    pub tokens: Vec<TokenRecord>,
    pub pending: Vec<(i64, u64, Option<Felt>, String)>,
    pub watermark: Option<(i64, u64, u64, Felt)>,
}
