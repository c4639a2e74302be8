//! Reconciliation of on-chain token state with the hatch ledger.
//!
//! One [`resolve`] call is a full, strictly sequential pass:
//!
//! 1. read `total_supply` and the chain head
//! 2. load the block watermark, rescanning from genesis if its hash no longer matches
//! 3. fetch mint events from one block before the watermark
//! 4. classify stored tokens (rolled back, hatch-eligible, or still waiting)
//! 5. delete rolled-back tokens
//! 6. add ledger rows for minted ids the ledger has never seen
//! 7. confirm pending base URI updates
//! 8. publish metadata and submit one `set_base_uri` for the eligible batch
//! 9. promote `hatching` tokens whose batch is no longer pending
//! 10. append a new watermark
//!
//! Every write is an idempotent upsert or delete and every run re-reads the
//! chain first, so an aborted run leaves state the next run can finish from.

pub mod confirmation;
pub mod eligibility;

use std::collections::{BTreeSet, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use starknet::core::types::Felt;
use tracing::Instrument;

use crate::chain::{genesis_block, ChainReader, HatchContract};
use crate::publisher::MetadataPublisher;
use crate::scheduler::RunResolver;
use crate::store::{HatchStore, TokenFilter, TokenRecord, TokenStatus};
use eligibility::{evaluate, MintIndex};

pub use confirmation::CONFIRMING_BLOCKS;

const TARGET: &str = "hatchery::resolver";

/// Summary of one resolver pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResolveReport {
    pub token_count: u64,
    pub current_block: u64,
    /// First block of the mint scan (one before the watermark).
    pub scan_from: u64,
    pub reorg_detected: bool,
    pub deleted: Vec<u64>,
    /// Ids added to the ledger as unrevealed.
    pub synthesized: Vec<u64>,
    pub confirmed_txs: Vec<Felt>,
    pub evicted_records: usize,
    /// Ids marked `hatching` this run.
    pub hatching: Vec<u64>,
    /// Transaction the hatching ids were attached to.
    pub batch_tx: Option<Felt>,
    /// Whether `batch_tx` was submitted this run (false when reusing a pending one).
    pub submitted: bool,
    pub promoted: Vec<u64>,
    pub last_known_token_id: u64,
    pub watermark_advanced: bool,
}

/// Runs one reconciliation pass. See the module docs for the step order.
pub async fn resolve(
    confirmation_wait_blocks: u64,
    contract: &dyn HatchContract,
    chain: &dyn ChainReader,
    publisher: &dyn MetadataPublisher,
    store: &HatchStore,
) -> Result<ResolveReport> {
    let mut report = ResolveReport::default();

    // 1. Current truth.
    let token_count = contract
        .total_supply()
        .await
        .context("Failed to read total supply")?;
    let head = chain.head().await.context("Failed to read chain head")?;
    report.token_count = token_count;
    report.current_block = head.number;

    // 2. Watermark.
    let watermark = store.get_last_scanned_block().await?;
    let watermark_token_id = watermark.map_or(0, |w| w.token_id).min(token_count);
    let scan_start = match watermark {
        Some(mark) => {
            let canonical = chain
                .block(mark.block)
                .await
                .with_context(|| format!("Failed to read block {}", mark.block))?;
            if canonical.map(|b| b.hash) == Some(mark.block_hash) {
                mark.block
            } else {
                report.reorg_detected = true;
                let genesis = genesis_block(chain, contract.deployment()).await?;
                tracing::warn!(
                    target: TARGET,
                    block = mark.block,
                    stored_hash = %format!("{:#x}", mark.block_hash),
                    canonical_hash = ?canonical.map(|b| format!("{:#x}", b.hash)),
                    genesis,
                    "Watermark block was reorganised, rescanning from genesis"
                );
                genesis
            }
        }
        None => genesis_block(chain, contract.deployment()).await?,
    };
    let trust_record_blocks = !report.reorg_detected;

    // 3. Mint events, re-including the watermark's own block.
    report.scan_from = scan_start.saturating_sub(1);
    let mints = MintIndex::new(
        chain
            .mint_events(report.scan_from)
            .await
            .context("Failed to fetch mint events")?,
    );

    tracing::debug!(
        target: TARGET,
        token_count,
        head = head.number,
        scan_from = report.scan_from,
        mints = mints.len(),
        "Loaded chain state"
    );

    // 4. Classify stored tokens.
    let mut last_known_token_id = watermark_token_id;
    let mut seen = HashSet::new();
    let mut rolled_back = BTreeSet::new();
    let mut to_hatch: Vec<TokenRecord> = Vec::new();
    let mut block_updates: Vec<TokenRecord> = Vec::new();

    let mut cursor = store.iterate_tokens(TokenFilter::All);
    while let Some(record) = cursor.next_record().await? {
        seen.insert(record.token_id);

        if record.token_id > token_count {
            rolled_back.insert(record.token_id);
            continue;
        }
        if !record.needs_hatching() {
            continue;
        }

        let verdict = evaluate(
            record.token_id,
            record.block,
            &mints,
            confirmation_wait_blocks,
            head.number,
            trust_record_blocks,
        );
        if verdict.eligible {
            last_known_token_id = last_known_token_id.max(record.token_id);
            to_hatch.push(record.with_block(verdict.block));
        } else if verdict.block != record.block {
            block_updates.push(record.with_block(verdict.block));
        }
    }
    cursor.close();

    for record in &block_updates {
        store.upsert_token(record).await?;
    }

    // 5. Rolled-back tokens.
    if !rolled_back.is_empty() {
        store.delete_tokens(&rolled_back).await?;
        tracing::info!(
            target: TARGET,
            token_ids = ?rolled_back,
            token_count,
            "Deleted tokens beyond total supply"
        );
    }
    report.deleted = rolled_back.into_iter().collect();

    // 6. Minted ids missing from the ledger. Ids below the watermark are
    // included: a run aborted after step 5 leaves a watermark above re-minted ids.
    for token_id in 1..=token_count {
        if seen.contains(&token_id) {
            continue;
        }
        let verdict = evaluate(
            token_id,
            None,
            &mints,
            confirmation_wait_blocks,
            head.number,
            trust_record_blocks,
        );
        let record = TokenRecord::unknown(token_id).with_block(verdict.block);
        if verdict.eligible {
            last_known_token_id = last_known_token_id.max(token_id);
            to_hatch.push(record);
        } else {
            store.upsert_token(&record).await?;
            report.synthesized.push(token_id);
        }
    }

    // 7. Pending base URI updates.
    let confirmation = confirmation::confirm_pending(chain, store, head.number).await?;
    let mut awaiting = confirmation.awaiting_txs();
    report.confirmed_txs = confirmation
        .confirmed
        .iter()
        .filter_map(|p| p.pending_tx)
        .collect();
    report.evicted_records = confirmation.evicted.len();

    // 8. Hatch batch.
    if !to_hatch.is_empty() {
        let publish_from = to_hatch
            .iter()
            .map(|record| record.token_id.saturating_sub(1))
            .fold(watermark_token_id, u64::min);
        let reusable = store
            .find_pending_for_token_count(token_count)
            .await?
            .and_then(|p| p.pending_tx)
            .filter(|tx| awaiting.contains(tx));

        let tx = match reusable {
            Some(tx) => {
                tracing::info!(
                    target: TARGET,
                    tx_hash = %format!("{tx:#x}"),
                    token_count,
                    "Batch for this token count already pending, attaching tokens"
                );
                tx
            }
            None => {
                let base_uri = publisher
                    .publish_range(publish_from, token_count)
                    .await
                    .with_context(|| {
                        format!("Failed to publish metadata for ({publish_from}, {token_count}]")
                    })?;
                let tx = contract
                    .set_base_uri(&base_uri)
                    .await
                    .context("Failed to submit base URI update")?;
                store
                    .add_pending_transaction(token_count, tx, &base_uri)
                    .await?;
                report.submitted = true;
                tracing::info!(
                    target: TARGET,
                    tx_hash = %format!("{tx:#x}"),
                    base_uri = %base_uri,
                    from_exclusive = publish_from,
                    to_inclusive = token_count,
                    tokens = to_hatch.len(),
                    "Submitted hatch batch"
                );
                tx
            }
        };
        awaiting.insert(tx);
        report.batch_tx = Some(tx);

        for record in to_hatch {
            let token_id = record.token_id;
            store.upsert_token(&record.into_hatching(tx)).await?;
            report.hatching.push(token_id);
        }
    }

    // 9. Promote settled batches.
    let settled: Vec<TokenRecord> = store
        .iterate_tokens(TokenFilter::StatusUpTo {
            status: TokenStatus::Hatching,
            max_token_id: last_known_token_id,
        })
        .collect_remaining()
        .await?
        .into_iter()
        .filter(|record| !record.pending_tx.is_some_and(|tx| awaiting.contains(&tx)))
        .collect();
    for record in settled {
        let token_id = record.token_id;
        store.upsert_token(&record.into_hatched()).await?;
        report.promoted.push(token_id);
    }

    // 10. Watermark.
    report.last_known_token_id = last_known_token_id;
    let watermark_hash = watermark.map(|w| w.block_hash);
    if watermark_hash != Some(head.hash) || last_known_token_id != watermark_token_id {
        store
            .add_scanned_block(last_known_token_id, head.hash, head.number)
            .await?;
        report.watermark_advanced = true;
    }

    tracing::info!(
        target: TARGET,
        token_count,
        block = head.number,
        deleted = report.deleted.len(),
        synthesized = report.synthesized.len(),
        confirmed = report.confirmed_txs.len(),
        hatching = report.hatching.len(),
        promoted = report.promoted.len(),
        last_known_token_id,
        "Resolver run complete"
    );

    Ok(report)
}

/// Owns the collaborators of [`resolve`] so the scheduler can trigger runs.
pub struct Resolver {
    confirmation_wait_blocks: u64,
    contract: Arc<dyn HatchContract>,
    chain: Arc<dyn ChainReader>,
    publisher: Arc<dyn MetadataPublisher>,
    store: Arc<HatchStore>,
    runs: AtomicU64,
}

impl Resolver {
    pub fn new(
        confirmation_wait_blocks: u64,
        contract: Arc<dyn HatchContract>,
        chain: Arc<dyn ChainReader>,
        publisher: Arc<dyn MetadataPublisher>,
        store: Arc<HatchStore>,
    ) -> Self {
        Self {
            confirmation_wait_blocks,
            contract,
            chain,
            publisher,
            store,
            runs: AtomicU64::new(0),
        }
    }

    pub fn store(&self) -> &HatchStore {
        &self.store
    }

    pub fn runs(&self) -> u64 {
        self.runs.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl RunResolver for Resolver {
    async fn run_once(&self) -> Result<ResolveReport> {
        let run = self.runs.fetch_add(1, Ordering::Relaxed) + 1;
        let span = tracing::info_span!("resolve_run", run);
        resolve(
            self.confirmation_wait_blocks,
            self.contract.as_ref(),
            self.chain.as_ref(),
            self.publisher.as_ref(),
            &self.store,
        )
        .instrument(span)
        .await
    }
}
