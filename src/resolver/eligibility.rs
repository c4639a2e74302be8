//! When an unrevealed token may hatch.

use std::collections::HashMap;

use crate::chain::MintEvent;
use crate::store::BlockRef;

/// A mint at `mint_block` is hatchable once `wait` blocks have passed, inclusive.
pub fn is_eligible(mint_block: u64, wait: u64, current_height: u64) -> bool {
    mint_block
        .checked_add(wait)
        .is_some_and(|threshold| threshold <= current_height)
}

/// Latest mint event per token id.
#[derive(Debug, Default)]
pub struct MintIndex {
    by_token: HashMap<u64, MintEvent>,
}

impl MintIndex {
    pub fn new(events: impl IntoIterator<Item = MintEvent>) -> Self {
        let mut by_token: HashMap<u64, MintEvent> = HashMap::new();
        for event in events {
            by_token
                .entry(event.token_id)
                .and_modify(|known| {
                    if event.block_number >= known.block_number {
                        *known = event;
                    }
                })
                .or_insert(event);
        }
        Self { by_token }
    }

    pub fn get(&self, token_id: u64) -> Option<&MintEvent> {
        self.by_token.get(&token_id)
    }

    pub fn len(&self) -> usize {
        self.by_token.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_token.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Verdict {
    pub eligible: bool,
    /// Block reference to keep on the record.
    pub block: Option<BlockRef>,
}

/// Decides eligibility for one unrevealed token.
///
/// A mint event seen in this scan takes precedence. Without one, the block
/// stored on the record from an earlier scan is used, unless the chain has
/// reorganised since and `trust_record_block` is false.
pub fn evaluate(
    token_id: u64,
    record_block: Option<BlockRef>,
    mints: &MintIndex,
    wait: u64,
    current_height: u64,
    trust_record_block: bool,
) -> Verdict {
    if let Some(event) = mints.get(token_id) {
        return Verdict {
            eligible: is_eligible(event.block_number, wait, current_height),
            block: Some(event.block_ref()),
        };
    }

    match record_block {
        Some(block) if trust_record_block => Verdict {
            eligible: is_eligible(block.number, wait, current_height),
            block: Some(block),
        },
        _ => Verdict {
            eligible: false,
            block: record_block,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use starknet::core::types::Felt;

    fn mint(token_id: u64, block: u64) -> MintEvent {
        MintEvent {
            token_id,
            block_number: block,
            block_hash: Felt::from(block),
        }
    }

    #[test]
    fn test_threshold_is_inclusive() {
        assert!(!is_eligible(10, 4, 13));
        assert!(is_eligible(10, 4, 14));
        assert!(is_eligible(10, 0, 10));
        assert!(!is_eligible(u64::MAX, 1, u64::MAX));
    }

    #[test]
    fn test_index_keeps_latest_mint() {
        let index = MintIndex::new([mint(1, 12), mint(1, 10), mint(2, 11)]);
        assert_eq!(index.len(), 2);
        assert_eq!(index.get(1).map(|m| m.block_number), Some(12));
    }

    #[test]
    fn test_event_takes_precedence_over_record_block() {
        let index = MintIndex::new([mint(1, 12)]);
        let stale = Some(BlockRef {
            number: 2,
            hash: Felt::from(2u64),
        });

        let verdict = evaluate(1, stale, &index, 4, 14, true);
        assert!(!verdict.eligible);
        assert_eq!(verdict.block.map(|b| b.number), Some(12));
    }

    #[test]
    fn test_record_block_fallback() {
        let index = MintIndex::default();
        let block = Some(BlockRef {
            number: 3,
            hash: Felt::from(3u64),
        });

        assert!(evaluate(1, block, &index, 4, 7, true).eligible);
        assert!(!evaluate(1, block, &index, 4, 6, true).eligible);
        let after_reorg = evaluate(1, block, &index, 4, 7, false);
        assert!(!after_reorg.eligible);
        assert_eq!(after_reorg.block, block);
    }

    #[test]
    fn test_unseen_token_is_not_eligible() {
        let verdict = evaluate(5, None, &MintIndex::default(), 0, 100, true);
        assert_eq!(
            verdict,
            Verdict {
                eligible: false,
                block: None
            }
        );
    }
}
