//! ERC721 `Transfer` events narrowed to mints (`from == 0`).

use starknet::core::types::{EmittedEvent, Felt};
use starknet::macros::selector;

use crate::store::BlockRef;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MintEvent {
    pub token_id: u64,
    pub block_number: u64,
    pub block_hash: Felt,
}

impl MintEvent {
    pub fn block_ref(&self) -> BlockRef {
        BlockRef {
            number: self.block_number,
            hash: self.block_hash,
        }
    }
}

pub fn transfer_selector() -> Felt {
    selector!("Transfer")
}

/// Decodes a mint from a `Transfer` event.
///
/// Returns `None` for ordinary transfers, other events, events still lacking a
/// block, and ids that do not fit in a `u64`.
pub fn decode_mint(event: &EmittedEvent) -> Option<MintEvent> {
    if event.keys.first() != Some(&transfer_selector()) {
        return None;
    }

    let (from, low, high) = match (event.keys.len(), event.data.len()) {
        // from, to, token_id_low, token_id_high in keys
        (5, 0) => (event.keys[1], event.keys[3], event.keys[4]),
        // same fields in data
        (1, 4) => (event.data[0], event.data[2], event.data[3]),
        // single felt token_id
        (4, 0) => (event.keys[1], event.keys[3], Felt::ZERO),
        (1, 3) => (event.data[0], event.data[2], Felt::ZERO),
        _ => {
            tracing::warn!(
                target: "hatchery::chain",
                tx_hash = %format!("{:#x}", event.transaction_hash),
                keys_len = event.keys.len(),
                data_len = event.data.len(),
                "Malformed Transfer event"
            );
            return None;
        }
    };

    if from != Felt::ZERO || high != Felt::ZERO {
        return None;
    }

    Some(MintEvent {
        token_id: u64::try_from(low).ok()?,
        block_number: event.block_number?,
        block_hash: event.block_hash?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(keys: Vec<Felt>, data: Vec<Felt>) -> EmittedEvent {
        EmittedEvent {
            from_address: Felt::from(0x123u64),
            keys,
            data,
            block_hash: Some(Felt::from(0xb10cu64)),
            block_number: Some(100),
            transaction_hash: Felt::from(0xabcdu64),
        }
    }

    #[test]
    fn test_decode_modern_mint() {
        let ev = event(
            vec![
                transfer_selector(),
                Felt::ZERO,
                Felt::from(0x2u64),
                Felt::from(42u64),
                Felt::ZERO,
            ],
            vec![],
        );

        let mint = decode_mint(&ev).unwrap();
        assert_eq!(mint.token_id, 42);
        assert_eq!(mint.block_number, 100);
        assert_eq!(mint.block_hash, Felt::from(0xb10cu64));
    }

    #[test]
    fn test_decode_legacy_mint() {
        let ev = event(
            vec![transfer_selector()],
            vec![Felt::ZERO, Felt::from(0x2u64), Felt::from(7u64), Felt::ZERO],
        );
        assert_eq!(decode_mint(&ev).map(|m| m.token_id), Some(7));
    }

    #[test]
    fn test_decode_single_felt_ids() {
        let keys = event(
            vec![transfer_selector(), Felt::ZERO, Felt::from(0x2u64), Felt::from(9u64)],
            vec![],
        );
        assert_eq!(decode_mint(&keys).map(|m| m.token_id), Some(9));

        let data = event(
            vec![transfer_selector()],
            vec![Felt::ZERO, Felt::from(0x2u64), Felt::from(11u64)],
        );
        assert_eq!(decode_mint(&data).map(|m| m.token_id), Some(11));
    }

    #[test]
    fn test_plain_transfer_is_not_a_mint() {
        let ev = event(
            vec![
                transfer_selector(),
                Felt::from(0x1u64),
                Felt::from(0x2u64),
                Felt::from(42u64),
                Felt::ZERO,
            ],
            vec![],
        );
        assert_eq!(decode_mint(&ev), None);
    }

    #[test]
    fn test_pre_confirmed_event_is_skipped() {
        let mut ev = event(
            vec![
                transfer_selector(),
                Felt::ZERO,
                Felt::from(0x2u64),
                Felt::from(1u64),
                Felt::ZERO,
            ],
            vec![],
        );
        ev.block_number = None;
        ev.block_hash = None;
        assert_eq!(decode_mint(&ev), None);
    }

    #[test]
    fn test_other_events_are_ignored() {
        let ev = event(vec![selector!("Approval"), Felt::ZERO], vec![]);
        assert_eq!(decode_mint(&ev), None);
    }
}
