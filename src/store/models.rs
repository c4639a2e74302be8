//! Typed rows for the hatch ledger tables.

use std::fmt;

use starknet::core::types::Felt;

use crate::error::StoreError;

/// Lifecycle of a token's reveal.
///
/// `Unknown`, `Nil` and `Baby` are all unrevealed; different contract
/// generations used different names for the same state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum TokenStatus {
    #[default]
    Unknown,
    Nil,
    Baby,
    Hatching,
    Hatched,
}

impl TokenStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Unknown => "unknown",
            Self::Nil => "nil",
            Self::Baby => "baby",
            Self::Hatching => "hatching",
            Self::Hatched => "hatched",
        }
    }

    /// Parses a persisted status. Anything unrecognised is `Unknown`.
    pub fn parse(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "nil" => Self::Nil,
            "baby" => Self::Baby,
            "hatching" => Self::Hatching,
            "hatched" => Self::Hatched,
            _ => Self::Unknown,
        }
    }

    pub fn needs_hatching(self) -> bool {
        matches!(self, Self::Unknown | Self::Nil | Self::Baby)
    }
}

impl fmt::Display for TokenStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A block number paired with the hash it had when observed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockRef {
    pub number: u64,
    pub hash: Felt,
}

/// One row of the `tokens` table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenRecord {
    pub token_id: u64,
    pub status: TokenStatus,
    /// Block of the mint event last matched to this token.
    pub block: Option<BlockRef>,
    /// Batch transaction covering this token while it is `Hatching`.
    pub pending_tx: Option<Felt>,
}

impl TokenRecord {
    pub fn new(token_id: u64, status: TokenStatus) -> Self {
        Self {
            token_id,
            status,
            block: None,
            pending_tx: None,
        }
    }

    pub fn unknown(token_id: u64) -> Self {
        Self::new(token_id, TokenStatus::Unknown)
    }

    pub fn with_block(mut self, block: Option<BlockRef>) -> Self {
        self.block = block;
        self
    }

    pub fn needs_hatching(&self) -> bool {
        self.status.needs_hatching()
    }

    /// Marks the token as submitted in the batch carried by `tx`.
    pub fn into_hatching(mut self, tx: Felt) -> Self {
        self.status = TokenStatus::Hatching;
        self.pending_tx = Some(tx);
        self
    }

    /// Marks the token as revealed and drops its batch reference.
    pub fn into_hatched(mut self) -> Self {
        self.status = TokenStatus::Hatched;
        self.pending_tx = None;
        self
    }

    /// Checks the row invariants before it is written.
    pub fn validate(&self) -> Result<(), StoreError> {
        if self.pending_tx.is_some() && self.status != TokenStatus::Hatching {
            return Err(StoreError::Constraint(format!(
                "token {} has a pending transaction but status {}",
                self.token_id, self.status
            )));
        }
        if self.token_id > i64::MAX as u64 {
            return Err(StoreError::Constraint(format!(
                "token id {} does not fit in the ledger",
                self.token_id
            )));
        }
        Ok(())
    }
}

/// One row of the `update_base_uri` table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingUpdateTx {
    pub id: i64,
    pub base_uri: String,
    pub token_count: u64,
    pub pending_tx: Option<Felt>,
}

/// One row of the `scanned_block` table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScannedBlock {
    pub id: i64,
    /// Highest token id known to be hatch-eligible at this block.
    pub token_id: u64,
    pub block: u64,
    pub block_hash: Felt,
}

impl ScannedBlock {
    pub fn block_ref(&self) -> BlockRef {
        BlockRef {
            number: self.block,
            hash: self.block_hash,
        }
    }
}

pub(crate) fn felt_to_hex(felt: Felt) -> String {
    format!("{felt:#x}")
}

pub(crate) fn parse_felt(column: &'static str, raw: &str) -> Result<Felt, StoreError> {
    Felt::from_hex(raw).map_err(|_| StoreError::Decode {
        column,
        value: raw.to_string(),
    })
}

pub(crate) fn parse_u64(column: &'static str, raw: i64) -> Result<u64, StoreError> {
    u64::try_from(raw).map_err(|_| StoreError::Decode {
        column,
        value: raw.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_parse_known_values() {
        assert_eq!(TokenStatus::parse("nil"), TokenStatus::Nil);
        assert_eq!(TokenStatus::parse("baby"), TokenStatus::Baby);
        assert_eq!(TokenStatus::parse("HATCHING"), TokenStatus::Hatching);
        assert_eq!(TokenStatus::parse(" hatched "), TokenStatus::Hatched);
    }

    #[test]
    fn test_status_parse_falls_back_to_unknown() {
        assert_eq!(TokenStatus::parse(""), TokenStatus::Unknown);
        assert_eq!(TokenStatus::parse("egg"), TokenStatus::Unknown);
        assert_eq!(TokenStatus::parse("unknown"), TokenStatus::Unknown);
    }

    #[test]
    fn test_needs_hatching() {
        assert!(TokenStatus::Unknown.needs_hatching());
        assert!(TokenStatus::Nil.needs_hatching());
        assert!(TokenStatus::Baby.needs_hatching());
        assert!(!TokenStatus::Hatching.needs_hatching());
        assert!(!TokenStatus::Hatched.needs_hatching());
    }

    #[test]
    fn test_pending_tx_requires_hatching() {
        let mut record = TokenRecord::unknown(1);
        record.pending_tx = Some(Felt::from(0xabu64));
        assert!(matches!(record.validate(), Err(StoreError::Constraint(_))));

        let record = TokenRecord::unknown(1).into_hatching(Felt::from(0xabu64));
        assert!(record.validate().is_ok());
        let record = record.into_hatched();
        assert_eq!(record.pending_tx, None);
        assert!(record.validate().is_ok());
    }

    #[test]
    fn test_parse_felt_rejects_garbage() {
        assert_eq!(parse_felt("block_hash", "0x1f").unwrap(), Felt::from(0x1fu64));
        assert!(matches!(
            parse_felt("block_hash", "zz"),
            Err(StoreError::Decode { column: "block_hash", .. })
        ));
    }
}
