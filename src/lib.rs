//! Hatchery - reveal pipeline for hatchable Starknet NFTs.
//!
//! Keeps a local ledger of every minted token's reveal state, decides which
//! tokens have waited long enough after their mint, publishes their metadata,
//! and points the contract's base URI at it in one transaction per batch.
//!
//! The pieces:
//!
//! - [`store`]: SQLite ledger (tokens, pending base URI updates, block watermark)
//! - [`chain`]: chain reads and the `set_base_uri` write
//! - [`publisher`]: metadata publishing, IPFS by default
//! - [`resolver`]: the reconciliation pass
//! - [`scheduler`]: timer and top-token triggers, one run at a time

pub mod chain;
pub mod error;
pub mod publisher;
pub mod resolver;
pub mod retry;
pub mod scheduler;
pub mod store;

pub use async_trait::async_trait;

pub use chain::{ChainReader, Deployment, HatchContract, MintEvent};
pub use error::StoreError;
pub use publisher::MetadataPublisher;
pub use resolver::{resolve, ResolveReport, Resolver, CONFIRMING_BLOCKS};
pub use retry::RetryPolicy;
pub use scheduler::{spawn_top_token_watcher, RunResolver, Scheduler, SchedulerStats};
pub use store::{
    HatchStore, HatchStoreConfig, PendingUpdateTx, ScannedBlock, TokenFilter, TokenRecord,
    TokenStatus,
};
