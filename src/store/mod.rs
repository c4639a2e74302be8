//! SQLite ledger of token hatch state, pending base-URI transactions, and
//! the block watermark.
//!
//! A single [`HatchStore`] is built at startup and shared with the resolver.
//! It is the only writer; other processes may open the same file read-only.

mod cursor;
pub mod migrations;
pub mod models;

use std::collections::BTreeSet;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use sqlx::sqlite::{
    SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteRow, SqliteSynchronous,
};
use sqlx::{QueryBuilder, Row, Sqlite, SqlitePool};
use starknet::core::types::Felt;

pub use cursor::TokenCursor;
pub use models::{BlockRef, PendingUpdateTx, ScannedBlock, TokenRecord, TokenStatus};

use crate::error::StoreError;
use models::{felt_to_hex, parse_felt, parse_u64};

const TARGET: &str = "hatchery::store";

/// SQLite bind-variable budget per `IN (...)` delete.
const DELETE_CHUNK: usize = 500;

const SELECT_TOKENS: &str =
    "SELECT token_id, status, block, block_hash, pending_tx FROM tokens ORDER BY token_id ASC";
const SELECT_TOKENS_BY_STATUS: &str = "SELECT token_id, status, block, block_hash, pending_tx \
     FROM tokens WHERE status = ? ORDER BY token_id ASC";
const SELECT_TOKENS_BY_STATUS_UP_TO: &str = "SELECT token_id, status, block, block_hash, pending_tx \
     FROM tokens WHERE status = ? AND token_id <= ? ORDER BY token_id ASC";

/// Store configuration
#[derive(Debug, Clone)]
pub struct HatchStoreConfig {
    /// File path, `sqlite:` URL, or `:memory:`.
    pub path: String,
    /// Pool size for file databases. In-memory databases always use one connection.
    pub max_connections: u32,
    pub busy_timeout: Duration,
}

impl Default for HatchStoreConfig {
    fn default() -> Self {
        Self {
            path: "./hatchery-data/hatchery.db".to_string(),
            max_connections: 4,
            busy_timeout: Duration::from_secs(5),
        }
    }
}

impl HatchStoreConfig {
    pub fn in_memory() -> Self {
        Self {
            path: ":memory:".to_string(),
            ..Self::default()
        }
    }

    fn is_memory(&self) -> bool {
        self.path == ":memory:" || self.path == "sqlite::memory:"
    }

    fn database_url(&self) -> String {
        if self.is_memory() {
            "sqlite::memory:".to_string()
        } else if self.path.starts_with("sqlite:") {
            self.path.clone()
        } else {
            format!("sqlite://{}", self.path)
        }
    }
}

/// Restricts which token rows [`HatchStore::iterate_tokens`] yields.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenFilter {
    All,
    Status(TokenStatus),
    /// Rows with `status` and `token_id <= max_token_id`.
    StatusUpTo {
        status: TokenStatus,
        max_token_id: u64,
    },
}

pub struct HatchStore {
    pool: SqlitePool,
}

impl HatchStore {
    /// Opens (creating if needed) the database and applies pending migrations.
    pub async fn connect(config: HatchStoreConfig) -> Result<Self, StoreError> {
        let memory = config.is_memory();

        if !memory && !config.path.starts_with("sqlite:") {
            if let Some(parent) = Path::new(&config.path).parent() {
                if !parent.as_os_str().is_empty() {
                    tokio::fs::create_dir_all(parent)
                        .await
                        .map_err(|e| StoreError::Connection(sqlx::Error::Io(e)))?;
                }
            }
        }

        let database_url = config.database_url();
        tracing::debug!(target: TARGET, url = %database_url, "Connecting to hatch ledger");

        let mut options = SqliteConnectOptions::from_str(&database_url)?
            .create_if_missing(true)
            .foreign_keys(true)
            .busy_timeout(config.busy_timeout);
        if !memory {
            options = options
                .journal_mode(SqliteJournalMode::Wal)
                .synchronous(SqliteSynchronous::Normal);
        }

        let pool_options = if memory {
            // Every connection to `:memory:` is a separate database, so keep exactly one alive.
            SqlitePoolOptions::new()
                .max_connections(1)
                .min_connections(1)
                .idle_timeout(None)
                .max_lifetime(None)
        } else {
            SqlitePoolOptions::new().max_connections(config.max_connections.max(1))
        };

        let pool = pool_options.connect_with(options).await?;
        let store = Self { pool };

        let version = migrations::migrate_up(&store.pool).await?;
        tracing::info!(target: TARGET, schema_version = version, "Hatch ledger ready");

        Ok(store)
    }

    pub async fn in_memory() -> Result<Self, StoreError> {
        Self::connect(HatchStoreConfig::in_memory()).await
    }

    pub async fn schema_version(&self) -> Result<u32, StoreError> {
        migrations::current_version(&self.pool).await
    }

    /// Reverts the most recent schema migration.
    pub async fn migrate_down(&self) -> Result<u32, StoreError> {
        migrations::migrate_down(&self.pool).await
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }

    // ===== tokens =====

    pub async fn get_token(&self, token_id: u64) -> Result<TokenRecord, StoreError> {
        let row = sqlx::query(
            "SELECT token_id, status, block, block_hash, pending_tx FROM tokens WHERE token_id = ?",
        )
        .bind(token_id as i64)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => token_from_row(&row),
            None => Err(StoreError::not_found("token", token_id)),
        }
    }

    /// Inserts or replaces the row keyed by `token_id`.
    pub async fn upsert_token(&self, record: &TokenRecord) -> Result<(), StoreError> {
        record.validate()?;

        sqlx::query(
            "INSERT OR REPLACE INTO tokens (token_id, status, block, block_hash, pending_tx)
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(record.token_id as i64)
        .bind(record.status.as_str())
        .bind(record.block.map(|b| b.number as i64))
        .bind(record.block.map(|b| felt_to_hex(b.hash)))
        .bind(record.pending_tx.map(felt_to_hex))
        .execute(&self.pool)
        .await?;

        tracing::trace!(
            target: TARGET,
            token_id = record.token_id,
            status = %record.status,
            "Upserted token"
        );
        Ok(())
    }

    /// Deletes the given ids. Missing ids are ignored. Returns rows removed.
    pub async fn delete_tokens(&self, token_ids: &BTreeSet<u64>) -> Result<u64, StoreError> {
        if token_ids.is_empty() {
            return Ok(0);
        }

        let ids: Vec<u64> = token_ids.iter().copied().collect();
        let mut tx = self.pool.begin().await?;
        let mut removed = 0;

        for chunk in ids.chunks(DELETE_CHUNK) {
            let mut builder: QueryBuilder<'_, Sqlite> =
                QueryBuilder::new("DELETE FROM tokens WHERE token_id IN (");
            let mut separated = builder.separated(", ");
            for id in chunk {
                separated.push_bind(*id as i64);
            }
            separated.push_unseparated(")");
            removed += builder.build().execute(&mut *tx).await?.rows_affected();
        }

        tx.commit().await?;

        tracing::debug!(
            target: TARGET,
            requested = token_ids.len(),
            removed,
            "Deleted tokens"
        );
        Ok(removed)
    }

    /// Streams matching rows in ascending `token_id` order.
    ///
    /// Each call starts a fresh query. The returned cursor holds a pooled
    /// connection until it is exhausted, closed, or dropped.
    pub fn iterate_tokens(&self, filter: TokenFilter) -> TokenCursor<'_> {
        let rows = match filter {
            TokenFilter::All => sqlx::query(SELECT_TOKENS).fetch(&self.pool),
            TokenFilter::Status(status) => sqlx::query(SELECT_TOKENS_BY_STATUS)
                .bind(status.as_str())
                .fetch(&self.pool),
            TokenFilter::StatusUpTo {
                status,
                max_token_id,
            } => sqlx::query(SELECT_TOKENS_BY_STATUS_UP_TO)
                .bind(status.as_str())
                .bind(max_token_id.min(i64::MAX as u64) as i64)
                .fetch(&self.pool),
        };
        TokenCursor::new(rows)
    }

    pub async fn count_tokens(&self, status: Option<TokenStatus>) -> Result<u64, StoreError> {
        let row = match status {
            Some(status) => {
                sqlx::query("SELECT COUNT(*) AS n FROM tokens WHERE status = ?")
                    .bind(status.as_str())
                    .fetch_one(&self.pool)
                    .await?
            }
            None => {
                sqlx::query("SELECT COUNT(*) AS n FROM tokens")
                    .fetch_one(&self.pool)
                    .await?
            }
        };
        let n: i64 = row.try_get("n")?;
        parse_u64("count", n)
    }

    // ===== pending base-URI transactions =====

    pub async fn list_pending_transactions(&self) -> Result<Vec<PendingUpdateTx>, StoreError> {
        let rows = sqlx::query(
            "SELECT id, base_uri, token_count, pending_tx FROM update_base_uri ORDER BY id ASC",
        )
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(pending_from_row).collect()
    }

    /// Unconfirmed record covering exactly `token_count`, if any.
    pub async fn find_pending_for_token_count(
        &self,
        token_count: u64,
    ) -> Result<Option<PendingUpdateTx>, StoreError> {
        let row = sqlx::query(
            "SELECT id, base_uri, token_count, pending_tx FROM update_base_uri
             WHERE token_count = ? AND pending_tx IS NOT NULL
             ORDER BY id DESC LIMIT 1",
        )
        .bind(token_count as i64)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(pending_from_row).transpose()
    }

    /// Records a submitted batch. Fails if another unconfirmed batch already
    /// covers the same `token_count`.
    pub async fn add_pending_transaction(
        &self,
        token_count: u64,
        pending_tx: Felt,
        base_uri: &str,
    ) -> Result<i64, StoreError> {
        let mut tx = self.pool.begin().await?;

        let existing = sqlx::query(
            "SELECT id FROM update_base_uri WHERE token_count = ? AND pending_tx IS NOT NULL LIMIT 1",
        )
        .bind(token_count as i64)
        .fetch_optional(&mut *tx)
        .await?;
        if let Some(row) = existing {
            let id: i64 = row.try_get("id")?;
            return Err(StoreError::Constraint(format!(
                "pending update {id} already covers token_count {token_count}"
            )));
        }

        let id = sqlx::query(
            "INSERT INTO update_base_uri (base_uri, token_count, pending_tx) VALUES (?, ?, ?)",
        )
        .bind(base_uri)
        .bind(token_count as i64)
        .bind(felt_to_hex(pending_tx))
        .execute(&mut *tx)
        .await?
        .last_insert_rowid();

        tx.commit().await?;

        tracing::debug!(
            target: TARGET,
            id,
            token_count,
            tx_hash = %felt_to_hex(pending_tx),
            "Recorded pending base URI update"
        );
        Ok(id)
    }

    /// Returns whether a row was removed.
    pub async fn remove_pending_transaction(&self, id: i64) -> Result<bool, StoreError> {
        let result = sqlx::query("DELETE FROM update_base_uri WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    // ===== watermark =====

    /// Most recently appended watermark.
    pub async fn get_last_scanned_block(&self) -> Result<Option<ScannedBlock>, StoreError> {
        let row = sqlx::query(
            "SELECT id, token_id, block, block_hash FROM scanned_block ORDER BY id DESC LIMIT 1",
        )
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(scanned_from_row).transpose()
    }

    pub async fn add_scanned_block(
        &self,
        token_id: u64,
        block_hash: Felt,
        block_number: u64,
    ) -> Result<i64, StoreError> {
        let id = sqlx::query("INSERT INTO scanned_block (token_id, block, block_hash) VALUES (?, ?, ?)")
            .bind(token_id as i64)
            .bind(block_number as i64)
            .bind(felt_to_hex(block_hash))
            .execute(&self.pool)
            .await?
            .last_insert_rowid();

        tracing::debug!(
            target: TARGET,
            token_id,
            block_number,
            block_hash = %felt_to_hex(block_hash),
            "Advanced watermark"
        );
        Ok(id)
    }
}

pub(crate) fn token_from_row(row: &SqliteRow) -> Result<TokenRecord, StoreError> {
    let token_id: i64 = row.try_get("token_id")?;
    let status: Option<String> = row.try_get("status")?;
    let block: Option<i64> = row.try_get("block")?;
    let block_hash: Option<String> = row.try_get("block_hash")?;
    let pending_tx: Option<String> = row.try_get("pending_tx")?;

    let block = match (block, block_hash) {
        (Some(number), Some(hash)) => Some(BlockRef {
            number: parse_u64("block", number)?,
            hash: parse_felt("block_hash", &hash)?,
        }),
        (Some(number), None) => {
            return Err(StoreError::Decode {
                column: "block_hash",
                value: format!("missing for block {number}"),
            })
        }
        (None, _) => None,
    };

    Ok(TokenRecord {
        token_id: parse_u64("token_id", token_id)?,
        status: TokenStatus::parse(status.as_deref().unwrap_or_default()),
        block,
        pending_tx: pending_tx
            .as_deref()
            .map(|raw| parse_felt("pending_tx", raw))
            .transpose()?,
    })
}

fn pending_from_row(row: &SqliteRow) -> Result<PendingUpdateTx, StoreError> {
    let token_count: i64 = row.try_get("token_count")?;
    let pending_tx: Option<String> = row.try_get("pending_tx")?;

    Ok(PendingUpdateTx {
        id: row.try_get("id")?,
        base_uri: row.try_get("base_uri")?,
        token_count: parse_u64("token_count", token_count)?,
        pending_tx: pending_tx
            .as_deref()
            .map(|raw| parse_felt("pending_tx", raw))
            .transpose()?,
    })
}

fn scanned_from_row(row: &SqliteRow) -> Result<ScannedBlock, StoreError> {
    let token_id: i64 = row.try_get("token_id")?;
    let block: i64 = row.try_get("block")?;
    let block_hash: String = row.try_get("block_hash")?;

    Ok(ScannedBlock {
        id: row.try_get("id")?,
        token_id: parse_u64("token_id", token_id)?,
        block: parse_u64("block", block)?,
        block_hash: parse_felt("block_hash", &block_hash)?,
    })
}
