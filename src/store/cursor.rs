use futures::stream::BoxStream;
use futures::TryStreamExt;
use sqlx::sqlite::SqliteRow;

use super::models::TokenRecord;
use super::token_from_row;
use crate::error::StoreError;

/// Lazy, ascending walk over the `tokens` table.
///
/// The cursor owns a pooled connection and a prepared statement until it is
/// exhausted, closed, or dropped, whichever comes first. Avoid writing to the
/// store through the same pool while a cursor is open.
pub struct TokenCursor<'a> {
    rows: Option<BoxStream<'a, Result<SqliteRow, sqlx::Error>>>,
    yielded: u64,
}

impl<'a> TokenCursor<'a> {
    pub(crate) fn new(rows: BoxStream<'a, Result<SqliteRow, sqlx::Error>>) -> Self {
        Self {
            rows: Some(rows),
            yielded: 0,
        }
    }

    /// Next record, or `None` once the table is exhausted.
    pub async fn next_record(&mut self) -> Result<Option<TokenRecord>, StoreError> {
        let Some(rows) = self.rows.as_mut() else {
            return Ok(None);
        };

        match rows.try_next().await {
            Ok(Some(row)) => {
                self.yielded += 1;
                token_from_row(&row).map(Some)
            }
            Ok(None) => {
                self.release();
                Ok(None)
            }
            Err(err) => {
                self.release();
                Err(err.into())
            }
        }
    }

    /// Drains the remaining rows.
    pub async fn collect_remaining(mut self) -> Result<Vec<TokenRecord>, StoreError> {
        let mut records = Vec::new();
        while let Some(record) = self.next_record().await? {
            records.push(record);
        }
        Ok(records)
    }

    pub fn close(mut self) {
        self.release();
    }

    pub fn is_closed(&self) -> bool {
        self.rows.is_none()
    }

    fn release(&mut self) {
        if self.rows.take().is_some() {
            tracing::trace!(
                target: "hatchery::store",
                yielded = self.yielded,
                "Token cursor released"
            );
        }
    }
}

impl Drop for TokenCursor<'_> {
    fn drop(&mut self) {
        self.release();
    }
}
