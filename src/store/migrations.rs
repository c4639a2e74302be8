//! Embedded, versioned schema migrations.

use sqlx::{Row, SqlitePool};

use crate::error::StoreError;

const TARGET: &str = "hatchery::store";

pub struct Migration {
    pub version: u32,
    pub name: &'static str,
    up: &'static str,
    down: &'static str,
}

pub const MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        name: "tokens",
        up: include_str!("../../sql/0001_tokens.up.sql"),
        down: include_str!("../../sql/0001_tokens.down.sql"),
    },
    Migration {
        version: 2,
        name: "update_base_uri",
        up: include_str!("../../sql/0002_update_base_uri.up.sql"),
        down: include_str!("../../sql/0002_update_base_uri.down.sql"),
    },
    Migration {
        version: 3,
        name: "scanned_block",
        up: include_str!("../../sql/0003_scanned_block.up.sql"),
        down: include_str!("../../sql/0003_scanned_block.down.sql"),
    },
];

pub const LATEST_VERSION: u32 = 3;

/// Splits a script into executable statements, dropping `--` comment lines.
pub(crate) fn split_statements(script: &str) -> Vec<String> {
    script
        .split(';')
        .filter_map(|statement| {
            let lines: Vec<&str> = statement
                .lines()
                .filter(|line| {
                    let trimmed = line.trim();
                    !trimmed.is_empty() && !trimmed.starts_with("--")
                })
                .collect();
            if lines.is_empty() {
                None
            } else {
                Some(lines.join("\n"))
            }
        })
        .collect()
}

async fn ensure_version_table(pool: &SqlitePool) -> Result<(), StoreError> {
    sqlx::query(
        "CREATE TABLE IF NOT EXISTS schema_migrations (
            version INTEGER PRIMARY KEY,
            name TEXT NOT NULL,
            applied_at INTEGER NOT NULL DEFAULT (strftime('%s', 'now'))
        )",
    )
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn current_version(pool: &SqlitePool) -> Result<u32, StoreError> {
    ensure_version_table(pool).await?;
    let row = sqlx::query("SELECT COALESCE(MAX(version), 0) AS version FROM schema_migrations")
        .fetch_one(pool)
        .await?;
    let version: i64 = row.try_get("version")?;
    Ok(version as u32)
}

/// Applies every migration newer than the recorded version.
pub async fn migrate_up(pool: &SqlitePool) -> Result<u32, StoreError> {
    let start = current_version(pool).await?;
    let mut version = start;

    for migration in MIGRATIONS.iter().filter(|m| m.version > start) {
        let mut tx = pool.begin().await?;
        for statement in split_statements(migration.up) {
            sqlx::query(&statement)
                .execute(&mut *tx)
                .await
                .map_err(|source| StoreError::Migration {
                    version: migration.version,
                    source,
                })?;
        }
        sqlx::query("INSERT INTO schema_migrations (version, name) VALUES (?, ?)")
            .bind(migration.version as i64)
            .bind(migration.name)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;

        tracing::info!(
            target: TARGET,
            version = migration.version,
            name = migration.name,
            "Applied migration"
        );
        version = migration.version;
    }

    Ok(version)
}

/// Reverts the most recent migration. Returns the version left in place.
pub async fn migrate_down(pool: &SqlitePool) -> Result<u32, StoreError> {
    let version = current_version(pool).await?;
    let Some(migration) = MIGRATIONS.iter().find(|m| m.version == version) else {
        return Ok(version);
    };

    let mut tx = pool.begin().await?;
    for statement in split_statements(migration.down) {
        sqlx::query(&statement)
            .execute(&mut *tx)
            .await
            .map_err(|source| StoreError::Migration {
                version: migration.version,
                source,
            })?;
    }
    sqlx::query("DELETE FROM schema_migrations WHERE version = ?")
        .bind(migration.version as i64)
        .execute(&mut *tx)
        .await?;
    tx.commit().await?;

    tracing::info!(
        target: TARGET,
        version = migration.version,
        name = migration.name,
        "Reverted migration"
    );

    Ok(version - 1)
}
