//! Store (C6).
//!
//! Relational projection over `sqlx`'s SQLite pool. No relational-store crate exists
//! anywhere in the teacher's own dependency tree (confirmed by grep across the whole
//! workspace) — `sqlx` is an enrichment import, grounded in
//! `other_examples/.../chain-indexer-src-infra-node.rs`, which pairs `subxt` with
//! `sqlx` for exactly this kind of indexer. The migration-on-open idiom mirrors
//! `engine/src/quoter/database/mod.rs`'s `migration::migrate_database` and
//! `engine/src/db/persistent.rs`'s schema-version bookkeeping; the upsert style
//! replaces that file's `INSERT OR REPLACE` shortcut with `INSERT ... ON CONFLICT DO
//! UPDATE ... RETURNING` so callers can tell an insert from a no-op.
//!
//! A block's header row and its detail ingestion (extrinsics/events/address edges)
//! complete at different times — `complete` on the `blocks` row, not the row's mere
//! existence, is what a resumed indexer checks to decide whether detail ingestion
//! still needs to run.

use async_trait::async_trait;
use serde::Serialize;
use sqlx::sqlite::{SqlitePool, SqlitePoolOptions};
use sqlx::Row;

use crate::chain::types::{render_hash, BlockRecord};
use crate::errors::{ExplorerError, Result};

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredEvent {
    pub event_index: u32,
    pub extrinsic_hash: Option<String>,
    pub extrinsic_index: Option<u32>,
    pub section: String,
    pub method: String,
    pub data: serde_json::Value,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredExtrinsic {
    pub hash: String,
    pub block_number: u64,
    pub block_hash: String,
    pub extrinsic_index: u32,
    pub section: String,
    pub method: String,
    pub signer: Option<String>,
    pub nonce: Option<i64>,
    pub args: serde_json::Value,
    pub is_signed: bool,
    pub success: bool,
    pub events: Vec<StoredEvent>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredBlock {
    pub number: u64,
    pub hash: String,
    pub parent_hash: String,
    pub state_root: String,
    pub extrinsics_root: String,
    pub timestamp: i64,
    pub author: Option<String>,
    pub extrinsics_count: u32,
    pub events_count: u32,
    pub extrinsics: Vec<StoredExtrinsic>,
    /// Events whose phase is not `ApplyExtrinsic` — not attached to any extrinsic.
    pub standalone_events: Vec<StoredEvent>,
}

#[derive(Debug, Clone, Copy)]
pub struct Range {
    pub first_indexed: u64,
    pub last_indexed: u64,
}

pub enum AddressRole {
    Signer,
    Participant,
}

impl AddressRole {
    fn as_str(&self) -> &'static str {
        match self {
            Self::Signer => "signer",
            Self::Participant => "participant",
        }
    }
}

#[async_trait]
pub trait Store: Send + Sync {
    async fn insert_block_header(&self, block: &BlockRecord) -> Result<bool>;
    async fn is_block_complete(&self, number: u64) -> Result<bool>;
    async fn finalize_block_counts(&self, number: u64, extrinsics_count: u32, events_count: u32) -> Result<()>;
    async fn insert_extrinsic(&self, extrinsic: &crate::chain::types::ExtrinsicRecord, block_number: u64, block_hash: &str) -> Result<bool>;
    async fn insert_event(&self, event: &crate::chain::types::EventRecord, block_number: u64, block_hash: &str, extrinsic_hash: Option<&str>) -> Result<bool>;
    async fn upsert_address(&self, address: &str, block_number: u64) -> Result<i64>;
    async fn insert_address_extrinsic(&self, address_id: i64, extrinsic_hash: &str, block_number: u64, role: AddressRole) -> Result<bool>;
    async fn insert_address_event(&self, address_id: i64, block_number: u64, event_index: u32) -> Result<bool>;

    async fn get_block_by_number(&self, number: u64) -> Result<Option<StoredBlock>>;
    async fn get_block_by_hash(&self, hash: &str) -> Result<Option<StoredBlock>>;
    async fn get_extrinsic_by_hash(&self, hash: &str) -> Result<Option<(StoredExtrinsic, StoredBlock)>>;
    async fn address_extrinsics(&self, address: &str, limit: u32) -> Result<Vec<StoredExtrinsic>>;
    async fn range(&self) -> Result<Option<Range>>;
    async fn block_exists(&self, number: u64) -> Result<bool>;
    async fn last_indexed_block(&self) -> Result<Option<u64>>;
    async fn first_indexed_block(&self) -> Result<Option<u64>>;
    async fn set_state(&self, key: &str, value: &str) -> Result<()>;
    async fn get_state(&self, key: &str) -> Result<Option<String>>;
}

pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    pub async fn connect(database_url: &str) -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(10)
            .connect(database_url)
            .await
            .map_err(|e| ExplorerError::unavailable(format!("failed to connect to database: {e}")))?;
        Ok(Self { pool })
    }

    /// Applies forward-only migrations and refuses to serve traffic if the result is
    /// missing a required table.
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| ExplorerError::Internal(anyhow::anyhow!("migration failed: {e}")))?;

        for table in ["blocks", "extrinsics", "events", "addresses", "address_extrinsics", "address_events", "indexer_state"] {
            let row: Option<(String,)> = sqlx::query_as(
                "SELECT name FROM sqlite_master WHERE type='table' AND name = ?",
            )
            .bind(table)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| ExplorerError::Internal(e.into()))?;

            if row.is_none() {
                return Err(ExplorerError::Internal(anyhow::anyhow!(
                    "required table `{table}` missing after migration"
                )));
            }
        }
        Ok(())
    }
}

#[async_trait]
impl Store for SqliteStore {
    async fn insert_block_header(&self, block: &BlockRecord) -> Result<bool> {
        let result = sqlx::query(
            "INSERT INTO blocks (number, hash, parent_hash, state_root, extrinsics_root, timestamp, author)
             VALUES (?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT (number) DO NOTHING",
        )
        .bind(block.number as i64)
        .bind(&block.hash)
        .bind(&block.parent_hash)
        .bind(&block.state_root)
        .bind(&block.extrinsics_root)
        .bind(block.timestamp)
        .bind(&block.author)
        .execute(&self.pool)
        .await
        .map_err(|e| ExplorerError::Internal(e.into()))?;

        Ok(result.rows_affected() > 0)
    }

    async fn is_block_complete(&self, number: u64) -> Result<bool> {
        let row: Option<(i64,)> = sqlx::query_as("SELECT complete FROM blocks WHERE number = ?")
            .bind(number as i64)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| ExplorerError::Internal(e.into()))?;
        Ok(row.map(|(c,)| c != 0).unwrap_or(false))
    }

    async fn finalize_block_counts(&self, number: u64, extrinsics_count: u32, events_count: u32) -> Result<()> {
        sqlx::query("UPDATE blocks SET extrinsics_count = ?, events_count = ?, complete = 1 WHERE number = ?")
            .bind(extrinsics_count as i64)
            .bind(events_count as i64)
            .bind(number as i64)
            .execute(&self.pool)
            .await
            .map_err(|e| ExplorerError::Internal(e.into()))?;
        Ok(())
    }

    async fn insert_extrinsic(&self, extrinsic: &crate::chain::types::ExtrinsicRecord, block_number: u64, block_hash: &str) -> Result<bool> {
        let result = sqlx::query(
            "INSERT INTO extrinsics (hash, block_number, block_hash, extrinsic_index, section, method, signer, nonce, args, signature, is_signed, success)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT (hash) DO NOTHING",
        )
        .bind(&extrinsic.hash)
        .bind(block_number as i64)
        .bind(block_hash)
        .bind(extrinsic.index as i64)
        .bind(&extrinsic.section)
        .bind(&extrinsic.method)
        .bind(&extrinsic.signer)
        .bind(extrinsic.nonce.map(|n| n as i64))
        .bind(extrinsic.args.to_string())
        .bind(&extrinsic.signature)
        .bind(extrinsic.is_signed)
        .bind(extrinsic.success)
        .execute(&self.pool)
        .await
        .map_err(|e| ExplorerError::Internal(e.into()))?;

        Ok(result.rows_affected() > 0)
    }

    async fn insert_event(&self, event: &crate::chain::types::EventRecord, block_number: u64, block_hash: &str, extrinsic_hash: Option<&str>) -> Result<bool> {
        let extrinsic_index = match event.phase() {
            crate::chain::types::EventPhase::ApplyExtrinsic(i) => Some(i as i64),
            crate::chain::types::EventPhase::Other => None,
        };
        let result = sqlx::query(
            "INSERT INTO events (block_number, event_index, block_hash, extrinsic_hash, extrinsic_index, section, method, data)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT (block_number, event_index) DO NOTHING",
        )
        .bind(block_number as i64)
        .bind(event.event_index as i64)
        .bind(block_hash)
        .bind(extrinsic_hash)
        .bind(extrinsic_index)
        .bind(&event.section)
        .bind(&event.method)
        .bind(event.data.to_string())
        .execute(&self.pool)
        .await
        .map_err(|e| ExplorerError::Internal(e.into()))?;

        Ok(result.rows_affected() > 0)
    }

    async fn upsert_address(&self, address: &str, block_number: u64) -> Result<i64> {
        let row = sqlx::query(
            "INSERT INTO addresses (address, first_seen_block, last_seen_block, transaction_count)
             VALUES (?, ?, ?, 0)
             ON CONFLICT (address) DO UPDATE SET
                first_seen_block = MIN(addresses.first_seen_block, excluded.first_seen_block),
                last_seen_block = MAX(addresses.last_seen_block, excluded.last_seen_block)
             RETURNING id",
        )
        .bind(address)
        .bind(block_number as i64)
        .bind(block_number as i64)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| ExplorerError::Internal(e.into()))?;

        Ok(row.get::<i64, _>("id"))
    }

    async fn insert_address_extrinsic(&self, address_id: i64, extrinsic_hash: &str, block_number: u64, role: AddressRole) -> Result<bool> {
        let result = sqlx::query(
            "INSERT INTO address_extrinsics (address_id, extrinsic_hash, block_number, role)
             VALUES (?, ?, ?, ?)
             ON CONFLICT (address_id, extrinsic_hash) DO NOTHING",
        )
        .bind(address_id)
        .bind(extrinsic_hash)
        .bind(block_number as i64)
        .bind(role.as_str())
        .execute(&self.pool)
        .await
        .map_err(|e| ExplorerError::Internal(e.into()))?;

        let inserted = result.rows_affected() > 0;
        if inserted {
            sqlx::query("UPDATE addresses SET transaction_count = transaction_count + 1 WHERE id = ?")
                .bind(address_id)
                .execute(&self.pool)
                .await
                .map_err(|e| ExplorerError::Internal(e.into()))?;
        }
        Ok(inserted)
    }

    async fn insert_address_event(&self, address_id: i64, block_number: u64, event_index: u32) -> Result<bool> {
        let result = sqlx::query(
            "INSERT INTO address_events (address_id, block_number, event_index)
             VALUES (?, ?, ?)
             ON CONFLICT (address_id, block_number, event_index) DO NOTHING",
        )
        .bind(address_id)
        .bind(block_number as i64)
        .bind(event_index as i64)
        .execute(&self.pool)
        .await
        .map_err(|e| ExplorerError::Internal(e.into()))?;

        Ok(result.rows_affected() > 0)
    }

    async fn get_block_by_number(&self, number: u64) -> Result<Option<StoredBlock>> {
        self.load_block("number = ?", number as i64).await
    }

    async fn get_block_by_hash(&self, hash: &str) -> Result<Option<StoredBlock>> {
        self.load_block_by_hash(hash).await
    }

    async fn get_extrinsic_by_hash(&self, hash: &str) -> Result<Option<(StoredExtrinsic, StoredBlock)>> {
        let row = sqlx::query(
            "SELECT hash, block_number, block_hash, extrinsic_index, section, method, signer, nonce, args, signature, is_signed, success
             FROM extrinsics WHERE hash = ?",
        )
        .bind(hash)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| ExplorerError::Internal(e.into()))?;

        let Some(row) = row else { return Ok(None) };
        let block_number: i64 = row.get("block_number");
        let extrinsic = self.hydrate_extrinsic(row).await?;
        let block = self.load_block("number = ?", block_number).await?
            .ok_or_else(|| ExplorerError::Internal(anyhow::anyhow!("extrinsic without a parent block row")))?;
        Ok(Some((extrinsic, block)))
    }

    async fn address_extrinsics(&self, address: &str, limit: u32) -> Result<Vec<StoredExtrinsic>> {
        let rows = sqlx::query(
            "SELECT e.hash, e.block_number, e.block_hash, e.extrinsic_index, e.section, e.method, e.signer, e.nonce, e.args, e.signature, e.is_signed, e.success
             FROM extrinsics e
             JOIN address_extrinsics ae ON ae.extrinsic_hash = e.hash
             JOIN addresses a ON a.id = ae.address_id
             WHERE a.address = ?
             ORDER BY e.block_number DESC
             LIMIT ?",
        )
        .bind(address)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| ExplorerError::Internal(e.into()))?;

        let mut out = Vec::with_capacity(rows.len());
        for row in rows {
            out.push(self.hydrate_extrinsic(row).await?);
        }
        Ok(out)
    }

    async fn range(&self) -> Result<Option<Range>> {
        let row: Option<(Option<i64>, Option<i64>)> =
            sqlx::query_as("SELECT MIN(number), MAX(number) FROM blocks")
                .fetch_optional(&self.pool)
                .await
                .map_err(|e| ExplorerError::Internal(e.into()))?;

        Ok(match row {
            Some((Some(min), Some(max))) => Some(Range { first_indexed: min as u64, last_indexed: max as u64 }),
            _ => None,
        })
    }

    async fn block_exists(&self, number: u64) -> Result<bool> {
        let row: Option<(i64,)> = sqlx::query_as("SELECT 1 FROM blocks WHERE number = ?")
            .bind(number as i64)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| ExplorerError::Internal(e.into()))?;
        Ok(row.is_some())
    }

    async fn last_indexed_block(&self) -> Result<Option<u64>> {
        Ok(self.range().await?.map(|r| r.last_indexed))
    }

    async fn first_indexed_block(&self) -> Result<Option<u64>> {
        Ok(self.range().await?.map(|r| r.first_indexed))
    }

    async fn set_state(&self, key: &str, value: &str) -> Result<()> {
        sqlx::query(
            "INSERT INTO indexer_state (key, value) VALUES (?, ?)
             ON CONFLICT (key) DO UPDATE SET value = excluded.value",
        )
        .bind(key)
        .bind(value)
        .execute(&self.pool)
        .await
        .map_err(|e| ExplorerError::Internal(e.into()))?;
        Ok(())
    }

    async fn get_state(&self, key: &str) -> Result<Option<String>> {
        let row: Option<(String,)> = sqlx::query_as("SELECT value FROM indexer_state WHERE key = ?")
            .bind(key)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| ExplorerError::Internal(e.into()))?;
        Ok(row.map(|r| r.0))
    }
}

impl SqliteStore {
    async fn load_block(&self, predicate: &str, bind: i64) -> Result<Option<StoredBlock>> {
        let query = format!(
            "SELECT number, hash, parent_hash, state_root, extrinsics_root, timestamp, author, extrinsics_count, events_count
             FROM blocks WHERE {predicate}"
        );
        let row = sqlx::query(&query)
            .bind(bind)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| ExplorerError::Internal(e.into()))?;
        let Some(row) = row else { return Ok(None) };
        self.hydrate_block(row).await
    }

    async fn load_block_by_hash(&self, hash: &str) -> Result<Option<StoredBlock>> {
        let row = sqlx::query(
            "SELECT number, hash, parent_hash, state_root, extrinsics_root, timestamp, author, extrinsics_count, events_count
             FROM blocks WHERE hash = ?",
        )
        .bind(hash)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| ExplorerError::Internal(e.into()))?;
        let Some(row) = row else { return Ok(None) };
        self.hydrate_block(row).await
    }

    async fn hydrate_block(&self, row: sqlx::sqlite::SqliteRow) -> Result<Option<StoredBlock>> {
        let number: i64 = row.get("number");
        let extrinsic_rows = sqlx::query(
            "SELECT hash, block_number, block_hash, extrinsic_index, section, method, signer, nonce, args, signature, is_signed, success
             FROM extrinsics WHERE block_number = ? ORDER BY extrinsic_index ASC",
        )
        .bind(number)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| ExplorerError::Internal(e.into()))?;

        let mut extrinsics = Vec::with_capacity(extrinsic_rows.len());
        for r in extrinsic_rows {
            extrinsics.push(self.hydrate_extrinsic(r).await?);
        }

        let standalone_rows = sqlx::query(
            "SELECT event_index, extrinsic_hash, extrinsic_index, section, method, data
             FROM events WHERE block_number = ? AND extrinsic_hash IS NULL ORDER BY event_index ASC",
        )
        .bind(number)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| ExplorerError::Internal(e.into()))?;

        let standalone_events = standalone_rows
            .into_iter()
            .map(|r| StoredEvent {
                event_index: r.get::<i64, _>("event_index") as u32,
                extrinsic_hash: r.get("extrinsic_hash"),
                extrinsic_index: r.get::<Option<i64>, _>("extrinsic_index").map(|i| i as u32),
                section: r.get("section"),
                method: r.get("method"),
                data: serde_json::from_str(&r.get::<String, _>("data")).unwrap_or(serde_json::Value::Null),
            })
            .collect();

        Ok(Some(StoredBlock {
            number: number as u64,
            hash: row.get("hash"),
            parent_hash: row.get("parent_hash"),
            state_root: row.get("state_root"),
            extrinsics_root: row.get("extrinsics_root"),
            timestamp: row.get("timestamp"),
            author: row.get("author"),
            extrinsics_count: row.get::<i64, _>("extrinsics_count") as u32,
            events_count: row.get::<i64, _>("events_count") as u32,
            extrinsics,
            standalone_events,
        }))
    }

    async fn hydrate_extrinsic(&self, row: sqlx::sqlite::SqliteRow) -> Result<StoredExtrinsic> {
        let hash: String = row.get("hash");
        let event_rows = sqlx::query(
            "SELECT event_index, extrinsic_hash, extrinsic_index, section, method, data FROM events WHERE extrinsic_hash = ? ORDER BY event_index ASC",
        )
        .bind(&hash)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| ExplorerError::Internal(e.into()))?;

        let events = event_rows
            .into_iter()
            .map(|r| StoredEvent {
                event_index: r.get::<i64, _>("event_index") as u32,
                extrinsic_hash: r.get("extrinsic_hash"),
                extrinsic_index: r.get::<Option<i64>, _>("extrinsic_index").map(|i| i as u32),
                section: r.get("section"),
                method: r.get("method"),
                data: serde_json::from_str(&r.get::<String, _>("data")).unwrap_or(serde_json::Value::Null),
            })
            .collect();

        Ok(StoredExtrinsic {
            hash,
            block_number: row.get::<i64, _>("block_number") as u64,
            block_hash: row.get("block_hash"),
            extrinsic_index: row.get::<i64, _>("extrinsic_index") as u32,
            section: row.get("section"),
            method: row.get("method"),
            signer: row.get("signer"),
            nonce: row.get("nonce"),
            args: serde_json::from_str(&row.get::<String, _>("args")).unwrap_or(serde_json::Value::Null),
            is_signed: row.get("is_signed"),
            success: row.get("success"),
            events,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn test_store() -> SqliteStore {
        let store = SqliteStore::connect("sqlite::memory:").await.unwrap();
        store.migrate().await.unwrap();
        store
    }

    fn sample_block(number: u64) -> BlockRecord {
        BlockRecord {
            number,
            hash: render_hash(&[number as u8; 32]),
            parent_hash: render_hash(&[0u8; 32]),
            state_root: render_hash(&[1u8; 32]),
            extrinsics_root: render_hash(&[2u8; 32]),
            timestamp: 1000,
            author: None,
            extrinsics: Vec::new(),
            standalone_events: Vec::new(),
        }
    }

    #[tokio::test]
    async fn inserting_the_same_block_twice_is_idempotent() {
        let store = test_store().await;
        let block = sample_block(1);
        assert!(store.insert_block_header(&block).await.unwrap());
        assert!(!store.insert_block_header(&block).await.unwrap());
        assert_eq!(store.last_indexed_block().await.unwrap(), Some(1));
    }

    #[tokio::test]
    async fn upsert_address_tracks_min_max_and_duplicate_edges_are_noops() {
        let store = test_store().await;
        let block = sample_block(5);
        store.insert_block_header(&block).await.unwrap();

        let id = store.upsert_address("5Grwv...", 5).await.unwrap();
        let id2 = store.upsert_address("5Grwv...", 10).await.unwrap();
        assert_eq!(id, id2);

        let extrinsic = crate::chain::types::ExtrinsicRecord {
            hash: "0xabc".into(),
            index: 0,
            section: "balances".into(),
            method: "transfer".into(),
            signer: Some("5Grwv...".into()),
            nonce: Some(1),
            args: serde_json::json!({}),
            signature: None,
            is_signed: true,
            success: true,
            events: Vec::new(),
        };
        store.insert_extrinsic(&extrinsic, 5, &block.hash).await.unwrap();

        let inserted1 = store.insert_address_extrinsic(id, "0xabc", 5, AddressRole::Signer).await.unwrap();
        let inserted2 = store.insert_address_extrinsic(id, "0xabc", 5, AddressRole::Signer).await.unwrap();
        assert!(inserted1);
        assert!(!inserted2);
    }

    #[tokio::test]
    async fn range_is_none_when_store_is_empty() {
        let store = test_store().await;
        assert!(store.range().await.unwrap().is_none());
    }
}
