//! Query Engine (C7).
//!
//! Resolves address/extrinsic/block searches, deciding Store-vs-Live based on
//! coverage, and the staking/era readout. Grounded on `engine/src/rpc_utils.rs`'s
//! raw-RPC-helper shape for the era-readout degrade path (no pinned runtime metadata
//! is available to this crate, per `chain/client.rs`'s module doc, so storage reads are
//! decoded as raw little-endian integers where the storage item's shape permits it).
//! RPC calls that aren't already behind the Block Fetcher hold a
//! `ConnectionPool::begin_operation()` guard for their duration, same as the Fetcher
//! does, so `changeEndpoint`'s quiescence wait sees them too.

use std::sync::Arc;

use serde::Serialize;

use crate::chain::fetcher::BlockFetcher;
use crate::chain::pool::ConnectionPool;
use crate::chain::types::{is_well_formed_hash, EventRecord};
use crate::constants;
use crate::errors::{ExplorerError, Result};
use crate::indexer::address_heuristic::{Base58LengthHeuristic, IsAddressLike};
use crate::store::{Range, Store, StoredExtrinsic};

#[derive(Debug, Clone)]
pub struct AddressSearchParams {
    pub address: String,
    pub blocks_to_scan: u64,
    pub batch_size: usize,
    pub pallet: Option<String>,
    pub method: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Hit {
    pub block_number: u64,
    pub block_hash: String,
    pub section: String,
    pub method: String,
    pub data: serde_json::Value,
    pub extrinsic_hash: Option<String>,
    pub extrinsic_index: Option<u32>,
    pub event_index: Option<u32>,
    pub signer: Option<String>,
    pub nonce: Option<i64>,
    pub args: serde_json::Value,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AddressSearchResult {
    pub transactions: Vec<Hit>,
    pub total: usize,
    pub blocks_scanned: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExtrinsicStrategy {
    Events,
    Blocks,
    Hybrid,
}

impl ExtrinsicStrategy {
    pub fn parse(s: Option<&str>) -> Result<Self> {
        match s.unwrap_or("events") {
            "events" => Ok(Self::Events),
            "blocks" => Ok(Self::Blocks),
            "hybrid" => Ok(Self::Hybrid),
            other => Err(ExplorerError::bad_request(format!("unknown strategy `{other}`"))),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EraReadout {
    pub current_era: u32,
    pub active_era: u32,
    pub active_era_start: i64,
    pub block_time: u64,
    pub era_duration: u64,
    pub blocks_per_era: u64,
    pub current_block_in_era: u64,
    pub blocks_remaining_in_era: u64,
    pub time_remaining_in_era: u64,
    pub era_progress_percentage: f64,
}

pub struct QueryEngine {
    store: Arc<dyn Store>,
    pool: Arc<ConnectionPool>,
    fetcher: Arc<BlockFetcher>,
    is_address_like: Arc<dyn IsAddressLike>,
}

impl QueryEngine {
    pub fn new(store: Arc<dyn Store>, pool: Arc<ConnectionPool>, fetcher: Arc<BlockFetcher>) -> Self {
        Self { store, pool, fetcher, is_address_like: Arc::new(Base58LengthHeuristic) }
    }

    async fn tip(&self) -> Result<u64> {
        let _guard = self.pool.begin_operation();
        let client = self.pool.acquire().await;
        let header = client.header(None).await?;
        Ok(header.number as u64)
    }

    /// Address search. Deadline is bucketed by `blocksToScan`; on deadline the
    /// operation returns a partial success rather than an error.
    pub async fn search_address(&self, params: AddressSearchParams) -> Result<AddressSearchResult> {
        if !self.is_address_like.is_address_like(&params.address) {
            return Err(ExplorerError::bad_request("address does not look like a valid address"));
        }
        if params.blocks_to_scan == 0 || params.blocks_to_scan > constants::MAX_BLOCKS_TO_SCAN_CAP {
            return Err(ExplorerError::bad_request("blocksToScan out of range"));
        }
        if params.batch_size == 0 || params.batch_size > constants::MAX_BATCH_SIZE {
            return Err(ExplorerError::bad_request("batchSize out of range"));
        }
        if params.method.is_some() && params.pallet.is_none() {
            return Err(ExplorerError::bad_request("method filter requires a pallet filter"));
        }

        let deadline = constants::address_search_deadline(params.blocks_to_scan);
        match tokio::time::timeout(deadline, self.search_address_inner(&params)).await {
            Ok(result) => result,
            Err(_elapsed) => Ok(AddressSearchResult { transactions: Vec::new(), total: 0, blocks_scanned: 0 }),
        }
    }

    async fn search_address_inner(&self, params: &AddressSearchParams) -> Result<AddressSearchResult> {
        let tip = self.tip().await?;
        let requested_start = tip.saturating_sub(params.blocks_to_scan);

        if let Some(range) = self.store.range().await? {
            if self.covers(&range, requested_start, tip) {
                let rows = self.store.address_extrinsics(&params.address, 1000).await?;
                let filtered = self.filter_rows(rows, requested_start, tip, params);
                if !filtered.is_empty() {
                    return Ok(AddressSearchResult {
                        total: filtered.len(),
                        transactions: filtered.into_iter().map(Self::row_to_hit).collect(),
                        blocks_scanned: params.blocks_to_scan,
                    });
                }
            }
        }

        self.live_address_scan(params, tip).await
    }

    fn covers(&self, range: &Range, requested_start: u64, tip: u64) -> bool {
        range.first_indexed <= requested_start && tip <= range.last_indexed
    }

    fn filter_rows(&self, rows: Vec<StoredExtrinsic>, start: u64, end: u64, params: &AddressSearchParams) -> Vec<StoredExtrinsic> {
        rows.into_iter()
            .filter(|e| e.block_number >= start && e.block_number <= end)
            .filter(|e| match (&params.pallet, &params.method) {
                (Some(p), Some(m)) => e.section.eq_ignore_ascii_case(p) && e.method.eq_ignore_ascii_case(m),
                (Some(p), None) => e.section.eq_ignore_ascii_case(p),
                _ => true,
            })
            .collect()
    }

    fn row_to_hit(row: StoredExtrinsic) -> Hit {
        Hit {
            block_number: row.block_number,
            block_hash: row.block_hash,
            section: row.section,
            method: row.method,
            data: serde_json::Value::Null,
            extrinsic_hash: Some(row.hash),
            extrinsic_index: Some(row.extrinsic_index),
            event_index: None,
            signer: row.signer,
            nonce: row.nonce,
            args: row.args,
        }
    }

    /// Live RPC scan: preflight the recent window for hints, then scan `targetBlocks`
    /// in concurrent batches bounded by `MAX_CONCURRENT_CONNECTIONS`.
    async fn live_address_scan(&self, params: &AddressSearchParams, tip: u64) -> Result<AddressSearchResult> {
        let preflight_window = params.blocks_to_scan.min(100);
        let preflight_start = tip.saturating_sub(preflight_window).max(1);
        let preflight_blocks: Vec<u64> = (preflight_start..=tip).rev().collect();

        let mut active_hits = Vec::new();
        for &n in &preflight_blocks {
            if let Ok(block) = self.fetcher.fetch_by_number(n).await {
                if Self::block_mentions_address(&block, &params.address) {
                    active_hits.push(n);
                }
            }
        }

        let target_blocks: Vec<u64> = if !active_hits.is_empty() {
            let mut expanded = std::collections::BTreeSet::new();
            for &n in &active_hits {
                for d in 0..=2u64 {
                    expanded.insert(n.saturating_add(d));
                    if n >= d {
                        expanded.insert(n - d);
                    }
                }
            }
            let trailing_start = tip.saturating_sub(50).max(1);
            for n in trailing_start..=tip {
                expanded.insert(n);
            }
            let mut sorted: Vec<u64> = expanded.into_iter().collect();
            sorted.sort_unstable_by(|a, b| b.cmp(a));
            sorted.truncate(params.blocks_to_scan as usize);
            sorted
        } else {
            let start = tip.saturating_sub(params.blocks_to_scan.saturating_sub(1)).max(1);
            (start..=tip).rev().collect()
        };

        let hits = self.scan_blocks(&target_blocks, params).await?;
        Ok(AddressSearchResult {
            total: hits.len(),
            transactions: hits,
            blocks_scanned: target_blocks.len() as u64,
        })
    }

    fn block_mentions_address(block: &crate::chain::types::BlockRecord, address: &str) -> bool {
        block.extrinsics.iter().any(|e| {
            e.events.iter().any(|ev| ev.data.to_string().contains(address))
        }) || block.standalone_events.iter().any(|ev| ev.data.to_string().contains(address))
    }

    /// Chunks `blocks` into `params.batch_size`-sized batches, running up to
    /// `MAX_CONCURRENT_CONNECTIONS` batches concurrently via the Pool.
    async fn scan_blocks(&self, blocks: &[u64], params: &AddressSearchParams) -> Result<Vec<Hit>> {
        use futures::stream::{self, StreamExt};

        let batches: Vec<Vec<u64>> = blocks.chunks(params.batch_size.max(1)).map(|c| c.to_vec()).collect();
        let fetcher = self.fetcher.clone();
        let address = params.address.clone();
        let pallet = params.pallet.clone();
        let method = params.method.clone();

        let results: Vec<Vec<Hit>> = stream::iter(batches.into_iter().map(|batch| {
            let fetcher = fetcher.clone();
            let address = address.clone();
            let pallet = pallet.clone();
            let method = method.clone();
            async move {
                let mut hits = Vec::new();
                for n in batch {
                    if let Ok(block) = fetcher.fetch_by_number(n).await {
                        hits.extend(Self::hits_in_block(&block, &address, pallet.as_deref(), method.as_deref()));
                    }
                }
                hits
            }
        }))
        .buffer_unordered(constants::MAX_CONCURRENT_CONNECTIONS)
        .collect()
        .await;

        Ok(results.into_iter().flatten().collect())
    }

    fn hits_in_block(block: &crate::chain::types::BlockRecord, address: &str, pallet: Option<&str>, method: Option<&str>) -> Vec<Hit> {
        let mut hits = Vec::new();
        for extrinsic in &block.extrinsics {
            let signer_match = extrinsic.signer.as_deref() == Some(address);
            let pallet_ok = pallet.map(|p| extrinsic.section.eq_ignore_ascii_case(p)).unwrap_or(true);
            let method_ok = method.map(|m| extrinsic.method.eq_ignore_ascii_case(m)).unwrap_or(true);
            if signer_match && pallet_ok && method_ok {
                hits.push(Hit {
                    block_number: block.number,
                    block_hash: block.hash.clone(),
                    section: extrinsic.section.clone(),
                    method: extrinsic.method.clone(),
                    data: serde_json::Value::Null,
                    extrinsic_hash: Some(extrinsic.hash.clone()),
                    extrinsic_index: Some(extrinsic.index),
                    event_index: None,
                    signer: extrinsic.signer.clone(),
                    nonce: extrinsic.nonce,
                    args: extrinsic.args.clone(),
                });
            }
            for event in &extrinsic.events {
                if event.data.to_string().contains(address) {
                    hits.push(Self::event_hit(block, Some(extrinsic), event));
                }
            }
        }
        for event in &block.standalone_events {
            if event.data.to_string().contains(address) {
                hits.push(Self::event_hit(block, None, event));
            }
        }
        hits
    }

    fn event_hit(block: &crate::chain::types::BlockRecord, extrinsic: Option<&crate::chain::types::ExtrinsicRecord>, event: &EventRecord) -> Hit {
        Hit {
            block_number: block.number,
            block_hash: block.hash.clone(),
            section: event.section.clone(),
            method: event.method.clone(),
            data: event.data.clone(),
            extrinsic_hash: extrinsic.map(|e| e.hash.clone()),
            extrinsic_index: extrinsic.map(|e| e.index),
            event_index: Some(event.event_index),
            signer: extrinsic.and_then(|e| e.signer.clone()),
            nonce: extrinsic.and_then(|e| e.nonce),
            args: extrinsic.map(|e| e.args.clone()).unwrap_or(serde_json::Value::Null),
        }
    }

    /// Extrinsic lookup.
    pub async fn get_extrinsic(&self, hash: &str, strategy: ExtrinsicStrategy, max_blocks: u64) -> Result<(StoredExtrinsic, crate::store::StoredBlock)> {
        if !is_well_formed_hash(hash) {
            return Err(ExplorerError::bad_request("extrinsic hash must be 0x + 64 hex characters"));
        }
        if max_blocks == 0 || max_blocks > 100_000 {
            return Err(ExplorerError::bad_request("maxBlocks out of range"));
        }

        if let Some(found) = self.store.get_extrinsic_by_hash(hash).await? {
            return Ok(found);
        }

        let deadline = constants::extrinsic_search_deadline(max_blocks);
        tokio::time::timeout(deadline, self.find_extrinsic_live(hash, strategy, max_blocks))
            .await
            .map_err(|_| ExplorerError::timeout("extrinsic search exceeded its deadline"))?
    }

    async fn find_extrinsic_live(&self, hash: &str, strategy: ExtrinsicStrategy, max_blocks: u64) -> Result<(StoredExtrinsic, crate::store::StoredBlock)> {
        let tip = self.tip().await?;

        let try_events = matches!(strategy, ExtrinsicStrategy::Events | ExtrinsicStrategy::Hybrid);
        let try_blocks = matches!(strategy, ExtrinsicStrategy::Blocks | ExtrinsicStrategy::Hybrid);

        if try_events {
            let window = tip.min(2000);
            if let Some(found) = self.walk_trailing_blocks(tip, window, hash).await? {
                return Ok(found);
            }
            if strategy == ExtrinsicStrategy::Events {
                return Err(ExplorerError::not_found(format!("extrinsic {hash} not found")));
            }
        }

        if try_blocks {
            if let Some(found) = self.walk_trailing_blocks(tip, max_blocks, hash).await? {
                return Ok(found);
            }
        }

        Err(ExplorerError::not_found(format!("extrinsic {hash} not found")))
    }

    async fn walk_trailing_blocks(&self, tip: u64, window: u64, hash: &str) -> Result<Option<(StoredExtrinsic, crate::store::StoredBlock)>> {
        let start = tip.saturating_sub(window.saturating_sub(1)).max(1);
        let mut n = tip;
        while n >= start {
            if let Ok(block) = self.fetcher.fetch_by_number(n).await {
                if let Some(extrinsic) = block.extrinsics.iter().find(|e| e.hash == hash) {
                    let stored_extrinsic = to_stored_extrinsic(extrinsic, &block);
                    let stored_block = to_stored_block(&block);
                    return Ok(Some((stored_extrinsic, stored_block)));
                }
            }
            if n == 0 {
                break;
            }
            n -= 1;
        }
        Ok(None)
    }

    /// Block lookup.
    pub async fn get_block(&self, number: u64) -> Result<crate::store::StoredBlock> {
        if let Some(block) = self.store.get_block_by_number(number).await? {
            return Ok(block);
        }
        let block = self.fetcher.fetch_by_number(number).await?;
        Ok(to_stored_block(&block))
    }

    pub async fn get_block_by_hash(&self, hash: &str) -> Result<crate::store::StoredBlock> {
        if !is_well_formed_hash(hash) {
            return Err(ExplorerError::bad_request("block hash must be 0x + 64 hex characters"));
        }
        if let Some(block) = self.store.get_block_by_hash(hash).await? {
            return Ok(block);
        }
        let bytes = parse_hash(hash)?;
        let block = self.fetcher.fetch_by_hash(bytes).await?;
        if block.number == 0 || block.number > 1_000_000_000
            || block.parent_hash.is_empty()
            || block.state_root.is_empty()
            || block.extrinsics_root.is_empty()
        {
            return Err(ExplorerError::not_found("block header incomplete"));
        }
        Ok(to_stored_block(&block))
    }

    pub async fn get_latest_block(&self) -> Result<crate::store::StoredBlock> {
        let tip = self.tip().await?;
        let block = self.fetcher.fetch_by_number(tip).await?;
        Ok(to_stored_block(&block))
    }

    /// Era readout. Degrades to block arithmetic if any storage read fails or decodes
    /// implausibly.
    pub async fn era_readout(&self) -> Result<EraReadout> {
        let tip = self.tip().await?;
        let _guard = self.pool.begin_operation();
        let client = self.pool.acquire().await;

        let current_era = client
            .storage(b"staking.currentEra", None)
            .await
            .ok()
            .flatten()
            .and_then(|b| decode_u32_le(&b));

        let (active_era, active_era_start) = client
            .storage(b"staking.activeEra", None)
            .await
            .ok()
            .flatten()
            .and_then(|b| decode_active_era(&b))
            .unzip();

        let current_era = current_era.unwrap_or_else(|| (tip / constants::BLOCKS_PER_ERA) as u32);

        let era_start_from_eras_start = client
            .storage(format!("staking.erasStart({current_era})").as_bytes(), None)
            .await
            .ok()
            .flatten()
            .and_then(|b| decode_u32_le(&b))
            .map(|v| v as u64);

        let era_start = era_start_from_eras_start
            .or(active_era_start.map(|v| v as u64))
            .filter(|&s| s <= tip)
            .unwrap_or_else(|| (current_era as u64) * constants::BLOCKS_PER_ERA);

        let current_block_in_era = tip.saturating_sub(era_start);
        let blocks_remaining_in_era = constants::BLOCKS_PER_ERA.saturating_sub(current_block_in_era);
        let time_remaining_in_era = blocks_remaining_in_era * constants::BLOCK_TIME_SECS;
        let progress = (current_block_in_era as f64 / constants::BLOCKS_PER_ERA as f64) * 100.0;

        Ok(EraReadout {
            current_era,
            active_era: active_era.unwrap_or(current_era),
            active_era_start: era_start as i64,
            block_time: constants::BLOCK_TIME_SECS,
            era_duration: constants::ERA_DURATION_SECS,
            blocks_per_era: constants::BLOCKS_PER_ERA,
            current_block_in_era,
            blocks_remaining_in_era,
            time_remaining_in_era,
            era_progress_percentage: progress.clamp(0.0, 100.0),
        })
    }
}

fn decode_u32_le(bytes: &[u8]) -> Option<u32> {
    if bytes.len() < 4 {
        return None;
    }
    Some(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
}

fn decode_active_era(bytes: &[u8]) -> Option<(u32, u32)> {
    if bytes.len() < 8 {
        return None;
    }
    let index = u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
    let start = u32::from_le_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]);
    Some((index, start))
}

fn parse_hash(s: &str) -> Result<[u8; 32]> {
    let bytes = hex::decode(&s[2..]).map_err(|e| ExplorerError::bad_request(e.to_string()))?;
    bytes
        .try_into()
        .map_err(|_| ExplorerError::bad_request("hash must decode to exactly 32 bytes"))
}

fn to_stored_extrinsic(extrinsic: &crate::chain::types::ExtrinsicRecord, block: &crate::chain::types::BlockRecord) -> StoredExtrinsic {
    StoredExtrinsic {
        hash: extrinsic.hash.clone(),
        block_number: block.number,
        block_hash: block.hash.clone(),
        extrinsic_index: extrinsic.index,
        section: extrinsic.section.clone(),
        method: extrinsic.method.clone(),
        signer: extrinsic.signer.clone(),
        nonce: extrinsic.nonce.map(|n| n as i64),
        args: extrinsic.args.clone(),
        is_signed: extrinsic.is_signed,
        success: extrinsic.success,
        events: extrinsic
            .events
            .iter()
            .map(|e| crate::store::StoredEvent {
                event_index: e.event_index,
                extrinsic_hash: Some(extrinsic.hash.clone()),
                extrinsic_index: Some(extrinsic.index),
                section: e.section.clone(),
                method: e.method.clone(),
                data: e.data.clone(),
            })
            .collect(),
    }
}

fn to_stored_block(block: &crate::chain::types::BlockRecord) -> crate::store::StoredBlock {
    crate::store::StoredBlock {
        number: block.number,
        hash: block.hash.clone(),
        parent_hash: block.parent_hash.clone(),
        state_root: block.state_root.clone(),
        extrinsics_root: block.extrinsics_root.clone(),
        timestamp: block.timestamp,
        author: block.author.clone(),
        extrinsics_count: block.extrinsics_count(),
        events_count: block.events_count(),
        extrinsics: block.extrinsics.iter().map(|e| to_stored_extrinsic(e, block)).collect(),
        standalone_events: block
            .standalone_events
            .iter()
            .map(|e| crate::store::StoredEvent {
                event_index: e.event_index,
                extrinsic_hash: None,
                extrinsic_index: None,
                section: e.section.clone(),
                method: e.method.clone(),
                data: e.data.clone(),
            })
            .collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn era_progress_never_exceeds_100_percent() {
        let current_block_in_era = 500u64;
        let progress = (current_block_in_era as f64 / constants::BLOCKS_PER_ERA as f64) * 100.0;
        assert!(progress.clamp(0.0, 100.0) <= 100.0);
    }

    #[test]
    fn decode_u32_le_roundtrips() {
        let bytes = 7u32.to_le_bytes();
        assert_eq!(decode_u32_le(&bytes), Some(7));
        assert_eq!(decode_u32_le(&[]), None);
    }

    #[test]
    fn parse_hash_requires_32_bytes() {
        let good = format!("0x{}", "ab".repeat(32));
        assert!(parse_hash(&good).is_ok());
        assert!(parse_hash("0xabc").is_err());
    }
}
