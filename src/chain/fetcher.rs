//! Block Fetcher (C3).
//!
//! Turns a block number (and/or hash) into a fully decoded `BlockRecord`: acquires a
//! pool client, issues `blockHash`/`block`/`eventsAt` concurrently, then reassembles by
//! attaching each event's sublist to the extrinsic at its `ApplyExtrinsic` phase index;
//! events with any other phase become standalone. Grounded on the parallel-submission
//! shape of `engine/src/retrier.rs`'s `FuturesUnordered` usage.

use std::sync::Arc;

use crate::chain::pool::ConnectionPool;
use crate::chain::types::{BlockRecord, EventPhase};
use crate::errors::{ExplorerError, Result};

pub struct BlockFetcher {
    pool: Arc<ConnectionPool>,
}

impl BlockFetcher {
    pub fn new(pool: Arc<ConnectionPool>) -> Self {
        Self { pool }
    }

    pub async fn fetch_by_number(&self, number: u64) -> Result<BlockRecord> {
        let client = self.pool.acquire().await;
        let _guard = self.pool.begin_operation();
        let hash = client.block_hash(number).await?;
        self.assemble(hash).await
    }

    pub async fn fetch_by_hash(&self, hash: [u8; 32]) -> Result<BlockRecord> {
        let _guard = self.pool.begin_operation();
        self.assemble(hash).await
    }

    async fn assemble(&self, hash: [u8; 32]) -> Result<BlockRecord> {
        let client = self.pool.acquire().await;
        let client2 = self.pool.acquire().await;

        let (block_res, events_res) = tokio::join!(client.block(hash), client2.events_at(hash));
        let mut block = block_res?;
        let events = events_res?;

        for event in events {
            match event.phase() {
                EventPhase::ApplyExtrinsic(index) => {
                    if let Some(extrinsic) = block.extrinsics.get_mut(index as usize) {
                        extrinsic.events.push(event);
                    } else {
                        // Phase references an extrinsic index out of range for this
                        // block's body — treat as decode drift rather than panic.
                        block.standalone_events.push(event);
                    }
                }
                EventPhase::Other => block.standalone_events.push(event),
            }
        }

        Ok(block)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::client::{ChainApi, ConnectionState, HeadStream};
    use crate::chain::types::{render_hash, EventPhaseSerde, EventRecord, ExtrinsicRecord};
    use async_trait::async_trait;
    use mockall::mock;

    mock! {
        pub Client {}

        #[async_trait]
        impl ChainApi for Client {
            async fn header(&self, at: Option<[u8; 32]>) -> Result<subxt::config::substrate::SubstrateHeader<u32, subxt::config::substrate::BlakeTwo256>>;
            async fn block_hash(&self, number: u64) -> Result<[u8; 32]>;
            async fn block(&self, hash: [u8; 32]) -> Result<BlockRecord>;
            async fn events_at(&self, hash: [u8; 32]) -> Result<Vec<EventRecord>>;
            async fn storage(&self, key: &[u8], at: Option<[u8; 32]>) -> Result<Option<Vec<u8>>>;
            async fn subscribe_heads(&self) -> Result<HeadStream>;
            async fn subscribe_finalized_heads(&self) -> Result<HeadStream>;
            fn connection_state(&self) -> tokio::sync::watch::Receiver<ConnectionState>;
        }
    }

    fn sample_extrinsic(index: u32) -> ExtrinsicRecord {
        ExtrinsicRecord {
            hash: format!("0x{}", "0".repeat(64)),
            index,
            section: "balances".into(),
            method: "transfer".into(),
            signer: Some("5Grwv...".into()),
            nonce: Some(1),
            args: serde_json::json!({}),
            signature: None,
            is_signed: true,
            success: true,
            events: Vec::new(),
        }
    }

    #[test]
    fn attaches_events_to_matching_extrinsic_index() {
        let mut block = BlockRecord {
            number: 10,
            hash: render_hash(&[0u8; 32]),
            parent_hash: render_hash(&[0u8; 32]),
            state_root: render_hash(&[0u8; 32]),
            extrinsics_root: render_hash(&[0u8; 32]),
            timestamp: 0,
            author: None,
            extrinsics: vec![sample_extrinsic(0), sample_extrinsic(1)],
            standalone_events: Vec::new(),
        };

        let events = vec![
            EventRecord {
                event_index: 0,
                section: "system".into(),
                method: "ExtrinsicSuccess".into(),
                data: serde_json::json!({}),
                phase: EventPhaseSerde(Some(1)),
            },
            EventRecord {
                event_index: 1,
                section: "balances".into(),
                method: "Deposit".into(),
                data: serde_json::json!({}),
                phase: EventPhaseSerde(None),
            },
        ];

        for event in events {
            match event.phase() {
                EventPhase::ApplyExtrinsic(index) => {
                    block.extrinsics[index as usize].events.push(event);
                }
                EventPhase::Other => block.standalone_events.push(event),
            }
        }

        assert_eq!(block.extrinsics[0].events.len(), 0);
        assert_eq!(block.extrinsics[1].events.len(), 1);
        assert_eq!(block.standalone_events.len(), 1);
    }
}
