//! Typed fan-in/fan-out events shared by C4 → C5 and C5 → C9.
//!
//! Replaces the teacher's `engine/src/mq/*` string-topic pub/sub with typed message
//! channels. This module is the typed vocabulary that replacement speaks.

use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeadSeen {
    pub number: u64,
    pub hash: [u8; 32],
    pub seen_at_ms: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeadFinalized {
    pub number: u64,
    pub hash: [u8; 32],
    pub finalized_at_ms: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChainEvent {
    HeadSeen(HeadSeen),
    HeadFinalized(HeadFinalized),
}

/// Broadcast to C9 once a block's detail ingestion has produced full counts.
#[derive(Debug, Clone, Serialize)]
pub struct BlockDetails {
    pub number: u64,
    pub hash: String,
    pub extrinsics_count: u32,
    pub events_count: u32,
}

/// Broadcast to C9 for every signed extrinsic observed during indexing.
#[derive(Debug, Clone, Serialize)]
pub struct NewTransaction {
    pub hash: String,
    pub block_number: u64,
    pub section: String,
    pub method: String,
    pub signer: Option<String>,
}

#[derive(Debug, Clone)]
pub enum BroadcastEvent {
    NewBlock { number: u64, hash: String },
    BlockFinalized { number: u64, hash: String },
    BlockDetails(BlockDetails),
    NewTransaction(NewTransaction),
    AddressTransaction { address: String, tx: NewTransaction },
}
