//! Chain Client (C1).
//!
//! Owns one WebSocket RPC session against a Substrate-style node. Grounded on
//! `other_examples/.../chain-indexer-src-infra-node.rs`'s `SubxtNode`, which pairs
//! `subxt::backend::rpc::reconnecting_rpc_client::RpcClient` (built with an
//! `ExponentialBackoff` retry policy) with `subxt::OnlineClient<SubstrateConfig>`, and
//! on the `ChainApi`/`BlockInfo` trait shape observed at
//! `api/bin/chainflip-ingress-egress-tracker/src/witnessing/state_chain.rs`'s call
//! sites (the concrete `chainflip_engine::state_chain_observer::client` module itself
//! was not present in the retrieval pack).
//!
//! Header, block-hash, and raw storage reads go through subxt's legacy RPC methods.
//! Block bodies and events go through `OnlineClient`'s dynamic decode path instead of
//! generated, chain-specific metadata types: this service targets "a Substrate-style
//! chain" generically, not one pinned runtime, so there's no
//! `#[subxt::subxt(runtime_metadata_path = ...)]` to codegen against — `OnlineClient`
//! fetches the node's metadata once at connection time and decodes against it
//! dynamically, which is exactly the generic-chain case this crate needs. The signed
//! envelope around a call (address/signature/era/nonce/tip) sits outside what that
//! dynamic decode covers, so `chain::scale` walks it by hand.

use std::sync::Arc;

use async_trait::async_trait;
use futures::StreamExt;
use subxt::backend::legacy::LegacyRpcMethods;
use subxt::backend::rpc::reconnecting_rpc_client::{ExponentialBackoff, RpcClient as ReconnectingRpcClient};
use subxt::backend::rpc::RpcClient;
use subxt::config::substrate::SubstrateHeader;
use subxt::{OnlineClient, SubstrateConfig};
use tokio::sync::watch;

use crate::chain::scale;
use crate::chain::types::{render_hash, BlockRecord, EventPhase, EventPhaseSerde, EventRecord, ExtrinsicRecord, HeadInfo};
use crate::errors::{ExplorerError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Connected,
    Disconnected,
    Error,
}

pub struct HeadStream {
    pub inner: tokio_stream::wrappers::ReceiverStream<HeadInfo>,
    cancel: Arc<tokio::sync::Notify>,
}

impl HeadStream {
    /// Cancels the underlying subscription; must resolve within
    /// `constants::SUBSCRIPTION_CANCEL_TIMEOUT` of being dropped.
    pub fn cancel(&self) {
        self.cancel.notify_waiters();
    }
}

#[async_trait]
pub trait ChainApi: Send + Sync {
    async fn header(&self, at: Option<[u8; 32]>) -> Result<SubstrateHeader<u32, subxt::config::substrate::BlakeTwo256>>;
    async fn block_hash(&self, number: u64) -> Result<[u8; 32]>;
    async fn block(&self, hash: [u8; 32]) -> Result<BlockRecord>;
    async fn events_at(&self, hash: [u8; 32]) -> Result<Vec<EventRecord>>;
    async fn storage(&self, key: &[u8], at: Option<[u8; 32]>) -> Result<Option<Vec<u8>>>;
    async fn subscribe_heads(&self) -> Result<HeadStream>;
    async fn subscribe_finalized_heads(&self) -> Result<HeadStream>;
    fn connection_state(&self) -> watch::Receiver<ConnectionState>;
}

pub struct ChainClient {
    rpc: LegacyRpcMethods<SubstrateConfig>,
    online: OnlineClient<SubstrateConfig>,
    state_tx: watch::Sender<ConnectionState>,
}

impl ChainClient {
    /// Connects with automatic exponential backoff + jitter reconnection, mirroring
    /// the midnight-indexer `SubxtNode` construction. `OnlineClient::from_rpc_client`
    /// fetches the node's metadata once up front, which is what later unlocks dynamic
    /// (no-codegen) decoding of blocks and events.
    pub async fn connect(endpoint: &str) -> Result<Self> {
        let reconnecting = ReconnectingRpcClient::builder()
            .retry_policy(
                ExponentialBackoff::from_millis(crate::constants::INITIAL_RETRY_DELAY.as_millis() as u64)
                    .max_delay(crate::constants::MAX_RETRY_DELAY),
            )
            .build(endpoint.to_string())
            .await
            .map_err(|e| ExplorerError::unavailable(format!("failed to connect to {endpoint}: {e}")))?;

        let raw_rpc = RpcClient::new(reconnecting);
        let rpc = LegacyRpcMethods::<SubstrateConfig>::new(raw_rpc.clone());
        let online = OnlineClient::<SubstrateConfig>::from_rpc_client(raw_rpc)
            .await
            .map_err(|e| ExplorerError::unavailable(format!("failed to fetch chain metadata from {endpoint}: {e}")))?;
        let (state_tx, _) = watch::channel(ConnectionState::Connected);

        Ok(Self { rpc, online, state_tx })
    }

    /// Returns the cached typed client backing the dynamic decode path. Cloning it is
    /// cheap — `OnlineClient` is internally `Arc`-backed.
    pub async fn online_client(&self) -> Result<OnlineClient<SubstrateConfig>> {
        Ok(self.online.clone())
    }
}

#[async_trait]
impl ChainApi for ChainClient {
    async fn header(&self, at: Option<[u8; 32]>) -> Result<SubstrateHeader<u32, subxt::config::substrate::BlakeTwo256>> {
        let hash = at.map(subxt::utils::H256::from);
        self.rpc
            .chain_get_header(hash)
            .await
            .map_err(|e| ExplorerError::unavailable(e.to_string()))?
            .ok_or_else(|| ExplorerError::not_found("header not found"))
    }

    async fn block_hash(&self, number: u64) -> Result<[u8; 32]> {
        let hash = self
            .rpc
            .chain_get_block_hash(Some(number.into()))
            .await
            .map_err(|e| ExplorerError::unavailable(e.to_string()))?
            .ok_or_else(|| ExplorerError::not_found(format!("block {number} not found")))?;
        Ok(hash.0)
    }

    async fn block(&self, hash: [u8; 32]) -> Result<BlockRecord> {
        let h = subxt::utils::H256::from(hash);
        let block = self
            .online
            .blocks()
            .at(h)
            .await
            .map_err(|e| ExplorerError::unavailable(e.to_string()))?;

        let header = block.header();
        let number = header.number as u64;

        let body = block
            .extrinsics()
            .await
            .map_err(|e| ExplorerError::decode(e.to_string()))?;

        let mut extrinsics = Vec::new();
        for ext in body.iter() {
            let ext = ext.map_err(|e| ExplorerError::decode(e.to_string()))?;
            extrinsics.push(decode_extrinsic(&ext));
        }

        let timestamp = extrinsics
            .iter()
            .find(|e| e.section == "Timestamp" && e.method == "set")
            .and_then(|e| scale::first_integer(&e.args))
            .unwrap_or(0);

        Ok(BlockRecord {
            number,
            hash: render_hash(&hash),
            parent_hash: render_hash(&header.parent_hash.0),
            state_root: render_hash(&header.state_root.0),
            extrinsics_root: render_hash(&header.extrinsics_root.0),
            timestamp,
            author: None,
            extrinsics,
            standalone_events: Vec::new(),
        })
    }

    async fn events_at(&self, hash: [u8; 32]) -> Result<Vec<EventRecord>> {
        let h = subxt::utils::H256::from(hash);
        let events = self
            .online
            .events()
            .at(h)
            .await
            .map_err(|e| ExplorerError::unavailable(e.to_string()))?;

        let mut out = Vec::new();
        for (index, ev) in events.iter().enumerate() {
            let ev = ev.map_err(|e| ExplorerError::decode(e.to_string()))?;
            let phase = match ev.phase() {
                subxt::events::Phase::ApplyExtrinsic(i) => EventPhase::ApplyExtrinsic(i),
                _ => EventPhase::Other,
            };
            let data = ev
                .field_values()
                .ok()
                .map(|c| scale::render_composite(&c))
                .unwrap_or(serde_json::Value::Null);

            out.push(EventRecord {
                event_index: index as u32,
                section: ev.pallet_name().to_string(),
                method: ev.variant_name().to_string(),
                data,
                phase: EventPhaseSerde::from(phase),
            });
        }
        Ok(out)
    }

    async fn storage(&self, key: &[u8], at: Option<[u8; 32]>) -> Result<Option<Vec<u8>>> {
        let storage_key = subxt::backend::legacy::rpc_methods::StorageKey(key.to_vec());
        let hash = at.map(subxt::utils::H256::from);
        let value = self
            .rpc
            .state_get_storage(storage_key, hash)
            .await
            .map_err(|e| ExplorerError::unavailable(e.to_string()))?;
        Ok(value.map(|v| v.0))
    }

    async fn subscribe_heads(&self) -> Result<HeadStream> {
        subscribe_blocks(self.online.clone(), true).await
    }

    async fn subscribe_finalized_heads(&self) -> Result<HeadStream> {
        subscribe_blocks(self.online.clone(), false).await
    }

    fn connection_state(&self) -> watch::Receiver<ConnectionState> {
        self.state_tx.subscribe()
    }
}

/// Decodes an extrinsic's call (pallet/variant/args) via `subxt`'s dynamic metadata
/// decode, and its signed envelope (signer/nonce) via `chain::scale`'s manual parse.
/// The extrinsic hash is `blake2_256` of its raw encoded bytes, matching how
/// Substrate itself identifies an extrinsic — this keeps every extrinsic's hash unique
/// regardless of how much of the call body could be symbolically resolved.
fn decode_extrinsic(ext: &subxt::blocks::ExtrinsicDetails<SubstrateConfig, OnlineClient<SubstrateConfig>>) -> ExtrinsicRecord {
    let bytes = ext.bytes();
    let hash = render_hash(&scale::blake2_256(bytes));
    let envelope = scale::parse_envelope(bytes);

    let section = ext.pallet_name().unwrap_or("unknown").to_string();
    let method = ext.variant_name().unwrap_or("unknown").to_string();
    let args = ext
        .field_values()
        .ok()
        .map(|c| scale::render_composite(&c))
        .unwrap_or(serde_json::Value::Null);

    ExtrinsicRecord {
        hash,
        index: ext.index(),
        section,
        method,
        signer: envelope.signer,
        nonce: envelope.nonce,
        args,
        signature: None,
        is_signed: envelope.is_signed,
        success: true,
        events: Vec::new(),
    }
}

async fn subscribe_blocks(online: OnlineClient<SubstrateConfig>, best: bool) -> Result<HeadStream> {
    let (tx, rx) = tokio::sync::mpsc::channel(128);
    let cancel = Arc::new(tokio::sync::Notify::new());
    let cancel_task = cancel.clone();

    let mut sub = if best {
        online.blocks().subscribe_best().await
    } else {
        online.blocks().subscribe_finalized().await
    }
    .map_err(|e| ExplorerError::unavailable(e.to_string()))?;

    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = cancel_task.notified() => break,
                item = sub.next() => {
                    match item {
                        Some(Ok(block)) => {
                            let head = HeadInfo { number: block.header().number as u64, hash: block.hash().0 };
                            if tx.send(head).await.is_err() {
                                break;
                            }
                        }
                        Some(Err(_)) | None => break,
                    }
                }
            }
        }
    });

    Ok(HeadStream { inner: tokio_stream::wrappers::ReceiverStream::new(rx), cancel })
}
