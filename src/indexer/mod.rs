pub mod address_heuristic;

use std::sync::Arc;

use tokio::sync::broadcast;

use crate::chain::fetcher::BlockFetcher;
use crate::chain::pool::ConnectionPool;
use crate::chain::types::BlockRecord;
use crate::events::{BroadcastEvent, ChainEvent};
use crate::store::{AddressRole, Store};

use self::address_heuristic::{collect_addresses, Base58LengthHeuristic, IsAddressLike};

/// Indexer (C5).
///
/// State machine per block: Unseen → Header → Details → Complete. Consumes
/// `HeadSeen` off the typed channel C4 publishes to, writes the header row, then
/// performs detail ingestion via the Block Fetcher, then derives address edges. A
/// block only reaches Complete once `finalize_block_counts` sets its `complete` flag;
/// a header row existing is not itself proof that ingestion succeeded.
pub struct Indexer {
    store: Arc<dyn Store>,
    pool: Arc<ConnectionPool>,
    fetcher: Arc<BlockFetcher>,
    events_in: broadcast::Receiver<ChainEvent>,
    broadcast_out: broadcast::Sender<BroadcastEvent>,
    is_address_like: Arc<dyn IsAddressLike>,
}

impl Indexer {
    pub fn new(
        store: Arc<dyn Store>,
        pool: Arc<ConnectionPool>,
        fetcher: Arc<BlockFetcher>,
        events_in: broadcast::Receiver<ChainEvent>,
        broadcast_out: broadcast::Sender<BroadcastEvent>,
    ) -> Self {
        Self {
            store,
            pool,
            fetcher,
            events_in,
            broadcast_out,
            is_address_like: Arc::new(Base58LengthHeuristic),
        }
    }

    /// Consumes `HeadSeen`/`HeadFinalized` events until the channel closes. Errors from
    /// a single block's detail ingestion are logged and do not stop the loop — the
    /// supervisor's retry discipline operates per-block, not on this loop as a whole.
    pub async fn run(mut self) {
        loop {
            match self.events_in.recv().await {
                Ok(ChainEvent::HeadSeen(head)) => {
                    let _ = self.broadcast_out.send(BroadcastEvent::NewBlock {
                        number: head.number,
                        hash: crate::chain::types::render_hash(&head.hash),
                    });
                    if let Err(e) = self.index_block(head.number, head.hash).await {
                        tracing::warn!(block = head.number, error = %e, "failed to index block, will retry on next head");
                    }
                }
                Ok(ChainEvent::HeadFinalized(head)) => {
                    let _ = self.broadcast_out.send(BroadcastEvent::BlockFinalized {
                        number: head.number,
                        hash: crate::chain::types::render_hash(&head.hash),
                    });
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "indexer lagged behind the head-event channel; gaps are tolerated by design");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    }

    async fn index_block(&self, number: u64, hash: [u8; 32]) -> anyhow::Result<()> {
        let rendered_hash = crate::chain::types::render_hash(&hash);

        // Header-only projection first, sticky once written; real parent/state/
        // extrinsics roots come from the header fetch below rather than placeholders,
        // since nothing else ever goes back to fill them in.
        let header = self.pool.acquire().await.header(Some(hash)).await?;
        let header_only = BlockRecord {
            number,
            hash: rendered_hash.clone(),
            parent_hash: crate::chain::types::render_hash(&header.parent_hash.0),
            state_root: crate::chain::types::render_hash(&header.state_root.0),
            extrinsics_root: crate::chain::types::render_hash(&header.extrinsics_root.0),
            timestamp: chrono::Utc::now().timestamp_millis(),
            author: None,
            extrinsics: Vec::new(),
            standalone_events: Vec::new(),
        };
        let inserted = self.store.insert_block_header(&header_only).await?;
        if !inserted {
            // Header row already existed. That alone doesn't mean detail ingestion
            // finished last time — only `complete` does.
            if self.store.is_block_complete(number).await? {
                return Ok(());
            }
        }

        let block = tokio::time::timeout(
            crate::constants::DETAIL_INGESTION_RETRY_BUDGET,
            crate::retrier::retry_with_backoff(
                "index_block_details",
                crate::constants::DETAIL_INGESTION_ATTEMPT_TIMEOUT,
                || async {
                    let block = self.fetcher.fetch_by_hash(hash).await?;
                    self.ingest_details(&block).await?;
                    Ok::<_, anyhow::Error>(block)
                },
            ),
        )
        .await
        .map_err(|_elapsed| {
            anyhow::anyhow!("detail ingestion for block {number} exceeded its retry budget; left incomplete for a later resweep")
        })?;

        self.store
            .finalize_block_counts(number, block.extrinsics_count(), block.events_count())
            .await?;

        let _ = self.broadcast_out.send(BroadcastEvent::BlockDetails(crate::events::BlockDetails {
            number,
            hash: rendered_hash,
            extrinsics_count: block.extrinsics_count(),
            events_count: block.events_count(),
        }));

        Ok(())
    }

    async fn ingest_details(&self, block: &BlockRecord) -> anyhow::Result<()> {
        for extrinsic in &block.extrinsics {
            if let Err(e) = self.ingest_one_extrinsic(block, extrinsic).await {
                tracing::warn!(
                    block = block.number,
                    extrinsic = %extrinsic.hash,
                    error = %e,
                    "per-extrinsic ingestion failed, skipping (block still counts as indexed)"
                );
            }
        }

        for event in &block.standalone_events {
            self.store.insert_event(event, block.number, &block.hash, None).await?;
            self.derive_event_addresses(block.number, event).await?;
        }

        Ok(())
    }

    async fn ingest_one_extrinsic(&self, block: &BlockRecord, extrinsic: &crate::chain::types::ExtrinsicRecord) -> anyhow::Result<()> {
        self.store.insert_extrinsic(extrinsic, block.number, &block.hash).await?;

        for event in &extrinsic.events {
            self.store.insert_event(event, block.number, &block.hash, Some(&extrinsic.hash)).await?;
            self.derive_event_addresses(block.number, event).await?;
        }

        self.derive_extrinsic_addresses(block.number, extrinsic).await?;

        if extrinsic.is_signed {
            let _ = self.broadcast_out.send(BroadcastEvent::NewTransaction(crate::events::NewTransaction {
                hash: extrinsic.hash.clone(),
                block_number: block.number,
                section: extrinsic.section.clone(),
                method: extrinsic.method.clone(),
                signer: extrinsic.signer.clone(),
            }));
            if let Some(signer) = &extrinsic.signer {
                let _ = self.broadcast_out.send(BroadcastEvent::AddressTransaction {
                    address: signer.clone(),
                    tx: crate::events::NewTransaction {
                        hash: extrinsic.hash.clone(),
                        block_number: block.number,
                        section: extrinsic.section.clone(),
                        method: extrinsic.method.clone(),
                        signer: extrinsic.signer.clone(),
                    },
                });
            }
        }

        Ok(())
    }

    /// Address edge derivation: walks the extrinsic's signer and its `args` tree,
    /// upserting `Address` and `AddressExtrinsic` per hit.
    async fn derive_extrinsic_addresses(&self, block_number: u64, extrinsic: &crate::chain::types::ExtrinsicRecord) -> anyhow::Result<()> {
        let mut addresses = Vec::new();
        if let Some(signer) = &extrinsic.signer {
            if self.is_address_like.is_address_like(signer) {
                addresses.push((signer.clone(), true));
            }
        }
        let mut from_args = Vec::new();
        collect_addresses(&extrinsic.args, self.is_address_like.as_ref(), &mut from_args);
        for a in from_args {
            if !addresses.iter().any(|(addr, _)| addr == &a) {
                addresses.push((a, false));
            }
        }

        for (address, is_signer) in addresses {
            let address_id = self.store.upsert_address(&address, block_number).await?;
            let role = if is_signer { AddressRole::Signer } else { AddressRole::Participant };
            self.store.insert_address_extrinsic(address_id, &extrinsic.hash, block_number, role).await?;
        }
        Ok(())
    }

    /// Symmetric `AddressEvent` edge derivation: walks an event's `data` tree
    /// independent of whether it is tied to an extrinsic.
    async fn derive_event_addresses(&self, block_number: u64, event: &crate::chain::types::EventRecord) -> anyhow::Result<()> {
        let mut addresses = Vec::new();
        collect_addresses(&event.data, self.is_address_like.as_ref(), &mut addresses);
        for address in addresses {
            let address_id = self.store.upsert_address(&address, block_number).await?;
            self.store.insert_address_event(address_id, block_number, event.event_index).await?;
        }
        Ok(())
    }
}
