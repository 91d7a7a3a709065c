//! Broadcaster (C9).
//!
//! Process-wide event bus + room registry. Grounded on the `tokio::sync::broadcast`
//! room-fanout pattern seen in `other_examples/.../web3_proxy-src-app.rs`; delivery is
//! best-effort per subscriber (a lagging receiver simply misses messages rather than
//! stalling the fanout, which is `broadcast`'s native behavior).

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{broadcast, RwLock};

use crate::events::BroadcastEvent;

pub const ROOM_BLOCKS: &str = "blocks";
pub const ROOM_TRANSACTIONS: &str = "transactions";

pub fn address_room(address: &str) -> String {
    format!("address:{address}")
}

#[derive(Debug, Clone)]
pub struct RoomMessage {
    pub room: String,
    pub event: BroadcastEvent,
}

/// Room-scoped fanout: connections subscribe to a room's receiver and only see
/// messages published to that room.
pub struct Broadcaster {
    rooms: RwLock<HashMap<String, broadcast::Sender<BroadcastEvent>>>,
    capacity: usize,
}

impl Broadcaster {
    pub fn new(capacity: usize) -> Self {
        Self { rooms: RwLock::new(HashMap::new()), capacity }
    }

    pub async fn join(&self, room: &str) -> broadcast::Receiver<BroadcastEvent> {
        let rooms = self.rooms.read().await;
        if let Some(tx) = rooms.get(room) {
            return tx.subscribe();
        }
        drop(rooms);

        let mut rooms = self.rooms.write().await;
        let tx = rooms
            .entry(room.to_string())
            .or_insert_with(|| broadcast::channel(self.capacity).0);
        tx.subscribe()
    }

    /// Best-effort publish: a room with no subscribers, or all-lagging subscribers, is
    /// a silent no-op — the fanout never blocks on a slow consumer.
    async fn publish(&self, room: &str, event: BroadcastEvent) {
        let rooms = self.rooms.read().await;
        if let Some(tx) = rooms.get(room) {
            let _ = tx.send(event);
        }
    }

    /// Consumes events from the Indexer (C5) and fans them out to their rooms.
    pub async fn run(self: Arc<Self>, mut events_in: broadcast::Receiver<BroadcastEvent>) {
        loop {
            match events_in.recv().await {
                Ok(event) => self.dispatch(event).await,
                Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    }

    async fn dispatch(&self, event: BroadcastEvent) {
        match &event {
            BroadcastEvent::NewBlock { .. }
            | BroadcastEvent::BlockFinalized { .. }
            | BroadcastEvent::BlockDetails(_) => {
                self.publish(ROOM_BLOCKS, event).await;
            }
            BroadcastEvent::NewTransaction(tx) => {
                self.publish(ROOM_TRANSACTIONS, event.clone()).await;
                if let Some(signer) = &tx.signer {
                    self.publish(&address_room(signer), event).await;
                }
            }
            BroadcastEvent::AddressTransaction { address, .. } => {
                self.publish(&address_room(address), event).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::NewTransaction;

    #[tokio::test]
    async fn tx_new_reaches_transactions_and_signer_room_only() {
        let broadcaster = Arc::new(Broadcaster::new(16));

        let mut transactions_rx = broadcaster.join(ROOM_TRANSACTIONS).await;
        let mut address_a_rx = broadcaster.join(&address_room("A")).await;
        let mut address_b_rx = broadcaster.join(&address_room("B")).await;

        let tx = NewTransaction {
            hash: "0xH".into(),
            block_number: 1,
            section: "balances".into(),
            method: "transfer".into(),
            signer: Some("A".into()),
        };
        broadcaster.dispatch(BroadcastEvent::NewTransaction(tx)).await;

        assert!(transactions_rx.try_recv().is_ok());
        assert!(address_a_rx.try_recv().is_ok());
        assert!(address_b_rx.try_recv().is_err());
    }
}
