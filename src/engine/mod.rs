mod availability;
mod conflict;
mod durable;
mod error;
mod mutations;
mod queries;
mod store;

pub use durable::WalStore;
pub use error::EngineError;
pub use store::{FailPoint, MemoryStore, Store};

pub(crate) use conflict::{now_ms, validate_guest, validate_span};

use std::path::Path;
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::model::*;

/// Availability queries and the booking transaction manager over a [`Store`].
///
/// Queries read the store concurrently. Every write to a room runs under that
/// room's commit lock, so the re-check and the insert of a booking cannot
/// interleave with another writer on the same room.
pub struct Engine {
    store: Arc<dyn Store>,
    commit_locks: DashMap<RoomId, Arc<Mutex<()>>>,
}

impl Engine {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self {
            store,
            commit_locks: DashMap::new(),
        }
    }

    /// Engine over a fresh in-memory store.
    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryStore::new()))
    }

    /// Engine over the WAL at `path`, replaying whatever it already holds.
    pub async fn open(path: &Path) -> std::io::Result<Self> {
        let store = WalStore::open(path).await?;
        Ok(Self::new(Arc::new(store)))
    }

    pub fn store(&self) -> &Arc<dyn Store> {
        &self.store
    }

    /// Acquire the per-room serialization point for writes.
    pub(super) async fn lock_room(&self, room_id: RoomId) -> OwnedMutexGuard<()> {
        let lock = self
            .commit_locks
            .entry(room_id)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .value()
            .clone();
        lock.lock_owned().await
    }

    pub async fn compact(&self) -> Result<(), EngineError> {
        self.store.compact().await
    }

    pub async fn appends_since_compact(&self) -> u64 {
        self.store.appends_since_compact().await
    }
}
