// ============================================================================
// Partition
// ============================================================================
//
// A partition owns a set of named collections, the lock table guarding their
// keys, and (optionally) the WAL/snapshot files that make them durable.
// Locks never cross partition boundaries: a transaction is bound to exactly
// one partition.
//
// Commit application takes the state write lock for the whole batch, so
// readers outside the transaction see either none or all of its changes.
//
// ============================================================================

use super::collection::KeyValueStore;
use super::entry::StoredEntry;
use super::persistence::{
    CollectionData, DurabilityMode, PersistenceManager, WalEntry, apply_changes,
};
use crate::core::{PartitionId, Result, StoreError, Version};
use crate::transaction::{Change, LockKey, LockManager, Transaction, TransactionId};
use chrono::Utc;
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{Level, event};

static NEXT_INSTANCE: AtomicU64 = AtomicU64::new(1);

/// Tunables for a single partition
#[derive(Debug, Clone)]
pub struct PartitionOptions {
    /// Ambient deadline applied to every transaction begun on the partition
    pub transaction_timeout: Duration,
    /// WAL records between automatic checkpoints
    pub checkpoint_threshold: usize,
    pub durability: DurabilityMode,
}

impl Default for PartitionOptions {
    fn default() -> Self {
        Self {
            transaction_timeout: Duration::from_secs(4),
            checkpoint_threshold: 1000,
            durability: DurabilityMode::Async,
        }
    }
}

pub(crate) struct PartitionState {
    collections: CollectionData,
    /// Collection name -> key/value type signature it was opened with
    registry: HashMap<String, String>,
    last_lsn: u64,
    persistence: Option<PersistenceManager>,
}

impl PartitionState {
    fn commit(&mut self, tx_id: TransactionId, changes: Vec<Change>) -> Result<Version> {
        let lsn = self.last_lsn + 1;
        let committed_at = Utc::now();

        if let Some(persistence) = self.persistence.as_mut() {
            persistence.log(&WalEntry::Commit {
                tx_id: tx_id.as_u64(),
                lsn,
                committed_at,
                changes: changes.clone(),
            })?;
        }

        apply_changes(&mut self.collections, lsn, committed_at, changes);
        self.last_lsn = lsn;

        let checkpoint_due = self
            .persistence
            .as_ref()
            .is_some_and(|persistence| persistence.needs_checkpoint());
        if checkpoint_due {
            // The commit is already durable in the WAL; a failed checkpoint
            // only delays WAL truncation.
            if let Err(err) = self.checkpoint() {
                event!(Level::ERROR, error = %err, "automatic checkpoint failed");
            }
        }

        Ok(lsn)
    }

    fn checkpoint(&mut self) -> Result<()> {
        self.purge_expired();
        match self.persistence.as_mut() {
            Some(persistence) => persistence.checkpoint(&self.collections, self.last_lsn),
            None => Ok(()),
        }
    }

    fn purge_expired(&mut self) -> usize {
        let now = Utc::now();
        let mut purged = 0;
        for entries in self.collections.values_mut() {
            let before = entries.len();
            entries.retain(|_, entry| !entry.is_expired_at(now));
            purged += before - entries.len();
        }
        purged
    }
}

pub(crate) struct PartitionCore {
    pub(crate) id: PartitionId,
    pub(crate) instance: u64,
    pub(crate) locks: LockManager,
    pub(crate) transaction_timeout: Duration,
    state: RwLock<PartitionState>,
}

impl PartitionCore {
    /// Latest committed, unexpired entry for `key`
    pub(crate) async fn read_committed(&self, key: &LockKey) -> Option<StoredEntry> {
        let state = self.state.read().await;
        state
            .collections
            .get(key.collection())?
            .get(key.key())
            .filter(|entry| !entry.is_expired_at(Utc::now()))
            .cloned()
    }

    pub(crate) async fn apply_commit(
        &self,
        tx_id: TransactionId,
        changes: Vec<Change>,
    ) -> Result<Version> {
        let mut state = self.state.write().await;
        state.commit(tx_id, changes)
    }
}

/// One shard of collections with its own lock table.
///
/// Cheap to clone; clones share the same state.
#[derive(Clone)]
pub struct Partition {
    core: Arc<PartitionCore>,
}

impl Partition {
    /// Create a partition whose state lives only in memory
    pub fn in_memory(id: PartitionId) -> Self {
        Self::in_memory_with(id, PartitionOptions::default())
    }

    pub fn in_memory_with(id: PartitionId, options: PartitionOptions) -> Self {
        Self::from_state(
            id,
            options.transaction_timeout,
            PartitionState {
                collections: HashMap::new(),
                registry: HashMap::new(),
                last_lsn: 0,
                persistence: None,
            },
        )
    }

    /// Open a durable partition rooted at `dir`, recovering any state
    /// committed by a previous owner.
    pub fn open(id: PartitionId, dir: impl AsRef<Path>, options: PartitionOptions) -> Result<Self> {
        let dir = dir.as_ref();
        let mut persistence = PersistenceManager::new(dir, options.durability)?;
        persistence
            .wal_mut()
            .set_checkpoint_threshold(options.checkpoint_threshold);
        let recovered = persistence.recover()?;
        // Start from a clean WAL so new records never follow a torn tail.
        persistence.checkpoint(&recovered.collections, recovered.last_lsn)?;

        event!(
            Level::INFO,
            partition = id,
            path = %dir.display(),
            last_lsn = recovered.last_lsn,
            collections = recovered.collections.len(),
            "partition opened"
        );

        Ok(Self::from_state(
            id,
            options.transaction_timeout,
            PartitionState {
                collections: recovered.collections,
                registry: HashMap::new(),
                last_lsn: recovered.last_lsn,
                persistence: Some(persistence),
            },
        ))
    }

    fn from_state(id: PartitionId, transaction_timeout: Duration, state: PartitionState) -> Self {
        Self {
            core: Arc::new(PartitionCore {
                id,
                instance: NEXT_INSTANCE.fetch_add(1, Ordering::Relaxed),
                locks: LockManager::new(),
                transaction_timeout,
                state: RwLock::new(state),
            }),
        }
    }

    pub fn id(&self) -> PartitionId {
        self.core.id
    }

    /// Begin a transaction bounded by the partition's default timeout
    pub fn begin(&self) -> Transaction {
        self.begin_with_timeout(self.core.transaction_timeout)
    }

    /// Begin a transaction with a caller-chosen deadline
    pub fn begin_with_timeout(&self, timeout: Duration) -> Transaction {
        Transaction::begin(Arc::clone(&self.core), timeout)
    }

    /// Get a typed handle to the collection `name`, creating it if needed.
    ///
    /// # Errors
    /// Returns `TypeMismatch` if the collection was already opened with
    /// different key or value types.
    pub async fn get_or_add<K, V>(&self, name: &str) -> Result<KeyValueStore<K, V>>
    where
        K: Serialize + DeserializeOwned,
        V: Serialize + DeserializeOwned,
    {
        let signature = format!(
            "{} -> {}",
            std::any::type_name::<K>(),
            std::any::type_name::<V>()
        );
        let mut state = self.core.state.write().await;
        match state.registry.entry(name.to_string()) {
            Entry::Occupied(existing) if *existing.get() != signature => {
                return Err(StoreError::TypeMismatch(format!(
                    "Collection '{}' is registered as {}, requested {}",
                    name,
                    existing.get(),
                    signature
                )));
            }
            Entry::Occupied(_) => {}
            Entry::Vacant(slot) => {
                slot.insert(signature);
            }
        }
        Ok(KeyValueStore::new(name, self.core.id, self.core.instance))
    }

    /// Snapshot the partition and truncate its WAL. Expired entries are
    /// purged first. A no-op for in-memory partitions.
    pub async fn checkpoint(&self) -> Result<()> {
        let mut state = self.core.state.write().await;
        state.checkpoint()
    }

    /// Physically drop expired entries; returns how many were removed.
    pub async fn purge_expired(&self) -> usize {
        let mut state = self.core.state.write().await;
        state.purge_expired()
    }

    /// Sequence number of the latest commit
    pub async fn last_lsn(&self) -> u64 {
        self.core.state.read().await.last_lsn
    }

    /// Number of live (unexpired) entries in a collection
    pub async fn len(&self, collection: &str) -> usize {
        let now = Utc::now();
        let state = self.core.state.read().await;
        state
            .collections
            .get(collection)
            .map(|entries| entries.values().filter(|e| !e.is_expired_at(now)).count())
            .unwrap_or(0)
    }

    /// Number of keys currently locked by any transaction
    pub fn locked_key_count(&self) -> usize {
        self.core.locks.locked_key_count()
    }
}

impl std::fmt::Debug for Partition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Partition")
            .field("id", &self.core.id)
            .field("instance", &self.core.instance)
            .finish()
    }
}
