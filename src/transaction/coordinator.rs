// ============================================================================
// Transaction
// ============================================================================
//
// A transaction is bound to one partition. It accumulates:
//   - the locks it holds (released only when it ends)
//   - the committed entries it has read under those locks
//   - a buffer of pending changes, one per key (last write wins)
//
// Nothing is visible to other transactions until commit, which logs the whole
// buffer to the partition's WAL and applies it under the partition state lock.
// Dropping an active transaction aborts it.
//
// ============================================================================

use super::change::Change;
use super::lock::{LockKey, LockMode};
use super::state::{TransactionId, TransactionState};
use crate::core::{PartitionId, Result, StoreError, Version};
use crate::storage::StoredEntry;
use crate::storage::partition::PartitionCore;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{Level, event};

/// An atomic, isolated unit of work on a single partition.
pub struct Transaction {
    id: TransactionId,
    partition: Arc<PartitionCore>,
    state: TransactionState,
    started_at: Instant,
    deadline: Instant,
    held: HashMap<LockKey, LockMode>,
    observed: HashMap<LockKey, Option<StoredEntry>>,
    changes: Vec<Change>,
    pending: HashMap<LockKey, usize>,
}

impl Transaction {
    pub(crate) fn begin(partition: Arc<PartitionCore>, timeout: Duration) -> Self {
        let id = TransactionId::next();
        let started_at = Instant::now();
        event!(Level::TRACE, tx = %id, partition = partition.id, "transaction started");
        Self {
            id,
            partition,
            state: TransactionState::Active,
            started_at,
            deadline: started_at + timeout,
            held: HashMap::new(),
            observed: HashMap::new(),
            changes: Vec::new(),
            pending: HashMap::new(),
        }
    }

    pub fn id(&self) -> TransactionId {
        self.id
    }

    pub fn state(&self) -> TransactionState {
        self.state
    }

    pub fn partition_id(&self) -> PartitionId {
        self.partition.id
    }

    pub(crate) fn partition_instance(&self) -> u64 {
        self.partition.instance
    }

    pub fn deadline(&self) -> Instant {
        self.deadline
    }

    /// Move the deadline to `timeout` from now
    pub fn set_timeout(&mut self, timeout: Duration) {
        self.deadline = Instant::now() + timeout;
    }

    /// Time elapsed since the transaction began
    pub fn duration(&self) -> Duration {
        self.started_at.elapsed()
    }

    /// Number of keys with a buffered change
    pub fn change_count(&self) -> usize {
        self.changes.len()
    }

    pub fn held_lock_count(&self) -> usize {
        self.held.len()
    }

    fn ensure_active(&self) -> Result<()> {
        if self.state.is_active() {
            Ok(())
        } else {
            Err(StoreError::TransactionAborted(format!(
                "{} is {}",
                self.id, self.state
            )))
        }
    }

    async fn lock(&mut self, key: &LockKey, mode: LockMode) -> Result<()> {
        if let Some(held) = self.held.get(key) {
            if held.covers(mode) {
                return Ok(());
            }
        }

        let acquired = self
            .partition
            .locks
            .acquire(self.id, key.clone(), mode, self.deadline)
            .await;
        match acquired {
            Ok(handle) => {
                self.held.insert(handle.key, handle.mode);
                Ok(())
            }
            Err(err) => Err(self.fail(err)),
        }
    }

    /// Read `key` under `mode`, seeing this transaction's own pending writes.
    pub(crate) async fn read(&mut self, key: LockKey, mode: LockMode) -> Result<Option<StoredEntry>> {
        self.ensure_active()?;
        self.lock(&key, mode).await?;

        if let Some(&index) = self.pending.get(&key) {
            let committed_version = self
                .observed
                .get(&key)
                .and_then(|seen| seen.as_ref())
                .map(|entry| entry.version)
                .unwrap_or(0);
            return Ok(match &self.changes[index] {
                Change::Put { value, .. } => {
                    Some(StoredEntry::new(value.clone(), committed_version, None))
                }
                Change::Remove { .. } => None,
            });
        }

        if let Some(seen) = self.observed.get(&key) {
            return Ok(seen.clone());
        }
        let seen = self.partition.read_committed(&key).await;
        self.observed.insert(key, seen.clone());
        Ok(seen)
    }

    /// Buffer a change under an `Update` lock, replacing any earlier change
    /// to the same key.
    pub(crate) async fn write(&mut self, change: Change) -> Result<()> {
        self.ensure_active()?;
        let key = change.lock_key();
        self.lock(&key, LockMode::Update).await?;

        match self.pending.get(&key) {
            Some(&index) => self.changes[index] = change,
            None => {
                self.pending.insert(key, self.changes.len());
                self.changes.push(change);
            }
        }
        Ok(())
    }

    /// Abort because of `err` and hand the error back for propagation.
    pub(crate) fn fail(&mut self, err: StoreError) -> StoreError {
        if self.state.is_active() {
            event!(Level::WARN, tx = %self.id, error = %err, "transaction aborted by failed operation");
            self.end(TransactionState::Aborted);
        }
        err
    }

    /// Commit every buffered change atomically.
    ///
    /// Returns the commit version, or `None` if nothing was written. A
    /// transaction that only read is a legal no-op commit.
    ///
    /// # Errors
    /// Returns `TransactionAborted` if the deadline has passed or the commit
    /// record could not be logged; nothing is applied in either case.
    pub async fn commit(mut self) -> Result<Option<Version>> {
        self.ensure_active()?;

        if Instant::now() > self.deadline {
            let err = StoreError::TransactionAborted(format!(
                "{} passed its deadline before commit",
                self.id
            ));
            return Err(self.fail(err));
        }

        if self.changes.is_empty() {
            self.end(TransactionState::Committed);
            return Ok(None);
        }

        let changes = std::mem::take(&mut self.changes);
        let change_count = changes.len();
        match self.partition.apply_commit(self.id, changes).await {
            Ok(version) => {
                event!(
                    Level::DEBUG,
                    tx = %self.id,
                    partition = self.partition.id,
                    version,
                    changes = change_count,
                    "transaction committed"
                );
                self.end(TransactionState::Committed);
                Ok(Some(version))
            }
            Err(err) => {
                let err = StoreError::TransactionAborted(format!(
                    "{} failed to commit: {}",
                    self.id, err
                ));
                Err(self.fail(err))
            }
        }
    }

    /// Discard every buffered change and release all locks.
    pub fn abort(mut self) {
        if self.state.is_active() {
            event!(Level::DEBUG, tx = %self.id, "transaction aborted");
            self.end(TransactionState::Aborted);
        }
    }

    fn end(&mut self, state: TransactionState) {
        self.partition.locks.release_all(self.id, self.held.keys());
        self.held.clear();
        self.observed.clear();
        self.changes.clear();
        self.pending.clear();
        self.state = state;
    }
}

impl Drop for Transaction {
    fn drop(&mut self) {
        if self.state.is_active() {
            event!(
                Level::DEBUG,
                tx = %self.id,
                discarded = self.changes.len(),
                "transaction dropped without commit"
            );
            self.end(TransactionState::Aborted);
        }
    }
}

impl std::fmt::Debug for Transaction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transaction")
            .field("id", &self.id)
            .field("partition", &self.partition.id)
            .field("state", &self.state)
            .field("changes", &self.changes.len())
            .field("locks", &self.held.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use crate::core::StoreError;
    use crate::storage::Partition;
    use crate::transaction::{LockMode, TransactionState};
    use std::time::Duration;

    #[tokio::test]
    async fn test_drop_releases_locks() {
        let partition = Partition::in_memory(0);
        let store = partition.get_or_add::<String, i64>("counters").await.unwrap();

        {
            let mut tx = partition.begin();
            store.add_or_update(&mut tx, "a".into(), 1, |_, v| v + 1).await.unwrap();
            store.add_or_update(&mut tx, "b".into(), 1, |_, v| v + 1).await.unwrap();
            assert_eq!(tx.held_lock_count(), 2);
            assert_eq!(partition.locked_key_count(), 2);
        }

        assert_eq!(partition.locked_key_count(), 0);
        assert_eq!(partition.len("counters").await, 0);
    }

    #[tokio::test]
    async fn test_last_write_within_transaction_wins() {
        let partition = Partition::in_memory(0);
        let store = partition.get_or_add::<String, i64>("counters").await.unwrap();

        let mut tx = partition.begin();
        store.add_or_update(&mut tx, "c".into(), 10, |_, v| v + 1).await.unwrap();
        let second = store.add_or_update(&mut tx, "c".into(), 10, |_, v| v + 1).await.unwrap();
        assert_eq!(second, 11);
        assert_eq!(tx.change_count(), 1);
        tx.commit().await.unwrap();

        let mut tx = partition.begin();
        assert_eq!(store.try_get(&mut tx, &"c".to_string(), LockMode::Read).await.unwrap(), Some(11));
    }

    #[tokio::test]
    async fn test_read_only_commit_is_noop() {
        let partition = Partition::in_memory(0);
        let store = partition.get_or_add::<String, String>("sessions").await.unwrap();

        let mut tx = partition.begin();
        assert!(!store.contains_key(&mut tx, &"ghost".to_string(), LockMode::Read).await.unwrap());
        assert_eq!(tx.commit().await.unwrap(), None);
        assert_eq!(partition.last_lsn().await, 0);
    }

    #[tokio::test]
    async fn test_commit_after_deadline_aborts() {
        let partition = Partition::in_memory(0);
        let store = partition.get_or_add::<String, i64>("counters").await.unwrap();

        let mut tx = partition.begin_with_timeout(Duration::from_millis(10));
        store.add_or_update(&mut tx, "c".into(), 1, |_, v| v + 1).await.unwrap();
        tokio::time::sleep(Duration::from_millis(30)).await;

        let err = tx.commit().await.unwrap_err();
        assert!(matches!(err, StoreError::TransactionAborted(_)));
        assert_eq!(partition.len("counters").await, 0);
        assert_eq!(partition.locked_key_count(), 0);
    }

    #[tokio::test]
    async fn test_failed_operation_aborts_transaction() {
        let partition = Partition::in_memory(0);
        let store = partition.get_or_add::<String, i64>("counters").await.unwrap();

        let mut holder = partition.begin();
        store.add_or_update(&mut holder, "hot".into(), 1, |_, v| v + 1).await.unwrap();

        let mut tx = partition.begin_with_timeout(Duration::from_millis(30));
        store.add_or_update(&mut tx, "cold".into(), 1, |_, v| v + 1).await.unwrap();
        let err = store
            .add_or_update(&mut tx, "hot".into(), 1, |_, v| v + 1)
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::LockTimeout(_)));
        assert_eq!(tx.state(), TransactionState::Aborted);

        // The failed transaction released "cold" even though it is still alive.
        assert_eq!(partition.locked_key_count(), 1);

        let err = store
            .try_get(&mut tx, &"cold".to_string(), LockMode::Read)
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::TransactionAborted(_)));
    }
}
