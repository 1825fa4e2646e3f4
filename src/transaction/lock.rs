//! Per-key shared/exclusive lock table backing transaction isolation.
//!
//! Locks are owned by transactions and held until the transaction ends.
//! Waiting is cooperative: a blocked acquirer parks on a per-key `Notify`
//! and never blocks the executor thread.
//!
//! The table does not detect deadlocks. Callers acquire locks in a fixed
//! collection order per operation (credentials before sessions, counter
//! before data); a cycle can only end through the acquirer's deadline.

use super::TransactionId;
use crate::core::{Result, StoreError};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::Notify;
use tokio::time::Instant;
use tracing::{Level, event};

/// Lock modes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum LockMode {
    /// Shared lock; any number of readers
    #[default]
    Read,
    /// Exclusive lock held by a single writer (or a reader intending to write)
    Update,
}

impl LockMode {
    /// Check if two lock modes held by different transactions are compatible
    pub fn is_compatible_with(&self, other: LockMode) -> bool {
        matches!((self, other), (LockMode::Read, LockMode::Read))
    }

    /// Check if holding `self` already satisfies a request for `requested`
    pub fn covers(&self, requested: LockMode) -> bool {
        matches!(
            (self, requested),
            (LockMode::Update, _) | (LockMode::Read, LockMode::Read)
        )
    }
}

impl fmt::Display for LockMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LockMode::Read => write!(f, "READ"),
            LockMode::Update => write!(f, "UPDATE"),
        }
    }
}

/// Lock key identifying a key inside a named collection
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LockKey {
    collection: String,
    key: Vec<u8>,
}

impl LockKey {
    pub fn new(collection: impl Into<String>, key: Vec<u8>) -> Self {
        Self {
            collection: collection.into(),
            key,
        }
    }

    pub fn collection(&self) -> &str {
        &self.collection
    }

    pub fn key(&self) -> &[u8] {
        &self.key
    }
}

impl fmt::Display for LockKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}[", self.collection)?;
        for byte in &self.key {
            write!(f, "{:02x}", byte)?;
        }
        write!(f, "]")
    }
}

/// Proof that a lock was granted. Pass back to [`LockManager::release`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockHandle {
    pub tx_id: TransactionId,
    pub key: LockKey,
    pub mode: LockMode,
}

#[derive(Debug, Default)]
struct LockSlot {
    readers: HashSet<TransactionId>,
    writer: Option<TransactionId>,
    notify: Arc<Notify>,
}

impl LockSlot {
    /// Only holders other than `tx_id` can conflict; a sole reader may upgrade.
    fn can_grant(&self, tx_id: TransactionId, mode: LockMode) -> bool {
        let writer_ok = self
            .writer
            .is_none_or(|writer| writer == tx_id || LockMode::Update.is_compatible_with(mode));
        writer_ok
            && self
                .readers
                .iter()
                .all(|reader| *reader == tx_id || LockMode::Read.is_compatible_with(mode))
    }

    fn grant(&mut self, tx_id: TransactionId, mode: LockMode) {
        match mode {
            LockMode::Read => {
                if self.writer != Some(tx_id) {
                    self.readers.insert(tx_id);
                }
            }
            LockMode::Update => {
                self.readers.remove(&tx_id);
                self.writer = Some(tx_id);
            }
        }
    }

    fn release(&mut self, tx_id: TransactionId) -> bool {
        let was_reader = self.readers.remove(&tx_id);
        let was_writer = self.writer == Some(tx_id);
        if was_writer {
            self.writer = None;
        }
        was_reader || was_writer
    }

    fn is_free(&self) -> bool {
        self.writer.is_none() && self.readers.is_empty()
    }
}

/// Lock manager for one partition.
///
/// This is the only structure in a partition mutated by many callers at
/// once; entries themselves are only touched under an `Update` lock.
#[derive(Debug, Default)]
pub struct LockManager {
    table: Mutex<HashMap<LockKey, LockSlot>>,
}

impl LockManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Acquire `mode` on `key` for `tx_id`, waiting until `deadline`.
    ///
    /// Re-acquiring a lock the transaction already holds is a no-op, and a
    /// `Read` holder may upgrade to `Update` once it is the only reader.
    ///
    /// # Errors
    /// Returns `LockTimeout` if the lock could not be granted before the deadline.
    pub async fn acquire(
        &self,
        tx_id: TransactionId,
        key: LockKey,
        mode: LockMode,
        deadline: Instant,
    ) -> Result<LockHandle> {
        loop {
            let Some(notify) = self.try_grant(tx_id, &key, mode)? else {
                return Ok(LockHandle { tx_id, key, mode });
            };

            // Register interest before re-checking so a release between the
            // two checks cannot be missed.
            let notified = notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            match self.try_grant(tx_id, &key, mode)? {
                None => return Ok(LockHandle { tx_id, key, mode }),
                // The slot was freed and recreated in between; its old
                // `Notify` will never fire again, so wait on the live one.
                Some(current) if !Arc::ptr_eq(&current, &notify) => continue,
                Some(_) => {}
            }

            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                event!(
                    Level::WARN,
                    tx = %tx_id,
                    key = %key,
                    mode = %mode,
                    "lock acquisition timed out"
                );
                return Err(StoreError::LockTimeout(format!(
                    "{} could not acquire {} lock on {} before its deadline",
                    tx_id, mode, key
                )));
            }
        }
    }

    /// Grants the lock if possible; otherwise returns the key's wait handle.
    fn try_grant(
        &self,
        tx_id: TransactionId,
        key: &LockKey,
        mode: LockMode,
    ) -> Result<Option<Arc<Notify>>> {
        let mut table = self.table.lock()?;
        let slot = table.entry(key.clone()).or_default();
        if slot.can_grant(tx_id, mode) {
            slot.grant(tx_id, mode);
            Ok(None)
        } else {
            Ok(Some(slot.notify.clone()))
        }
    }

    /// Release a single lock.
    pub fn release(&self, handle: &LockHandle) {
        let mut table = self.table_guard();
        Self::release_in(&mut table, handle.tx_id, &handle.key);
    }

    /// Release every listed lock held by `tx_id`.
    ///
    /// Infallible so it can run from `Drop`.
    pub fn release_all<'a>(&self, tx_id: TransactionId, keys: impl IntoIterator<Item = &'a LockKey>) {
        let mut table = self.table_guard();
        for key in keys {
            Self::release_in(&mut table, tx_id, key);
        }
    }

    fn release_in(table: &mut HashMap<LockKey, LockSlot>, tx_id: TransactionId, key: &LockKey) {
        let Some(slot) = table.get_mut(key) else {
            return;
        };
        if slot.release(tx_id) {
            slot.notify.notify_waiters();
        }
        if slot.is_free() {
            table.remove(key);
        }
    }

    fn table_guard(&self) -> MutexGuard<'_, HashMap<LockKey, LockSlot>> {
        self.table.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Mode currently held by `tx_id` on `key`, if any
    pub fn held_mode(&self, tx_id: TransactionId, key: &LockKey) -> Option<LockMode> {
        let table = self.table_guard();
        let slot = table.get(key)?;
        if slot.writer == Some(tx_id) {
            Some(LockMode::Update)
        } else if slot.readers.contains(&tx_id) {
            Some(LockMode::Read)
        } else {
            None
        }
    }

    /// Number of keys with at least one holder
    pub fn locked_key_count(&self) -> usize {
        self.table_guard().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn key(name: &str) -> LockKey {
        LockKey::new("users", name.as_bytes().to_vec())
    }

    fn soon() -> Instant {
        Instant::now() + Duration::from_millis(50)
    }

    #[test]
    fn test_lock_compatibility() {
        assert!(LockMode::Read.is_compatible_with(LockMode::Read));
        assert!(!LockMode::Read.is_compatible_with(LockMode::Update));
        assert!(!LockMode::Update.is_compatible_with(LockMode::Read));
        assert!(!LockMode::Update.is_compatible_with(LockMode::Update));
        assert!(LockMode::Update.covers(LockMode::Read));
        assert!(!LockMode::Read.covers(LockMode::Update));
    }

    #[tokio::test]
    async fn test_shared_readers() {
        let manager = LockManager::new();
        let tx1 = TransactionId::next();
        let tx2 = TransactionId::next();

        manager.acquire(tx1, key("alice"), LockMode::Read, soon()).await.unwrap();
        manager.acquire(tx2, key("alice"), LockMode::Read, soon()).await.unwrap();

        assert_eq!(manager.held_mode(tx1, &key("alice")), Some(LockMode::Read));
        assert_eq!(manager.held_mode(tx2, &key("alice")), Some(LockMode::Read));
        assert_eq!(manager.locked_key_count(), 1);
    }

    #[tokio::test]
    async fn test_reader_blocks_writer_until_timeout() {
        let manager = LockManager::new();
        let reader = TransactionId::next();
        let writer = TransactionId::next();

        manager.acquire(reader, key("alice"), LockMode::Read, soon()).await.unwrap();
        let err = manager
            .acquire(writer, key("alice"), LockMode::Update, soon())
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::LockTimeout(_)));
    }

    #[tokio::test]
    async fn test_sole_reader_upgrades() {
        let manager = LockManager::new();
        let tx = TransactionId::next();

        manager.acquire(tx, key("bob"), LockMode::Read, soon()).await.unwrap();
        manager.acquire(tx, key("bob"), LockMode::Update, soon()).await.unwrap();
        assert_eq!(manager.held_mode(tx, &key("bob")), Some(LockMode::Update));

        // Re-requesting a weaker mode keeps the stronger one.
        manager.acquire(tx, key("bob"), LockMode::Read, soon()).await.unwrap();
        assert_eq!(manager.held_mode(tx, &key("bob")), Some(LockMode::Update));
    }

    #[tokio::test]
    async fn test_release_wakes_waiter() {
        let manager = Arc::new(LockManager::new());
        let holder = TransactionId::next();
        let waiter = TransactionId::next();

        let handle = manager
            .acquire(holder, key("carol"), LockMode::Update, soon())
            .await
            .unwrap();

        let waiting = {
            let manager = Arc::clone(&manager);
            tokio::spawn(async move {
                let deadline = Instant::now() + Duration::from_secs(5);
                manager.acquire(waiter, key("carol"), LockMode::Update, deadline).await
            })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        manager.release(&handle);

        let granted = waiting.await.unwrap().unwrap();
        assert_eq!(granted.tx_id, waiter);
        assert_eq!(manager.held_mode(holder, &key("carol")), None);
    }

    #[tokio::test]
    async fn test_release_all_clears_table() {
        let manager = LockManager::new();
        let tx = TransactionId::next();
        let keys = [key("a"), key("b"), key("c")];

        for k in &keys {
            manager.acquire(tx, k.clone(), LockMode::Update, soon()).await.unwrap();
        }
        assert_eq!(manager.locked_key_count(), 3);

        manager.release_all(tx, keys.iter());
        assert_eq!(manager.locked_key_count(), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_heavy_contention_never_strands_waiters() {
        let manager = Arc::new(LockManager::new());
        let counter = LockKey::new("postIdCounter", b"IdCounter".to_vec());
        let started = Instant::now();

        let handles = (0..2000)
            .map(|_| {
                let manager = Arc::clone(&manager);
                let counter = counter.clone();
                tokio::spawn(async move {
                    let tx = TransactionId::next();
                    let deadline = Instant::now() + Duration::from_secs(20);
                    let handle = manager.acquire(tx, counter, LockMode::Update, deadline).await?;
                    tokio::task::yield_now().await;
                    manager.release(&handle);
                    Ok::<_, StoreError>(())
                })
            })
            .collect::<Vec<_>>();

        for handle in handles {
            handle.await.unwrap().unwrap();
        }
        // Each holder only yields once; a stranded waiter would sit out its full deadline.
        assert!(started.elapsed() < Duration::from_secs(10));
        assert_eq!(manager.locked_key_count(), 0);
    }

    #[test]
    fn test_lock_key_display() {
        assert_eq!(LockKey::new("posts", vec![0x0a, 0xff]).to_string(), "posts[0aff]");
    }
}
