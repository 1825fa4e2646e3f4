use crate::core::{PartitionId, Result, StoreError, Versioned};
use crate::transaction::{Change, LockKey, LockMode, Transaction};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::marker::PhantomData;
use std::sync::Arc;
use std::time::Duration;

/// Typed handle to one named collection of a partition.
///
/// Keys and values are MessagePack-encoded at this boundary; the partition
/// only ever sees bytes. Every operation runs inside a transaction begun on
/// the same partition and locks the key for the rest of that transaction.
pub struct KeyValueStore<K, V> {
    name: Arc<str>,
    partition_id: PartitionId,
    partition_instance: u64,
    _types: PhantomData<fn() -> (K, V)>,
}

impl<K, V> Clone for KeyValueStore<K, V> {
    fn clone(&self) -> Self {
        Self {
            name: Arc::clone(&self.name),
            partition_id: self.partition_id,
            partition_instance: self.partition_instance,
            _types: PhantomData,
        }
    }
}

impl<K, V> std::fmt::Debug for KeyValueStore<K, V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyValueStore")
            .field("name", &self.name)
            .field("partition", &self.partition_id)
            .finish()
    }
}

impl<K, V> KeyValueStore<K, V> {
    pub(crate) fn new(name: &str, partition_id: PartitionId, partition_instance: u64) -> Self {
        Self {
            name: Arc::from(name),
            partition_id,
            partition_instance,
            _types: PhantomData,
        }
    }
}

impl<K, V> KeyValueStore<K, V>
where
    K: Serialize + DeserializeOwned + Send + Sync,
    V: Serialize + DeserializeOwned + Send,
{
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn partition_id(&self) -> PartitionId {
        self.partition_id
    }

    fn lock_key(&self, tx: &mut Transaction, key: &K) -> Result<LockKey> {
        if tx.partition_instance() != self.partition_instance {
            let err = StoreError::ExecutionError(format!(
                "Collection '{}' of partition {} used from a transaction on partition {}",
                self.name,
                self.partition_id,
                tx.partition_id()
            ));
            return Err(tx.fail(err));
        }
        match rmp_serde::to_vec(key) {
            Ok(encoded) => Ok(LockKey::new(self.name.as_ref(), encoded)),
            Err(err) => Err(tx.fail(err.into())),
        }
    }

    fn decode(&self, tx: &mut Transaction, bytes: &[u8]) -> Result<V> {
        rmp_serde::from_slice(bytes).map_err(|err| tx.fail(err.into()))
    }

    /// Look up `key`, locking it in `mode`.
    pub async fn try_get(&self, tx: &mut Transaction, key: &K, mode: LockMode) -> Result<Option<V>> {
        Ok(self
            .try_get_versioned(tx, key, mode)
            .await?
            .map(|versioned| versioned.value))
    }

    /// Look up `key` together with its committed version and expiry.
    ///
    /// A value written earlier in the same transaction reports the version
    /// it is about to replace.
    pub async fn try_get_versioned(
        &self,
        tx: &mut Transaction,
        key: &K,
        mode: LockMode,
    ) -> Result<Option<Versioned<V>>> {
        let lock_key = self.lock_key(tx, key)?;
        let Some(entry) = tx.read(lock_key, mode).await? else {
            return Ok(None);
        };
        let value = self.decode(tx, &entry.value)?;
        Ok(Some(Versioned {
            value,
            version: entry.version,
            expires_at: entry.expires_at,
        }))
    }

    pub async fn contains_key(&self, tx: &mut Transaction, key: &K, mode: LockMode) -> Result<bool> {
        let lock_key = self.lock_key(tx, key)?;
        Ok(tx.read(lock_key, mode).await?.is_some())
    }

    /// Insert `initial` if `key` is absent, otherwise replace the current
    /// value with `update(key, current)`. Returns the value now pending.
    ///
    /// `update` runs once, under the key's `Update` lock.
    pub async fn add_or_update<F>(&self, tx: &mut Transaction, key: K, initial: V, update: F) -> Result<V>
    where
        F: FnOnce(&K, V) -> V + Send,
    {
        self.upsert(tx, key, initial, update, None).await
    }

    /// Like [`add_or_update`](Self::add_or_update), expiring the entry `ttl`
    /// after the transaction commits.
    pub async fn add_or_update_expiring<F>(
        &self,
        tx: &mut Transaction,
        key: K,
        initial: V,
        update: F,
        ttl: Duration,
    ) -> Result<V>
    where
        F: FnOnce(&K, V) -> V + Send,
    {
        self.upsert(tx, key, initial, update, Some(ttl)).await
    }

    async fn upsert<F>(
        &self,
        tx: &mut Transaction,
        key: K,
        initial: V,
        update: F,
        ttl: Option<Duration>,
    ) -> Result<V>
    where
        F: FnOnce(&K, V) -> V + Send,
    {
        let lock_key = self.lock_key(tx, &key)?;
        let current = tx.read(lock_key.clone(), LockMode::Update).await?;

        let value = match current {
            Some(entry) => {
                let existing = self.decode(tx, &entry.value)?;
                update(&key, existing)
            }
            None => initial,
        };

        let encoded = match rmp_serde::to_vec(&value) {
            Ok(encoded) => encoded,
            Err(err) => return Err(tx.fail(err.into())),
        };
        tx.write(Change::Put {
            collection: self.name.to_string(),
            key: lock_key.key().to_vec(),
            value: encoded,
            ttl_ms: ttl.map(|ttl| u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX)),
        })
        .await?;

        Ok(value)
    }

    /// Remove `key` if present; returns whether anything was removed.
    pub async fn try_remove(&self, tx: &mut Transaction, key: &K) -> Result<bool> {
        let lock_key = self.lock_key(tx, key)?;
        if tx.read(lock_key.clone(), LockMode::Update).await?.is_none() {
            return Ok(false);
        }
        tx.write(Change::Remove {
            collection: self.name.to_string(),
            key: lock_key.key().to_vec(),
        })
        .await?;
        Ok(true)
    }
}
