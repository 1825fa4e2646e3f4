// ============================================================================
// Transaction Change Tracking
// ============================================================================
//
// A Change is one pending mutation of one key. Changes are buffered in the
// transaction, written to the WAL as a batch on commit, and then applied to
// the partition's collections. Abort simply drops them.
//
// ============================================================================

use super::lock::LockKey;
use serde::{Deserialize, Serialize};

/// A single pending mutation of a key inside a collection.
///
/// Keys and values are stored in their encoded (MessagePack) form so a single
/// transaction can span collections of different key and value types.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Change {
    /// Insert or replace the value stored under `key`
    Put {
        collection: String,
        key: Vec<u8>,
        value: Vec<u8>,
        /// Expiry measured from the commit time, in milliseconds
        ttl_ms: Option<u64>,
    },

    /// Remove the entry stored under `key`
    Remove { collection: String, key: Vec<u8> },
}

impl Change {
    /// Get the collection name affected by this change
    pub fn collection(&self) -> &str {
        match self {
            Change::Put { collection, .. } => collection,
            Change::Remove { collection, .. } => collection,
        }
    }

    /// Get the encoded key affected by this change
    pub fn key(&self) -> &[u8] {
        match self {
            Change::Put { key, .. } => key,
            Change::Remove { key, .. } => key,
        }
    }

    /// The lock that must be held in `Update` mode to record this change
    pub fn lock_key(&self) -> LockKey {
        LockKey::new(self.collection(), self.key().to_vec())
    }
}
