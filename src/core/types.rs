use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Index of a partition within a service's topology.
pub type PartitionId = u32;

/// Commit sequence number of the commit that last wrote a key.
pub type Version = u64;

/// A value read together with its committed metadata.
#[derive(Debug, Clone, PartialEq)]
pub struct Versioned<V> {
    pub value: V,
    pub version: Version,
    pub expires_at: Option<DateTime<Utc>>,
}

/// A user post. The id is assigned by the post service on insert.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Post {
    pub id: i64,
    pub user_id: String,
    pub timestamp: DateTime<Utc>,
    pub content: String,
}

impl Post {
    pub fn new(user_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            id: 0,
            user_id: user_id.into(),
            timestamp: Utc::now(),
            content: content.into(),
        }
    }

    pub fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }
}
