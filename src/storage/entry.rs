use crate::core::Version;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A committed entry as held by a partition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredEntry {
    /// MessagePack-encoded value
    pub value: Vec<u8>,
    pub version: Version,
    pub expires_at: Option<DateTime<Utc>>,
}

impl StoredEntry {
    pub fn new(value: Vec<u8>, version: Version, expires_at: Option<DateTime<Utc>>) -> Self {
        Self {
            value,
            version,
            expires_at,
        }
    }

    /// An expired entry is logically absent.
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }
}
