use crate::core::{PartitionId, Result, StoreError};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Value a request is routed by.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoutingKey<'a> {
    /// A user name or other identifier; routed by `RoutingStrategy`
    Text(&'a str),
    /// A raw integer id, routed by its own value
    Id(i64),
}

impl<'a> From<&'a str> for RoutingKey<'a> {
    fn from(value: &'a str) -> Self {
        RoutingKey::Text(value)
    }
}

impl<'a> From<&'a String> for RoutingKey<'a> {
    fn from(value: &'a String) -> Self {
        RoutingKey::Text(value.as_str())
    }
}

impl From<i64> for RoutingKey<'_> {
    fn from(value: i64) -> Self {
        RoutingKey::Id(value)
    }
}

impl fmt::Display for RoutingKey<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RoutingKey::Text(text) => write!(f, "'{}'", text),
            RoutingKey::Id(id) => write!(f, "#{}", id),
        }
    }
}

/// Numeric projection applied to textual routing keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum RoutingStrategy {
    /// Ordinal of the first character
    #[default]
    FirstCodePoint,
    /// FNV-1a over the whole key
    Fnv1a,
}

impl FromStr for RoutingStrategy {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "first-code-point" | "first_code_point" | "first" => Ok(RoutingStrategy::FirstCodePoint),
            "fnv1a" | "fnv" => Ok(RoutingStrategy::Fnv1a),
            other => Err(StoreError::ExecutionError(format!(
                "Unknown routing strategy '{}'",
                other
            ))),
        }
    }
}

/// Stable 64-bit FNV-1a hash.
pub fn stable_hash(bytes: &[u8]) -> u64 {
    let mut hash = 14695981039346656037u64;
    for byte in bytes {
        hash ^= *byte as u64;
        hash = hash.wrapping_mul(1099511628211);
    }
    hash
}

/// Maps routing keys onto a fixed number of partitions.
///
/// The partition count is fixed at construction; the same key maps to the
/// same partition for the lifetime of the router.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PartitionRouter {
    partition_count: u32,
    strategy: RoutingStrategy,
}

impl PartitionRouter {
    pub fn new(partition_count: u32) -> Result<Self> {
        Self::with_strategy(partition_count, RoutingStrategy::default())
    }

    pub fn with_strategy(partition_count: u32, strategy: RoutingStrategy) -> Result<Self> {
        if partition_count == 0 {
            return Err(StoreError::ExecutionError(
                "partition count must be greater than zero".to_string(),
            ));
        }
        Ok(Self {
            partition_count,
            strategy,
        })
    }

    pub fn partition_count(&self) -> u32 {
        self.partition_count
    }

    pub fn strategy(&self) -> RoutingStrategy {
        self.strategy
    }

    /// Partition index owning `key`.
    ///
    /// # Errors
    /// Returns `InvalidKey` for an empty textual key.
    pub fn route_key<'a>(&self, key: impl Into<RoutingKey<'a>>) -> Result<PartitionId> {
        let count = self.partition_count as u64;
        match key.into() {
            RoutingKey::Text(text) => {
                let Some(first) = text.chars().next() else {
                    return Err(StoreError::InvalidKey(
                        "routing key must not be empty".to_string(),
                    ));
                };
                let projected = match self.strategy {
                    RoutingStrategy::FirstCodePoint => first as u64,
                    RoutingStrategy::Fnv1a => stable_hash(text.as_bytes()),
                };
                Ok((projected % count) as PartitionId)
            }
            RoutingKey::Id(id) => Ok(id.rem_euclid(self.partition_count as i64) as PartitionId),
        }
    }
}
