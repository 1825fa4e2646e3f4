use crate::cluster::{RetryPolicy, RoutingStrategy};
use crate::core::{Result, StoreError};
use crate::storage::{DurabilityMode, PartitionOptions};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Local cluster configuration
#[derive(Debug, Clone)]
pub struct ClusterConfig {
    /// Root directory for durable partition state; `None` keeps everything in memory
    pub data_dir: Option<PathBuf>,

    /// WAL flush policy for durable partitions
    pub durability: DurabilityMode,

    /// Number of authenticator partitions
    pub auth_partitions: u32,

    /// Default deadline of every transaction
    pub transaction_timeout: Duration,

    /// Deadline of a post insert transaction
    pub post_insert_timeout: Duration,

    /// Expiry of issued sessions
    pub session_ttl: Option<Duration>,

    /// bcrypt cost for stored credentials
    pub password_hash_cost: u32,

    /// WAL records between automatic checkpoints
    pub checkpoint_threshold: usize,

    /// Client retry policy for transient failures
    pub retry: RetryPolicy,

    /// Projection of textual routing keys
    pub routing_strategy: RoutingStrategy,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl ClusterConfig {
    /// Create an in-memory configuration with default settings
    pub fn new() -> Self {
        Self {
            data_dir: None,
            durability: DurabilityMode::Async,
            auth_partitions: 5,
            transaction_timeout: Duration::from_secs(4),
            post_insert_timeout: Duration::from_secs(4),
            session_ttl: None,
            password_hash_cost: bcrypt::DEFAULT_COST,
            checkpoint_threshold: 1000,
            retry: RetryPolicy::default(),
            routing_strategy: RoutingStrategy::FirstCodePoint,
        }
    }

    /// Persist partitions under `dir`
    pub fn data_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.data_dir = Some(dir.into());
        self
    }

    pub fn durability(mut self, mode: DurabilityMode) -> Self {
        self.durability = mode;
        self
    }

    /// Set the authenticator partition count
    pub fn auth_partitions(mut self, count: u32) -> Self {
        self.auth_partitions = count;
        self
    }

    pub fn transaction_timeout(mut self, timeout: Duration) -> Self {
        self.transaction_timeout = timeout;
        self
    }

    pub fn post_insert_timeout(mut self, timeout: Duration) -> Self {
        self.post_insert_timeout = timeout;
        self
    }

    /// Expire sessions `ttl` after login
    pub fn session_ttl(mut self, ttl: Duration) -> Self {
        self.session_ttl = Some(ttl);
        self
    }

    pub fn password_hash_cost(mut self, cost: u32) -> Self {
        self.password_hash_cost = cost;
        self
    }

    pub fn checkpoint_threshold(mut self, threshold: usize) -> Self {
        self.checkpoint_threshold = threshold;
        self
    }

    pub fn retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn routing_strategy(mut self, strategy: RoutingStrategy) -> Self {
        self.routing_strategy = strategy;
        self
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.auth_partitions == 0 {
            return Err(invalid("auth_partitions must be > 0"));
        }
        if self.transaction_timeout.is_zero() {
            return Err(invalid("transaction_timeout must be > 0"));
        }
        if self.post_insert_timeout.is_zero() {
            return Err(invalid("post_insert_timeout must be > 0"));
        }
        if self.session_ttl.is_some_and(|ttl| ttl.is_zero()) {
            return Err(invalid("session_ttl must be > 0 when set"));
        }
        if !(4..=31).contains(&self.password_hash_cost) {
            return Err(invalid("password_hash_cost must be within 4..=31"));
        }
        if self.checkpoint_threshold == 0 {
            return Err(invalid("checkpoint_threshold must be > 0"));
        }
        if self.retry.max_attempts == 0 {
            return Err(invalid("retry.max_attempts must be > 0"));
        }
        Ok(())
    }

    pub(crate) fn partition_options(&self) -> PartitionOptions {
        PartitionOptions {
            transaction_timeout: self.transaction_timeout,
            checkpoint_threshold: self.checkpoint_threshold,
            durability: self.durability,
        }
    }

    /// Directory of authenticator partition `index`, if durable
    pub fn auth_partition_dir(&self, index: u32) -> Option<PathBuf> {
        self.data_dir
            .as_deref()
            .map(|root| partition_dir(root, "auth", index))
    }

    /// Directory of the post partition, if durable
    pub fn post_partition_dir(&self) -> Option<PathBuf> {
        self.data_dir
            .as_deref()
            .map(|root| partition_dir(root, "posts", 0))
    }
}

fn partition_dir(root: &Path, service: &str, index: u32) -> PathBuf {
    root.join(service).join(format!("partition-{}", index))
}

fn invalid(message: &str) -> StoreError {
    StoreError::ExecutionError(format!("Invalid cluster configuration: {}", message))
}
