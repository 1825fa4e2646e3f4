// ============================================================================
// Postit Library
// ============================================================================
//
// A partitioned, transactional key-value store and the posting services
// built on it:
//   - transaction: per-key locks, buffered changes, atomic commit
//   - storage:     partitions, typed collections, WAL + snapshot durability
//   - cluster:     partition routing, service resolution, retry
//   - services:    authenticator, post management, data generation
//   - client:      local cluster bootstrap and routing client
//
// ============================================================================

pub mod client;
pub mod cluster;
pub mod core;
pub mod services;
pub mod storage;
pub mod transaction;

pub use client::{ClusterConfig, LocalCluster, PostitClient};
pub use cluster::{PartitionRouter, RetryPolicy, RoutingKey, RoutingStrategy, ServiceProxyResolver};
pub use core::{PartitionId, Post, Result, StoreError, Version, Versioned};
pub use services::{
    AuthSettings, Authenticator, AuthenticatorService, ContentGenerator, DataGenerator,
    DataGeneratorService, GenerationReport, PostManagementService, PostOperator,
};
pub use storage::{DurabilityMode, KeyValueStore, Partition, PartitionOptions};
pub use transaction::{LockManager, LockMode, Transaction, TransactionId, TransactionState};
