//! Partition addressing: routing keys to partitions and partitions to the
//! service instances that own them.

pub mod resolver;
pub mod retry;
pub mod router;

pub use resolver::ServiceProxyResolver;
pub use retry::RetryPolicy;
pub use router::{PartitionRouter, RoutingKey, RoutingStrategy, stable_hash};
