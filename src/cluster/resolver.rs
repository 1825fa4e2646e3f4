// ============================================================================
// Service Proxy Resolver
// ============================================================================
//
// Registry of service instances by (service name, partition index). The
// topology of each service (its partition count) is declared once; instances
// register and deregister per partition as ownership moves.
//
// ============================================================================

use crate::core::{PartitionId, Result, StoreError};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{Level, event};

struct ServiceTopology<S: ?Sized> {
    partition_count: u32,
    owners: BTreeMap<PartitionId, Arc<S>>,
}

/// Resolves the instance owning a partition of a named service.
pub struct ServiceProxyResolver<S: ?Sized> {
    services: RwLock<HashMap<String, ServiceTopology<S>>>,
}

impl<S: ?Sized + Send + Sync> Default for ServiceProxyResolver<S> {
    fn default() -> Self {
        Self {
            services: RwLock::new(HashMap::new()),
        }
    }
}

impl<S: ?Sized + Send + Sync> ServiceProxyResolver<S> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare `service` with a fixed partition count, replacing any
    /// previous topology.
    pub async fn register_service(&self, service: impl Into<String>, partition_count: u32) -> Result<()> {
        let service = service.into();
        if service.trim().is_empty() {
            return Err(StoreError::ExecutionError(
                "service name must not be empty".to_string(),
            ));
        }
        if partition_count == 0 {
            return Err(StoreError::ExecutionError(format!(
                "Service '{}' must have at least one partition",
                service
            )));
        }
        let mut services = self.services.write().await;
        services.insert(
            service,
            ServiceTopology {
                partition_count,
                owners: BTreeMap::new(),
            },
        );
        Ok(())
    }

    /// Register the instance owning `partition` of `service`.
    pub async fn register_partition(
        &self,
        service: &str,
        partition: PartitionId,
        instance: Arc<S>,
    ) -> Result<()> {
        let mut services = self.services.write().await;
        let topology = services.get_mut(service).ok_or_else(|| {
            StoreError::ExecutionError(format!("Service '{}' is not registered", service))
        })?;
        if partition >= topology.partition_count {
            return Err(StoreError::ExecutionError(format!(
                "Partition {} is outside service '{}' topology of {} partitions",
                partition, service, topology.partition_count
            )));
        }
        topology.owners.insert(partition, instance);
        event!(Level::DEBUG, service, partition, "partition owner registered");
        Ok(())
    }

    /// Deregister the owner of `partition`; returns true if one was present.
    pub async fn remove_partition(&self, service: &str, partition: PartitionId) -> bool {
        let mut services = self.services.write().await;
        services
            .get_mut(service)
            .and_then(|topology| topology.owners.remove(&partition))
            .is_some()
    }

    /// Partition count of `service` as declared at registration.
    pub async fn partition_count(&self, service: &str) -> Result<u32> {
        let services = self.services.read().await;
        services
            .get(service)
            .map(|topology| topology.partition_count)
            .ok_or_else(|| {
                StoreError::Unavailable(format!("Topology of service '{}' is unknown", service))
            })
    }

    /// Instance currently owning `partition` of `service`.
    ///
    /// # Errors
    /// Returns `Unavailable` if the service is unknown or the partition has
    /// no registered owner.
    pub async fn resolve(&self, service: &str, partition: PartitionId) -> Result<Arc<S>> {
        let services = self.services.read().await;
        let topology = services.get(service).ok_or_else(|| {
            StoreError::Unavailable(format!("Topology of service '{}' is unknown", service))
        })?;
        topology.owners.get(&partition).cloned().ok_or_else(|| {
            StoreError::Unavailable(format!(
                "Partition {} of service '{}' has no reachable owner",
                partition, service
            ))
        })
    }

    pub async fn service_names(&self) -> Vec<String> {
        let mut names = self.services.read().await.keys().cloned().collect::<Vec<_>>();
        names.sort();
        names
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    trait Echo: Send + Sync {
        fn partition(&self) -> PartitionId;
    }

    struct EchoInstance(PartitionId);

    impl Echo for EchoInstance {
        fn partition(&self) -> PartitionId {
            self.0
        }
    }

    #[tokio::test]
    async fn test_resolve_registered_partitions() {
        let resolver: ServiceProxyResolver<dyn Echo> = ServiceProxyResolver::new();
        resolver.register_service("echo", 3).await.unwrap();
        for partition in 0..3 {
            resolver
                .register_partition("echo", partition, Arc::new(EchoInstance(partition)))
                .await
                .unwrap();
        }

        assert_eq!(resolver.partition_count("echo").await.unwrap(), 3);
        assert_eq!(resolver.resolve("echo", 2).await.unwrap().partition(), 2);
    }

    #[tokio::test]
    async fn test_unreachable_owner_is_unavailable() {
        let resolver: ServiceProxyResolver<dyn Echo> = ServiceProxyResolver::new();
        resolver.register_service("echo", 2).await.unwrap();
        resolver
            .register_partition("echo", 0, Arc::new(EchoInstance(0)))
            .await
            .unwrap();

        assert!(resolver.remove_partition("echo", 0).await);
        assert!(!resolver.remove_partition("echo", 0).await);

        let err = resolver.resolve("echo", 0).await.err().unwrap();
        assert!(matches!(err, StoreError::Unavailable(_)));
        assert!(err.is_retryable());

        let err = resolver.resolve("missing", 0).await.err().unwrap();
        assert!(matches!(err, StoreError::Unavailable(_)));
    }

    #[tokio::test]
    async fn test_partition_outside_topology_rejected() {
        let resolver: ServiceProxyResolver<dyn Echo> = ServiceProxyResolver::new();
        resolver.register_service("echo", 1).await.unwrap();
        assert!(
            resolver
                .register_partition("echo", 1, Arc::new(EchoInstance(1)))
                .await
                .is_err()
        );
        assert!(resolver.register_service("", 1).await.is_err());
    }
}
