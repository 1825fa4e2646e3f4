//! Local cluster bootstrap and the partition-aware client.

pub mod config;

pub use config::ClusterConfig;

use crate::cluster::{PartitionRouter, RetryPolicy, RoutingStrategy, ServiceProxyResolver};
use crate::core::{PartitionId, Post, Result};
use crate::services::{
    AUTHENTICATOR_SERVICE, AuthSettings, Authenticator, AuthenticatorService, DataGeneratorService,
    POST_SERVICE, PostManagementService, PostOperator,
};
use crate::storage::Partition;
use std::sync::Arc;
use tracing::{Level, event};

/// Every service partition of the application hosted in one process.
pub struct LocalCluster {
    config: ClusterConfig,
    auth_services: Vec<Arc<AuthenticatorService>>,
    post_service: Arc<PostManagementService>,
    authenticators: Arc<ServiceProxyResolver<dyn Authenticator>>,
    post_operators: Arc<ServiceProxyResolver<dyn PostOperator>>,
}

impl LocalCluster {
    /// Open (or recover) every partition and register the services.
    pub async fn start(config: ClusterConfig) -> Result<Self> {
        config.validate()?;
        let options = config.partition_options();
        let settings = AuthSettings {
            password_hash_cost: config.password_hash_cost,
            session_ttl: config.session_ttl,
        };

        let authenticators: Arc<ServiceProxyResolver<dyn Authenticator>> =
            Arc::new(ServiceProxyResolver::new());
        authenticators
            .register_service(AUTHENTICATOR_SERVICE, config.auth_partitions)
            .await?;

        let mut auth_services = Vec::with_capacity(config.auth_partitions as usize);
        for index in 0..config.auth_partitions {
            let partition = match config.auth_partition_dir(index) {
                Some(dir) => Partition::open(index, dir, options.clone())?,
                None => Partition::in_memory_with(index, options.clone()),
            };
            let service = Arc::new(AuthenticatorService::new(partition, settings).await?);
            authenticators
                .register_partition(AUTHENTICATOR_SERVICE, index, service.clone())
                .await?;
            auth_services.push(service);
        }

        let post_partition = match config.post_partition_dir() {
            Some(dir) => Partition::open(0, dir, options.clone())?,
            None => Partition::in_memory_with(0, options.clone()),
        };
        let post_service =
            Arc::new(PostManagementService::new(post_partition, config.post_insert_timeout).await?);

        let post_operators: Arc<ServiceProxyResolver<dyn PostOperator>> =
            Arc::new(ServiceProxyResolver::new());
        post_operators.register_service(POST_SERVICE, 1).await?;
        post_operators
            .register_partition(POST_SERVICE, 0, post_service.clone())
            .await?;

        event!(
            Level::INFO,
            auth_partitions = config.auth_partitions,
            durable = config.data_dir.is_some(),
            "local cluster started"
        );

        Ok(Self {
            config,
            auth_services,
            post_service,
            authenticators,
            post_operators,
        })
    }

    pub fn config(&self) -> &ClusterConfig {
        &self.config
    }

    pub fn authenticators(&self) -> Arc<ServiceProxyResolver<dyn Authenticator>> {
        Arc::clone(&self.authenticators)
    }

    pub fn post_operators(&self) -> Arc<ServiceProxyResolver<dyn PostOperator>> {
        Arc::clone(&self.post_operators)
    }

    pub fn auth_partition(&self, index: PartitionId) -> Option<&Partition> {
        self.auth_services
            .get(index as usize)
            .map(|service| service.partition())
    }

    pub fn post_partition(&self) -> &Partition {
        self.post_service.partition()
    }

    /// A client connected to this cluster's resolvers
    pub async fn client(&self) -> Result<PostitClient> {
        PostitClient::connect(
            self.authenticators(),
            self.post_operators(),
            self.config.routing_strategy,
            self.config.retry,
        )
        .await
    }

    pub async fn data_generator(&self) -> Result<DataGeneratorService> {
        DataGeneratorService::connect(self.authenticators(), self.post_operators(), self.config.retry)
            .await
    }

    /// Deregister an authenticator partition so requests routed to it fail
    /// with `Unavailable` until it is brought back.
    pub async fn take_offline(&self, index: PartitionId) -> bool {
        self.authenticators
            .remove_partition(AUTHENTICATOR_SERVICE, index)
            .await
    }

    pub async fn bring_online(&self, index: PartitionId) -> Result<()> {
        let Some(service) = self.auth_services.get(index as usize) else {
            return Ok(());
        };
        self.authenticators
            .register_partition(AUTHENTICATOR_SERVICE, index, service.clone())
            .await
    }

    /// Snapshot every partition and truncate its WAL.
    pub async fn checkpoint(&self) -> Result<()> {
        for service in &self.auth_services {
            service.partition().checkpoint().await?;
        }
        self.post_service.partition().checkpoint().await?;
        event!(Level::INFO, "cluster checkpoint complete");
        Ok(())
    }
}

/// Partition-aware facade over the authenticator and post services.
///
/// Users are routed by their name; posts always go to post partition 0.
/// Retryable failures are retried with backoff.
pub struct PostitClient {
    authenticators: Arc<ServiceProxyResolver<dyn Authenticator>>,
    post_operators: Arc<ServiceProxyResolver<dyn PostOperator>>,
    router: PartitionRouter,
    retry: RetryPolicy,
}

impl PostitClient {
    /// Connect, discovering the authenticator partition count once.
    pub async fn connect(
        authenticators: Arc<ServiceProxyResolver<dyn Authenticator>>,
        post_operators: Arc<ServiceProxyResolver<dyn PostOperator>>,
        strategy: RoutingStrategy,
        retry: RetryPolicy,
    ) -> Result<Self> {
        let partition_count = authenticators.partition_count(AUTHENTICATOR_SERVICE).await?;
        Ok(Self {
            authenticators,
            post_operators,
            router: PartitionRouter::with_strategy(partition_count, strategy)?,
            retry,
        })
    }

    pub fn router(&self) -> &PartitionRouter {
        &self.router
    }

    async fn authenticator(&self, partition: PartitionId) -> Result<Arc<dyn Authenticator>> {
        self.authenticators
            .resolve(AUTHENTICATOR_SERVICE, partition)
            .await
    }

    async fn post_operator(&self) -> Result<Arc<dyn PostOperator>> {
        self.post_operators.resolve(POST_SERVICE, 0).await
    }

    pub async fn register_user(&self, username: &str, password: &str) -> Result<bool> {
        let partition = self.router.route_key(username)?;
        self.retry
            .retry("register", || async move {
                self.authenticator(partition)
                    .await?
                    .register_user(username, password)
                    .await
            })
            .await
    }

    /// Session id on success, `None` on bad credentials
    pub async fn login_user(&self, username: &str, password: &str) -> Result<Option<String>> {
        let partition = self.router.route_key(username)?;
        self.retry
            .retry("login", || async move {
                self.authenticator(partition)
                    .await?
                    .login_user(username, password)
                    .await
            })
            .await
    }

    pub async fn logout_user(&self, username: &str) -> Result<bool> {
        let partition = self.router.route_key(username)?;
        self.retry
            .retry("logout", || async move {
                self.authenticator(partition).await?.logout_user(username).await
            })
            .await
    }

    pub async fn is_session_valid(&self, username: &str, session_id: &str) -> Result<bool> {
        let partition = self.router.route_key(username)?;
        self.retry
            .retry("session", || async move {
                self.authenticator(partition)
                    .await?
                    .is_session_valid(username, session_id)
                    .await
            })
            .await
    }

    pub async fn insert_post(&self, post: Post) -> Result<i64> {
        self.retry
            .retry("insert_post", || {
                let post = post.clone();
                async move { self.post_operator().await?.insert_post(post).await }
            })
            .await
    }

    pub async fn retrieve_post(&self, post_id: i64) -> Result<Option<Post>> {
        self.retry
            .retry("retrieve_post", || async move {
                self.post_operator().await?.retrieve_post(post_id).await
            })
            .await
    }

    pub async fn retrieve_user_posts(&self, user_id: &str) -> Result<Vec<Post>> {
        self.retry
            .retry("retrieve_user_posts", || async move {
                self.post_operator().await?.retrieve_user_posts(user_id).await
            })
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::StoreError;

    fn config() -> ClusterConfig {
        ClusterConfig::new()
            .password_hash_cost(4)
            .retry(RetryPolicy {
                max_attempts: 2,
                base_backoff_ms: 1,
                max_backoff_ms: 2,
            })
    }

    #[tokio::test]
    async fn test_users_land_on_routed_partition() {
        let cluster = LocalCluster::start(config()).await.unwrap();
        let client = cluster.client().await.unwrap();
        assert_eq!(client.router().partition_count(), 5);

        assert!(client.register_user("alice", "secret").await.unwrap());
        let routed = client.router().route_key("alice").unwrap();
        for index in 0..5 {
            let partition = cluster.auth_partition(index).unwrap();
            let expected = if index == routed { 1 } else { 0 };
            assert_eq!(partition.len("userCredentials").await, expected);
        }
    }

    #[tokio::test]
    async fn test_offline_partition_is_unavailable() {
        let cluster = LocalCluster::start(config()).await.unwrap();
        let client = cluster.client().await.unwrap();
        let routed = client.router().route_key("bob").unwrap();

        assert!(cluster.take_offline(routed).await);
        let err = client.register_user("bob", "pw").await.unwrap_err();
        assert!(matches!(err, StoreError::Unavailable(_)));

        cluster.bring_online(routed).await.unwrap();
        assert!(client.register_user("bob", "pw").await.unwrap());
    }

    #[tokio::test]
    async fn test_empty_username_is_invalid() {
        let cluster = LocalCluster::start(config()).await.unwrap();
        let client = cluster.client().await.unwrap();
        let err = client.login_user("", "pw").await.unwrap_err();
        assert!(matches!(err, StoreError::InvalidKey(_)));
    }

    #[tokio::test]
    async fn test_start_rejects_invalid_config() {
        assert!(LocalCluster::start(config().auth_partitions(0)).await.is_err());
    }
}
