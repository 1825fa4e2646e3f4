// ============================================================================
// Data Generator Service
// ============================================================================
//
// Registers users "0".."N-1" (password equal to the name) and inserts posts
// for each of them. Every user is generated concurrently and each user's
// posts are inserted concurrently once the user exists.
//
// Users are routed by their integer id, not by the first character of the
// name the client routes by. A generated user is therefore only reachable
// through the client when both projections agree.
//
// ============================================================================

use super::content::ContentGenerator;
use super::contracts::{
    AUTHENTICATOR_SERVICE, Authenticator, DataGenerator, GenerationReport, POST_SERVICE,
    PostOperator,
};
use crate::cluster::{PartitionRouter, RetryPolicy, ServiceProxyResolver};
use crate::core::{Post, Result};
use async_trait::async_trait;
use futures::future::try_join_all;
use std::sync::Arc;
use tracing::{Instrument, Level, event, info_span};

pub struct DataGeneratorService {
    authenticators: Arc<ServiceProxyResolver<dyn Authenticator>>,
    post_operators: Arc<ServiceProxyResolver<dyn PostOperator>>,
    router: PartitionRouter,
    content: ContentGenerator,
    retry: RetryPolicy,
}

impl DataGeneratorService {
    /// Build a generator, discovering the authenticator partition count once.
    pub async fn connect(
        authenticators: Arc<ServiceProxyResolver<dyn Authenticator>>,
        post_operators: Arc<ServiceProxyResolver<dyn PostOperator>>,
        retry: RetryPolicy,
    ) -> Result<Self> {
        let partition_count = authenticators.partition_count(AUTHENTICATOR_SERVICE).await?;
        Ok(Self {
            authenticators,
            post_operators,
            router: PartitionRouter::new(partition_count)?,
            content: ContentGenerator::new(),
            retry,
        })
    }

    async fn create_user(&self, user_id: i64) -> Result<bool> {
        let partition = self.router.route_key(user_id)?;
        let name = user_id.to_string();
        self.retry
            .retry("generate.register", || {
                let name = name.as_str();
                async move {
                    let authenticator = self
                        .authenticators
                        .resolve(AUTHENTICATOR_SERVICE, partition)
                        .await?;
                    authenticator.register_user(name, name).await
                }
            })
            .await
    }

    async fn create_post(&self, user_id: i64) -> Result<i64> {
        let post = Post::new(user_id.to_string(), self.content.make_content());
        self.retry
            .retry("generate.post", || {
                let post = post.clone();
                async move {
                    let operator = self.post_operators.resolve(POST_SERVICE, 0).await?;
                    operator.insert_post(post).await
                }
            })
            .await
    }

    async fn generate_user_and_posts(&self, user_id: i64, posts: u32) -> Result<(bool, u32)> {
        let created = self.create_user(user_id).await?;
        event!(Level::DEBUG, user = user_id, created, "user generated");

        let inserted = try_join_all((0..posts).map(|_| self.create_post(user_id))).await?;
        event!(Level::DEBUG, user = user_id, posts = inserted.len(), "posts generated");
        Ok((created, inserted.len() as u32))
    }
}

#[async_trait]
impl DataGenerator for DataGeneratorService {
    async fn generate_data(&self, users: u32, posts_per_user: u32) -> Result<GenerationReport> {
        let span = info_span!("generate", users, posts_per_user);
        async {
            let results = try_join_all(
                (0..users).map(|user| self.generate_user_and_posts(user as i64, posts_per_user)),
            )
            .await?;

            let report = results.into_iter().fold(
                GenerationReport::default(),
                |mut report, (created, posts)| {
                    if created {
                        report.users_created += 1;
                    }
                    report.posts_created += posts;
                    report
                },
            );
            event!(
                Level::INFO,
                users_created = report.users_created,
                posts_created = report.posts_created,
                "data generation finished"
            );
            Ok(report)
        }
        .instrument(span)
        .await
    }
}
