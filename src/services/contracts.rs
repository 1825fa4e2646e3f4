use crate::core::{Post, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Resolver name of the partitioned authenticator service
pub const AUTHENTICATOR_SERVICE: &str = "AuthenticatorService";

/// Resolver name of the post service
pub const POST_SERVICE: &str = "PostManagementService";

/// Credential and session management for the users of one partition.
#[async_trait]
pub trait Authenticator: Send + Sync {
    /// Returns false if `username` already exists.
    async fn register_user(&self, username: &str, password: &str) -> Result<bool>;

    /// Returns the issued session id, or `None` if the credentials do not match.
    async fn login_user(&self, username: &str, password: &str) -> Result<Option<String>>;

    /// Returns false if `username` is unknown.
    async fn logout_user(&self, username: &str) -> Result<bool>;

    async fn is_session_valid(&self, username: &str, session_id: &str) -> Result<bool>;
}

/// Post storage with per-user indexing.
#[async_trait]
pub trait PostOperator: Send + Sync {
    /// Stores `post` under a freshly assigned id and returns the id.
    async fn insert_post(&self, post: Post) -> Result<i64>;

    async fn retrieve_post(&self, post_id: i64) -> Result<Option<Post>>;

    /// Posts of `user_id` in insertion order; empty for an unknown user.
    async fn retrieve_user_posts(&self, user_id: &str) -> Result<Vec<Post>>;
}

/// Outcome of a data generation run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenerationReport {
    /// Users newly registered (existing users are reused)
    pub users_created: u32,
    pub posts_created: u32,
}

/// Bulk generation of users and posts.
#[async_trait]
pub trait DataGenerator: Send + Sync {
    async fn generate_data(&self, users: u32, posts_per_user: u32) -> Result<GenerationReport>;
}
