// ============================================================================
// Post Management Service
// ============================================================================
//
// Collections:
//   - postIdCounter:       "IdCounter" -> last assigned post id
//   - postCollection:      post id -> post
//   - userPostsCollection: user id -> posts in insertion order
//
// An insert locks the counter first, so concurrent inserts serialize on it and
// ids are assigned in commit order. A rolled back insert never burns an id.
//
// ============================================================================

use super::contracts::PostOperator;
use crate::core::{Post, Result};
use crate::storage::{KeyValueStore, Partition};
use crate::transaction::{LockMode, Transaction};
use async_trait::async_trait;
use std::time::Duration;
use tracing::{Instrument, Level, event, info_span};

pub const POSTS_COLLECTION: &str = "postCollection";
pub const ID_COUNTER_COLLECTION: &str = "postIdCounter";
pub const USER_POSTS_COLLECTION: &str = "userPostsCollection";
pub const ID_COUNTER_KEY: &str = "IdCounter";

pub struct PostManagementService {
    partition: Partition,
    posts: KeyValueStore<i64, Post>,
    id_counter: KeyValueStore<String, i64>,
    user_posts: KeyValueStore<String, Vec<Post>>,
    insert_timeout: Duration,
}

impl PostManagementService {
    /// `insert_timeout` bounds each insert transaction, lock waits included.
    pub async fn new(partition: Partition, insert_timeout: Duration) -> Result<Self> {
        let posts = partition.get_or_add(POSTS_COLLECTION).await?;
        let id_counter = partition.get_or_add(ID_COUNTER_COLLECTION).await?;
        let user_posts = partition.get_or_add(USER_POSTS_COLLECTION).await?;
        Ok(Self {
            partition,
            posts,
            id_counter,
            user_posts,
            insert_timeout,
        })
    }

    pub fn partition(&self) -> &Partition {
        &self.partition
    }

    /// Assign the next id to `post` and store it inside `tx`.
    pub async fn insert_post_in(&self, tx: &mut Transaction, mut post: Post) -> Result<i64> {
        let id = self
            .id_counter
            .add_or_update(tx, ID_COUNTER_KEY.to_string(), 1, |_, last| last + 1)
            .await?;
        post.id = id;

        self.posts
            .add_or_update(tx, id, post.clone(), |_, existing| existing)
            .await?;

        let appended = post.clone();
        self.user_posts
            .add_or_update(tx, post.user_id.clone(), vec![post.clone()], move |_, mut posts| {
                posts.push(appended);
                posts
            })
            .await?;

        event!(Level::INFO, id, user = %post.user_id, content = %post.content, "new post");
        Ok(id)
    }

    pub async fn retrieve_post_in(&self, tx: &mut Transaction, post_id: i64) -> Result<Option<Post>> {
        let post = self.posts.try_get(tx, &post_id, LockMode::Read).await?;
        match &post {
            Some(found) => event!(Level::DEBUG, id = post_id, content = %found.content, "post retrieved"),
            None => event!(Level::DEBUG, id = post_id, "post not found"),
        }
        Ok(post)
    }

    pub async fn retrieve_user_posts_in(&self, tx: &mut Transaction, user_id: &str) -> Result<Vec<Post>> {
        let posts = self
            .user_posts
            .try_get(tx, &user_id.to_string(), LockMode::Read)
            .await?
            .unwrap_or_default();
        event!(Level::DEBUG, user = %user_id, count = posts.len(), "user posts retrieved");
        Ok(posts)
    }
}

#[async_trait]
impl PostOperator for PostManagementService {
    async fn insert_post(&self, post: Post) -> Result<i64> {
        let span = info_span!("posts.insert", user = %post.user_id);
        async move {
            let mut tx = self.partition.begin_with_timeout(self.insert_timeout);
            let id = self.insert_post_in(&mut tx, post).await?;
            tx.commit().await?;
            Ok(id)
        }
        .instrument(span)
        .await
    }

    async fn retrieve_post(&self, post_id: i64) -> Result<Option<Post>> {
        let span = info_span!("posts.get", id = post_id);
        async {
            let mut tx = self.partition.begin();
            let post = self.retrieve_post_in(&mut tx, post_id).await?;
            tx.commit().await?;
            Ok(post)
        }
        .instrument(span)
        .await
    }

    async fn retrieve_user_posts(&self, user_id: &str) -> Result<Vec<Post>> {
        let span = info_span!("posts.by_user", user = %user_id);
        async {
            let mut tx = self.partition.begin();
            let posts = self.retrieve_user_posts_in(&mut tx, user_id).await?;
            tx.commit().await?;
            Ok(posts)
        }
        .instrument(span)
        .await
    }
}
