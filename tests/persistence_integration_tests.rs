/// Persistence Integration Tests
///
/// Durable partitions: WAL replay, checkpoints and restart of the local cluster
/// Run with: cargo test --test persistence_integration_tests

use postit::{
    ClusterConfig, DurabilityMode, LocalCluster, LockMode, Partition, PartitionOptions, Post,
};
use std::time::Duration;
use tempfile::TempDir;

fn durable_config(dir: &TempDir) -> ClusterConfig {
    ClusterConfig::new()
        .data_dir(dir.path())
        .durability(DurabilityMode::Sync)
        .password_hash_cost(4)
}

#[tokio::test]
async fn test_state_survives_restart() {
    let dir = TempDir::new().unwrap();

    let session = {
        let cluster = LocalCluster::start(durable_config(&dir)).await.unwrap();
        let client = cluster.client().await.unwrap();
        assert!(client.register_user("alice", "secret").await.unwrap());
        let session = client.login_user("alice", "secret").await.unwrap().unwrap();
        for content in ["a", "b", "c"] {
            client.insert_post(Post::new("alice", content)).await.unwrap();
        }
        session
    };

    let cluster = LocalCluster::start(durable_config(&dir)).await.unwrap();
    let client = cluster.client().await.unwrap();

    assert!(!client.register_user("alice", "other").await.unwrap());
    assert!(client.is_session_valid("alice", &session).await.unwrap());
    assert_eq!(client.retrieve_user_posts("alice").await.unwrap().len(), 3);
    assert_eq!(client.retrieve_post(2).await.unwrap().unwrap().content, "b");

    // The id counter continues where it stopped.
    assert_eq!(client.insert_post(Post::new("alice", "d")).await.unwrap(), 4);
}

#[tokio::test]
async fn test_checkpoint_then_restart() {
    let dir = TempDir::new().unwrap();

    {
        let cluster = LocalCluster::start(durable_config(&dir)).await.unwrap();
        let client = cluster.client().await.unwrap();
        client.register_user("bob", "pw").await.unwrap();
        client.insert_post(Post::new("bob", "before")).await.unwrap();
        cluster.checkpoint().await.unwrap();
        client.insert_post(Post::new("bob", "after")).await.unwrap();
    }

    let snapshot = dir.path().join("posts").join("partition-0").join("partition.snapshot");
    assert!(snapshot.exists());

    let cluster = LocalCluster::start(durable_config(&dir)).await.unwrap();
    let client = cluster.client().await.unwrap();
    let posts = client.retrieve_user_posts("bob").await.unwrap();
    let contents = posts.iter().map(|p| p.content.as_str()).collect::<Vec<_>>();
    assert_eq!(contents, vec!["before", "after"]);
    assert!(client.login_user("bob", "pw").await.unwrap().is_some());
}

#[tokio::test]
async fn test_logout_survives_restart() {
    let dir = TempDir::new().unwrap();

    let session = {
        let cluster = LocalCluster::start(durable_config(&dir)).await.unwrap();
        let client = cluster.client().await.unwrap();
        client.register_user("carol", "pw").await.unwrap();
        let session = client.login_user("carol", "pw").await.unwrap().unwrap();
        assert!(client.logout_user("carol").await.unwrap());
        session
    };

    let cluster = LocalCluster::start(durable_config(&dir)).await.unwrap();
    let client = cluster.client().await.unwrap();
    assert!(!client.is_session_valid("carol", &session).await.unwrap());
}

#[tokio::test]
async fn test_uncommitted_work_is_not_recovered() {
    let dir = TempDir::new().unwrap();
    let options = PartitionOptions {
        durability: DurabilityMode::Sync,
        ..PartitionOptions::default()
    };

    {
        let partition = Partition::open(0, dir.path(), options.clone()).unwrap();
        let counters = partition.get_or_add::<String, i64>("postIdCounter").await.unwrap();

        let mut committed = partition.begin();
        counters
            .add_or_update(&mut committed, "IdCounter".into(), 1, |_, v| v + 1)
            .await
            .unwrap();
        committed.commit().await.unwrap();

        let mut pending = partition.begin();
        counters
            .add_or_update(&mut pending, "IdCounter".into(), 1, |_, v| v + 1)
            .await
            .unwrap();
        pending.abort();
    }

    let partition = Partition::open(0, dir.path(), options).unwrap();
    let counters = partition.get_or_add::<String, i64>("postIdCounter").await.unwrap();
    let mut tx = partition.begin();
    let value = counters
        .try_get(&mut tx, &"IdCounter".to_string(), LockMode::Read)
        .await
        .unwrap();
    assert_eq!(value, Some(1));
}

#[tokio::test]
async fn test_versions_keep_increasing_across_restart() {
    let dir = TempDir::new().unwrap();
    let options = PartitionOptions {
        durability: DurabilityMode::Sync,
        checkpoint_threshold: 3,
        ..PartitionOptions::default()
    };
    let key = "k".to_string();

    let mut last_version = 0;
    for _ in 0..3 {
        let partition = Partition::open(1, dir.path(), options.clone()).unwrap();
        let store = partition.get_or_add::<String, i64>("values").await.unwrap();
        for _ in 0..2 {
            let mut tx = partition.begin();
            store.add_or_update(&mut tx, key.clone(), 0, |_, v| v + 1).await.unwrap();
            tx.commit().await.unwrap();
        }

        let mut tx = partition.begin();
        let read = store
            .try_get_versioned(&mut tx, &key, LockMode::Read)
            .await
            .unwrap()
            .unwrap();
        assert!(read.version > last_version);
        last_version = read.version;
    }
    assert_eq!(last_version, 6);
}

#[tokio::test]
async fn test_expired_sessions_are_purged_on_checkpoint() {
    let dir = TempDir::new().unwrap();
    let config = durable_config(&dir).session_ttl(Duration::from_millis(20));

    let cluster = LocalCluster::start(config).await.unwrap();
    let client = cluster.client().await.unwrap();
    client.register_user("dave", "pw").await.unwrap();
    client.login_user("dave", "pw").await.unwrap().unwrap();

    let partition = cluster
        .auth_partition(client.router().route_key("dave").unwrap())
        .unwrap();
    assert_eq!(partition.len("sessionData").await, 1);

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(partition.len("sessionData").await, 0);
    cluster.checkpoint().await.unwrap();
    assert_eq!(partition.purge_expired().await, 0);
}
