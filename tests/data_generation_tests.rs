/// Data Generation Tests
///
/// Bulk user and post generation fanned out across partitions
/// Run with: cargo test --test data_generation_tests

use postit::{Authenticator, ClusterConfig, DataGenerator, LocalCluster};

async fn cluster() -> LocalCluster {
    LocalCluster::start(ClusterConfig::new().password_hash_cost(4))
        .await
        .unwrap()
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_generate_users_and_posts() {
    let cluster = cluster().await;
    let generator = cluster.data_generator().await.unwrap();

    let report = generator.generate_data(6, 3).await.unwrap();
    assert_eq!(report.users_created, 6);
    assert_eq!(report.posts_created, 18);

    let client = cluster.client().await.unwrap();
    let mut ids = Vec::new();
    for user in 0..6 {
        let posts = client.retrieve_user_posts(&user.to_string()).await.unwrap();
        assert_eq!(posts.len(), 3);
        assert!(posts.iter().all(|p| p.content.ends_with('.')));
        ids.extend(posts.iter().map(|p| p.id));
    }
    ids.sort();
    assert_eq!(ids, (1..=18).collect::<Vec<i64>>());
}

#[tokio::test]
async fn test_generated_users_route_by_integer_id() {
    let cluster = cluster().await;
    cluster.data_generator().await.unwrap().generate_data(7, 0).await.unwrap();

    for user in 0..7u32 {
        let home = user % 5;
        let authenticator = cluster
            .authenticators()
            .resolve("AuthenticatorService", home)
            .await
            .unwrap();
        let name = user.to_string();
        assert!(authenticator.login_user(&name, &name).await.unwrap().is_some());
    }
    assert_eq!(cluster.auth_partition(0).unwrap().len("userCredentials").await, 2);
    assert_eq!(cluster.auth_partition(4).unwrap().len("userCredentials").await, 1);
}

#[tokio::test]
async fn test_regeneration_reuses_existing_users() {
    let cluster = cluster().await;
    let generator = cluster.data_generator().await.unwrap();

    generator.generate_data(3, 1).await.unwrap();
    let report = generator.generate_data(3, 1).await.unwrap();
    assert_eq!(report.users_created, 0);
    assert_eq!(report.posts_created, 3);

    let client = cluster.client().await.unwrap();
    assert_eq!(client.retrieve_user_posts("2").await.unwrap().len(), 2);
}

#[tokio::test]
async fn test_empty_generation() {
    let cluster = cluster().await;
    let report = cluster
        .data_generator()
        .await
        .unwrap()
        .generate_data(0, 10)
        .await
        .unwrap();
    assert_eq!(report.users_created, 0);
    assert_eq!(report.posts_created, 0);
}
