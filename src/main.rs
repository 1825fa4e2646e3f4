use anyhow::{Context, Result, anyhow};
use clap::{Parser, Subcommand};
use postit::{
    ClusterConfig, DataGenerator, DurabilityMode, LocalCluster, Post, RoutingStrategy, StoreError,
};
use std::path::PathBuf;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "postit")]
#[command(about = "Partitioned transactional store behind a small posting service")]
struct Cli {
    /// Directory holding partition state between invocations
    #[arg(long, global = true, default_value = "postit-data")]
    data_dir: PathBuf,

    /// Keep state in memory only (nothing survives the invocation)
    #[arg(long, global = true)]
    in_memory: bool,

    #[arg(long, global = true, default_value_t = 5)]
    auth_partitions: u32,

    /// sync, async or none
    #[arg(long, global = true, default_value = "async")]
    durability: String,

    /// first-code-point or fnv1a
    #[arg(long, global = true, default_value = "first-code-point")]
    routing: String,

    #[arg(long, global = true, default_value_t = bcrypt::DEFAULT_COST)]
    hash_cost: u32,

    /// Session expiry in seconds
    #[arg(long, global = true)]
    session_ttl_secs: Option<u64>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    Register {
        username: String,
        password: String,
    },
    Login {
        username: String,
        password: String,
    },
    Logout {
        username: String,
    },
    SessionValid {
        username: String,
        session_id: String,
    },
    Post {
        user_id: String,
        content: String,
    },
    GetPost {
        id: i64,
    },
    UserPosts {
        user_id: String,
    },
    Generate {
        #[arg(long, default_value_t = 10)]
        users: u32,
        #[arg(long, default_value_t = 5)]
        posts: u32,
    },
    Checkpoint,
}

impl Cli {
    fn cluster_config(&self) -> Result<ClusterConfig> {
        let durability: DurabilityMode = self.durability.parse()?;
        let routing: RoutingStrategy = self.routing.parse()?;

        let mut config = ClusterConfig::new()
            .auth_partitions(self.auth_partitions)
            .durability(durability)
            .routing_strategy(routing)
            .password_hash_cost(self.hash_cost);
        if !self.in_memory {
            config = config.data_dir(&self.data_dir);
        }
        if let Some(secs) = self.session_ttl_secs {
            config = config.session_ttl(Duration::from_secs(secs));
        }
        config.validate()?;
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let cli = Cli::parse();
    let cluster = LocalCluster::start(cli.cluster_config()?)
        .await
        .context("Failed to start local cluster")?;
    let client = cluster.client().await?;

    match cli.command {
        Command::Register { username, password } => {
            if client.register_user(&username, &password).await? {
                println!("User '{}' registered", username);
            } else {
                println!("User '{}' already exists", username);
            }
        }
        Command::Login { username, password } => match client.login_user(&username, &password).await? {
            Some(session) => println!("{}", session),
            None => return Err(anyhow!("Invalid username or password")),
        },
        Command::Logout { username } => {
            if client.logout_user(&username).await? {
                println!("User '{}' logged out", username);
            } else {
                println!("Unknown user '{}'", username);
            }
        }
        Command::SessionValid {
            username,
            session_id,
        } => {
            let valid = client.is_session_valid(&username, &session_id).await?;
            println!("{}", if valid { "valid" } else { "invalid" });
        }
        Command::Post { user_id, content } => {
            let id = client.insert_post(Post::new(user_id, content)).await?;
            println!("{}", id);
        }
        Command::GetPost { id } => match client.retrieve_post(id).await? {
            Some(post) => println!("{}", serde_json::to_string_pretty(&post)?),
            None => return Err(StoreError::NotFound(format!("post {}", id)).into()),
        },
        Command::UserPosts { user_id } => {
            let posts = client.retrieve_user_posts(&user_id).await?;
            println!("{}", serde_json::to_string_pretty(&posts)?);
        }
        Command::Generate { users, posts } => {
            let report = cluster
                .data_generator()
                .await?
                .generate_data(users, posts)
                .await?;
            println!(
                "Created {} users and {} posts",
                report.users_created, report.posts_created
            );
        }
        Command::Checkpoint => {
            cluster.checkpoint().await?;
            println!("Checkpoint complete");
        }
    }

    Ok(())
}
