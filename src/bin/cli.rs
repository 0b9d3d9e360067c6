//! CLI for cluster operations

use std::sync::Arc;

use clap::{Parser, Subcommand};
use gantry::cluster::{State, ACTIVE_THRESHOLD_SECS, MASTER_KEY, RESTART_KEY};
use gantry::common::auth::{forge_token, SECRET_STORE_KEY};
use gantry::common::{Config, RedisStore, SharedStore};
use serde_json::json;

#[derive(Parser)]
#[command(name = "gantry")]
#[command(about = "gantry cluster administration CLI")]
#[command(version)]
struct Cli {
    /// Config file path
    #[arg(long, short = 'c')]
    config: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show active nodes and the current master
    Status,

    /// Mint a token for an identity
    ForgeToken {
        /// Tenant ID
        #[arg(long)]
        tenant: String,

        /// Username
        #[arg(long, default_value = "SYSTEM")]
        username: String,

        /// Roles (comma-separated)
        #[arg(long, value_delimiter = ',')]
        roles: Vec<String>,
    },

    /// Store the cluster-wide token-signing secret
    SetSecret {
        secret: String,
    },

    /// Ask every node to rebuild its services
    Restart,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();
    let config = Config::load(cli.config.as_deref())?;
    let store: SharedStore = Arc::new(RedisStore::connect(&config.store_url).await?);

    match cli.command {
        Commands::Status => {
            let state = State::new(store.clone(), &config);
            let nodes = state.get_active_nodes(ACTIVE_THRESHOLD_SECS).await?;
            let master = store.get_raw(MASTER_KEY).await?;

            println!("Cluster: {}", config.cluster_id);
            println!("Master:  {}", master.as_deref().unwrap_or("(none)"));
            println!("Active nodes ({}):", nodes.len());
            for (age, node_id) in nodes {
                println!("  {:<32} seen {:.1}s ago", node_id, age);
            }
        }

        Commands::ForgeToken {
            tenant,
            username,
            roles,
        } => {
            let secret = match config.secret_key {
                Some(secret) => secret,
                None => store
                    .get_raw(SECRET_STORE_KEY)
                    .await?
                    .ok_or_else(|| anyhow::anyhow!("no secret configured or stored"))?,
            };
            let token = forge_token(&secret, &tenant, &username, &roles)?;
            println!("{token}");
        }

        Commands::SetSecret { secret } => {
            store.set_raw(SECRET_STORE_KEY, &secret).await?;
            println!("Secret stored");
        }

        Commands::Restart => {
            store.set_json(RESTART_KEY, &json!(true)).await?;
            println!("Restart flagged; nodes will rebuild on their next tick");
        }
    }

    Ok(())
}
