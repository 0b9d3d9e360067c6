//! Service node binary

use std::sync::Arc;

use clap::{Parser, Subcommand};
use gantry::cluster::Runner;
use gantry::common::{Config, RedisStore, SharedStore};
use gantry::services::builtin_services;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "gantry-node")]
#[command(about = "gantry service node with cluster coordination")]
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
    /// Run this node
    Serve {
        /// Node ID override
        #[arg(long, short = 'n')]
        node: Option<String>,

        /// Cluster ID override
        #[arg(long, short = 'k')]
        cluster: Option<String>,

        /// Skip all cluster-state writes (no heartbeat, no election)
        #[arg(long)]
        stateless: bool,

        /// Rebuild services when a backing file changes
        #[arg(long, short = 'R')]
        autoreload: bool,

        /// Do not register the built-in auth service
        #[arg(long)]
        no_auth: bool,
    },

    /// List the services this node would load
    ListServices {
        /// Do not register the built-in auth service
        #[arg(long)]
        no_auth: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let mut config = Config::load(cli.config.as_deref())?;

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.log_level)),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    match cli.command {
        Commands::Serve {
            node,
            cluster,
            stateless,
            autoreload,
            no_auth,
        } => {
            if let Some(node) = node {
                config.node_id = node;
            }
            if let Some(cluster) = cluster {
                config.cluster_id = cluster;
            }
            if autoreload {
                config.auto_reload = true;
            }

            let store: SharedStore = Arc::new(RedisStore::connect(&config.store_url).await?);
            let mut runner = Runner::new(config, store, builtin_services(no_auth));
            runner.stateless = stateless;
            runner.run().await?;
        }

        Commands::ListServices { no_auth } => {
            println!("Would load the following services:");
            for service in builtin_services(no_auth) {
                for operation in &service.operations {
                    println!(" -> {}", operation.service_id());
                }
            }
        }
    }

    Ok(())
}
