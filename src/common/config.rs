//! Configuration for gantry nodes

use serde::{Deserialize, Serialize};
use std::net::SocketAddr;

use crate::common::utils::{local_address, short_hostname};

/// Global configuration
///
/// Loaded from an optional TOML file and `GANTRY_*` environment variables,
/// environment taking precedence.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Node ID template; `{HOSTNAME}` and `{PID}` are substituted
    #[serde(default = "default_node_id")]
    pub node_id: String,

    /// Cluster ID this node belongs to
    #[serde(default = "default_cluster_id")]
    pub cluster_id: String,

    /// Advertised node address; `0.0.0.0` means auto-detect
    #[serde(default = "default_node_address")]
    pub node_address: String,

    /// Shared store URL (Redis-compatible)
    #[serde(default = "default_store_url")]
    pub store_url: String,

    /// Bind address for the HTTP API
    #[serde(default = "default_bind_addr")]
    pub bind_addr: SocketAddr,

    /// Token-signing secret; falls back to the store's cluster secret
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secret_key: Option<String>,

    /// Rebuild services when a backing file changes
    #[serde(default)]
    pub auto_reload: bool,

    /// Seconds between heartbeat/election ticks
    #[serde(default = "default_tick_interval")]
    pub tick_interval_secs: u64,

    /// Logging level
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn default_node_id() -> String {
    "{HOSTNAME}.{PID}".to_string()
}
fn default_cluster_id() -> String {
    "gantry".to_string()
}
fn default_node_address() -> String {
    "0.0.0.0".to_string()
}
fn default_store_url() -> String {
    "redis://127.0.0.1:6379/0".to_string()
}
fn default_bind_addr() -> SocketAddr {
    "0.0.0.0:8000".parse().unwrap()
}
fn default_tick_interval() -> u64 {
    5
}
fn default_log_level() -> String {
    "info".to_string()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            node_id: default_node_id(),
            cluster_id: default_cluster_id(),
            node_address: default_node_address(),
            store_url: default_store_url(),
            bind_addr: default_bind_addr(),
            secret_key: None,
            auto_reload: false,
            tick_interval_secs: default_tick_interval(),
            log_level: default_log_level(),
        }
    }
}

impl Config {
    /// Load config from file (optional) and `GANTRY_*` environment overrides
    pub fn load(path: Option<&str>) -> crate::Result<Self> {
        let mut builder = config::Config::builder()
            .add_source(config::Config::try_from(&Config::default())?);

        builder = match path {
            Some(path) => builder.add_source(config::File::with_name(path).required(true)),
            None => builder.add_source(config::File::with_name("gantry").required(false)),
        };

        let settings = builder
            .add_source(config::Environment::with_prefix("GANTRY"))
            .build()?;

        Ok(settings.try_deserialize()?)
    }

    /// Node ID with `{HOSTNAME}`/`{PID}` placeholders substituted
    pub fn resolved_node_id(&self) -> String {
        self.node_id
            .replace("{HOSTNAME}", &short_hostname())
            .replace("{PID}", &std::process::id().to_string())
    }

    /// Advertised address; `0.0.0.0` resolves to the detected local address
    pub fn resolved_node_address(&self) -> String {
        if self.node_address == "0.0.0.0" {
            match local_address() {
                Some(addr) => addr,
                None => {
                    tracing::warn!("Unable to determine node address, using localhost");
                    "localhost".to_string()
                }
            }
        } else {
            self.node_address.clone()
        }
    }
}
