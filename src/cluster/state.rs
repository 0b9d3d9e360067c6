//! Cluster state machine
//!
//! Each node announces liveness under `cluster:nodes:<id>:*` and
//! cooperates to elect a single master through `cluster:master_node`.
//! Election is last-writer-wins, not atomic: concurrent nodes may briefly
//! write different masters in the same window and converge on the next
//! `confirm_master` pass.

use std::sync::RwLock;

use serde_json::Value;

use crate::common::config::Config;
use crate::common::store::SharedStore;
use crate::common::utils::{epoch, json_truthy};
use crate::Result;

/// Nodes unseen for longer than this are not election candidates
pub const ACTIVE_THRESHOLD_SECS: f64 = 30.0;

/// A cached master older than this is dropped
const MASTER_STALE_SECS: f64 = 20.0;

/// Store key holding the elected master's node id
pub const MASTER_KEY: &str = "cluster:master_node";

/// One-shot restart flag, consumed and cleared on read
pub const RESTART_KEY: &str = "cluster:requires_restart";

/// This node's view of the cluster
pub struct State {
    store: SharedStore,
    node_id: String,
    cluster_id: String,
    node_address: String,
    /// Cached master node id; may be stale between confirmations
    master_node: RwLock<Option<String>>,
}

impl State {
    pub fn new(store: SharedStore, config: &Config) -> Self {
        Self {
            store,
            node_id: config.resolved_node_id(),
            cluster_id: config.cluster_id.clone(),
            node_address: config.resolved_node_address(),
            master_node: RwLock::new(None),
        }
    }

    pub fn node_id(&self) -> &str {
        &self.node_id
    }

    pub fn cluster_id(&self) -> &str {
        &self.cluster_id
    }

    pub fn node_address(&self) -> &str {
        &self.node_address
    }

    fn node_key(&self, node_id: &str, field: &str) -> String {
        format!("cluster:nodes:{node_id}:{field}")
    }

    /// Write fields under this node's record. Only the owning node writes
    /// its own heartbeat keys.
    pub async fn update(&self, fields: &[(&str, Value)]) -> Result<()> {
        for (field, value) in fields {
            self.store
                .set_json(&self.node_key(&self.node_id, field), value)
                .await?;
        }
        Ok(())
    }

    /// Nodes seen within `threshold` seconds, as `(age, node_id)` pairs
    /// sorted ascending (most recently seen first; node id breaks ties).
    pub async fn get_active_nodes(&self, threshold: f64) -> Result<Vec<(f64, String)>> {
        let now = epoch();
        let mut nodes = Vec::new();

        for key in self.store.keys("cluster:nodes:*:last_seen").await? {
            let parts: Vec<&str> = key.split(':').collect();
            let Some(node_id) = parts.len().checked_sub(2).and_then(|i| parts.get(i)) else {
                continue;
            };
            let last_seen = self
                .store
                .get_json(&self.node_key(node_id, "last_seen"))
                .await?
                .and_then(|v| v.as_f64());
            if let Some(last_seen) = last_seen {
                let age = now - last_seen;
                if age < threshold {
                    nodes.push((age, node_id.to_string()));
                }
            }
        }

        nodes.sort_by(|a, b| a.0.total_cmp(&b.0).then_with(|| a.1.cmp(&b.1)));
        Ok(nodes)
    }

    /// Confirm (or elect) the cluster master and return its node id.
    ///
    /// Idempotent per invocation: adopts the recorded master when none is
    /// cached, drops a cached master whose record is missing or stale,
    /// and otherwise elects the most recently seen active node that has
    /// not opted out via `never_promote`.
    pub async fn confirm_master(&self) -> Result<Option<String>> {
        let now = epoch();
        let mut master = self.master_node.read().ok().and_then(|m| m.clone());

        if master.is_none() {
            master = self.store.get_raw(MASTER_KEY).await?;
        }

        if let Some(ref candidate) = master {
            let last_seen = self
                .store
                .get_json(&self.node_key(candidate, "last_seen"))
                .await?
                .and_then(|v| v.as_f64());
            let stale = match last_seen {
                Some(last_seen) => now - last_seen > MASTER_STALE_SECS,
                None => true,
            };
            if stale {
                tracing::warn!(
                    "We have not seen our master ({}) for {} seconds now",
                    candidate,
                    MASTER_STALE_SECS
                );
                master = None;
            }
        }

        if master.is_none() {
            for (_, candidate) in self.get_active_nodes(ACTIVE_THRESHOLD_SECS).await? {
                let never_promote = self
                    .store
                    .get_json(&self.node_key(&candidate, "never_promote"))
                    .await?
                    .map(|v| json_truthy(&v))
                    .unwrap_or(false);
                if never_promote {
                    // This node does not want to be master, move on
                    continue;
                }
                self.store.set_raw(MASTER_KEY, &candidate).await?;
                tracing::info!("{} has been nominated as master by {}", candidate, self.node_id);
                master = Some(candidate);
                break;
            }
        }

        if let Ok(mut cached) = self.master_node.write() {
            *cached = master.clone();
        }
        Ok(master)
    }

    /// True iff the cached master is this node
    pub fn is_master(&self) -> bool {
        self.master_node
            .read()
            .ok()
            .and_then(|m| m.clone())
            .is_some_and(|m| m == self.node_id)
    }

    /// Read and clear the cluster-wide restart flag
    pub async fn requires_restart(&self) -> Result<bool> {
        let required = self
            .store
            .get_json(RESTART_KEY)
            .await?
            .map(|v| json_truthy(&v))
            .unwrap_or(false);
        if required {
            self.store.set_json(RESTART_KEY, &Value::Bool(false)).await?;
        }
        Ok(required)
    }
}
