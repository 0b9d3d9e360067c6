//! Service discovery and hot-reload detection
//!
//! Tracks the file backing each registered service and reports when one
//! has changed on disk. This is a point-in-time poll driven by the runner
//! loop, not a filesystem watch. A service whose backing file cannot be
//! inspected is skipped with an error; discovery of the others continues.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::SystemTime;

use serde_json::json;

use crate::common::store::SharedStore;
use crate::common::utils::{epoch, file_hash};
use crate::service::Service;
use crate::Result;

pub struct ServiceStore {
    services: Vec<Arc<Service>>,
    file_mtimes: HashMap<PathBuf, SystemTime>,
}

impl ServiceStore {
    /// Register a set of service definitions, recording each backing
    /// file's modification time the first time the file is seen.
    pub fn new(definitions: Vec<Service>) -> Self {
        let mut store = Self {
            services: Vec::new(),
            file_mtimes: HashMap::new(),
        };
        for service in definitions {
            store.add_service(service);
        }
        store
    }

    fn add_service(&mut self, service: Service) {
        if let Some(path) = service.source.clone() {
            match file_mtime(&path) {
                Ok(mtime) => {
                    self.file_mtimes.entry(path).or_insert(mtime);
                }
                Err(err) => {
                    tracing::error!(
                        "Failed to discover service {} from {}: {}",
                        service.name,
                        path.display(),
                        err
                    );
                    return;
                }
            }
        }
        self.services.push(Arc::new(service));
    }

    pub fn services(&self) -> &[Arc<Service>] {
        &self.services
    }

    /// True if any tracked file's on-disk mtime differs from the one
    /// recorded at registration. Logs every changed file.
    pub fn should_reload(&self) -> bool {
        let mut should_reload = false;
        for (path, recorded) in &self.file_mtimes {
            let changed = match file_mtime(path) {
                Ok(current) => current != *recorded,
                // A file that disappeared counts as changed
                Err(_) => true,
            };
            if changed {
                should_reload = true;
                tracing::info!("Detected modified file: {}", path.display());
            }
        }
        should_reload
    }

    /// Publish per-service bookkeeping to the shared store, refreshing
    /// the recorded mtime/hash when the backing file is newer.
    pub async fn publish(&self, store: &SharedStore) -> Result<()> {
        for service in &self.services {
            let Some(path) = &service.source else {
                continue;
            };
            if let Err(err) = self.publish_one(store, &service.name, path).await {
                tracing::error!("Failed to publish service {}: {}", service.name, err);
            }
        }
        Ok(())
    }

    async fn publish_one(&self, store: &SharedStore, name: &str, path: &Path) -> Result<()> {
        let hash = file_hash(path)
            .map_err(|err| crate::Error::Discovery(format!("{}: {err}", path.display())))?;
        let mtime = file_mtime(path)
            .map_err(|err| crate::Error::Discovery(format!("{}: {err}", path.display())))?
            .duration_since(SystemTime::UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);
        let file_key = path
            .file_name()
            .map(|f| f.to_string_lossy().to_string())
            .unwrap_or_else(|| path.display().to_string());

        store
            .set_json(&format!("services:{name}:file_key"), &json!(file_key))
            .await?;
        store
            .set_json(&format!("services:{name}:last_seen"), &json!(epoch()))
            .await?;

        let old_mtime = store
            .get_json(&format!("services:{name}:mtime"))
            .await?
            .and_then(|v| v.as_u64());
        if old_mtime.is_none() || old_mtime < Some(mtime) {
            store
                .set_json(&format!("services:{name}:mtime"), &json!(mtime))
                .await?;
            store
                .set_json(&format!("services:{name}:hash"), &json!(hash))
                .await?;
            if old_mtime.is_some() {
                tracing::debug!("Refreshing {} bookkeeping due to mtime", name);
            }
        }
        Ok(())
    }
}

fn file_mtime(path: &Path) -> std::io::Result<SystemTime> {
    std::fs::metadata(path)?.modified()
}
