//! Node runner loop
//!
//! Ties the cluster state machine and service discovery together: builds
//! the dispatcher and HTTP server, heartbeats this node's liveness,
//! confirms the master every tick, and tears the services down for a
//! rebuild when a backing file changes or a restart is requested through
//! the store.

use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Map, Value};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::cluster::discovery::ServiceStore;
use crate::cluster::state::State;
use crate::common::config::Config;
use crate::common::store::SharedStore;
use crate::common::utils::epoch;
use crate::service::{ContextData, Dispatcher, OperationKind, Service};
use crate::Result;

pub struct Runner {
    config: Config,
    store: SharedStore,
    state: Arc<State>,
    definitions: Vec<Service>,
    /// Skip all cluster-state writes (no heartbeat, no election)
    pub stateless: bool,
}

impl Runner {
    pub fn new(config: Config, store: SharedStore, definitions: Vec<Service>) -> Self {
        let state = Arc::new(State::new(store.clone(), &config));
        Self {
            config,
            store,
            state,
            definitions,
            stateless: false,
        }
    }

    pub fn state(&self) -> Arc<State> {
        self.state.clone()
    }

    /// Run until interrupted. Each outer iteration is one service
    /// generation; reload/restart tears the generation down and rebuilds.
    pub async fn run(&self) -> Result<()> {
        if !self.stateless {
            self.state
                .update(&[
                    ("started", json!(epoch())),
                    ("stopped", Value::Null),
                    ("ip_addr", json!(self.state.node_address())),
                ])
                .await?;
            tracing::info!(
                "This instance is {} on {}",
                self.state.node_id(),
                self.state.cluster_id()
            );
        }

        let mut stopped = false;
        while !stopped {
            let service_store = ServiceStore::new(self.definitions.clone());
            tracing::info!(
                "Starting dispatcher with {} services",
                service_store.services().len()
            );

            let mut dispatcher = Dispatcher::new(self.store.clone(), self.config.secret_key.clone());
            for service in service_store.services() {
                dispatcher.register(service);
            }
            let dispatcher = Arc::new(dispatcher);

            if !self.stateless {
                service_store.publish(&self.store).await?;
            }

            let listener = tokio::net::TcpListener::bind(self.config.bind_addr).await?;
            let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel::<()>();
            let router = dispatcher.router();
            let server = tokio::spawn(async move {
                let serve = axum::serve(listener, router).with_graceful_shutdown(async move {
                    let _ = shutdown_rx.await;
                });
                if let Err(err) = serve.await {
                    tracing::error!("HTTP server error: {}", err);
                }
            });

            let timers = self.spawn_timers(&dispatcher);

            let tick = Duration::from_secs(if self.config.auto_reload {
                1
            } else {
                self.config.tick_interval_secs.max(1)
            });

            loop {
                if !self.stateless {
                    self.state.confirm_master().await?;
                }

                tokio::select! {
                    _ = tokio::time::sleep(tick) => {}
                    _ = tokio::signal::ctrl_c() => {
                        tracing::warn!("Stopping service node (someone hit ^C)");
                        if !self.stateless {
                            let _ = self.state.update(&[("stopped", json!(epoch()))]).await;
                        }
                        stopped = true;
                        break;
                    }
                }

                if self.config.auto_reload && service_store.should_reload() {
                    tracing::info!("Server reload!");
                    if !self.stateless {
                        self.state.update(&[("stopped", json!(epoch()))]).await?;
                    }
                    break;
                }

                if !self.stateless {
                    if self.state.requires_restart().await? {
                        tracing::info!("Restart requested through the store");
                        self.state.update(&[("stopped", json!(epoch()))]).await?;
                        break;
                    }
                    self.state.update(&[("last_seen", json!(epoch()))]).await?;
                }
            }

            for timer in timers {
                timer.abort();
            }
            let _ = shutdown_tx.send(());
            let _ = server.await;
        }

        Ok(())
    }

    /// One background ticker per timer operation. `master_only` operations
    /// skip ticks while this node is not the master.
    fn spawn_timers(&self, dispatcher: &Arc<Dispatcher>) -> Vec<JoinHandle<()>> {
        let mut handles = Vec::new();
        for operation in dispatcher.timer_operations() {
            let interval = match &operation.kind {
                OperationKind::Timer { interval } => *interval,
                _ => continue,
            };
            let dispatcher = dispatcher.clone();
            let state = self.state.clone();
            handles.push(tokio::spawn(async move {
                let mut ticker = tokio::time::interval(interval);
                ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
                loop {
                    ticker.tick().await;
                    if operation.options.master_only && !state.is_master() {
                        tracing::debug!("skipping {} tick, not master", operation.service_id());
                        continue;
                    }
                    if let Err(err) = dispatcher
                        .call(
                            &operation.service,
                            &operation.name,
                            Vec::new(),
                            Map::new(),
                            ContextData::new(),
                        )
                        .await
                    {
                        tracing::error!("timer {} failed: {}", operation.service_id(), err);
                    }
                }
            }));
        }
        handles
    }
}
