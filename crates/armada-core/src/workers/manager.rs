// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Worker manager: reconciles the live worker pools against the desired
//! counts in the workers table.
//!
//! Each tick reads `count_per_instance` per `(engine, kind)` and grows or
//! shrinks the pools to match. Every worker runs under a child of the
//! manager's cancellation token, so cancelling the root token stops every
//! worker; the manager then awaits every join handle before returning, the
//! wait-group of the shutdown path. Reconciliation is desired-state, not
//! imperative: operators resize pools by editing rows, and the next tick
//! applies it.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use super::spawn_worker;
use crate::config::WorkerIntervals;
use crate::engine::Engines;
use crate::error::CoreError;
use crate::models::WorkerKind;
use crate::store::StateStore;

struct WorkerHandle {
    cancel: CancellationToken,
    join: JoinHandle<()>,
}

type EnginePools = HashMap<WorkerKind, Vec<WorkerHandle>>;

/// Sizes and owns the per-engine worker pools.
#[derive(Clone)]
pub struct WorkerManager {
    store: Arc<dyn StateStore>,
    engines: Engines,
    intervals: WorkerIntervals,
    pools: Arc<Mutex<HashMap<String, EnginePools>>>,
    retired: Arc<Mutex<Vec<JoinHandle<()>>>>,
}

impl WorkerManager {
    /// Create a manager over the registered engines.
    pub fn new(store: Arc<dyn StateStore>, engines: Engines, intervals: WorkerIntervals) -> Self {
        Self {
            store,
            engines,
            intervals,
            pools: Arc::new(Mutex::new(HashMap::new())),
            retired: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Start the reconciliation loop. The returned handle resolves once the
    /// token is cancelled and every worker has drained.
    pub fn start(&self, cancel: CancellationToken) -> JoinHandle<()> {
        let manager = self.clone();
        tokio::spawn(async move {
            info!(
                interval_ms = manager.intervals.manager.as_millis() as u64,
                engines = ?manager.engines.names(),
                "Worker manager started"
            );
            manager.reconcile_once(&cancel).await;
            loop {
                tokio::select! {
                    biased;

                    _ = cancel.cancelled() => break,

                    _ = tokio::time::sleep(manager.intervals.manager) => {
                        manager.reconcile_once(&cancel).await;
                    }
                }
            }
            manager.shutdown().await;
        })
    }

    /// Current pool size for one `(engine, kind)`.
    pub async fn pool_size(&self, engine: &str, kind: WorkerKind) -> usize {
        let pools = self.pools.lock().await;
        pools
            .get(engine)
            .and_then(|engine_pools| engine_pools.get(&kind))
            .map_or(0, Vec::len)
    }

    /// One reconciliation pass. Public so tests can tick the manager
    /// directly.
    pub async fn reconcile_once(&self, root: &CancellationToken) {
        if let Err(e) = self.reconcile(root).await {
            error!(error = %e, "Worker pool reconciliation failed");
        }
    }

    async fn reconcile(&self, root: &CancellationToken) -> Result<(), CoreError> {
        for (engine_name, engine) in self.engines.iter() {
            let desired = self.store.list_workers(engine_name).await?;

            let mut pools = self.pools.lock().await;
            let engine_pools = pools.entry(engine_name.clone()).or_default();

            for row in desired.workers {
                let kind = row.worker_type;
                if !WorkerKind::POOLED.contains(&kind) {
                    continue;
                }
                let pool = engine_pools.entry(kind).or_default();
                let current = pool.len() as i64;
                let target = row.count_per_instance.max(0);

                if current > target {
                    let mut retired = self.retired.lock().await;
                    for _ in 0..(current - target) {
                        if let Some(handle) = pool.pop() {
                            info!(engine = %engine_name, kind = %kind, "Removing worker");
                            handle.cancel.cancel();
                            retired.push(handle.join);
                        }
                    }
                } else if current < target {
                    for _ in 0..(target - current) {
                        info!(engine = %engine_name, kind = %kind, "Adding worker");
                        let child = root.child_token();
                        let Some(join) = spawn_worker(
                            kind,
                            self.store.clone(),
                            engine.clone(),
                            &self.intervals,
                            child.clone(),
                        ) else {
                            continue;
                        };
                        pool.push(WorkerHandle {
                            cancel: child,
                            join,
                        });
                    }
                }
            }
        }
        Ok(())
    }

    /// Cancel every worker and await every join handle.
    async fn shutdown(&self) {
        info!("Worker manager stopping all workers");
        let mut joins = Vec::new();
        {
            let mut pools = self.pools.lock().await;
            for engine_pools in pools.values_mut() {
                for pool in engine_pools.values_mut() {
                    for handle in pool.drain(..) {
                        handle.cancel.cancel();
                        joins.push(handle.join);
                    }
                }
            }
        }
        joins.extend(self.retired.lock().await.drain(..));
        for join in joins {
            let _ = join.await;
        }
        info!("Worker manager stopped");
    }
}
