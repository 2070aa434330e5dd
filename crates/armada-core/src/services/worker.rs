// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Worker admin service: read and resize the per-engine worker pools.

use std::sync::Arc;

use crate::error::CoreError;
use crate::models::{Worker, WorkerKind, WorkersList};
use crate::store::StateStore;

/// Thin facade over the workers table. The worker manager picks up count
/// changes on its next reconciliation tick.
#[derive(Clone)]
pub struct WorkerService {
    store: Arc<dyn StateStore>,
}

impl WorkerService {
    /// Create the service.
    pub fn new(store: Arc<dyn StateStore>) -> Self {
        Self { store }
    }

    /// All worker rows for an engine.
    pub async fn list(&self, engine: &str) -> Result<WorkersList, CoreError> {
        self.store.list_workers(engine).await
    }

    /// One worker row.
    pub async fn get(&self, kind: WorkerKind, engine: &str) -> Result<Worker, CoreError> {
        self.store.get_worker(kind, engine).await
    }

    /// Resize one pool.
    pub async fn update(
        &self,
        kind: WorkerKind,
        engine: &str,
        count_per_instance: i64,
    ) -> Result<Worker, CoreError> {
        self.store
            .update_worker(kind, engine, count_per_instance)
            .await
    }

    /// Apply several updates at once.
    pub async fn batch_update(&self, updates: &[Worker]) -> Result<WorkersList, CoreError> {
        self.store.batch_update_workers(updates).await
    }
}
