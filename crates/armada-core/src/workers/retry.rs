// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Retry worker: re-queues runs marked NEEDS_RETRY.
//!
//! A row is flipped to QUEUED before it is re-enqueued. Errors abort the
//! tick: already-flipped rows stay QUEUED but un-enqueued, which is safe
//! because the submit worker reads authoritative status at dequeue time and
//! the status worker sweeps runs the backend never saw.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::engine::Engine;
use crate::error::CoreError;
use crate::models::{RunPatch, RunStatus};
use crate::store::{ListArgs, ListRunsArgs, StateStore};

/// Runs re-queued per tick.
const RETRY_BATCH_SIZE: i64 = 25;

/// Sweeps one engine's NEEDS_RETRY runs back onto its queue.
pub struct RetryWorker {
    store: Arc<dyn StateStore>,
    engine: Arc<dyn Engine>,
    interval: Duration,
}

impl RetryWorker {
    /// Create a retry worker for one engine.
    pub fn new(store: Arc<dyn StateStore>, engine: Arc<dyn Engine>, interval: Duration) -> Self {
        Self {
            store,
            engine,
            interval,
        }
    }

    /// Run the sweep loop until cancelled.
    pub async fn run(self, cancel: CancellationToken) {
        info!(
            engine = %self.engine.name(),
            interval_ms = self.interval.as_millis() as u64,
            "Retry worker started"
        );
        loop {
            tokio::select! {
                biased;

                _ = cancel.cancelled() => break,

                _ = tokio::time::sleep(self.interval) => {
                    if let Err(e) = self.run_once().await {
                        error!(engine = %self.engine.name(), error = %e, "Retry sweep failed");
                    }
                }
            }
        }
        info!(engine = %self.engine.name(), "Retry worker stopped");
    }

    /// One sweep. Public so tests can tick the worker directly.
    pub async fn run_once(&self) -> Result<(), CoreError> {
        let mut list = ListArgs {
            limit: Some(RETRY_BATCH_SIZE),
            offset: Some(0),
            sort_by: Some("started_at".to_string()),
            order: Some("asc".to_string()),
            ..Default::default()
        };
        list.add_filter("status", RunStatus::NeedsRetry.as_str());
        let args = ListRunsArgs {
            list,
            engines: Some(vec![self.engine.name().to_string()]),
            env_filters: None,
        };

        let runs = self.store.list_runs(&args).await?;
        for run in runs.runs {
            debug!(run_id = %run.run_id, "Re-queueing run");
            self.store
                .update_run(&run.run_id, &RunPatch::status(RunStatus::Queued))
                .await?;
            self.engine.enqueue(&run).await?;
        }
        Ok(())
    }
}
