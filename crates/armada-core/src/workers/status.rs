// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Status worker: reconciles live backend state into run rows.
//!
//! Every tick lists the engine's non-terminal runs from the last 30 days and
//! asks the backend for their current state. A workload the backend lost is
//! forced to STOPPED unless the run is still QUEUED (it may simply not have
//! been submitted yet). A terminal transition schedules a delayed cleanup
//! terminate as an idempotent safety net for backend leftovers.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::engine::{Engine, EngineError};
use crate::models::{RunPatch, RunStatus};
use crate::store::{ListArgs, ListRunsArgs, StateStore};

/// Runs examined per tick.
const STATUS_BATCH_SIZE: i64 = 1000;

/// Runs older than this are left alone.
const LOOKBACK_DAYS: i64 = 30;

/// How long to wait before the post-terminal cleanup terminate.
pub const DEFAULT_CLEANUP_DELAY: Duration = Duration::from_secs(120);

/// Reconciles one engine's runs against its backend.
pub struct StatusWorker {
    store: Arc<dyn StateStore>,
    engine: Arc<dyn Engine>,
    interval: Duration,
    cleanup_delay: Duration,
}

impl StatusWorker {
    /// Create a status worker for one engine.
    pub fn new(store: Arc<dyn StateStore>, engine: Arc<dyn Engine>, interval: Duration) -> Self {
        Self {
            store,
            engine,
            interval,
            cleanup_delay: DEFAULT_CLEANUP_DELAY,
        }
    }

    /// Override the cleanup delay. Tests use short delays.
    pub fn with_cleanup_delay(mut self, delay: Duration) -> Self {
        self.cleanup_delay = delay;
        self
    }

    /// Run the reconciliation loop until cancelled.
    pub async fn run(self, cancel: CancellationToken) {
        info!(
            engine = %self.engine.name(),
            interval_ms = self.interval.as_millis() as u64,
            "Status worker started"
        );
        loop {
            tokio::select! {
                biased;

                _ = cancel.cancelled() => break,

                _ = tokio::time::sleep(self.interval) => {
                    self.run_once().await;
                }
            }
        }
        info!(engine = %self.engine.name(), "Status worker stopped");
    }

    /// One reconciliation pass. Public so tests can tick the worker
    /// directly.
    pub async fn run_once(&self) {
        let cutoff = Utc::now() - chrono::Duration::days(LOOKBACK_DAYS);
        let mut list = ListArgs {
            limit: Some(STATUS_BATCH_SIZE),
            offset: Some(0),
            sort_by: Some("started_at".to_string()),
            order: Some("asc".to_string()),
            ..Default::default()
        };
        list.add_filter("queued_at_since", &cutoff.to_rfc3339());
        list.filters.insert(
            "status".to_string(),
            vec![
                RunStatus::NeedsRetry.to_string(),
                RunStatus::Running.to_string(),
                RunStatus::Queued.to_string(),
                RunStatus::Pending.to_string(),
            ],
        );
        let args = ListRunsArgs {
            list,
            engines: Some(vec![self.engine.name().to_string()]),
            env_filters: None,
        };

        let runs = match self.store.list_runs(&args).await {
            Ok(runs) => runs,
            Err(e) => {
                error!(engine = %self.engine.name(), error = %e, "Failed to list runs");
                return;
            }
        };
        if runs.total > 0 {
            debug!(engine = %self.engine.name(), total = runs.total, "Reconciling run statuses");
        }

        for run in runs.runs {
            let run_id = run.run_id.clone();
            let stored_status = run.status;
            match self.engine.get_latest(run).await {
                Ok(updated) => {
                    if updated.status != stored_status {
                        // A freshly observed exit code means the workload just
                        // went terminal; give the backend time to settle, then
                        // sweep up whatever it left behind.
                        if updated.exit_code.is_some() {
                            self.schedule_cleanup(run_id.clone());
                        }
                        if let Err(e) = self
                            .store
                            .update_run(&run_id, &RunPatch::from_run(&updated))
                            .await
                        {
                            error!(run_id = %run_id, error = %e, "Failed to write reconciled run");
                        }
                    }
                }
                Err(EngineError::NotFound) => {
                    warn!(run_id = %run_id, "Engine cannot find run");
                    // A QUEUED run may simply be awaiting submission.
                    if stored_status != RunStatus::Queued {
                        let mut patch = RunPatch::status(RunStatus::Stopped);
                        patch.exit_reason = Some("engine cannot find run".to_string());
                        if let Err(e) = self.store.update_run(&run_id, &patch).await {
                            error!(run_id = %run_id, error = %e, "Failed to stop lost run");
                        }
                    }
                }
                Err(e) => {
                    error!(run_id = %run_id, error = %e, "Problem fetching run from engine");
                }
            }
        }
    }

    /// After the delay, re-read the run and issue an idempotent terminate.
    fn schedule_cleanup(&self, run_id: String) {
        let store = self.store.clone();
        let engine = self.engine.clone();
        let delay = self.cleanup_delay;
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if let Ok(run) = store.get_run(&run_id).await {
                debug!(run_id = %run_id, "Running delayed cleanup terminate");
                let _ = engine.terminate(&run).await;
            }
        });
    }
}
