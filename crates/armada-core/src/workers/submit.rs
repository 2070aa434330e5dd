// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Submit worker: dequeues QUEUED runs and launches them on the backend.
//!
//! The store is authoritative: every dequeued message triggers a fresh read
//! of the run row, so duplicate deliveries and stale messages settle
//! harmlessly. Retryable launch failures leave the message on the queue;
//! terminal failures stop the run with the error recorded in
//! `run_exceptions`.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::engine::{Engine, EngineError, RunLease};
use crate::error::CoreError;
use crate::models::{RunPatch, RunStatus};
use crate::store::{GetTemplateArgs, StateStore};

/// Dequeues runs from one engine's queue and executes them.
pub struct SubmitWorker {
    store: Arc<dyn StateStore>,
    engine: Arc<dyn Engine>,
    interval: Duration,
}

impl SubmitWorker {
    /// Create a submit worker for one engine.
    pub fn new(store: Arc<dyn StateStore>, engine: Arc<dyn Engine>, interval: Duration) -> Self {
        Self {
            store,
            engine,
            interval,
        }
    }

    /// Run the dequeue loop until cancelled.
    pub async fn run(self, cancel: CancellationToken) {
        info!(
            engine = %self.engine.name(),
            interval_ms = self.interval.as_millis() as u64,
            "Submit worker started"
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
        info!(engine = %self.engine.name(), "Submit worker stopped");
    }

    /// One dequeue attempt. Public so tests can tick the worker directly.
    pub async fn run_once(&self) {
        match self.engine.poll().await {
            Ok(lease) => {
                if let Err(e) = self.process(lease).await {
                    error!(engine = %self.engine.name(), error = %e, "Failed to process run");
                }
            }
            // An empty queue is the common case, not an error.
            Err(EngineError::NoRuns) => {}
            Err(EngineError::QueueClosed) => {
                debug!(engine = %self.engine.name(), "Queue closed, nothing to poll");
            }
            Err(e) => error!(engine = %self.engine.name(), error = %e, "Poll failed"),
        }
    }

    async fn process(&self, lease: RunLease) -> Result<(), CoreError> {
        let run_id = lease.run().run_id.clone();
        debug!(run_id = %run_id, "Processing run");

        // Authoritative state lives in the store, not the queue message.
        let fresh = match self.store.get_run(&run_id).await {
            Ok(run) => run,
            Err(e) => {
                lease.ack();
                return Err(e);
            }
        };

        match fresh.status {
            RunStatus::Queued => {
                let args = GetTemplateArgs {
                    template_id: fresh.template_id.clone(),
                    ..Default::default()
                };
                if let Err(e) = self.store.get_template(&args).await {
                    lease.ack();
                    return Err(e);
                }

                match self.engine.execute(fresh).await {
                    Ok(launched) => {
                        let result = self
                            .store
                            .update_run(&launched.run_id, &RunPatch::from_run(&launched))
                            .await;
                        lease.ack();
                        result.map(|_| ())
                    }
                    Err(e) if e.is_retryable() => {
                        debug!(run_id = %run_id, error = %e, "Transient launch failure, leaving run on queue");
                        lease.nack();
                        Ok(())
                    }
                    Err(e) => {
                        warn!(run_id = %run_id, error = %e, "Launch rejected, stopping run");
                        let mut patch = RunPatch::status(RunStatus::Stopped);
                        patch.run_exceptions = Some(vec![e.to_string()]);
                        if let EngineError::Rejected { reason } = &e {
                            patch.exit_reason = Some(reason.clone());
                        }
                        let result = self.store.update_run(&run_id, &patch).await;
                        lease.ack();
                        result.map(|_| ())
                    }
                }
            }
            // Stale message for a finished run: drop it.
            RunStatus::Stopped => {
                lease.ack();
                Ok(())
            }
            status => {
                debug!(run_id = %run_id, status = %status, "Run not queued, not acking");
                lease.nack();
                Ok(())
            }
        }
    }
}
