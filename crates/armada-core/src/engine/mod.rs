// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Engine abstraction: per-backend queue plus execution driver.
//!
//! An [`Engine`] owns a queue of serialized runs and knows how to launch,
//! observe, and kill workloads on its backend. Adding an engine means adding
//! one module implementing this trait and registering it in [`Engines`];
//! nothing outside the module changes.
//!
//! Queue acknowledgement semantics belong to the engine, not the workers:
//! [`Engine::poll`] hands out a [`RunLease`] that the caller settles with
//! [`RunLease::ack`] or [`RunLease::nack`]. A lease dropped without being
//! settled nacks, so a panicking worker cannot strand a message.

pub mod docker;
pub mod local;
pub mod mock;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

use crate::models::{Run, Template};

/// Errors and control signals from engine operations.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum EngineError {
    /// The queue is empty; not an error, just "nothing to do".
    #[error("no runs")]
    NoRuns,

    /// The queue has been closed by shutdown.
    #[error("queue closed")]
    QueueClosed,

    /// The queue is full; the caller should surface this to its client.
    #[error("queue at capacity")]
    QueueCapacity,

    /// The backend can no longer see the workload.
    #[error("workload not found")]
    NotFound,

    /// Transient backend failure; the submit worker leaves the message on
    /// the queue and the status worker skips the tick.
    #[error("retryable: {0}")]
    Retryable(String),

    /// Terminal submission failure (invalid spec); the run stops with this
    /// reason.
    #[error("{reason}")]
    Rejected {
        /// Populated into the run's `exit_reason`.
        reason: String,
    },

    /// Any other backend error.
    #[error("engine backend error: {0}")]
    Backend(String),
}

impl EngineError {
    /// True when the operation may succeed if repeated later.
    pub fn is_retryable(&self) -> bool {
        matches!(self, EngineError::Retryable(_))
    }
}

/// Result type for engine operations.
pub type EngineResult<T> = std::result::Result<T, EngineError>;

/// Log text observed since a cursor, plus the next cursor to pass back.
#[derive(Debug, Clone, Default)]
pub struct LogChunk {
    /// Raw log text.
    pub text: String,
    /// RFC3339 cursor for the next call.
    pub last_seen: Option<String>,
}

/// A run dequeued from an engine's queue.
///
/// Settle the lease with [`ack`](Self::ack) once the message is consumed, or
/// [`nack`](Self::nack) to return it to the queue. Dropping an unsettled
/// lease nacks.
pub struct RunLease {
    run: Run,
    settle: Option<Box<dyn FnOnce(bool) + Send>>,
}

impl RunLease {
    /// Wrap a dequeued run with its settle callback.
    pub fn new(run: Run, settle: impl FnOnce(bool) + Send + 'static) -> Self {
        Self {
            run,
            settle: Some(Box::new(settle)),
        }
    }

    /// The dequeued run.
    pub fn run(&self) -> &Run {
        &self.run
    }

    /// Acknowledge the message; it will not be delivered again.
    pub fn ack(mut self) {
        if let Some(settle) = self.settle.take() {
            settle(true);
        }
    }

    /// Return the message to the queue for redelivery.
    pub fn nack(mut self) {
        if let Some(settle) = self.settle.take() {
            settle(false);
        }
    }
}

impl Drop for RunLease {
    fn drop(&mut self) {
        if let Some(settle) = self.settle.take() {
            settle(false);
        }
    }
}

impl std::fmt::Debug for RunLease {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RunLease")
            .field("run_id", &self.run.run_id)
            .field("settled", &self.settle.is_none())
            .finish()
    }
}

/// A pluggable execution backend.
#[async_trait]
pub trait Engine: Send + Sync {
    /// Stable identifier, used as routing key and run-id prefix.
    fn name(&self) -> &str;

    /// Place a run on this engine's queue. Fails fast with
    /// [`EngineError::QueueCapacity`] when saturated; never blocks
    /// indefinitely.
    async fn enqueue(&self, run: &Run) -> EngineResult<()>;

    /// Attempt to dequeue one message. Returns [`EngineError::NoRuns`] when
    /// the queue is empty and [`EngineError::QueueClosed`] after shutdown;
    /// never blocks waiting for a message.
    async fn poll(&self) -> EngineResult<RunLease>;

    /// Launch the run on the backend and return it annotated with the
    /// backend-observed state. Transient failures are
    /// [`EngineError::Retryable`]; invalid specs are
    /// [`EngineError::Rejected`].
    async fn execute(&self, run: Run) -> EngineResult<Run>;

    /// Project the backend's current view of the workload onto the run.
    /// Returns [`EngineError::NotFound`] when the backend no longer sees it.
    async fn get_latest(&self, run: Run) -> EngineResult<Run>;

    /// Best-effort cancel of the backend workload. Idempotent.
    async fn terminate(&self, run: &Run) -> EngineResult<()>;

    /// Log text observed since `last_seen` (RFC3339). A missing workload
    /// yields empty text and a fresh cursor.
    async fn logs(
        &self,
        template: &Template,
        run: &Run,
        last_seen: Option<&str>,
    ) -> EngineResult<LogChunk>;

    /// Release queue connections and background tasks owned by the engine.
    async fn close(&self);
}

/// Read-only registry of configured engines, shared by services and workers.
#[derive(Clone, Default)]
pub struct Engines {
    inner: HashMap<String, Arc<dyn Engine>>,
}

impl Engines {
    /// Empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an engine under its own name. Later registrations win.
    pub fn register(&mut self, engine: Arc<dyn Engine>) {
        self.inner.insert(engine.name().to_string(), engine);
    }

    /// Look up an engine by name.
    pub fn get(&self, name: &str) -> Option<Arc<dyn Engine>> {
        self.inner.get(name).cloned()
    }

    /// Names of every registered engine.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.inner.keys().cloned().collect();
        names.sort();
        names
    }

    /// Iterate over `(name, engine)` pairs.
    pub fn iter(&self) -> impl Iterator<Item = (&String, &Arc<dyn Engine>)> {
        self.inner.iter()
    }

    /// Close every engine; called once on shutdown.
    pub async fn close_all(&self) {
        for engine in self.inner.values() {
            engine.close().await;
        }
    }
}

impl std::fmt::Debug for Engines {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engines").field("names", &self.names()).finish()
    }
}
