// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Per-engine control loops: submit, status, retry, and the manager that
//! sizes their pools.
//!
//! Every worker is a long-lived task driving a biased `select!` between its
//! cancellation token and a sleep at the configured interval. Workers log
//! and continue on unexpected errors; they never abort their loop over a
//! failed tick.

pub mod manager;
mod retry;
mod status;
mod submit;

pub use manager::WorkerManager;
pub use retry::RetryWorker;
pub use status::StatusWorker;
pub use submit::SubmitWorker;

use std::sync::Arc;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::config::WorkerIntervals;
use crate::engine::Engine;
use crate::models::WorkerKind;
use crate::store::StateStore;

/// Spawn one pooled worker task. Returns `None` for kinds that do not run
/// in pools.
pub(crate) fn spawn_worker(
    kind: WorkerKind,
    store: Arc<dyn StateStore>,
    engine: Arc<dyn Engine>,
    intervals: &WorkerIntervals,
    cancel: CancellationToken,
) -> Option<JoinHandle<()>> {
    let handle = match kind {
        WorkerKind::Retry => {
            tokio::spawn(RetryWorker::new(store, engine, intervals.retry).run(cancel))
        }
        WorkerKind::Submit => {
            tokio::spawn(SubmitWorker::new(store, engine, intervals.submit).run(cancel))
        }
        WorkerKind::Status => {
            tokio::spawn(StatusWorker::new(store, engine, intervals.status).run(cancel))
        }
        WorkerKind::Manager => {
            warn!("Refusing to pool a manager worker");
            return None;
        }
    };
    Some(handle)
}
