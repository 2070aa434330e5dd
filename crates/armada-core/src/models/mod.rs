// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Domain models: templates, runs, and worker pool configuration.

mod run;
mod template;
mod worker;

pub use run::{Run, RunList, RunPatch, new_run_id};
pub use template::{Template, TemplateList, new_template_id};
pub use worker::{Worker, WorkersList};

use serde::{Deserialize, Serialize};

/// The engine runs are routed to when a request does not name one.
pub const DEFAULT_ENGINE: &str = "local";

/// One environment variable passed to a containerized workload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvVar {
    /// Variable name.
    pub name: String,
    /// Variable value.
    pub value: String,
}

/// Lifecycle status of a run. `Stopped` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RunStatus {
    /// Created and waiting on an engine queue.
    Queued,
    /// Accepted by the backend, not yet running.
    Pending,
    /// Executing on the backend.
    Running,
    /// Flagged for re-queueing by the retry worker.
    NeedsRetry,
    /// Finished; `finished_at` is always set.
    Stopped,
}

impl Default for RunStatus {
    fn default() -> Self {
        RunStatus::Queued
    }
}

impl RunStatus {
    /// True for statuses that never change again.
    pub fn is_terminal(&self) -> bool {
        matches!(self, RunStatus::Stopped)
    }

    /// Stable wire name, e.g. `QUEUED`.
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Queued => "QUEUED",
            RunStatus::Pending => "PENDING",
            RunStatus::Running => "RUNNING",
            RunStatus::NeedsRetry => "NEEDS_RETRY",
            RunStatus::Stopped => "STOPPED",
        }
    }
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for RunStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "QUEUED" => Ok(RunStatus::Queued),
            "PENDING" => Ok(RunStatus::Pending),
            "RUNNING" => Ok(RunStatus::Running),
            "NEEDS_RETRY" => Ok(RunStatus::NeedsRetry),
            "STOPPED" => Ok(RunStatus::Stopped),
            other => Err(format!("unknown run status '{other}'")),
        }
    }
}

/// Worker loop kinds. `Manager` exists for interval lookup only and is never
/// persisted in the workers table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkerKind {
    /// Re-queues NEEDS_RETRY runs.
    Retry,
    /// Dequeues and launches QUEUED runs.
    Submit,
    /// Reconciles backend state into run rows.
    Status,
    /// Sizes the other pools; one per process.
    Manager,
}

impl WorkerKind {
    /// The worker kinds that live in per-engine pools.
    pub const POOLED: [WorkerKind; 3] = [WorkerKind::Retry, WorkerKind::Submit, WorkerKind::Status];

    /// Stable wire name, e.g. `retry`.
    pub fn as_str(&self) -> &'static str {
        match self {
            WorkerKind::Retry => "retry",
            WorkerKind::Submit => "submit",
            WorkerKind::Status => "status",
            WorkerKind::Manager => "manager",
        }
    }
}

impl std::fmt::Display for WorkerKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for WorkerKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "retry" => Ok(WorkerKind::Retry),
            "submit" => Ok(WorkerKind::Submit),
            "status" => Ok(WorkerKind::Status),
            "manager" => Ok(WorkerKind::Manager),
            other => Err(format!("unknown worker type '{other}'")),
        }
    }
}
