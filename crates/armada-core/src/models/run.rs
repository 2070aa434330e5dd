// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Run model: one execution attempt of a template.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{DEFAULT_ENGINE, EnvVar, RunStatus};

/// Build a run id of the form `<engine>-<uuid-tail>`, where the tail is a v4
/// UUID with the first `len(engine) + 1` characters trimmed. The prefix lets
/// callers route a run id back to its engine without a store lookup.
pub fn new_run_id(engine: &str) -> String {
    let uid = Uuid::new_v4().to_string();
    let trim = (engine.len() + 1).min(uid.len());
    format!("{}-{}", engine, &uid[trim..])
}

/// One execution attempt of a template.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Run {
    /// Immutable identifier, `<engine>-<uuid-tail>`.
    pub run_id: String,
    /// Template this run was materialized from.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub template_id: Option<String>,
    /// Container image, copied from the template at creation.
    pub image: String,
    /// Rendered command, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,
    /// Lifecycle status.
    pub status: RunStatus,
    /// Name of the engine that owns this run.
    pub engine: String,
    /// Requested CPU shares (millicores).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cpu: Option<i64>,
    /// Requested memory (MB).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub memory: Option<i64>,
    /// Requested GPUs.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gpu: Option<i64>,
    /// CPU limit, when the backend reports one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cpu_limit: Option<i64>,
    /// Memory limit, when the backend reports one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub memory_limit: Option<i64>,
    /// Environment passed to the workload.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub env: Option<Vec<EnvVar>>,
    /// Set once the run was placed on its engine's queue.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub queued_at: Option<DateTime<Utc>>,
    /// Set when the backend started the workload.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    /// Set on the transition to STOPPED.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
    /// Exit code, whenever the backend reported one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i64>,
    /// Human-readable exit reason.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exit_reason: Option<String>,
    /// Backend handle for the workload (container id, job name).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub instance_id: Option<String>,
    /// DNS name of the node the workload landed on.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub instance_dns_name: Option<String>,
    /// Backend-enforced run deadline.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub active_deadline_seconds: Option<i64>,
    /// Errors accumulated while driving this run.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub run_exceptions: Option<Vec<String>>,
    /// Opaque JSON bag forwarded to the engine.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub engine_args: Option<serde_json::Value>,
}

impl Run {
    /// Assign a run id (and default engine) when none is set yet. Called by
    /// the store on create, mirroring a before-create hook.
    pub fn ensure_identity(&mut self) {
        if self.engine.is_empty() {
            self.engine = DEFAULT_ENGINE.to_string();
        }
        if self.run_id.is_empty() {
            self.run_id = new_run_id(&self.engine);
        }
    }

    /// Apply a patch, skipping unset fields. Terminal runs keep their status:
    /// once STOPPED, status changes are ignored, and stopping a run without a
    /// finish timestamp backfills `finished_at` with the wall clock.
    pub fn apply(&mut self, patch: &RunPatch) {
        if let Some(status) = patch.status
            && !self.status.is_terminal()
        {
            self.status = status;
        }
        macro_rules! merge {
            ($($field:ident),+ $(,)?) => {
                $(if let Some(v) = &patch.$field {
                    self.$field = Some(v.clone());
                })+
            };
        }
        merge!(
            cpu,
            memory,
            gpu,
            cpu_limit,
            memory_limit,
            env,
            queued_at,
            started_at,
            finished_at,
            exit_code,
            exit_reason,
            instance_id,
            instance_dns_name,
            active_deadline_seconds,
            run_exceptions,
        );
        if self.status.is_terminal() && self.finished_at.is_none() {
            self.finished_at = Some(Utc::now());
        }
    }
}

/// A page of runs plus the total matching count.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RunList {
    /// Rows matching the query before pagination.
    pub total: i64,
    /// The requested page.
    #[serde(rename = "history")]
    pub runs: Vec<Run>,
}

/// Partial update for a run. Unset fields are left untouched, the Rust
/// rendition of a zero-value-skipping column update.
#[derive(Debug, Clone, Default)]
pub struct RunPatch {
    pub status: Option<RunStatus>,
    pub cpu: Option<i64>,
    pub memory: Option<i64>,
    pub gpu: Option<i64>,
    pub cpu_limit: Option<i64>,
    pub memory_limit: Option<i64>,
    pub env: Option<Vec<EnvVar>>,
    pub queued_at: Option<DateTime<Utc>>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub exit_code: Option<i64>,
    pub exit_reason: Option<String>,
    pub instance_id: Option<String>,
    pub instance_dns_name: Option<String>,
    pub active_deadline_seconds: Option<i64>,
    pub run_exceptions: Option<Vec<String>>,
}

impl RunPatch {
    /// Patch that only flips the status.
    pub fn status(status: RunStatus) -> Self {
        Self {
            status: Some(status),
            ..Default::default()
        }
    }

    /// Patch carrying everything an engine may have annotated on a run.
    pub fn from_run(run: &Run) -> Self {
        Self {
            status: Some(run.status),
            cpu: run.cpu,
            memory: run.memory,
            gpu: run.gpu,
            cpu_limit: run.cpu_limit,
            memory_limit: run.memory_limit,
            env: run.env.clone(),
            queued_at: run.queued_at,
            started_at: run.started_at,
            finished_at: run.finished_at,
            exit_code: run.exit_code,
            exit_reason: run.exit_reason.clone(),
            instance_id: run.instance_id.clone(),
            instance_dns_name: run.instance_dns_name.clone(),
            active_deadline_seconds: run.active_deadline_seconds,
            run_exceptions: run.run_exceptions.clone(),
        }
    }
}
