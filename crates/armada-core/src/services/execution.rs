// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Execution service: materializes runs from templates and hands them to
//! their engine.
//!
//! The rendering pipeline gates admission: the caller payload is merged with
//! the template defaults (caller wins), validated against the template's
//! JSON schema, and rendered through the command template. Only then is a
//! run row created and enqueued.
//!
//! Enqueue failure does not roll back the run row: the run stays QUEUED in
//! the store and the status worker reconciles it later. That is the
//! at-least-once posture of the whole pipeline.

use std::sync::Arc;

use chrono::Utc;
use serde::Deserialize;
use serde_json::{Map, Value};
use tracing::info;

use crate::engine::{Engine, Engines, LogChunk};
use crate::error::CoreError;
use crate::models::{DEFAULT_ENGINE, EnvVar, Run, RunList, RunPatch, RunStatus, Template};
use crate::store::{GetTemplateArgs, ListRunsArgs, StateStore};
use crate::template::{render, schema};

/// Request to execute a template. The template is addressed by id or by
/// `(name, version)`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ExecutionRequest {
    /// Template surrogate id.
    pub template_id: Option<String>,
    /// Template logical name.
    pub template_name: Option<String>,
    /// Version under the name.
    pub template_version: Option<i64>,
    /// Caller identity, recorded by the HTTP layer's audit logging.
    #[serde(default)]
    pub owner_id: Option<String>,
    /// Environment for the workload.
    pub env: Option<Vec<EnvVar>>,
    /// Explicit command; wins over the rendered template when present.
    pub command: Option<String>,
    /// Memory request (MB).
    pub memory: Option<i64>,
    /// CPU request (millicores).
    pub cpu: Option<i64>,
    /// GPU request.
    pub gpu: Option<i64>,
    /// Engine to run on; defaults to `local`.
    pub engine: Option<String>,
    /// Backend-enforced deadline.
    pub active_deadline_seconds: Option<i64>,
    /// Values substituted into the command template.
    #[serde(default)]
    pub template_payload: Map<String, Value>,
    /// When true, render and return the run without persisting or
    /// enqueueing it.
    pub dry_run: Option<bool>,
}

impl ExecutionRequest {
    fn has_command(&self) -> bool {
        self.command.as_deref().is_some_and(|c| !c.is_empty())
    }
}

/// Materializes runs from templates, dispatches logs and termination to the
/// owning engine.
#[derive(Clone)]
pub struct ExecutionService {
    store: Arc<dyn StateStore>,
    engines: Engines,
}

impl ExecutionService {
    /// Create the service.
    pub fn new(store: Arc<dyn StateStore>, engines: Engines) -> Self {
        Self { store, engines }
    }

    /// List runs.
    pub async fn list_runs(&self, args: &ListRunsArgs) -> Result<RunList, CoreError> {
        self.store.list_runs(args).await
    }

    /// Fetch one run.
    pub async fn get_run(&self, run_id: &str) -> Result<Run, CoreError> {
        self.store.get_run(run_id).await
    }

    /// Resolve a template, render the command, create the run in QUEUED,
    /// and enqueue it on the selected engine.
    pub async fn create_template_run(&self, request: &ExecutionRequest) -> Result<Run, CoreError> {
        let args = GetTemplateArgs {
            template_id: request.template_id.clone(),
            template_name: request.template_name.clone(),
            template_version: request.template_version,
        };
        let template = self.store.get_template(&args).await?;

        let rendered = render_command(&template, request)?;
        let command = if request.has_command() {
            request.command.clone()
        } else if !rendered.is_empty() {
            Some(rendered)
        } else {
            None
        };

        let engine_name = request
            .engine
            .clone()
            .unwrap_or_else(|| DEFAULT_ENGINE.to_string());
        let engine = self.engine_by_name(&engine_name)?;

        let run = Run {
            image: template.image.clone(),
            status: RunStatus::Queued,
            command,
            memory: request.memory,
            cpu: request.cpu,
            gpu: request.gpu,
            env: request.env.clone(),
            engine: engine_name,
            template_id: Some(template.template_id.clone()),
            active_deadline_seconds: request.active_deadline_seconds,
            ..Default::default()
        };

        if request.dry_run == Some(true) {
            return Ok(run);
        }

        let run = self.store.create_run(run).await?;
        info!(run_id = %run.run_id, template_id = %template.template_id, "Created run");

        // An enqueue failure surfaces to the caller; the QUEUED row stays
        // behind for the status worker to sweep.
        engine.enqueue(&run).await?;

        let patch = RunPatch {
            queued_at: Some(Utc::now()),
            ..Default::default()
        };
        self.store.update_run(&run.run_id, &patch).await
    }

    /// Log text for a run since the given cursor.
    pub async fn logs(
        &self,
        run_id: &str,
        last_seen: Option<&str>,
    ) -> Result<LogChunk, CoreError> {
        let run = self.get_run(run_id).await?;
        let args = GetTemplateArgs {
            template_id: run.template_id.clone(),
            ..Default::default()
        };
        let template = self.store.get_template(&args).await?;
        let engine = self.engine_for_run(&run)?;
        Ok(engine.logs(&template, &run, last_seen).await?)
    }

    /// Best-effort termination of a run's workload.
    pub async fn terminate(&self, run_id: &str) -> Result<(), CoreError> {
        let run = self.get_run(run_id).await?;
        let engine = self.engine_for_run(&run)?;
        Ok(engine.terminate(&run).await?)
    }

    fn engine_for_run(&self, run: &Run) -> Result<Arc<dyn Engine>, CoreError> {
        let name = if run.engine.is_empty() {
            DEFAULT_ENGINE
        } else {
            &run.engine
        };
        self.engine_by_name(name)
    }

    fn engine_by_name(&self, name: &str) -> Result<Arc<dyn Engine>, CoreError> {
        self.engines.get(name).ok_or_else(|| {
            CoreError::MalformedInput(format!("engine with name: {name} not configured"))
        })
    }
}

/// Merge, validate, and render the command for a request.
fn render_command(template: &Template, request: &ExecutionRequest) -> Result<String, CoreError> {
    let merged = template.merged_payload(&request.template_payload);
    let violations = schema::validate(&template.schema, &Value::Object(merged.clone()));
    if !violations.is_empty() {
        return Err(CoreError::MalformedInput(violations.join("\n")));
    }
    render::render_command(&template.command_template, &merged)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn template() -> Template {
        Template {
            template_id: "tpl-1".to_string(),
            template_name: "t".to_string(),
            version: 1,
            schema: json!({"type": "object", "required": ["who"]}),
            command_template: "echo {{ who }}".to_string(),
            image: "img".to_string(),
            memory: Some(512),
            ..Default::default()
        }
    }

    #[test]
    fn test_render_command_happy_path() {
        let request = ExecutionRequest {
            template_payload: json!({"who": "world"}).as_object().unwrap().clone(),
            ..Default::default()
        };
        let rendered = render_command(&template(), &request).unwrap();
        assert_eq!(rendered, "echo world");
    }

    #[test]
    fn test_render_command_schema_rejection() {
        let request = ExecutionRequest::default();
        let err = render_command(&template(), &request).unwrap_err();
        match err {
            CoreError::MalformedInput(msg) => assert!(msg.contains("who is required")),
            other => panic!("expected MalformedInput, got {other:?}"),
        }
    }

    #[test]
    fn test_render_command_defaults_fill_payload() {
        let mut t = template();
        t.defaults = json!({"who": "world"}).as_object().unwrap().clone();
        let request = ExecutionRequest::default();
        let rendered = render_command(&t, &request).unwrap();
        assert_eq!(rendered, "echo world");
    }
}
