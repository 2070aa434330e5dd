// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Container client for the local engine.
//!
//! [`DockerCli`] drives the `docker` CLI through [`tokio::process::Command`];
//! it is pure backend I/O with no store access. The [`ContainerClient`]
//! trait keeps the local engine testable with a mock client.

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use serde::Deserialize;
use std::collections::HashMap;
use std::process::Output;
use tokio::process::Command;
use tracing::{debug, warn};

use super::{EngineError, EngineResult};
use crate::config::RegistryAuth;
use crate::models::{Run, RunStatus};

/// Backend view of one container, as projected from `docker inspect`.
#[derive(Debug, Clone, Default)]
pub struct ContainerState {
    /// Container id assigned by the daemon.
    pub container_id: String,
    /// True while the container process is alive.
    pub running: bool,
    /// Exit code once the container stopped.
    pub exit_code: Option<i64>,
    /// True when the kernel killed the container for memory pressure.
    pub oom_killed: bool,
    /// Daemon-reported error, if any.
    pub error: Option<String>,
    /// When the container started.
    pub started_at: Option<DateTime<Utc>>,
    /// When the container stopped.
    pub finished_at: Option<DateTime<Utc>>,
    /// Memory reservation actually applied (MB).
    pub memory: Option<i64>,
    /// Memory limit actually applied (MB).
    pub memory_limit: Option<i64>,
    /// CPU shares actually applied.
    pub cpu: Option<i64>,
}

/// Abstract container backend for the local engine.
#[async_trait]
pub trait ContainerClient: Send + Sync {
    /// Pull the image and start a container for the run. Returns the
    /// container id.
    async fn launch(&self, run: &Run) -> EngineResult<String>;

    /// Current backend state of the run's container.
    async fn inspect(&self, run: &Run) -> EngineResult<ContainerState>;

    /// Stop the run's container. Returns [`EngineError::NotFound`] when the
    /// daemon no longer knows it.
    async fn stop(&self, run: &Run) -> EngineResult<()>;

    /// Log text since the RFC3339 cursor.
    async fn logs(&self, run: &Run, since: Option<&str>) -> EngineResult<String>;
}

/// Project a backend container state onto a run.
///
/// Rules: active with no completion time is RUNNING; a zero exit code is
/// STOPPED with a success reason; a failure is STOPPED with the observed
/// code, else 1. `finished_at` prefers the backend completion time and falls
/// back to the wall clock at observation.
pub fn project_state(mut run: Run, state: &ContainerState) -> Run {
    run.instance_id = Some(state.container_id.clone());
    if let Some(cpu) = state.cpu {
        run.cpu = Some(cpu);
    }
    if let Some(memory) = state.memory {
        run.memory = Some(memory);
    }
    if let Some(limit) = state.memory_limit {
        run.memory_limit = Some(limit);
    }

    if state.running && state.finished_at.is_none() {
        run.status = RunStatus::Running;
    } else if !state.running {
        run.status = RunStatus::Stopped;
        match state.exit_code {
            Some(0) => {
                run.exit_code = Some(0);
                run.exit_reason = Some(format!(
                    "Container {} exited successfully",
                    state.container_id
                ));
            }
            Some(code) => {
                run.exit_code = Some(code);
                run.exit_reason = Some(failure_reason(state, code));
            }
            None => {
                run.exit_code = Some(1);
                run.exit_reason = Some(failure_reason(state, 1));
            }
        }
    }

    if let Some(started) = state.started_at {
        run.started_at = Some(started);
    }
    if run.status == RunStatus::Stopped {
        run.finished_at = Some(state.finished_at.unwrap_or_else(Utc::now));
    }
    run
}

fn failure_reason(state: &ContainerState, code: i64) -> String {
    if state.oom_killed {
        return "OOMKilled".to_string();
    }
    match &state.error {
        Some(err) if !err.is_empty() => err.clone(),
        _ => format!("Container exited with code {code}"),
    }
}

/// An RFC3339 cursor for "everything from now on".
pub fn fresh_log_cursor() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true)
}

/// `docker` CLI wrapper implementing [`ContainerClient`].
pub struct DockerCli {
    auths: HashMap<String, RegistryAuth>,
}

impl DockerCli {
    /// Create a client with the configured registry credentials.
    pub fn new(auths: HashMap<String, RegistryAuth>) -> Self {
        Self { auths }
    }

    /// Log in to every configured registry. Best-effort: failures are
    /// logged, not fatal, since public images need no auth.
    pub async fn login_registries(&self) {
        for (host, auth) in &self.auths {
            let result = Command::new("docker")
                .args(["login", host, "--username", &auth.user, "--password-stdin"])
                .stdin(std::process::Stdio::piped())
                .stdout(std::process::Stdio::null())
                .stderr(std::process::Stdio::piped())
                .spawn();
            let mut child = match result {
                Ok(child) => child,
                Err(e) => {
                    warn!(registry = %host, error = %e, "Failed to spawn docker login");
                    continue;
                }
            };
            if let Some(mut stdin) = child.stdin.take() {
                use tokio::io::AsyncWriteExt;
                let _ = stdin.write_all(auth.password.as_bytes()).await;
            }
            match child.wait_with_output().await {
                Ok(out) if out.status.success() => {
                    debug!(registry = %host, "Registry login succeeded");
                }
                Ok(out) => {
                    warn!(
                        registry = %host,
                        stderr = %String::from_utf8_lossy(&out.stderr),
                        "Registry login failed"
                    );
                }
                Err(e) => warn!(registry = %host, error = %e, "Registry login failed"),
            }
        }
    }

    async fn docker(&self, args: &[&str]) -> EngineResult<Output> {
        let output = Command::new("docker")
            .args(args)
            .output()
            .await
            .map_err(|e| EngineError::Retryable(format!("failed to invoke docker: {e}")))?;
        Ok(output)
    }

    fn command_error(context: &str, output: &Output) -> EngineError {
        let stderr = String::from_utf8_lossy(&output.stderr);
        classify_cli_error(context, stderr.trim())
    }
}

/// Map docker CLI stderr onto the engine error taxonomy.
fn classify_cli_error(context: &str, stderr: &str) -> EngineError {
    let lowered = stderr.to_lowercase();
    if lowered.contains("no such container") || lowered.contains("no such object") {
        return EngineError::NotFound;
    }
    if lowered.contains("cannot connect to the docker daemon")
        || lowered.contains("error during connect")
        || lowered.contains("i/o timeout")
        || lowered.contains("temporary failure")
    {
        return EngineError::Retryable(format!("{context}: {stderr}"));
    }
    if lowered.contains("invalid") || lowered.contains("unable to parse") {
        return EngineError::Rejected {
            reason: format!("{context}: {stderr}"),
        };
    }
    EngineError::Backend(format!("{context}: {stderr}"))
}

#[async_trait]
impl ContainerClient for DockerCli {
    async fn launch(&self, run: &Run) -> EngineResult<String> {
        let pull = self.docker(&["pull", &run.image]).await?;
        if !pull.status.success() {
            // Pulls fail transiently far more often than terminally.
            return Err(EngineError::Retryable(format!(
                "docker pull {}: {}",
                run.image,
                String::from_utf8_lossy(&pull.stderr).trim()
            )));
        }

        let mut args: Vec<String> = vec![
            "create".to_string(),
            "--name".to_string(),
            run.run_id.clone(),
        ];
        if let Some(memory) = run.memory {
            args.push(format!("--memory-reservation={memory}m"));
        }
        if let Some(limit) = run.memory_limit {
            args.push(format!("--memory={limit}m"));
        }
        if let Some(cpu) = run.cpu {
            args.push(format!("--cpu-shares={cpu}"));
        }
        if let Some(env) = &run.env {
            for var in env {
                args.push("-e".to_string());
                args.push(format!("{}={}", var.name, var.value));
            }
        }
        args.push(run.image.clone());
        if let Some(command) = &run.command {
            args.push("bash".to_string());
            args.push("-l".to_string());
            args.push("-cex".to_string());
            args.push(command.clone());
        }

        let arg_refs: Vec<&str> = args.iter().map(String::as_str).collect();
        let created = self.docker(&arg_refs).await?;
        if !created.status.success() {
            return Err(Self::command_error("docker create", &created));
        }
        let container_id = String::from_utf8_lossy(&created.stdout).trim().to_string();

        let started = self.docker(&["start", &run.run_id]).await?;
        if !started.status.success() {
            return Err(Self::command_error("docker start", &started));
        }
        Ok(container_id)
    }

    async fn inspect(&self, run: &Run) -> EngineResult<ContainerState> {
        let output = self.docker(&["inspect", &run.run_id]).await?;
        if !output.status.success() {
            return Err(Self::command_error("docker inspect", &output));
        }
        parse_inspect_output(&String::from_utf8_lossy(&output.stdout))
    }

    async fn stop(&self, run: &Run) -> EngineResult<()> {
        let output = self.docker(&["stop", &run.run_id]).await?;
        if !output.status.success() {
            return Err(Self::command_error("docker stop", &output));
        }
        Ok(())
    }

    async fn logs(&self, run: &Run, since: Option<&str>) -> EngineResult<String> {
        let mut args = vec!["logs", &run.run_id];
        if let Some(since) = since {
            args.push("--since");
            args.push(since);
        }
        let output = self.docker(&args).await?;
        if !output.status.success() {
            return Err(Self::command_error("docker logs", &output));
        }
        // The daemon multiplexes app output across both streams.
        let mut text = String::from_utf8_lossy(&output.stdout).into_owned();
        text.push_str(&String::from_utf8_lossy(&output.stderr));
        Ok(text)
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct InspectEntry {
    id: String,
    state: InspectState,
    #[serde(default)]
    host_config: InspectHostConfig,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct InspectState {
    #[serde(default)]
    running: bool,
    #[serde(default)]
    exit_code: i64,
    #[serde(default, rename = "OOMKilled")]
    oom_killed: bool,
    #[serde(default)]
    error: String,
    #[serde(default)]
    started_at: String,
    #[serde(default)]
    finished_at: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct InspectHostConfig {
    #[serde(default)]
    memory: i64,
    #[serde(default)]
    memory_reservation: i64,
    #[serde(default)]
    cpu_shares: i64,
}

/// The daemon uses a zero timestamp for "never".
fn parse_docker_time(raw: &str) -> Option<DateTime<Utc>> {
    if raw.is_empty() || raw.starts_with("0001-01-01") {
        return None;
    }
    DateTime::parse_from_rfc3339(raw)
        .ok()
        .map(|t| t.with_timezone(&Utc))
}

fn parse_inspect_output(raw: &str) -> EngineResult<ContainerState> {
    let entries: Vec<InspectEntry> = serde_json::from_str(raw)
        .map_err(|e| EngineError::Backend(format!("unparsable docker inspect output: {e}")))?;
    let entry = entries.into_iter().next().ok_or(EngineError::NotFound)?;

    let finished_at = parse_docker_time(&entry.state.finished_at);
    Ok(ContainerState {
        container_id: entry.id,
        running: entry.state.running,
        // ExitCode is 0 until the container actually exits.
        exit_code: finished_at.map(|_| entry.state.exit_code),
        oom_killed: entry.state.oom_killed,
        error: (!entry.state.error.is_empty()).then(|| entry.state.error.clone()),
        started_at: parse_docker_time(&entry.state.started_at),
        finished_at,
        memory: (entry.host_config.memory_reservation > 0)
            .then(|| entry.host_config.memory_reservation / 1_000_000),
        memory_limit: (entry.host_config.memory > 0).then(|| entry.host_config.memory / 1_000_000),
        cpu: (entry.host_config.cpu_shares > 0).then_some(entry.host_config.cpu_shares),
    })
}
