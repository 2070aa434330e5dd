// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Mock container client for testing.
//!
//! Simulates a container backend without touching a daemon. Tests program
//! per-run states and failure modes, then observe what the engine did.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::Utc;

use super::docker::{ContainerClient, ContainerState};
use super::{EngineError, EngineResult};
use crate::models::Run;

/// How the next `launch` calls should fail, if at all.
#[derive(Debug, Clone, Default)]
pub enum LaunchBehavior {
    /// Launches succeed and register a running container.
    #[default]
    Succeed,
    /// Launches fail with a transient error.
    FailRetryable(String),
    /// Launches fail with a terminal rejection.
    Reject(String),
}

/// Programmable [`ContainerClient`] for tests.
#[derive(Default)]
pub struct MockContainerClient {
    states: Mutex<HashMap<String, ContainerState>>,
    launch_behavior: Mutex<LaunchBehavior>,
    launched: Mutex<Vec<String>>,
    stopped: Mutex<Vec<String>>,
    log_text: Mutex<String>,
}

impl MockContainerClient {
    /// A client whose launches succeed.
    pub fn new() -> Self {
        Self::default()
    }

    /// Program how subsequent launches behave.
    pub fn set_launch_behavior(&self, behavior: LaunchBehavior) {
        *self.launch_behavior.lock().unwrap() = behavior;
    }

    /// Program the backend state reported for a run.
    pub fn set_state(&self, run_id: &str, state: ContainerState) {
        self.states.lock().unwrap().insert(run_id.to_string(), state);
    }

    /// Remove a run from the backend, as if the daemon lost it.
    pub fn forget(&self, run_id: &str) {
        self.states.lock().unwrap().remove(run_id);
    }

    /// Program the text returned by `logs`.
    pub fn set_log_text(&self, text: &str) {
        *self.log_text.lock().unwrap() = text.to_string();
    }

    /// Run ids launched so far, in order.
    pub fn launched(&self) -> Vec<String> {
        self.launched.lock().unwrap().clone()
    }

    /// Run ids stopped so far, in order.
    pub fn stopped(&self) -> Vec<String> {
        self.stopped.lock().unwrap().clone()
    }
}

#[async_trait]
impl ContainerClient for MockContainerClient {
    async fn launch(&self, run: &Run) -> EngineResult<String> {
        match self.launch_behavior.lock().unwrap().clone() {
            LaunchBehavior::Succeed => {}
            LaunchBehavior::FailRetryable(msg) => return Err(EngineError::Retryable(msg)),
            LaunchBehavior::Reject(reason) => return Err(EngineError::Rejected { reason }),
        }
        let container_id = format!("mock-{}", run.run_id);
        self.states.lock().unwrap().insert(
            run.run_id.clone(),
            ContainerState {
                container_id: container_id.clone(),
                running: true,
                started_at: Some(Utc::now()),
                ..Default::default()
            },
        );
        self.launched.lock().unwrap().push(run.run_id.clone());
        Ok(container_id)
    }

    async fn inspect(&self, run: &Run) -> EngineResult<ContainerState> {
        self.states
            .lock()
            .unwrap()
            .get(&run.run_id)
            .cloned()
            .ok_or(EngineError::NotFound)
    }

    async fn stop(&self, run: &Run) -> EngineResult<()> {
        let mut states = self.states.lock().unwrap();
        let Some(state) = states.get_mut(&run.run_id) else {
            return Err(EngineError::NotFound);
        };
        state.running = false;
        state.exit_code.get_or_insert(137);
        state.finished_at.get_or_insert_with(Utc::now);
        self.stopped.lock().unwrap().push(run.run_id.clone());
        Ok(())
    }

    async fn logs(&self, run: &Run, _since: Option<&str>) -> EngineResult<String> {
        if !self.states.lock().unwrap().contains_key(&run.run_id) {
            return Err(EngineError::NotFound);
        }
        Ok(self.log_text.lock().unwrap().clone())
    }
}
