// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Common test infrastructure for armada-core integration tests.
//!
//! Provides a TestContext wiring a SQLite store, a local engine backed by
//! the mock container client, and the services over both.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;

use armada_core::config::WorkerIntervals;
use armada_core::engine::local::LocalEngine;
use armada_core::engine::mock::MockContainerClient;
use armada_core::engine::Engines;
use armada_core::models::{Run, RunStatus, Template, Worker, WorkerKind};
use armada_core::services::{ExecutionService, TemplateService, WorkerService};
use armada_core::store::{SqliteStateStore, StateStore};
use armada_core::workers::WorkerManager;

/// Everything a test needs: store, engine, registry, and services.
pub struct TestContext {
    pub store: Arc<SqliteStateStore>,
    pub client: Arc<MockContainerClient>,
    pub engine: Arc<LocalEngine>,
    pub engines: Engines,
    _tmp: tempfile::TempDir,
}

impl TestContext {
    pub async fn new() -> Self {
        let tmp = tempfile::tempdir().expect("tempdir");
        let store = SqliteStateStore::from_path(tmp.path().join("armada.db"))
            .await
            .expect("sqlite store");
        let client = Arc::new(MockContainerClient::new());
        let engine = Arc::new(LocalEngine::new(client.clone()));
        let mut engines = Engines::new();
        engines.register(engine.clone());
        Self {
            store: Arc::new(store),
            client,
            engine,
            engines,
            _tmp: tmp,
        }
    }

    pub fn store(&self) -> Arc<dyn StateStore> {
        self.store.clone()
    }

    pub fn template_service(&self) -> TemplateService {
        TemplateService::new(self.store())
    }

    pub fn execution_service(&self) -> ExecutionService {
        ExecutionService::new(self.store(), self.engines.clone())
    }

    pub fn worker_service(&self) -> WorkerService {
        WorkerService::new(self.store())
    }

    pub fn worker_manager(&self, intervals: WorkerIntervals) -> WorkerManager {
        WorkerManager::new(self.store(), self.engines.clone(), intervals)
    }

    /// A valid template named `t` with an open schema.
    pub fn sample_template(&self) -> Template {
        Template {
            template_name: "t".to_string(),
            schema: json!({"type": "object"}),
            command_template: "echo {{ who }}".to_string(),
            image: "img".to_string(),
            memory: Some(512),
            ..Default::default()
        }
    }

    /// Seed a run row directly in the store.
    pub async fn seed_run(&self, status: RunStatus, template_id: Option<&str>) -> Run {
        let run = Run {
            image: "img".to_string(),
            engine: "local".to_string(),
            status,
            template_id: template_id.map(str::to_string),
            queued_at: Some(chrono::Utc::now()),
            ..Default::default()
        };
        self.store.create_run(run).await.expect("seed run")
    }

    /// Seed worker rows for the local engine.
    pub async fn seed_worker_counts(&self, retry: i64, submit: i64, status: i64) {
        let seeds = vec![
            Worker {
                worker_type: WorkerKind::Retry,
                count_per_instance: retry,
                engine: "local".to_string(),
            },
            Worker {
                worker_type: WorkerKind::Submit,
                count_per_instance: submit,
                engine: "local".to_string(),
            },
            Worker {
                worker_type: WorkerKind::Status,
                count_per_instance: status,
                engine: "local".to_string(),
            },
        ];
        self.store.init_workers(&seeds).await.expect("seed workers");
    }
}

/// Short intervals so worker loops tick quickly in tests.
pub fn fast_intervals() -> WorkerIntervals {
    WorkerIntervals {
        manager: Duration::from_millis(20),
        submit: Duration::from_millis(10),
        retry: Duration::from_millis(10),
        status: Duration::from_millis(10),
    }
}
