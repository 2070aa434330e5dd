// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Local execution engine.
//!
//! Queues runs on a bounded in-process channel and executes them against the
//! host's container daemon through a [`ContainerClient`]. The queue holds at
//! most [`LOCAL_QUEUE_CAPACITY`] runs; `enqueue` fails fast when full.
//!
//! Shutdown closes the receiver on the single shutdown path: producers fail
//! with `QueueClosed` immediately, while already-buffered messages remain
//! drainable by `poll`.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::{Mutex, mpsc};
use tracing::{debug, info, warn};

use super::docker::{ContainerClient, fresh_log_cursor, project_state};
use super::{Engine, EngineError, EngineResult, LogChunk, RunLease};
use crate::models::{Run, RunStatus, Template};

/// Bound on the local engine's in-process queue.
pub const LOCAL_QUEUE_CAPACITY: usize = 100;

/// In-process engine backed by the host container daemon.
pub struct LocalEngine {
    name: String,
    queue_tx: mpsc::Sender<Run>,
    queue_rx: Arc<Mutex<mpsc::Receiver<Run>>>,
    client: Arc<dyn ContainerClient>,
}

impl LocalEngine {
    /// Create the engine with the given container backend.
    pub fn new(client: Arc<dyn ContainerClient>) -> Self {
        Self::with_name("local", client)
    }

    /// Create the engine under a custom name. Used by tests that need two
    /// independent engines.
    pub fn with_name(name: &str, client: Arc<dyn ContainerClient>) -> Self {
        let (queue_tx, queue_rx) = mpsc::channel(LOCAL_QUEUE_CAPACITY);
        info!(engine = %name, capacity = LOCAL_QUEUE_CAPACITY, "Initializing local execution engine");
        Self {
            name: name.to_string(),
            queue_tx,
            queue_rx: Arc::new(Mutex::new(queue_rx)),
            client,
        }
    }

    /// Number of runs currently buffered on the queue.
    pub fn queue_depth(&self) -> usize {
        LOCAL_QUEUE_CAPACITY - self.queue_tx.capacity()
    }
}

#[async_trait]
impl Engine for LocalEngine {
    fn name(&self) -> &str {
        &self.name
    }

    async fn enqueue(&self, run: &Run) -> EngineResult<()> {
        debug!(run_id = %run.run_id, "Enqueuing run");
        self.queue_tx.try_send(run.clone()).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => EngineError::QueueCapacity,
            mpsc::error::TrySendError::Closed(_) => EngineError::QueueClosed,
        })
    }

    async fn poll(&self) -> EngineResult<RunLease> {
        let mut rx = self.queue_rx.lock().await;
        match rx.try_recv() {
            Ok(run) => {
                let requeue = self.queue_tx.clone();
                let run_id = run.run_id.clone();
                let returned = run.clone();
                Ok(RunLease::new(run, move |ack| {
                    if !ack && let Err(e) = requeue.try_send(returned) {
                        warn!(run_id = %run_id, error = %e, "Failed to return run to queue");
                    }
                }))
            }
            Err(mpsc::error::TryRecvError::Empty) => Err(EngineError::NoRuns),
            Err(mpsc::error::TryRecvError::Disconnected) => Err(EngineError::QueueClosed),
        }
    }

    async fn execute(&self, mut run: Run) -> EngineResult<Run> {
        debug!(run_id = %run.run_id, image = %run.image, "Executing run");
        let container_id = self.client.launch(&run).await?;
        run.status = RunStatus::Running;
        run.started_at = Some(Utc::now());
        run.instance_id = Some(container_id);
        Ok(run)
    }

    async fn get_latest(&self, run: Run) -> EngineResult<Run> {
        let state = self.client.inspect(&run).await?;
        Ok(project_state(run, &state))
    }

    async fn terminate(&self, run: &Run) -> EngineResult<()> {
        debug!(run_id = %run.run_id, "Terminating run");
        match self.client.stop(run).await {
            // Already gone; terminate is idempotent.
            Err(EngineError::NotFound) => Ok(()),
            other => other,
        }
    }

    async fn logs(
        &self,
        _template: &Template,
        run: &Run,
        last_seen: Option<&str>,
    ) -> EngineResult<LogChunk> {
        let cursor = fresh_log_cursor();
        match self.client.logs(run, last_seen).await {
            Ok(text) => Ok(LogChunk {
                text,
                last_seen: Some(cursor),
            }),
            Err(EngineError::NotFound) => Ok(LogChunk {
                text: String::new(),
                last_seen: Some(cursor),
            }),
            Err(e) => Err(e),
        }
    }

    async fn close(&self) {
        info!(engine = %self.name, "Closing local engine queue");
        self.queue_rx.lock().await.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::mock::MockContainerClient;

    fn queued_run(id: &str) -> Run {
        Run {
            run_id: id.to_string(),
            engine: "local".to_string(),
            image: "img".to_string(),
            status: RunStatus::Queued,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_poll_empty_returns_no_runs() {
        let engine = LocalEngine::new(Arc::new(MockContainerClient::new()));
        assert!(matches!(engine.poll().await, Err(EngineError::NoRuns)));
    }

    #[tokio::test]
    async fn test_enqueue_poll_ack() {
        let engine = LocalEngine::new(Arc::new(MockContainerClient::new()));
        engine.enqueue(&queued_run("local-1")).await.unwrap();
        assert_eq!(engine.queue_depth(), 1);

        let lease = engine.poll().await.unwrap();
        assert_eq!(lease.run().run_id, "local-1");
        lease.ack();
        assert_eq!(engine.queue_depth(), 0);
        assert!(matches!(engine.poll().await, Err(EngineError::NoRuns)));
    }

    #[tokio::test]
    async fn test_nack_returns_run_to_queue() {
        let engine = LocalEngine::new(Arc::new(MockContainerClient::new()));
        engine.enqueue(&queued_run("local-1")).await.unwrap();

        let lease = engine.poll().await.unwrap();
        lease.nack();
        assert_eq!(engine.queue_depth(), 1);

        let lease = engine.poll().await.unwrap();
        assert_eq!(lease.run().run_id, "local-1");
        lease.ack();
    }

    #[tokio::test]
    async fn test_enqueue_fails_when_full() {
        let engine = LocalEngine::new(Arc::new(MockContainerClient::new()));
        for i in 0..LOCAL_QUEUE_CAPACITY {
            engine.enqueue(&queued_run(&format!("local-{i}"))).await.unwrap();
        }
        assert!(matches!(
            engine.enqueue(&queued_run("local-overflow")).await,
            Err(EngineError::QueueCapacity)
        ));
    }

    #[tokio::test]
    async fn test_close_fails_producers_but_drains_consumers() {
        let engine = LocalEngine::new(Arc::new(MockContainerClient::new()));
        engine.enqueue(&queued_run("local-1")).await.unwrap();
        engine.close().await;

        assert!(matches!(
            engine.enqueue(&queued_run("local-2")).await,
            Err(EngineError::QueueClosed)
        ));

        // The buffered message is still drainable.
        let lease = engine.poll().await.unwrap();
        assert_eq!(lease.run().run_id, "local-1");
        lease.ack();
        assert!(matches!(engine.poll().await, Err(EngineError::QueueClosed)));
    }

    #[tokio::test]
    async fn test_execute_annotates_run() {
        let client = Arc::new(MockContainerClient::new());
        let engine = LocalEngine::new(client.clone());
        let launched = engine.execute(queued_run("local-1")).await.unwrap();
        assert_eq!(launched.status, RunStatus::Running);
        assert!(launched.started_at.is_some());
        assert!(launched.instance_id.is_some());
        assert_eq!(client.launched(), vec!["local-1".to_string()]);
    }

    #[tokio::test]
    async fn test_terminate_is_idempotent() {
        let engine = LocalEngine::new(Arc::new(MockContainerClient::new()));
        // Nothing launched: the mock reports NotFound, terminate swallows it.
        engine.terminate(&queued_run("local-missing")).await.unwrap();
    }

    #[tokio::test]
    async fn test_logs_missing_workload_yields_fresh_cursor() {
        let engine = LocalEngine::new(Arc::new(MockContainerClient::new()));
        let chunk = engine
            .logs(&Template::default(), &queued_run("local-missing"), None)
            .await
            .unwrap();
        assert!(chunk.text.is_empty());
        assert!(chunk.last_seen.is_some());
    }
}
