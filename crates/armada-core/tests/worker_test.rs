// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Worker loop tests: retry round-trips, submit idempotence, status
//! reconciliation, and manager pool sizing.

mod common;

use std::time::Duration;

use chrono::Utc;
use common::{TestContext, fast_intervals};
use tokio_util::sync::CancellationToken;

use armada_core::engine::Engine;
use armada_core::engine::docker::ContainerState;
use armada_core::engine::mock::LaunchBehavior;
use armada_core::models::{RunPatch, RunStatus, WorkerKind};
use armada_core::store::StateStore;
use armada_core::workers::{RetryWorker, StatusWorker, SubmitWorker};

fn submit_worker(ctx: &TestContext) -> SubmitWorker {
    SubmitWorker::new(ctx.store(), ctx.engine.clone(), Duration::from_millis(10))
}

fn retry_worker(ctx: &TestContext) -> RetryWorker {
    RetryWorker::new(ctx.store(), ctx.engine.clone(), Duration::from_millis(10))
}

fn status_worker(ctx: &TestContext) -> StatusWorker {
    StatusWorker::new(ctx.store(), ctx.engine.clone(), Duration::from_millis(10))
        .with_cleanup_delay(Duration::from_millis(50))
}

async fn seed_template(ctx: &TestContext) -> String {
    let (template, _) = ctx
        .template_service()
        .create_template(ctx.sample_template())
        .await
        .unwrap();
    template.template_id
}

#[tokio::test]
async fn test_retry_then_submit_round_trip() {
    let ctx = TestContext::new().await;
    let template_id = seed_template(&ctx).await;
    let run = ctx
        .seed_run(RunStatus::NeedsRetry, Some(&template_id))
        .await;

    // One retry tick flips the run to QUEUED and re-enqueues it.
    retry_worker(&ctx).run_once().await.unwrap();
    let requeued = ctx.store.get_run(&run.run_id).await.unwrap();
    assert_eq!(requeued.status, RunStatus::Queued);
    assert_eq!(ctx.engine.queue_depth(), 1);

    // One submit tick executes it exactly once.
    submit_worker(&ctx).run_once().await;
    let launched = ctx.store.get_run(&run.run_id).await.unwrap();
    assert_eq!(launched.status, RunStatus::Running);
    assert!(launched.started_at.is_some());
    assert_eq!(ctx.client.launched(), vec![run.run_id.clone()]);
    assert_eq!(ctx.engine.queue_depth(), 0);
}

#[tokio::test]
async fn test_submit_retryable_failure_leaves_message_on_queue() {
    let ctx = TestContext::new().await;
    let template_id = seed_template(&ctx).await;
    let run = ctx.seed_run(RunStatus::Queued, Some(&template_id)).await;
    ctx.engine.enqueue(&run).await.unwrap();
    ctx.client
        .set_launch_behavior(LaunchBehavior::FailRetryable("daemon busy".to_string()));

    submit_worker(&ctx).run_once().await;

    // Still queued in the store and back on the queue.
    let after = ctx.store.get_run(&run.run_id).await.unwrap();
    assert_eq!(after.status, RunStatus::Queued);
    assert_eq!(ctx.engine.queue_depth(), 1);

    // Once the backend recovers, the next tick launches it.
    ctx.client.set_launch_behavior(LaunchBehavior::Succeed);
    submit_worker(&ctx).run_once().await;
    let after = ctx.store.get_run(&run.run_id).await.unwrap();
    assert_eq!(after.status, RunStatus::Running);
}

#[tokio::test]
async fn test_submit_rejection_stops_run_with_exception() {
    let ctx = TestContext::new().await;
    let template_id = seed_template(&ctx).await;
    let run = ctx.seed_run(RunStatus::Queued, Some(&template_id)).await;
    ctx.engine.enqueue(&run).await.unwrap();
    ctx.client
        .set_launch_behavior(LaunchBehavior::Reject("image spec is invalid".to_string()));

    submit_worker(&ctx).run_once().await;

    let after = ctx.store.get_run(&run.run_id).await.unwrap();
    assert_eq!(after.status, RunStatus::Stopped);
    assert_eq!(after.exit_reason.as_deref(), Some("image spec is invalid"));
    let exceptions = after.run_exceptions.unwrap();
    assert!(exceptions[0].contains("image spec is invalid"));
    // The message was acked, not retried.
    assert_eq!(ctx.engine.queue_depth(), 0);
}

#[tokio::test]
async fn test_submit_duplicate_delivery_acks_without_reexecuting() {
    let ctx = TestContext::new().await;
    let template_id = seed_template(&ctx).await;
    let run = ctx.seed_run(RunStatus::Queued, Some(&template_id)).await;

    // Duplicate delivery of the same run message.
    ctx.engine.enqueue(&run).await.unwrap();
    ctx.engine.enqueue(&run).await.unwrap();

    let worker = submit_worker(&ctx);
    worker.run_once().await;
    assert_eq!(ctx.client.launched().len(), 1);

    // The run finishes before the duplicate is seen.
    ctx.store
        .update_run(
            &run.run_id,
            &RunPatch {
                status: Some(RunStatus::Stopped),
                exit_code: Some(0),
                ..Default::default()
            },
        )
        .await
        .unwrap();

    worker.run_once().await;
    // Duplicate dropped: no second launch, nothing back on the queue.
    assert_eq!(ctx.client.launched().len(), 1);
    assert_eq!(ctx.engine.queue_depth(), 0);
}

#[tokio::test]
async fn test_status_worker_reconciles_terminal_transition_and_schedules_cleanup() {
    let ctx = TestContext::new().await;
    let template_id = seed_template(&ctx).await;
    let run = ctx.seed_run(RunStatus::Running, Some(&template_id)).await;

    // The backend saw the container exit cleanly.
    ctx.client.set_state(
        &run.run_id,
        ContainerState {
            container_id: format!("mock-{}", run.run_id),
            running: false,
            exit_code: Some(0),
            started_at: Some(Utc::now()),
            finished_at: Some(Utc::now()),
            ..Default::default()
        },
    );

    status_worker(&ctx).run_once().await;

    let after = ctx.store.get_run(&run.run_id).await.unwrap();
    assert_eq!(after.status, RunStatus::Stopped);
    assert_eq!(after.exit_code, Some(0));
    assert!(after.finished_at.is_some());
    assert!(
        after
            .exit_reason
            .as_deref()
            .unwrap()
            .contains("exited successfully")
    );

    // The delayed cleanup terminate fires after the (shortened) delay.
    tokio::time::sleep(Duration::from_millis(150)).await;
    assert_eq!(ctx.client.stopped(), vec![run.run_id.clone()]);
}

#[tokio::test]
async fn test_status_worker_stops_lost_runs_but_spares_queued() {
    let ctx = TestContext::new().await;
    let template_id = seed_template(&ctx).await;
    let lost = ctx.seed_run(RunStatus::Running, Some(&template_id)).await;
    let queued = ctx.seed_run(RunStatus::Queued, Some(&template_id)).await;
    // Neither run exists on the backend.

    status_worker(&ctx).run_once().await;

    let lost_after = ctx.store.get_run(&lost.run_id).await.unwrap();
    assert_eq!(lost_after.status, RunStatus::Stopped);
    assert_eq!(
        lost_after.exit_reason.as_deref(),
        Some("engine cannot find run")
    );

    // A QUEUED run may simply be awaiting submission.
    let queued_after = ctx.store.get_run(&queued.run_id).await.unwrap();
    assert_eq!(queued_after.status, RunStatus::Queued);
}

#[tokio::test]
async fn test_status_worker_skips_runs_older_than_lookback() {
    let ctx = TestContext::new().await;
    let template_id = seed_template(&ctx).await;
    let run = ctx.seed_run(RunStatus::Running, Some(&template_id)).await;
    ctx.store
        .update_run(
            &run.run_id,
            &RunPatch {
                queued_at: Some(Utc::now() - chrono::Duration::days(45)),
                ..Default::default()
            },
        )
        .await
        .unwrap();

    status_worker(&ctx).run_once().await;

    // Out of the 30-day window: untouched even though the backend lost it.
    let after = ctx.store.get_run(&run.run_id).await.unwrap();
    assert_eq!(after.status, RunStatus::Running);
}

#[tokio::test]
async fn test_manager_sizes_pools_and_drains_on_cancel() {
    let ctx = TestContext::new().await;
    ctx.seed_worker_counts(1, 1, 2).await;

    let manager = ctx.worker_manager(fast_intervals());
    let root = CancellationToken::new();
    let handle = manager.start(root.clone());

    // Give the first reconciliation a moment to run.
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(manager.pool_size("local", WorkerKind::Status).await, 2);
    assert_eq!(manager.pool_size("local", WorkerKind::Retry).await, 1);
    assert_eq!(manager.pool_size("local", WorkerKind::Submit).await, 1);

    // Root cancellation drains every worker and the manager returns.
    root.cancel();
    tokio::time::timeout(Duration::from_secs(2), handle)
        .await
        .expect("manager drained within the deadline")
        .unwrap();
}

#[tokio::test]
async fn test_manager_shrinks_pool_when_desired_count_drops() {
    let ctx = TestContext::new().await;
    ctx.seed_worker_counts(1, 1, 2).await;

    let manager = ctx.worker_manager(fast_intervals());
    let root = CancellationToken::new();
    manager.reconcile_once(&root).await;
    assert_eq!(manager.pool_size("local", WorkerKind::Status).await, 2);

    ctx.store
        .update_worker(WorkerKind::Status, "local", 0)
        .await
        .unwrap();
    manager.reconcile_once(&root).await;
    assert_eq!(manager.pool_size("local", WorkerKind::Status).await, 0);

    root.cancel();
}
