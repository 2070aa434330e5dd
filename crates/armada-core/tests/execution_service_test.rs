// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Execution service tests: rendering, engine selection, enqueue behavior.

mod common;

use common::TestContext;
use serde_json::json;

use armada_core::CoreError;
use armada_core::engine::Engine;
use armada_core::models::RunStatus;
use armada_core::services::ExecutionRequest;
use armada_core::store::{ListRunsArgs, StateStore};

async fn created_template(ctx: &TestContext) -> armada_core::models::Template {
    let (template, _) = ctx
        .template_service()
        .create_template(ctx.sample_template())
        .await
        .unwrap();
    template
}

#[tokio::test]
async fn test_execute_renders_command_and_queues() {
    let ctx = TestContext::new().await;
    let template = created_template(&ctx).await;
    let service = ctx.execution_service();

    let request = ExecutionRequest {
        template_id: Some(template.template_id.clone()),
        template_payload: json!({"who": "world"}).as_object().unwrap().clone(),
        ..Default::default()
    };
    let run = service.create_template_run(&request).await.unwrap();

    assert_eq!(run.command.as_deref(), Some("echo world"));
    assert_eq!(run.status, RunStatus::Queued);
    assert_eq!(run.engine, "local");
    assert!(run.run_id.starts_with("local-"));
    assert_eq!(run.image, "img");
    assert!(run.queued_at.is_some());
    assert_eq!(ctx.engine.queue_depth(), 1);
}

#[tokio::test]
async fn test_caller_command_wins_over_rendered() {
    let ctx = TestContext::new().await;
    let template = created_template(&ctx).await;
    let service = ctx.execution_service();

    let request = ExecutionRequest {
        template_id: Some(template.template_id.clone()),
        command: Some("echo fixed".to_string()),
        template_payload: json!({"who": "world"}).as_object().unwrap().clone(),
        ..Default::default()
    };
    let run = service.create_template_run(&request).await.unwrap();
    assert_eq!(run.command.as_deref(), Some("echo fixed"));
}

#[tokio::test]
async fn test_schema_rejection_reports_violations() {
    let ctx = TestContext::new().await;
    let mut template = ctx.sample_template();
    template.schema = json!({"type": "object", "required": ["who"]});
    let (template, _) = ctx
        .template_service()
        .create_template(template)
        .await
        .unwrap();

    let request = ExecutionRequest {
        template_id: Some(template.template_id.clone()),
        ..Default::default()
    };
    let err = ctx
        .execution_service()
        .create_template_run(&request)
        .await
        .unwrap_err();
    match err {
        CoreError::MalformedInput(msg) => assert!(msg.contains("who is required")),
        other => panic!("expected MalformedInput, got {other:?}"),
    }
    // Admission was refused: nothing was persisted or enqueued.
    assert_eq!(ctx.engine.queue_depth(), 0);
    let list = ctx
        .store
        .list_runs(&ListRunsArgs::default())
        .await
        .unwrap();
    assert_eq!(list.total, 0);
}

#[tokio::test]
async fn test_unknown_engine_is_malformed_input() {
    let ctx = TestContext::new().await;
    let template = created_template(&ctx).await;

    let request = ExecutionRequest {
        template_id: Some(template.template_id.clone()),
        engine: Some("mars".to_string()),
        ..Default::default()
    };
    let err = ctx
        .execution_service()
        .create_template_run(&request)
        .await
        .unwrap_err();
    match err {
        CoreError::MalformedInput(msg) => {
            assert_eq!(msg, "engine with name: mars not configured");
        }
        other => panic!("expected MalformedInput, got {other:?}"),
    }
}

#[tokio::test]
async fn test_missing_template_is_not_found() {
    let ctx = TestContext::new().await;
    let request = ExecutionRequest {
        template_id: Some("tpl-missing".to_string()),
        ..Default::default()
    };
    let err = ctx
        .execution_service()
        .create_template_run(&request)
        .await
        .unwrap_err();
    assert!(err.is_not_found());
}

#[tokio::test]
async fn test_dry_run_renders_without_persisting() {
    let ctx = TestContext::new().await;
    let template = created_template(&ctx).await;

    let request = ExecutionRequest {
        template_id: Some(template.template_id.clone()),
        template_payload: json!({"who": "world"}).as_object().unwrap().clone(),
        dry_run: Some(true),
        ..Default::default()
    };
    let run = ctx
        .execution_service()
        .create_template_run(&request)
        .await
        .unwrap();

    assert_eq!(run.command.as_deref(), Some("echo world"));
    assert!(run.run_id.is_empty());
    assert_eq!(ctx.engine.queue_depth(), 0);
    let list = ctx
        .store
        .list_runs(&ListRunsArgs::default())
        .await
        .unwrap();
    assert_eq!(list.total, 0);
}

#[tokio::test]
async fn test_enqueue_failure_leaves_queued_row() {
    let ctx = TestContext::new().await;
    let template = created_template(&ctx).await;

    // Closing the engine makes enqueue fail fast.
    ctx.engine.close().await;

    let request = ExecutionRequest {
        template_id: Some(template.template_id.clone()),
        template_payload: json!({"who": "world"}).as_object().unwrap().clone(),
        ..Default::default()
    };
    let err = ctx
        .execution_service()
        .create_template_run(&request)
        .await
        .unwrap_err();
    assert!(matches!(err, CoreError::Engine(_)));

    // The run row survives in QUEUED for the status worker to sweep.
    let list = ctx
        .store
        .list_runs(&ListRunsArgs::default())
        .await
        .unwrap();
    assert_eq!(list.total, 1);
    assert_eq!(list.runs[0].status, RunStatus::Queued);
    assert!(list.runs[0].queued_at.is_some());
}

#[tokio::test]
async fn test_terminate_dispatches_to_owning_engine() {
    let ctx = TestContext::new().await;
    let template = created_template(&ctx).await;
    let service = ctx.execution_service();

    let request = ExecutionRequest {
        template_id: Some(template.template_id.clone()),
        template_payload: json!({"who": "world"}).as_object().unwrap().clone(),
        ..Default::default()
    };
    let run = service.create_template_run(&request).await.unwrap();

    // Launch it so the backend knows the workload, then terminate.
    ctx.engine.execute(run.clone()).await.unwrap();
    service.terminate(&run.run_id).await.unwrap();
    assert_eq!(ctx.client.stopped(), vec![run.run_id.clone()]);
}

#[tokio::test]
async fn test_logs_roundtrip() {
    let ctx = TestContext::new().await;
    let template = created_template(&ctx).await;
    let service = ctx.execution_service();

    let request = ExecutionRequest {
        template_id: Some(template.template_id.clone()),
        template_payload: json!({"who": "world"}).as_object().unwrap().clone(),
        ..Default::default()
    };
    let run = service.create_template_run(&request).await.unwrap();
    ctx.engine.execute(run.clone()).await.unwrap();
    ctx.client.set_log_text("hello from container\n");

    let chunk = service.logs(&run.run_id, None).await.unwrap();
    assert_eq!(chunk.text, "hello from container\n");
    assert!(chunk.last_seen.is_some());
}
