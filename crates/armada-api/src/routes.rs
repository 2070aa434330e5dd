// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Router and handlers for the `/api` surface.
//!
//! List endpoints accept `limit`, `offset`, `sort_by`, and `order`; every
//! other query key becomes a filter, repeated keys become IN-sets, and
//! `env.<NAME>=<value>` keys become env containment filters on run
//! listings.

use axum::extract::{Path, Query, Request, State};
use axum::http::{HeaderValue, StatusCode, header};
use axum::middleware::{Next, from_fn_with_state};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, put};
use axum::{Json, Router};
use serde_json::json;

use armada_core::models::{Template, Worker, WorkerKind};
use armada_core::services::{ExecutionRequest, ExecutionService, TemplateService, WorkerService};
use armada_core::store::{GetTemplateArgs, ListArgs, ListRunsArgs};

use crate::error::ApiError;

/// Shared handler state.
#[derive(Clone)]
pub struct ApiState {
    /// Template admission and lookup.
    pub templates: TemplateService,
    /// Run materialization, logs, termination.
    pub executions: ExecutionService,
    /// Worker pool administration.
    pub workers: WorkerService,
    /// Allowed CORS origins; `*` allows any.
    pub cors_allowed_origins: Vec<String>,
    /// Upper bound on producing a response.
    pub write_timeout: std::time::Duration,
}

/// Build the `/api` router.
pub fn build_router(state: ApiState) -> Router {
    Router::new()
        .route(
            "/api/template",
            get(list_templates).post(create_template),
        )
        .route("/api/template/:template_id", get(get_template))
        .route("/api/template/:template_id/execute", put(execute_by_id))
        .route(
            "/api/template/name/:template_name/version/:template_version/execute",
            put(execute_by_name),
        )
        .route("/api/template/:template_id/history", get(list_template_runs))
        .route(
            "/api/template/:template_id/history/:run_id",
            get(get_template_run).delete(terminate_run),
        )
        .route("/api/template/history/:run_id", get(get_run))
        .route("/api/history", get(list_runs))
        .route("/api/history/:run_id", get(get_run))
        .route("/api/history/:run_id/logs", get(get_logs))
        .route("/api/worker", put(batch_update_workers))
        .route("/api/worker/:engine_name", get(list_workers))
        .route(
            "/api/worker/:engine_name/:worker_type",
            get(get_worker).put(update_worker),
        )
        .layer(from_fn_with_state(state.clone(), cors))
        .layer(from_fn_with_state(state.clone(), response_timeout))
        .with_state(state)
}

/// Bound the time spent producing any response.
async fn response_timeout(State(state): State<ApiState>, request: Request, next: Next) -> Response {
    match tokio::time::timeout(state.write_timeout, next.run(request)).await {
        Ok(response) => response,
        Err(_) => ApiError::Internal("request timed out".to_string()).into_response(),
    }
}

/// Minimal CORS: reflect allowed origins on every response.
async fn cors(State(state): State<ApiState>, request: Request, next: Next) -> Response {
    let origin = request.headers().get(header::ORIGIN).cloned();
    let mut response = next.run(request).await;

    let allowed = if state.cors_allowed_origins.iter().any(|o| o == "*") {
        Some(HeaderValue::from_static("*"))
    } else {
        origin.filter(|o| {
            state
                .cors_allowed_origins
                .iter()
                .any(|allowed| o.as_bytes() == allowed.as_bytes())
        })
    };
    if let Some(value) = allowed {
        let headers = response.headers_mut();
        headers.insert(header::ACCESS_CONTROL_ALLOW_ORIGIN, value);
        headers.insert(
            header::ACCESS_CONTROL_ALLOW_METHODS,
            HeaderValue::from_static("GET, PUT, POST, DELETE"),
        );
        headers.insert(
            header::ACCESS_CONTROL_ALLOW_HEADERS,
            HeaderValue::from_static("Origin, Content-Type"),
        );
    }
    response
}

type QueryPairs = Vec<(String, String)>;

/// Fold query pairs into list args; unknown keys become filters.
fn list_args_from_query(pairs: &QueryPairs) -> Result<ListArgs, ApiError> {
    let mut args = ListArgs::default();
    for (key, value) in pairs {
        match key.as_str() {
            "limit" => {
                args.limit = Some(parse_int(key, value)?);
            }
            "offset" => {
                args.offset = Some(parse_int(key, value)?);
            }
            "sort_by" => args.sort_by = Some(value.clone()),
            "order" => args.order = Some(value.clone()),
            _ => args.add_filter(key, value),
        }
    }
    Ok(args)
}

/// Run listings additionally pull out `engine` keys and `env.<NAME>` keys.
fn runs_args_from_query(pairs: &QueryPairs) -> Result<ListRunsArgs, ApiError> {
    let mut args = ListRunsArgs::default();
    let mut rest = Vec::new();
    for (key, value) in pairs {
        if key == "engine" || key == "engines" {
            args.engines
                .get_or_insert_with(Vec::new)
                .push(value.clone());
        } else if let Some(name) = key.strip_prefix("env.") {
            args.env_filters
                .get_or_insert_with(Default::default)
                .insert(name.to_string(), value.clone());
        } else {
            rest.push((key.clone(), value.clone()));
        }
    }
    args.list = list_args_from_query(&rest)?;
    Ok(args)
}

fn parse_int(key: &str, value: &str) -> Result<i64, ApiError> {
    value
        .parse()
        .map_err(|_| ApiError::bad_request(format!("{key} must be an integer, got '{value}'")))
}

fn parse_worker_kind(raw: &str) -> Result<WorkerKind, ApiError> {
    raw.parse().map_err(|e: String| ApiError::bad_request(e))
}

async fn create_template(
    State(state): State<ApiState>,
    Json(template): Json<Template>,
) -> Result<Response, ApiError> {
    let (template, created) = state.templates.create_template(template).await?;
    let code = if created {
        StatusCode::CREATED
    } else {
        StatusCode::OK
    };
    Ok((
        code,
        Json(json!({ "created": created, "template": template })),
    )
        .into_response())
}

async fn list_templates(
    State(state): State<ApiState>,
    Query(pairs): Query<QueryPairs>,
) -> Result<Response, ApiError> {
    let args = list_args_from_query(&pairs)?;
    let list = state.templates.list_templates(&args).await?;
    Ok(Json(list).into_response())
}

async fn get_template(
    State(state): State<ApiState>,
    Path(template_id): Path<String>,
) -> Result<Response, ApiError> {
    let template = state
        .templates
        .get_template(&GetTemplateArgs::by_id(&template_id))
        .await?;
    Ok(Json(template).into_response())
}

async fn execute_by_id(
    State(state): State<ApiState>,
    Path(template_id): Path<String>,
    Json(mut request): Json<ExecutionRequest>,
) -> Result<Response, ApiError> {
    request.template_id = Some(template_id);
    let run = state.executions.create_template_run(&request).await?;
    Ok((StatusCode::CREATED, Json(run)).into_response())
}

async fn execute_by_name(
    State(state): State<ApiState>,
    Path((template_name, template_version)): Path<(String, String)>,
    Json(mut request): Json<ExecutionRequest>,
) -> Result<Response, ApiError> {
    request.template_name = Some(template_name);
    request.template_version = Some(parse_int("template_version", &template_version)?);
    let run = state.executions.create_template_run(&request).await?;
    Ok((StatusCode::CREATED, Json(run)).into_response())
}

async fn list_runs(
    State(state): State<ApiState>,
    Query(pairs): Query<QueryPairs>,
) -> Result<Response, ApiError> {
    let args = runs_args_from_query(&pairs)?;
    let list = state.executions.list_runs(&args).await?;
    Ok(Json(list).into_response())
}

async fn list_template_runs(
    State(state): State<ApiState>,
    Path(template_id): Path<String>,
    Query(pairs): Query<QueryPairs>,
) -> Result<Response, ApiError> {
    let mut args = runs_args_from_query(&pairs)?;
    args.list.add_filter("template_id", &template_id);
    let list = state.executions.list_runs(&args).await?;
    Ok(Json(list).into_response())
}

async fn get_run(
    State(state): State<ApiState>,
    Path(run_id): Path<String>,
) -> Result<Response, ApiError> {
    let run = state.executions.get_run(&run_id).await?;
    Ok(Json(run).into_response())
}

async fn get_template_run(
    State(state): State<ApiState>,
    Path((_template_id, run_id)): Path<(String, String)>,
) -> Result<Response, ApiError> {
    let run = state.executions.get_run(&run_id).await?;
    Ok(Json(run).into_response())
}

async fn terminate_run(
    State(state): State<ApiState>,
    Path((_template_id, run_id)): Path<(String, String)>,
) -> Result<Response, ApiError> {
    state.executions.terminate(&run_id).await?;
    Ok(Json(json!({ "terminated": true })).into_response())
}

#[derive(Debug, serde::Deserialize)]
struct LogsQuery {
    last_seen: Option<String>,
}

async fn get_logs(
    State(state): State<ApiState>,
    Path(run_id): Path<String>,
    Query(query): Query<LogsQuery>,
) -> Result<Response, ApiError> {
    let chunk = state
        .executions
        .logs(&run_id, query.last_seen.as_deref())
        .await?;
    Ok(Json(json!({ "log": chunk.text, "last_seen": chunk.last_seen })).into_response())
}

async fn list_workers(
    State(state): State<ApiState>,
    Path(engine_name): Path<String>,
) -> Result<Response, ApiError> {
    let list = state.workers.list(&engine_name).await?;
    Ok(Json(list).into_response())
}

async fn batch_update_workers(
    State(state): State<ApiState>,
    Json(updates): Json<Vec<Worker>>,
) -> Result<Response, ApiError> {
    let list = state.workers.batch_update(&updates).await?;
    Ok(Json(list).into_response())
}

async fn get_worker(
    State(state): State<ApiState>,
    Path((engine_name, worker_type)): Path<(String, String)>,
) -> Result<Response, ApiError> {
    let kind = parse_worker_kind(&worker_type)?;
    let worker = state.workers.get(kind, &engine_name).await?;
    Ok(Json(worker).into_response())
}

#[derive(Debug, serde::Deserialize)]
struct WorkerUpdateBody {
    count_per_instance: i64,
}

async fn update_worker(
    State(state): State<ApiState>,
    Path((engine_name, worker_type)): Path<(String, String)>,
    Json(body): Json<WorkerUpdateBody>,
) -> Result<Response, ApiError> {
    let kind = parse_worker_kind(&worker_type)?;
    let worker = state
        .workers
        .update(kind, &engine_name, body.count_per_instance)
        .await?;
    Ok(Json(worker).into_response())
}
