// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Armada - Container Workload Orchestration
//!
//! Process bootstrap: configuration, store, engines, worker manager, and
//! the HTTP server, with one cancellation token tying shutdown together.

use std::sync::Arc;

use anyhow::Result;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use armada_api::{ApiState, build_router};
use armada_core::config::Config;
use armada_core::engine::Engines;
use armada_core::engine::docker::DockerCli;
use armada_core::engine::local::LocalEngine;
use armada_core::services::{ExecutionService, TemplateService, WorkerService};
use armada_core::store::{PostgresStateStore, StateStore, worker_seeds};
use armada_core::workers::WorkerManager;

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("armada_core=info".parse()?)
                .add_directive("armada_api=info".parse()?),
        )
        .init();

    info!("Starting Armada");

    let config = Config::from_env().map_err(|e| {
        error!("Configuration error: {}", e);
        anyhow::anyhow!(e)
    })?;

    info!(
        listen_address = %config.http.listen_address,
        manager_interval_ms = config.worker_intervals.manager.as_millis() as u64,
        "Configuration loaded"
    );

    // Connect, migrate, and seed worker rows for every registered engine.
    let store = Arc::new(PostgresStateStore::from_url(&config.database_url).await?);
    info!("Database connection established, migrations applied");

    let docker = DockerCli::new(config.registry_auths.clone());
    docker.login_registries().await;
    let mut engines = Engines::new();
    engines.register(Arc::new(LocalEngine::new(Arc::new(docker))));

    store
        .init_workers(&worker_seeds(&config, &engines.names()))
        .await?;
    info!(engines = ?engines.names(), "Worker table seeded");

    let store: Arc<dyn StateStore> = store;
    let state = ApiState {
        templates: TemplateService::new(store.clone()),
        executions: ExecutionService::new(store.clone(), engines.clone()),
        workers: WorkerService::new(store.clone()),
        cors_allowed_origins: config.http.cors_allowed_origins.clone(),
        write_timeout: config.http.write_timeout,
    };

    let root = CancellationToken::new();
    let manager = WorkerManager::new(store.clone(), engines.clone(), config.worker_intervals);
    let manager_handle = manager.start(root.clone());

    let app = build_router(state);
    let listener = tokio::net::TcpListener::bind(&config.http.listen_address).await?;
    info!(addr = %config.http.listen_address, "HTTP server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(root.clone()))
        .await?;

    // The server has drained; stop workers and release engine queues.
    root.cancel();
    if let Err(e) = manager_handle.await {
        error!(error = %e, "Worker manager task failed");
    }
    engines.close_all().await;

    info!("Shutdown complete");
    Ok(())
}

/// Resolves on SIGINT and cancels the root token so workers begin draining
/// while the HTTP server finishes in-flight requests.
async fn shutdown_signal(root: CancellationToken) {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "Failed to listen for shutdown signal");
        return;
    }
    info!("Shutdown signal received");
    root.cancel();
}
