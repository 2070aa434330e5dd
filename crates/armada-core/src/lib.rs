// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Armada Core - Container Workload Orchestration
//!
//! This crate is the execution core of Armada: it accepts parameterized job
//! templates, materializes them into runs, queues runs onto pluggable
//! execution engines, and drives every run through its lifecycle
//! (queued → pending → running → stopped / needs_retry) while tolerating
//! partial failures of the backing engines.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────┐
//! │                        External Clients                             │
//! │                     (armada-api HTTP surface)                       │
//! └─────────────────────────────────────────────────────────────────────┘
//!           │ templates                         │ execute / logs / kill
//!           ▼                                   ▼
//! ┌───────────────────────┐        ┌─────────────────────────────┐
//! │   TemplateService     │        │      ExecutionService       │
//! │  validate / version   │        │  render / create / enqueue  │
//! └──────────┬────────────┘        └──────┬───────────────┬──────┘
//!            │                            │               │
//!            ▼                            ▼               ▼
//! ┌───────────────────────┐        ┌─────────────┐  ┌───────────────────┐
//! │      StateStore       │◄───────│   Workers   │─▶│  Engine registry  │
//! │  (Postgres / SQLite)  │        │ submit      │  │  local, ...       │
//! │  templates/runs/      │        │ status      │  │  queue + backend  │
//! │  workers              │        │ retry       │  └───────────────────┘
//! └───────────────────────┘        │ manager     │
//!                                  └─────────────┘
//! ```
//!
//! Per engine, four control loops cooperate through the store and the
//! engine's queue:
//!
//! | Loop | Responsibility |
//! |------|----------------|
//! | submit | dequeue QUEUED runs and launch them on the backend |
//! | status | reconcile live backend state into run rows |
//! | retry | re-queue runs marked NEEDS_RETRY |
//! | manager | grow/shrink the worker pools to the configured counts |
//!
//! All loops select on a [`tokio_util::sync::CancellationToken`] first, so
//! cancelling the root token drains every worker before shutdown completes.

pub mod config;
pub mod engine;
pub mod error;
pub mod models;
pub mod services;
pub mod store;
pub mod template;
pub mod workers;

pub use error::{CoreError, Result};
