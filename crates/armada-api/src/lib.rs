// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! HTTP surface for the Armada orchestrator.
//!
//! This crate is glue: request binding, status mapping, CORS. All behavior
//! lives in `armada-core`'s services.

pub mod error;
pub mod routes;

pub use routes::{ApiState, build_router};
