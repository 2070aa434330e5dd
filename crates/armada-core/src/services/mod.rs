// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Application services consumed by the HTTP surface.

mod execution;
mod template;
mod worker;

pub use execution::{ExecutionRequest, ExecutionService};
pub use template::TemplateService;
pub use worker::WorkerService;
