// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Template rendering pipeline: payload merge, schema validation, command
//! templating. This gates admission to the execution pipeline.

pub mod render;
pub mod schema;
