// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Worker pool configuration rows.

use serde::{Deserialize, Serialize};

use super::WorkerKind;

/// Desired-state record for one worker pool; `(worker_type, engine)` is
/// unique.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Worker {
    /// Which loop this row sizes.
    pub worker_type: WorkerKind,
    /// How many instances of the loop to run per process.
    pub count_per_instance: i64,
    /// The engine the loop serves.
    #[serde(default)]
    pub engine: String,
}

/// All worker rows for one engine.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WorkersList {
    /// Number of rows.
    pub total: i64,
    /// The rows.
    pub workers: Vec<Worker>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_worker_serde() {
        let worker: Worker = serde_json::from_str(
            r#"{"worker_type": "submit", "count_per_instance": 2, "engine": "local"}"#,
        )
        .unwrap();
        assert_eq!(worker.worker_type, WorkerKind::Submit);
        assert_eq!(worker.count_per_instance, 2);

        let json = serde_json::to_value(&worker).unwrap();
        assert_eq!(json["worker_type"], "submit");
    }
}
