// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Configuration for armada.
//!
//! Configuration is loaded from `ARMADA_`-prefixed environment variables.
//! Worker poll intervals are required; everything else has defaults. Dots in
//! the documented key names map to underscores in the variable names, e.g.
//! `worker.submit_interval` is `ARMADA_WORKER_SUBMIT_INTERVAL`.

use std::collections::HashMap;
use std::time::Duration;

use serde::Deserialize;

use crate::models::WorkerKind;

const ENV_PREFIX: &str = "ARMADA_";
const COUNT_SUFFIX: &str = "_WORKER_COUNT_PER_INSTANCE";

/// Service configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// Database DSN (Postgres in production, `sqlite:...` when embedded).
    pub database_url: String,
    /// HTTP server knobs.
    pub http: HttpConfig,
    /// Poll intervals for the four worker loops.
    pub worker_intervals: WorkerIntervals,
    /// Per-(engine, worker type) pool size overrides used when seeding the
    /// workers table. Unlisted pairs default to 1.
    pub worker_counts: HashMap<(String, WorkerKind), i64>,
    /// Registry credentials for the local engine, keyed by registry host.
    pub registry_auths: HashMap<String, RegistryAuth>,
}

/// HTTP server configuration.
#[derive(Debug, Clone)]
pub struct HttpConfig {
    /// Listen address, e.g. `0.0.0.0:5000`.
    pub listen_address: String,
    /// Read timeout for incoming requests.
    pub read_timeout: Duration,
    /// Write timeout for responses.
    pub write_timeout: Duration,
    /// Allowed CORS origins; `*` allows any.
    pub cors_allowed_origins: Vec<String>,
}

/// Poll intervals for the worker loops. All four are required.
#[derive(Debug, Clone, Copy)]
pub struct WorkerIntervals {
    /// Worker manager reconciliation interval.
    pub manager: Duration,
    /// Submit worker dequeue interval.
    pub submit: Duration,
    /// Retry worker sweep interval.
    pub retry: Duration,
    /// Status worker reconciliation interval.
    pub status: Duration,
}

impl WorkerIntervals {
    /// Interval for a given worker kind.
    pub fn for_kind(&self, kind: WorkerKind) -> Duration {
        match kind {
            WorkerKind::Manager => self.manager,
            WorkerKind::Submit => self.submit,
            WorkerKind::Retry => self.retry,
            WorkerKind::Status => self.status,
        }
    }
}

/// Credentials for one container registry host.
#[derive(Debug, Clone, Deserialize)]
pub struct RegistryAuth {
    /// Registry user name.
    pub user: String,
    /// Registry password or token.
    pub password: String,
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// A required environment variable is missing.
    #[error("missing required environment variable: {0}")]
    MissingEnvVar(String),
    /// A variable was present but unparsable.
    #[error("invalid value for {var}: {details}")]
    InvalidValue {
        /// The offending variable name.
        var: String,
        /// What went wrong.
        details: String,
    },
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        let database_url = require("ARMADA_DATABASE_URL")?;

        let http = HttpConfig {
            listen_address: std::env::var("ARMADA_HTTP_LISTEN_ADDRESS")
                .unwrap_or_else(|_| "0.0.0.0:5000".to_string()),
            read_timeout: Duration::from_secs(env_u64("ARMADA_HTTP_READ_TIMEOUT_SECONDS", 5)?),
            write_timeout: Duration::from_secs(env_u64("ARMADA_HTTP_WRITE_TIMEOUT_SECONDS", 10)?),
            cors_allowed_origins: std::env::var("ARMADA_HTTP_CORS_ALLOWED_ORIGINS")
                .unwrap_or_else(|_| "*".to_string())
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect(),
        };

        let worker_intervals = WorkerIntervals {
            manager: require_interval("ARMADA_WORKER_MANAGER_INTERVAL")?,
            submit: require_interval("ARMADA_WORKER_SUBMIT_INTERVAL")?,
            retry: require_interval("ARMADA_WORKER_RETRY_INTERVAL")?,
            status: require_interval("ARMADA_WORKER_STATUS_INTERVAL")?,
        };

        let registry_auths = match std::env::var("ARMADA_LOCAL_REGISTRY_AUTHS") {
            Ok(raw) if !raw.trim().is_empty() => serde_json::from_str(&raw).map_err(|e| {
                ConfigError::InvalidValue {
                    var: "ARMADA_LOCAL_REGISTRY_AUTHS".to_string(),
                    details: e.to_string(),
                }
            })?,
            _ => HashMap::new(),
        };

        Ok(Self {
            database_url,
            http,
            worker_intervals,
            worker_counts: scan_worker_counts()?,
            registry_auths,
        })
    }

    /// Desired pool size for `(engine, kind)`, defaulting to 1.
    pub fn worker_count(&self, engine: &str, kind: WorkerKind) -> i64 {
        self.worker_counts
            .get(&(engine.to_string(), kind))
            .copied()
            .unwrap_or(1)
    }
}

fn require(var: &str) -> Result<String, ConfigError> {
    std::env::var(var).map_err(|_| ConfigError::MissingEnvVar(var.to_string()))
}

fn require_interval(var: &str) -> Result<Duration, ConfigError> {
    let raw = require(var)?;
    parse_duration(&raw).map_err(|details| ConfigError::InvalidValue {
        var: var.to_string(),
        details,
    })
}

fn env_u64(var: &str, default: u64) -> Result<u64, ConfigError> {
    match std::env::var(var) {
        Ok(raw) => raw.parse().map_err(|_| ConfigError::InvalidValue {
            var: var.to_string(),
            details: format!("expected an integer, got '{raw}'"),
        }),
        Err(_) => Ok(default),
    }
}

/// Discover `ARMADA_WORKER_<ENGINE>_<TYPE>_WORKER_COUNT_PER_INSTANCE`
/// overrides from the environment.
fn scan_worker_counts() -> Result<HashMap<(String, WorkerKind), i64>, ConfigError> {
    let mut counts = HashMap::new();
    for (key, value) in std::env::vars() {
        let Some(rest) = key
            .strip_prefix(ENV_PREFIX)
            .and_then(|k| k.strip_prefix("WORKER_"))
            .and_then(|k| k.strip_suffix(COUNT_SUFFIX))
        else {
            continue;
        };
        // Remainder is <ENGINE>_<TYPE>; the type is the last segment.
        let Some((engine, kind)) = rest.rsplit_once('_') else {
            continue;
        };
        let Ok(kind) = kind.to_ascii_lowercase().parse::<WorkerKind>() else {
            continue;
        };
        let count: i64 = value.parse().map_err(|_| ConfigError::InvalidValue {
            var: key.clone(),
            details: format!("expected an integer, got '{value}'"),
        })?;
        counts.insert((engine.to_ascii_lowercase(), kind), count);
    }
    Ok(counts)
}

/// Parse a duration of the form `<number><unit>` with unit one of
/// `ms`, `s`, `m`, `h`.
pub fn parse_duration(raw: &str) -> Result<Duration, String> {
    let raw = raw.trim();
    let split = raw
        .find(|c: char| !c.is_ascii_digit())
        .ok_or_else(|| format!("duration '{raw}' is missing a unit (ms, s, m, h)"))?;
    let (digits, unit) = raw.split_at(split);
    let value: u64 = digits
        .parse()
        .map_err(|_| format!("duration '{raw}' has no leading number"))?;
    match unit {
        "ms" => Ok(Duration::from_millis(value)),
        "s" => Ok(Duration::from_secs(value)),
        "m" => Ok(Duration::from_secs(value * 60)),
        "h" => Ok(Duration::from_secs(value * 3600)),
        other => Err(format!("unknown duration unit '{other}' in '{raw}'")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::env;
    use std::sync::Mutex;

    // Mutex to serialize tests that modify environment variables
    static ENV_MUTEX: Mutex<()> = Mutex::new(());

    /// Helper to set env vars for a test and restore them after
    struct EnvGuard {
        vars: Vec<(String, Option<String>)>,
    }

    impl EnvGuard {
        fn new() -> Self {
            Self { vars: Vec::new() }
        }

        fn set(&mut self, key: &str, value: &str) {
            let old = env::var(key).ok();
            self.vars.push((key.to_string(), old));
            // SAFETY: Tests are serialized via ENV_MUTEX, so no concurrent access
            unsafe { env::set_var(key, value) };
        }

        fn remove(&mut self, key: &str) {
            let old = env::var(key).ok();
            self.vars.push((key.to_string(), old));
            // SAFETY: Tests are serialized via ENV_MUTEX, so no concurrent access
            unsafe { env::remove_var(key) };
        }
    }

    impl Drop for EnvGuard {
        fn drop(&mut self) {
            for (key, value) in self.vars.drain(..).rev() {
                // SAFETY: Tests are serialized via ENV_MUTEX, so no concurrent access
                unsafe {
                    match value {
                        Some(v) => env::set_var(&key, v),
                        None => env::remove_var(&key),
                    }
                }
            }
        }
    }

    fn set_required(guard: &mut EnvGuard) {
        guard.set("ARMADA_DATABASE_URL", "postgres://localhost/armada");
        guard.set("ARMADA_WORKER_MANAGER_INTERVAL", "1s");
        guard.set("ARMADA_WORKER_SUBMIT_INTERVAL", "500ms");
        guard.set("ARMADA_WORKER_RETRY_INTERVAL", "2s");
        guard.set("ARMADA_WORKER_STATUS_INTERVAL", "10s");
    }

    #[test]
    fn test_parse_duration() {
        assert_eq!(parse_duration("250ms").unwrap(), Duration::from_millis(250));
        assert_eq!(parse_duration("5s").unwrap(), Duration::from_secs(5));
        assert_eq!(parse_duration("2m").unwrap(), Duration::from_secs(120));
        assert_eq!(parse_duration("1h").unwrap(), Duration::from_secs(3600));
        assert_eq!(parse_duration(" 10s ").unwrap(), Duration::from_secs(10));
    }

    #[test]
    fn test_parse_duration_rejects_garbage() {
        assert!(parse_duration("10").is_err());
        assert!(parse_duration("s").is_err());
        assert!(parse_duration("10d").is_err());
        assert!(parse_duration("").is_err());
    }

    #[test]
    fn test_from_env_defaults() {
        let _lock = ENV_MUTEX.lock().unwrap();
        let mut guard = EnvGuard::new();
        set_required(&mut guard);
        guard.remove("ARMADA_HTTP_LISTEN_ADDRESS");
        guard.remove("ARMADA_HTTP_CORS_ALLOWED_ORIGINS");
        guard.remove("ARMADA_LOCAL_REGISTRY_AUTHS");

        let config = Config::from_env().unwrap();

        assert_eq!(config.database_url, "postgres://localhost/armada");
        assert_eq!(config.http.listen_address, "0.0.0.0:5000");
        assert_eq!(config.http.read_timeout, Duration::from_secs(5));
        assert_eq!(config.http.write_timeout, Duration::from_secs(10));
        assert_eq!(config.http.cors_allowed_origins, vec!["*".to_string()]);
        assert_eq!(config.worker_intervals.submit, Duration::from_millis(500));
        assert_eq!(config.worker_count("local", WorkerKind::Submit), 1);
        assert!(config.registry_auths.is_empty());
    }

    #[test]
    fn test_from_env_missing_database_url() {
        let _lock = ENV_MUTEX.lock().unwrap();
        let mut guard = EnvGuard::new();
        set_required(&mut guard);
        guard.remove("ARMADA_DATABASE_URL");

        let err = Config::from_env().unwrap_err();
        assert!(err.to_string().contains("ARMADA_DATABASE_URL"));
    }

    #[test]
    fn test_from_env_missing_interval() {
        let _lock = ENV_MUTEX.lock().unwrap();
        let mut guard = EnvGuard::new();
        set_required(&mut guard);
        guard.remove("ARMADA_WORKER_STATUS_INTERVAL");

        let err = Config::from_env().unwrap_err();
        assert!(err.to_string().contains("ARMADA_WORKER_STATUS_INTERVAL"));
    }

    #[test]
    fn test_worker_count_overrides() {
        let _lock = ENV_MUTEX.lock().unwrap();
        let mut guard = EnvGuard::new();
        set_required(&mut guard);
        guard.set("ARMADA_WORKER_LOCAL_SUBMIT_WORKER_COUNT_PER_INSTANCE", "3");
        guard.set("ARMADA_WORKER_LOCAL_STATUS_WORKER_COUNT_PER_INSTANCE", "2");

        let config = Config::from_env().unwrap();

        assert_eq!(config.worker_count("local", WorkerKind::Submit), 3);
        assert_eq!(config.worker_count("local", WorkerKind::Status), 2);
        assert_eq!(config.worker_count("local", WorkerKind::Retry), 1);
    }

    #[test]
    fn test_registry_auths() {
        let _lock = ENV_MUTEX.lock().unwrap();
        let mut guard = EnvGuard::new();
        set_required(&mut guard);
        guard.set(
            "ARMADA_LOCAL_REGISTRY_AUTHS",
            r#"{"registry.internal":{"user":"ci","password":"hunter2"}}"#,
        );

        let config = Config::from_env().unwrap();

        let auth = config.registry_auths.get("registry.internal").unwrap();
        assert_eq!(auth.user, "ci");
        assert_eq!(auth.password, "hunter2");
    }

    #[test]
    fn test_invalid_worker_count() {
        let _lock = ENV_MUTEX.lock().unwrap();
        let mut guard = EnvGuard::new();
        set_required(&mut guard);
        guard.set(
            "ARMADA_WORKER_LOCAL_SUBMIT_WORKER_COUNT_PER_INSTANCE",
            "many",
        );

        assert!(Config::from_env().is_err());
    }
}
