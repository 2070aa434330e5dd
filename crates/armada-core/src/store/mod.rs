//! Persistence interfaces and backends.
//!
//! [`StateStore`] is the transactional contract the rest of the core
//! consumes. Two backends implement it: [`PostgresStateStore`] for
//! production and [`SqliteStateStore`] for embedded use and tests.
//!
//! # List semantics
//!
//! Filter keys translate to SQL by convention: a single value is an exact
//! match, multiple values become `IN (...)`, the fixed substring set
//! ([`LIKE_FIELDS`]) becomes `LIKE %v%`, and `_since` / `_until` suffixes
//! become `>` / `<` on the stripped column name. Filter and sort keys are
//! validated against per-table column whitelists; unknown keys are
//! [`CoreError::MalformedInput`] rather than raw SQL.

pub mod postgres;
pub mod sqlite;

pub use postgres::PostgresStateStore;
pub use sqlite::SqliteStateStore;

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::types::Json;

use crate::config::Config;
use crate::error::CoreError;
use crate::models::{
    EnvVar, Run, RunList, RunPatch, RunStatus, Template, TemplateList, Worker, WorkerKind,
    WorkersList,
};

/// Default page size for list queries.
pub const DEFAULT_LIMIT: i64 = 500;
/// Default page offset for list queries.
pub const DEFAULT_OFFSET: i64 = 0;

/// Columns matched by substring rather than equality.
pub const LIKE_FIELDS: [&str; 6] = [
    "image",
    "alias",
    "group_name",
    "command",
    "text",
    "exit_reason",
];

/// Pagination, sorting, and filtering for list queries.
#[derive(Debug, Clone, Default)]
pub struct ListArgs {
    /// Page size; defaults to [`DEFAULT_LIMIT`].
    pub limit: Option<i64>,
    /// Page offset; defaults to [`DEFAULT_OFFSET`].
    pub offset: Option<i64>,
    /// Column to sort by.
    pub sort_by: Option<String>,
    /// `asc` (default) or `desc`.
    pub order: Option<String>,
    /// Filter keys to one or more values.
    pub filters: BTreeMap<String, Vec<String>>,
}

impl ListArgs {
    /// Append a filter value under a key.
    pub fn add_filter(&mut self, key: &str, value: &str) {
        self.filters
            .entry(key.to_string())
            .or_default()
            .push(value.to_string());
    }

    /// Effective page size.
    pub fn limit(&self) -> i64 {
        self.limit.unwrap_or(DEFAULT_LIMIT)
    }

    /// Effective page offset.
    pub fn offset(&self) -> i64 {
        self.offset.unwrap_or(DEFAULT_OFFSET)
    }

    /// Effective sort order, validated.
    pub fn order(&self) -> Result<&'static str, CoreError> {
        match self.order.as_deref() {
            None | Some("asc") => Ok("asc"),
            Some("desc") => Ok("desc"),
            Some(other) => Err(CoreError::MalformedInput(format!(
                "sort order must be asc or desc, got '{other}'"
            ))),
        }
    }
}

/// [`ListArgs`] plus the run-specific engine and env filters.
#[derive(Debug, Clone, Default)]
pub struct ListRunsArgs {
    /// Shared pagination/sort/filter arguments.
    pub list: ListArgs,
    /// Restrict to runs owned by these engines.
    pub engines: Option<Vec<String>>,
    /// Require the run env to contain every `{name, value}` pair.
    pub env_filters: Option<BTreeMap<String, String>>,
}

/// Template lookup by surrogate id or by `(name[, version])`.
#[derive(Debug, Clone, Default)]
pub struct GetTemplateArgs {
    /// Surrogate template id.
    pub template_id: Option<String>,
    /// Logical template name.
    pub template_name: Option<String>,
    /// Version within the name; absent means newest.
    pub template_version: Option<i64>,
}

impl GetTemplateArgs {
    /// Lookup by surrogate id.
    pub fn by_id(template_id: &str) -> Self {
        Self {
            template_id: Some(template_id.to_string()),
            ..Default::default()
        }
    }

    /// Lookup by name, optionally pinned to a version.
    pub fn by_name(template_name: &str, template_version: Option<i64>) -> Self {
        Self {
            template_name: Some(template_name.to_string()),
            template_version,
            ..Default::default()
        }
    }

    /// Human identifier for error messages.
    pub fn identifier(&self) -> String {
        if let Some(id) = &self.template_id {
            return format!("id: {id}");
        }
        match (&self.template_name, self.template_version) {
            (Some(name), Some(version)) => format!("name: {name} and version: {version}"),
            (Some(name), None) => format!("name: {name}"),
            _ => "<unspecified>".to_string(),
        }
    }
}

/// Durable, transactional persistence for templates, runs, and worker
/// configuration.
#[async_trait]
pub trait StateStore: Send + Sync {
    /// Fetch a run by id; [`CoreError::RecordNotFound`] when absent.
    async fn get_run(&self, run_id: &str) -> Result<Run, CoreError>;

    /// Filtered, sorted, paginated run listing with total count.
    async fn list_runs(&self, args: &ListRunsArgs) -> Result<RunList, CoreError>;

    /// Persist a new run, assigning its id.
    async fn create_run(&self, run: Run) -> Result<Run, CoreError>;

    /// Serialized per-run patch: row lock, read, apply non-nil fields,
    /// write. Terminal rows keep their status.
    async fn update_run(&self, run_id: &str, patch: &RunPatch) -> Result<Run, CoreError>;

    /// Fetch a template; [`CoreError::RecordNotFound`] when absent.
    async fn get_template(&self, args: &GetTemplateArgs) -> Result<Template, CoreError>;

    /// Filtered, sorted, paginated template listing with total count.
    async fn list_templates(&self, args: &ListArgs) -> Result<TemplateList, CoreError>;

    /// Persist a new template; [`CoreError::Conflict`] on a duplicate
    /// `(template_name, version)`.
    async fn create_template(&self, template: Template) -> Result<Template, CoreError>;

    /// All worker rows for an engine.
    async fn list_workers(&self, engine: &str) -> Result<WorkersList, CoreError>;

    /// One worker row; [`CoreError::RecordNotFound`] when absent.
    async fn get_worker(&self, kind: WorkerKind, engine: &str) -> Result<Worker, CoreError>;

    /// Serialized update of one worker row's count.
    async fn update_worker(
        &self,
        kind: WorkerKind,
        engine: &str,
        count_per_instance: i64,
    ) -> Result<Worker, CoreError>;

    /// Apply several worker updates, then list the default engine's rows.
    async fn batch_update_workers(&self, updates: &[Worker]) -> Result<WorkersList, CoreError>;

    /// Insert seed worker rows, ignoring rows that already exist.
    async fn init_workers(&self, seeds: &[Worker]) -> Result<(), CoreError>;
}

/// Seed rows for every `(pooled worker kind, engine)` pair: count 1 unless
/// the config overrides it.
pub fn worker_seeds(config: &Config, engine_names: &[String]) -> Vec<Worker> {
    let mut seeds = Vec::new();
    for engine in engine_names {
        for kind in WorkerKind::POOLED {
            seeds.push(Worker {
                worker_type: kind,
                engine: engine.clone(),
                count_per_instance: config.worker_count(engine, kind),
            });
        }
    }
    seeds
}

// ---------------------------------------------------------------------------
// Filter compilation shared by both backends
// ---------------------------------------------------------------------------

/// Typed bind value for a compiled filter.
#[derive(Debug, Clone)]
pub(crate) enum Bind {
    Text(String),
    Int(i64),
    Ts(DateTime<Utc>),
}

/// One compiled filter clause on a whitelisted column.
#[derive(Debug, Clone)]
pub(crate) enum FilterOp {
    Eq(Bind),
    In(Vec<Bind>),
    Like(String),
    Gt(Bind),
    Lt(Bind),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ColumnKind {
    Text,
    Int,
    Timestamp,
}

#[derive(Debug, Clone, Copy)]
pub(crate) enum Table {
    Runs,
    Templates,
}

fn column_kind(table: Table, name: &str) -> Option<ColumnKind> {
    use ColumnKind::*;
    match table {
        Table::Runs => match name {
            "run_id" | "template_id" | "image" | "command" | "status" | "engine"
            | "exit_reason" | "instance_id" | "instance_dns_name" => Some(Text),
            "cpu" | "memory" | "gpu" | "cpu_limit" | "memory_limit" | "exit_code"
            | "active_deadline_seconds" => Some(Int),
            "queued_at" | "started_at" | "finished_at" => Some(Timestamp),
            _ => None,
        },
        Table::Templates => match name {
            "template_id" | "template_name" | "command_template" | "image" | "avatar_uri" => {
                Some(Text)
            }
            "version" | "memory" | "cpu" | "gpu" => Some(Int),
            _ => None,
        },
    }
}

fn parse_bind(kind: ColumnKind, column: &str, value: &str) -> Result<Bind, CoreError> {
    match kind {
        ColumnKind::Text => Ok(Bind::Text(value.to_string())),
        ColumnKind::Int => value.parse().map(Bind::Int).map_err(|_| {
            CoreError::MalformedInput(format!("filter on {column} expects an integer, got '{value}'"))
        }),
        ColumnKind::Timestamp => DateTime::parse_from_rfc3339(value)
            .map(|t| Bind::Ts(t.with_timezone(&Utc)))
            .map_err(|_| {
                CoreError::MalformedInput(format!(
                    "filter on {column} expects an RFC3339 timestamp, got '{value}'"
                ))
            }),
    }
}

/// Translate a filter map into typed clauses, validating every key against
/// the table's columns.
pub(crate) fn compile_filters(
    table: Table,
    filters: &BTreeMap<String, Vec<String>>,
) -> Result<Vec<(String, FilterOp)>, CoreError> {
    let mut compiled = Vec::new();
    for (key, values) in filters {
        if values.is_empty() {
            continue;
        }
        if values.len() > 1 {
            let (column, kind) = validated_column(table, key)?;
            let binds = values
                .iter()
                .map(|v| parse_bind(kind, &column, v))
                .collect::<Result<Vec<_>, _>>()?;
            compiled.push((column, FilterOp::In(binds)));
            continue;
        }

        let value = &values[0];
        if LIKE_FIELDS.contains(&key.as_str()) {
            let (column, _) = validated_column(table, key)?;
            compiled.push((column, FilterOp::Like(format!("%{value}%"))));
        } else if let Some(field) = key.strip_suffix("_since") {
            let (column, kind) = validated_column(table, field)?;
            let bind = parse_bind(kind, &column, value)?;
            compiled.push((column, FilterOp::Gt(bind)));
        } else if let Some(field) = key.strip_suffix("_until") {
            let (column, kind) = validated_column(table, field)?;
            let bind = parse_bind(kind, &column, value)?;
            compiled.push((column, FilterOp::Lt(bind)));
        } else {
            let (column, kind) = validated_column(table, key)?;
            let bind = parse_bind(kind, &column, value)?;
            compiled.push((column, FilterOp::Eq(bind)));
        }
    }
    Ok(compiled)
}

fn validated_column(table: Table, name: &str) -> Result<(String, ColumnKind), CoreError> {
    match column_kind(table, name) {
        Some(kind) => Ok((name.to_string(), kind)),
        None => Err(CoreError::MalformedInput(format!(
            "unknown filter or sort key '{name}'"
        ))),
    }
}

/// Validate a sort column for the table.
pub(crate) fn validated_sort(
    table: Table,
    sort_by: Option<&str>,
) -> Result<Option<String>, CoreError> {
    sort_by
        .map(|name| validated_column(table, name).map(|(column, _)| column))
        .transpose()
}

// ---------------------------------------------------------------------------
// Row mapping shared by both backends
// ---------------------------------------------------------------------------

#[derive(Debug, sqlx::FromRow)]
pub(crate) struct RunRow {
    pub run_id: String,
    pub template_id: Option<String>,
    pub image: String,
    pub command: Option<String>,
    pub status: String,
    pub engine: String,
    pub cpu: Option<i64>,
    pub memory: Option<i64>,
    pub gpu: Option<i64>,
    pub cpu_limit: Option<i64>,
    pub memory_limit: Option<i64>,
    pub env: Option<Json<Vec<EnvVar>>>,
    pub queued_at: Option<DateTime<Utc>>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub exit_code: Option<i64>,
    pub exit_reason: Option<String>,
    pub instance_id: Option<String>,
    pub instance_dns_name: Option<String>,
    pub active_deadline_seconds: Option<i64>,
    pub run_exceptions: Option<Json<Vec<String>>>,
    pub engine_args: Option<Json<serde_json::Value>>,
}

impl TryFrom<RunRow> for Run {
    type Error = CoreError;

    fn try_from(row: RunRow) -> Result<Self, Self::Error> {
        let status: RunStatus = row
            .status
            .parse()
            .map_err(|e: String| CoreError::database("decode", e))?;
        Ok(Run {
            run_id: row.run_id,
            template_id: row.template_id,
            image: row.image,
            command: row.command,
            status,
            engine: row.engine,
            cpu: row.cpu,
            memory: row.memory,
            gpu: row.gpu,
            cpu_limit: row.cpu_limit,
            memory_limit: row.memory_limit,
            env: row.env.map(|j| j.0),
            queued_at: row.queued_at,
            started_at: row.started_at,
            finished_at: row.finished_at,
            exit_code: row.exit_code,
            exit_reason: row.exit_reason,
            instance_id: row.instance_id,
            instance_dns_name: row.instance_dns_name,
            active_deadline_seconds: row.active_deadline_seconds,
            run_exceptions: row.run_exceptions.map(|j| j.0),
            engine_args: row.engine_args.map(|j| j.0),
        })
    }
}

#[derive(Debug, sqlx::FromRow)]
pub(crate) struct TemplateRow {
    pub template_id: String,
    pub template_name: String,
    pub version: i64,
    pub schema: Json<serde_json::Value>,
    pub command_template: String,
    pub defaults: Json<serde_json::Map<String, serde_json::Value>>,
    pub image: String,
    pub memory: Option<i64>,
    pub cpu: Option<i64>,
    pub gpu: Option<i64>,
    pub env: Option<Json<Vec<EnvVar>>>,
    pub ports: Option<Json<Vec<String>>>,
    pub tags: Option<Json<Vec<String>>>,
    pub avatar_uri: Option<String>,
}

impl From<TemplateRow> for Template {
    fn from(row: TemplateRow) -> Self {
        Template {
            template_id: row.template_id,
            template_name: row.template_name,
            version: row.version,
            schema: row.schema.0,
            command_template: row.command_template,
            defaults: row.defaults.0,
            image: row.image,
            memory: row.memory,
            cpu: row.cpu,
            gpu: row.gpu,
            env: row.env.map(|j| j.0),
            ports: row.ports.map(|j| j.0),
            tags: row.tags.map(|j| j.0),
            avatar_uri: row.avatar_uri,
        }
    }
}

#[derive(Debug, sqlx::FromRow)]
pub(crate) struct WorkerRow {
    pub worker_type: String,
    pub count_per_instance: i64,
    pub engine: String,
}

impl TryFrom<WorkerRow> for Worker {
    type Error = CoreError;

    fn try_from(row: WorkerRow) -> Result<Self, Self::Error> {
        let worker_type: WorkerKind = row
            .worker_type
            .parse()
            .map_err(|e: String| CoreError::database("decode", e))?;
        Ok(Worker {
            worker_type,
            count_per_instance: row.count_per_instance,
            engine: row.engine,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_list_args_defaults() {
        let args = ListArgs::default();
        assert_eq!(args.limit(), 500);
        assert_eq!(args.offset(), 0);
        assert_eq!(args.order().unwrap(), "asc");
    }

    #[test]
    fn test_order_validation() {
        let mut args = ListArgs::default();
        args.order = Some("desc".to_string());
        assert_eq!(args.order().unwrap(), "desc");
        args.order = Some("sideways".to_string());
        assert!(args.order().is_err());
    }

    #[test]
    fn test_compile_exact_and_in() {
        let mut filters = BTreeMap::new();
        filters.insert("status".to_string(), vec!["QUEUED".to_string()]);
        filters.insert(
            "engine".to_string(),
            vec!["local".to_string(), "batch".to_string()],
        );
        let compiled = compile_filters(Table::Runs, &filters).unwrap();
        assert_eq!(compiled.len(), 2);
        assert!(matches!(&compiled[0].1, FilterOp::In(v) if v.len() == 2));
        assert!(matches!(&compiled[1].1, FilterOp::Eq(Bind::Text(v)) if v == "QUEUED"));
    }

    #[test]
    fn test_compile_like() {
        let mut filters = BTreeMap::new();
        filters.insert("image".to_string(), vec!["postgres".to_string()]);
        let compiled = compile_filters(Table::Runs, &filters).unwrap();
        assert!(matches!(&compiled[0].1, FilterOp::Like(v) if v == "%postgres%"));
    }

    #[test]
    fn test_compile_since_until() {
        let mut filters = BTreeMap::new();
        filters.insert(
            "started_at_since".to_string(),
            vec!["2025-05-01T00:00:00Z".to_string()],
        );
        filters.insert(
            "started_at_until".to_string(),
            vec!["2025-06-01T00:00:00Z".to_string()],
        );
        let compiled = compile_filters(Table::Runs, &filters).unwrap();
        assert_eq!(compiled.len(), 2);
        let ops: Vec<&str> = compiled
            .iter()
            .map(|(col, op)| {
                assert_eq!(col, "started_at");
                match op {
                    FilterOp::Gt(_) => "gt",
                    FilterOp::Lt(_) => "lt",
                    _ => "other",
                }
            })
            .collect();
        assert!(ops.contains(&"gt") && ops.contains(&"lt"));
    }

    #[test]
    fn test_compile_rejects_unknown_column() {
        let mut filters = BTreeMap::new();
        filters.insert("drop_table".to_string(), vec!["x".to_string()]);
        assert!(matches!(
            compile_filters(Table::Runs, &filters),
            Err(CoreError::MalformedInput(_))
        ));
    }

    #[test]
    fn test_compile_rejects_bad_int() {
        let mut filters = BTreeMap::new();
        filters.insert("exit_code".to_string(), vec!["zero".to_string()]);
        assert!(compile_filters(Table::Runs, &filters).is_err());
    }

    #[test]
    fn test_template_args_identifier() {
        assert_eq!(GetTemplateArgs::by_id("tpl-1").identifier(), "id: tpl-1");
        assert_eq!(
            GetTemplateArgs::by_name("etl", Some(2)).identifier(),
            "name: etl and version: 2"
        );
        assert_eq!(GetTemplateArgs::by_name("etl", None).identifier(), "name: etl");
    }
}
