// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! SQLite-backed state store.
//!
//! Used for embedded deployments and the integration test suites. SQLite
//! serializes writers, so the per-row update discipline holds without an
//! explicit row lock.

use std::path::Path;

use async_trait::async_trait;
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::types::Json;
use sqlx::{Sqlite, SqlitePool, QueryBuilder};

use super::{
    Bind, FilterOp, GetTemplateArgs, ListArgs, ListRunsArgs, RunRow, StateStore, Table,
    TemplateRow, WorkerRow, compile_filters, validated_sort,
};
use crate::error::CoreError;
use crate::models::{
    DEFAULT_ENGINE, Run, RunList, RunPatch, Template, TemplateList, Worker, WorkerKind,
    WorkersList,
};

static MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!("./migrations/sqlite");

const RUN_COLUMNS: &str = "run_id, template_id, image, command, status, engine, cpu, memory, \
     gpu, cpu_limit, memory_limit, env, queued_at, started_at, finished_at, exit_code, \
     exit_reason, instance_id, instance_dns_name, active_deadline_seconds, run_exceptions, \
     engine_args";

const TEMPLATE_COLUMNS: &str = "template_id, template_name, version, schema, command_template, \
     defaults, image, memory, cpu, gpu, env, ports, tags, avatar_uri";

/// SQLite-backed state store.
#[derive(Clone)]
pub struct SqliteStateStore {
    pool: SqlitePool,
}

impl SqliteStateStore {
    /// Wrap an existing pool. Callers are responsible for migrations.
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Create and initialize a store from a database file path.
    ///
    /// Creates parent directories and the database file when missing, then
    /// runs all migrations.
    pub async fn from_path(path: impl AsRef<Path>) -> Result<Self, CoreError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)
                .map_err(|e| CoreError::database("create_dir", e))?;
        }
        let url = format!("sqlite:{}?mode=rwc", path.to_string_lossy());
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect(&url)
            .await
            .map_err(|e| CoreError::database("connect", e))?;
        MIGRATOR
            .run(&pool)
            .await
            .map_err(|e| CoreError::database("migrate", e))?;
        Ok(Self { pool })
    }

    /// The underlying pool, for embedders that share it.
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    fn push_run_clauses(qb: &mut QueryBuilder<'_, Sqlite>, args: &ListRunsArgs) {
        if let Some(engines) = &args.engines
            && !engines.is_empty()
        {
            qb.push(" AND engine IN (");
            let mut sep = qb.separated(", ");
            for engine in engines {
                sep.push_bind(engine.clone());
            }
            qb.push(")");
        }
        if let Some(env_filters) = &args.env_filters {
            for (name, value) in env_filters {
                qb.push(
                    " AND EXISTS (SELECT 1 FROM json_each(runs.env) \
                     WHERE json_extract(json_each.value, '$.name') = ",
                );
                qb.push_bind(name.clone());
                qb.push(" AND json_extract(json_each.value, '$.value') = ");
                qb.push_bind(value.clone());
                qb.push(")");
            }
        }
    }

    fn push_filter_clauses(qb: &mut QueryBuilder<'_, Sqlite>, compiled: &[(String, FilterOp)]) {
        for (column, op) in compiled {
            match op {
                FilterOp::Eq(bind) => {
                    qb.push(format!(" AND {column} = "));
                    push_bind_value(qb, bind);
                }
                FilterOp::Like(pattern) => {
                    qb.push(format!(" AND {column} LIKE "));
                    qb.push_bind(pattern.clone());
                }
                FilterOp::Gt(bind) => {
                    qb.push(format!(" AND {column} > "));
                    push_bind_value(qb, bind);
                }
                FilterOp::Lt(bind) => {
                    qb.push(format!(" AND {column} < "));
                    push_bind_value(qb, bind);
                }
                FilterOp::In(binds) => {
                    qb.push(format!(" AND {column} IN ("));
                    let mut sep = qb.separated(", ");
                    for bind in binds {
                        match bind {
                            Bind::Text(v) => sep.push_bind(v.clone()),
                            Bind::Int(v) => sep.push_bind(*v),
                            Bind::Ts(v) => sep.push_bind(*v),
                        };
                    }
                    qb.push(")");
                }
            }
        }
    }

    async fn fetch_run_in_tx(
        tx: &mut sqlx::Transaction<'_, Sqlite>,
        run_id: &str,
    ) -> Result<Run, CoreError> {
        let row: Option<RunRow> =
            sqlx::query_as(&format!("SELECT {RUN_COLUMNS} FROM runs WHERE run_id = ?"))
                .bind(run_id)
                .fetch_optional(&mut **tx)
                .await?;
        row.ok_or_else(|| CoreError::RecordNotFound(format!("run with id: {run_id} not found")))?
            .try_into()
    }

    async fn write_run(
        tx: &mut sqlx::Transaction<'_, Sqlite>,
        run: &Run,
    ) -> Result<(), CoreError> {
        sqlx::query(
            "UPDATE runs SET status = ?2, cpu = ?3, memory = ?4, gpu = ?5, cpu_limit = ?6, \
             memory_limit = ?7, env = ?8, queued_at = ?9, started_at = ?10, finished_at = ?11, \
             exit_code = ?12, exit_reason = ?13, instance_id = ?14, instance_dns_name = ?15, \
             active_deadline_seconds = ?16, run_exceptions = ?17 \
             WHERE run_id = ?1",
        )
        .bind(&run.run_id)
        .bind(run.status.as_str())
        .bind(run.cpu)
        .bind(run.memory)
        .bind(run.gpu)
        .bind(run.cpu_limit)
        .bind(run.memory_limit)
        .bind(run.env.clone().map(Json))
        .bind(run.queued_at)
        .bind(run.started_at)
        .bind(run.finished_at)
        .bind(run.exit_code)
        .bind(&run.exit_reason)
        .bind(&run.instance_id)
        .bind(&run.instance_dns_name)
        .bind(run.active_deadline_seconds)
        .bind(run.run_exceptions.clone().map(Json))
        .execute(&mut **tx)
        .await?;
        Ok(())
    }
}

#[async_trait]
impl StateStore for SqliteStateStore {
    async fn get_run(&self, run_id: &str) -> Result<Run, CoreError> {
        let row: Option<RunRow> =
            sqlx::query_as(&format!("SELECT {RUN_COLUMNS} FROM runs WHERE run_id = ?"))
                .bind(run_id)
                .fetch_optional(&self.pool)
                .await?;
        row.ok_or_else(|| CoreError::RecordNotFound(format!("run with id: {run_id} not found")))?
            .try_into()
    }

    async fn list_runs(&self, args: &ListRunsArgs) -> Result<RunList, CoreError> {
        let compiled = compile_filters(Table::Runs, &args.list.filters)?;
        let sort_by = validated_sort(Table::Runs, args.list.sort_by.as_deref())?;
        let order = args.list.order()?;

        let mut count_qb: QueryBuilder<'_, Sqlite> =
            QueryBuilder::new("SELECT COUNT(*) FROM runs WHERE 1=1");
        Self::push_filter_clauses(&mut count_qb, &compiled);
        Self::push_run_clauses(&mut count_qb, args);
        let total: i64 = count_qb.build_query_scalar().fetch_one(&self.pool).await?;

        let mut qb: QueryBuilder<'_, Sqlite> =
            QueryBuilder::new(format!("SELECT {RUN_COLUMNS} FROM runs WHERE 1=1"));
        Self::push_filter_clauses(&mut qb, &compiled);
        Self::push_run_clauses(&mut qb, args);
        if let Some(sort_by) = sort_by {
            qb.push(format!(" ORDER BY {sort_by} {order}"));
        }
        qb.push(" LIMIT ");
        qb.push_bind(args.list.limit());
        qb.push(" OFFSET ");
        qb.push_bind(args.list.offset());

        let rows: Vec<RunRow> = qb.build_query_as().fetch_all(&self.pool).await?;
        let runs = rows
            .into_iter()
            .map(Run::try_from)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(RunList { total, runs })
    }

    async fn create_run(&self, mut run: Run) -> Result<Run, CoreError> {
        run.ensure_identity();
        sqlx::query(
            "INSERT INTO runs (run_id, template_id, image, command, status, engine, cpu, \
             memory, gpu, cpu_limit, memory_limit, env, queued_at, started_at, finished_at, \
             exit_code, exit_reason, instance_id, instance_dns_name, active_deadline_seconds, \
             run_exceptions, engine_args) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&run.run_id)
        .bind(&run.template_id)
        .bind(&run.image)
        .bind(&run.command)
        .bind(run.status.as_str())
        .bind(&run.engine)
        .bind(run.cpu)
        .bind(run.memory)
        .bind(run.gpu)
        .bind(run.cpu_limit)
        .bind(run.memory_limit)
        .bind(run.env.clone().map(Json))
        .bind(run.queued_at)
        .bind(run.started_at)
        .bind(run.finished_at)
        .bind(run.exit_code)
        .bind(&run.exit_reason)
        .bind(&run.instance_id)
        .bind(&run.instance_dns_name)
        .bind(run.active_deadline_seconds)
        .bind(run.run_exceptions.clone().map(Json))
        .bind(run.engine_args.clone().map(Json))
        .execute(&self.pool)
        .await?;
        Ok(run)
    }

    async fn update_run(&self, run_id: &str, patch: &RunPatch) -> Result<Run, CoreError> {
        let mut tx = self.pool.begin().await?;
        let mut run = Self::fetch_run_in_tx(&mut tx, run_id).await?;
        run.apply(patch);
        Self::write_run(&mut tx, &run).await?;
        tx.commit().await?;
        Ok(run)
    }

    async fn get_template(&self, args: &GetTemplateArgs) -> Result<Template, CoreError> {
        let row: Option<TemplateRow> = if let Some(id) = &args.template_id {
            sqlx::query_as(&format!(
                "SELECT {TEMPLATE_COLUMNS} FROM templates WHERE template_id = ?"
            ))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
        } else if let Some(name) = &args.template_name {
            if let Some(version) = args.template_version {
                sqlx::query_as(&format!(
                    "SELECT {TEMPLATE_COLUMNS} FROM templates \
                     WHERE template_name = ? AND version = ?"
                ))
                .bind(name)
                .bind(version)
                .fetch_optional(&self.pool)
                .await?
            } else {
                sqlx::query_as(&format!(
                    "SELECT {TEMPLATE_COLUMNS} FROM templates \
                     WHERE template_name = ? ORDER BY version DESC LIMIT 1"
                ))
                .bind(name)
                .fetch_optional(&self.pool)
                .await?
            }
        } else {
            None
        };
        row.map(Template::from).ok_or_else(|| {
            CoreError::RecordNotFound(format!("template not found for {}", args.identifier()))
        })
    }

    async fn list_templates(&self, args: &ListArgs) -> Result<TemplateList, CoreError> {
        let compiled = compile_filters(Table::Templates, &args.filters)?;
        let sort_by = validated_sort(Table::Templates, args.sort_by.as_deref())?;
        let order = args.order()?;

        let mut count_qb: QueryBuilder<'_, Sqlite> =
            QueryBuilder::new("SELECT COUNT(*) FROM templates WHERE 1=1");
        Self::push_filter_clauses(&mut count_qb, &compiled);
        let total: i64 = count_qb.build_query_scalar().fetch_one(&self.pool).await?;

        let mut qb: QueryBuilder<'_, Sqlite> =
            QueryBuilder::new(format!("SELECT {TEMPLATE_COLUMNS} FROM templates WHERE 1=1"));
        Self::push_filter_clauses(&mut qb, &compiled);
        if let Some(sort_by) = sort_by {
            qb.push(format!(" ORDER BY {sort_by} {order}"));
        }
        qb.push(" LIMIT ");
        qb.push_bind(args.limit());
        qb.push(" OFFSET ");
        qb.push_bind(args.offset());

        let rows: Vec<TemplateRow> = qb.build_query_as().fetch_all(&self.pool).await?;
        Ok(TemplateList {
            total,
            templates: rows.into_iter().map(Template::from).collect(),
        })
    }

    async fn create_template(&self, mut template: Template) -> Result<Template, CoreError> {
        template.ensure_identity();
        let result = sqlx::query(
            "INSERT INTO templates (template_id, template_name, version, schema, \
             command_template, defaults, image, memory, cpu, gpu, env, ports, tags, avatar_uri) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&template.template_id)
        .bind(&template.template_name)
        .bind(template.version)
        .bind(Json(template.schema.clone()))
        .bind(&template.command_template)
        .bind(Json(template.defaults.clone()))
        .bind(&template.image)
        .bind(template.memory)
        .bind(template.cpu)
        .bind(template.gpu)
        .bind(template.env.clone().map(Json))
        .bind(template.ports.clone().map(Json))
        .bind(template.tags.clone().map(Json))
        .bind(&template.avatar_uri)
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => Ok(template),
            Err(e) if is_unique_violation(&e) => Err(CoreError::Conflict(format!(
                "template with name: {} and version: {} already exists",
                template.template_name, template.version
            ))),
            Err(e) => Err(e.into()),
        }
    }

    async fn list_workers(&self, engine: &str) -> Result<WorkersList, CoreError> {
        let rows: Vec<WorkerRow> = sqlx::query_as(
            "SELECT worker_type, count_per_instance, engine FROM workers WHERE engine = ? \
             ORDER BY worker_type",
        )
        .bind(engine)
        .fetch_all(&self.pool)
        .await?;
        let workers = rows
            .into_iter()
            .map(Worker::try_from)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(WorkersList {
            total: workers.len() as i64,
            workers,
        })
    }

    async fn get_worker(&self, kind: WorkerKind, engine: &str) -> Result<Worker, CoreError> {
        let row: Option<WorkerRow> = sqlx::query_as(
            "SELECT worker_type, count_per_instance, engine FROM workers \
             WHERE worker_type = ? AND engine = ?",
        )
        .bind(kind.as_str())
        .bind(engine)
        .fetch_optional(&self.pool)
        .await?;
        row.ok_or_else(|| {
            CoreError::RecordNotFound(format!(
                "worker with type: {kind} and engine: {engine} not found"
            ))
        })?
        .try_into()
    }

    async fn update_worker(
        &self,
        kind: WorkerKind,
        engine: &str,
        count_per_instance: i64,
    ) -> Result<Worker, CoreError> {
        let mut tx = self.pool.begin().await?;
        let row: Option<WorkerRow> = sqlx::query_as(
            "SELECT worker_type, count_per_instance, engine FROM workers \
             WHERE worker_type = ? AND engine = ?",
        )
        .bind(kind.as_str())
        .bind(engine)
        .fetch_optional(&mut *tx)
        .await?;
        let mut worker: Worker = row
            .ok_or_else(|| {
                CoreError::RecordNotFound(format!(
                    "worker with type: {kind} and engine: {engine} not found"
                ))
            })?
            .try_into()?;
        worker.count_per_instance = count_per_instance;
        sqlx::query(
            "UPDATE workers SET count_per_instance = ?3 WHERE worker_type = ?1 AND engine = ?2",
        )
        .bind(kind.as_str())
        .bind(engine)
        .bind(count_per_instance)
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;
        Ok(worker)
    }

    async fn batch_update_workers(&self, updates: &[Worker]) -> Result<WorkersList, CoreError> {
        for update in updates {
            let engine = if update.engine.is_empty() {
                DEFAULT_ENGINE
            } else {
                update.engine.as_str()
            };
            self.update_worker(update.worker_type, engine, update.count_per_instance)
                .await?;
        }
        self.list_workers(DEFAULT_ENGINE).await
    }

    async fn init_workers(&self, seeds: &[Worker]) -> Result<(), CoreError> {
        for seed in seeds {
            sqlx::query(
                "INSERT INTO workers (worker_type, count_per_instance, engine) \
                 VALUES (?, ?, ?) ON CONFLICT DO NOTHING",
            )
            .bind(seed.worker_type.as_str())
            .bind(seed.count_per_instance)
            .bind(&seed.engine)
            .execute(&self.pool)
            .await?;
        }
        Ok(())
    }
}

fn push_bind_value(qb: &mut QueryBuilder<'_, Sqlite>, bind: &Bind) {
    match bind {
        Bind::Text(v) => qb.push_bind(v.clone()),
        Bind::Int(v) => qb.push_bind(*v),
        Bind::Ts(v) => qb.push_bind(*v),
    };
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(err, sqlx::Error::Database(db) if db.is_unique_violation())
}
