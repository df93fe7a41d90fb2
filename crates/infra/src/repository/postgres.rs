//! Postgres-backed repository.
//!
//! Snapshots live in `lpn_snapshots` / `task_snapshots` as JSONB next to a few
//! indexed columns used by queries; events live in `events`. A commit runs in
//! one transaction: every snapshot write is guarded by its loaded version, so a
//! concurrent writer makes the guarded statement affect zero rows and the
//! whole transaction rolls back.

use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use serde::de::DeserializeOwned;
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Postgres, Row, Transaction};
use tracing::{info, instrument};

use lpnflow_core::{ExpectedVersion, LpnId, TaskId};
use lpnflow_events::StreamId;
use lpnflow_inventory::InventoryUnit;
use lpnflow_tasks::InventoryTask;

use crate::event_store::postgres::{EVENTS_SCHEMA, map_sqlx_error};
use crate::event_store::{PostgresEventLog, StoredEvent};

use super::{Repository, RepositoryError, Snapshot, StagedChange, TaskFilter, UnitFilter, UnitOfWork};

const SNAPSHOT_SCHEMA: [&str; 4] = [
    r#"
    CREATE TABLE IF NOT EXISTS lpn_snapshots (
        lpn_id       TEXT PRIMARY KEY,
        sku          TEXT,
        location     TEXT,
        origin_order TEXT,
        terminal     BOOLEAN NOT NULL,
        version      BIGINT  NOT NULL,
        state        JSONB   NOT NULL
    )
    "#,
    "CREATE INDEX IF NOT EXISTS lpn_snapshots_sku_idx ON lpn_snapshots (sku) WHERE NOT terminal",
    r#"
    CREATE TABLE IF NOT EXISTS task_snapshots (
        task_id  UUID PRIMARY KEY,
        number   TEXT   NOT NULL,
        version  BIGINT NOT NULL,
        state    JSONB  NOT NULL
    )
    "#,
    "CREATE INDEX IF NOT EXISTS task_snapshots_number_idx ON task_snapshots (number)",
];

/// Postgres-backed repository.
#[derive(Debug, Clone)]
pub struct PostgresRepository {
    pool: Arc<PgPool>,
}

impl PostgresRepository {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool: Arc::new(pool),
        }
    }

    pub async fn connect(database_url: &str) -> anyhow::Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(10)
            .connect(database_url)
            .await?;
        Ok(Self::new(pool))
    }

    /// Create tables and indexes if missing.
    #[instrument(skip(self), err)]
    pub async fn migrate(&self) -> Result<(), RepositoryError> {
        sqlx::query(EVENTS_SCHEMA)
            .execute(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("migrate_events", e))?;
        for statement in SNAPSHOT_SCHEMA {
            sqlx::query(statement)
                .execute(&*self.pool)
                .await
                .map_err(|e| map_sqlx_error("migrate_snapshots", e))?;
        }
        info!("schema ready");
        Ok(())
    }

    async fn write_snapshot(
        tx: &mut Transaction<'_, Postgres>,
        change: &StagedChange,
    ) -> Result<(), RepositoryError> {
        let expected = match change.expected_version {
            ExpectedVersion::NoStream => None,
            ExpectedVersion::Exact(v) => Some(v as i64),
            ExpectedVersion::Any => {
                return Err(RepositoryError::InvalidUnitOfWork(format!(
                    "{}: snapshot writes need an exact expected version",
                    change.stream
                )));
            }
        };
        let version = change.snapshot.version() as i64;

        let result = match &change.snapshot {
            Snapshot::Unit(unit) => {
                let state = to_json(unit)?;
                let sku = unit.sku().map(|s| s.as_str().to_string());
                let location = unit.location().map(|l| l.as_str().to_string());
                let terminal = unit.status().is_terminal();
                match expected {
                    None => sqlx::query(
                        r#"
                        INSERT INTO lpn_snapshots
                            (lpn_id, sku, location, origin_order, terminal, version, state)
                        VALUES ($1, $2, $3, $4, $5, $6, $7)
                        ON CONFLICT (lpn_id) DO NOTHING
                        "#,
                    )
                    .bind(unit.lpn_id().as_str())
                    .bind(sku)
                    .bind(location)
                    .bind(unit.origin_order())
                    .bind(terminal)
                    .bind(version)
                    .bind(state)
                    .execute(&mut **tx)
                    .await,
                    Some(loaded) => sqlx::query(
                        r#"
                        UPDATE lpn_snapshots
                        SET sku = $2, location = $3, origin_order = $4, terminal = $5,
                            version = $6, state = $7
                        WHERE lpn_id = $1 AND version = $8
                        "#,
                    )
                    .bind(unit.lpn_id().as_str())
                    .bind(sku)
                    .bind(location)
                    .bind(unit.origin_order())
                    .bind(terminal)
                    .bind(version)
                    .bind(state)
                    .bind(loaded)
                    .execute(&mut **tx)
                    .await,
                }
            }
            Snapshot::Task(task) => {
                let state = to_json(task)?;
                let number = task.number().map(|n| n.as_str().to_string()).unwrap_or_default();
                match expected {
                    None => sqlx::query(
                        r#"
                        INSERT INTO task_snapshots (task_id, number, version, state)
                        VALUES ($1, $2, $3, $4)
                        ON CONFLICT (task_id) DO NOTHING
                        "#,
                    )
                    .bind(task.task_id().as_uuid())
                    .bind(number)
                    .bind(version)
                    .bind(state)
                    .execute(&mut **tx)
                    .await,
                    Some(loaded) => sqlx::query(
                        r#"
                        UPDATE task_snapshots
                        SET number = $2, version = $3, state = $4
                        WHERE task_id = $1 AND version = $5
                        "#,
                    )
                    .bind(task.task_id().as_uuid())
                    .bind(number)
                    .bind(version)
                    .bind(state)
                    .bind(loaded)
                    .execute(&mut **tx)
                    .await,
                }
            }
        }
        .map_err(|e| map_sqlx_error("write_snapshot", e))?;

        if result.rows_affected() != 1 {
            return Err(RepositoryError::Concurrency(format!(
                "{}: snapshot moved past {:?}",
                change.stream, change.expected_version
            )));
        }
        Ok(())
    }
}

fn to_json<T: Serialize>(value: &T) -> Result<serde_json::Value, RepositoryError> {
    serde_json::to_value(value).map_err(|e| RepositoryError::Serialization(e.to_string()))
}

fn from_json<T: DeserializeOwned>(value: serde_json::Value) -> Result<T, RepositoryError> {
    serde_json::from_value(value).map_err(|e| RepositoryError::Serialization(e.to_string()))
}

fn states<T: DeserializeOwned>(rows: Vec<sqlx::postgres::PgRow>) -> Result<Vec<T>, RepositoryError> {
    rows.into_iter()
        .map(|row| {
            let state: serde_json::Value = row
                .try_get("state")
                .map_err(|e| RepositoryError::Storage(e.to_string()))?;
            from_json(state)
        })
        .collect()
}

#[async_trait]
impl Repository for PostgresRepository {
    #[instrument(skip(self), fields(lpn_id = %lpn_id), err)]
    async fn load_unit(&self, lpn_id: &LpnId) -> Result<Option<InventoryUnit>, RepositoryError> {
        let row = sqlx::query("SELECT state FROM lpn_snapshots WHERE lpn_id = $1")
            .bind(lpn_id.as_str())
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("load_unit", e))?;
        Ok(states(row.into_iter().collect())?.pop())
    }

    #[instrument(skip(self), fields(task_id = %task_id), err)]
    async fn load_task(&self, task_id: TaskId) -> Result<Option<InventoryTask>, RepositoryError> {
        let row = sqlx::query("SELECT state FROM task_snapshots WHERE task_id = $1")
            .bind(task_id.as_uuid())
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("load_task", e))?;
        Ok(states(row.into_iter().collect())?.pop())
    }

    #[instrument(skip(self), err)]
    async fn query_units(&self, filter: &UnitFilter) -> Result<Vec<InventoryUnit>, RepositoryError> {
        let rows = sqlx::query(
            r#"
            SELECT state FROM lpn_snapshots
            WHERE ($1::TEXT IS NULL OR sku = $1)
              AND ($2::TEXT IS NULL OR location = $2)
              AND ($3::TEXT IS NULL OR origin_order = $3)
              AND ($4 OR NOT terminal)
            ORDER BY lpn_id ASC
            "#,
        )
        .bind(filter.sku.as_ref().map(|s| s.as_str()))
        .bind(filter.location.as_ref().map(|l| l.as_str()))
        .bind(filter.origin_order.as_deref())
        .bind(filter.include_terminal)
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("query_units", e))?;
        states(rows)
    }

    #[instrument(skip(self), err)]
    async fn query_tasks(&self, filter: &TaskFilter) -> Result<Vec<InventoryTask>, RepositoryError> {
        // Status and priority live inside the JSONB state; filter after decoding.
        let rows = sqlx::query("SELECT state FROM task_snapshots")
            .fetch_all(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("query_tasks", e))?;
        let tasks: Vec<InventoryTask> = states(rows)?;
        Ok(tasks.into_iter().filter(|t| filter.matches(t)).collect())
    }

    async fn load_stream(&self, stream: &StreamId) -> Result<Vec<StoredEvent>, RepositoryError> {
        Ok(PostgresEventLog::load(&self.pool, stream).await?)
    }

    #[instrument(skip(self, work), fields(changes = work.changes().len(), events = work.event_count()), err)]
    async fn commit(&self, work: UnitOfWork) -> Result<Vec<StoredEvent>, RepositoryError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("begin_transaction", e))?;

        let mut committed = Vec::with_capacity(work.event_count());
        for change in work.into_changes() {
            // Any early return drops `tx`, which rolls the transaction back.
            Self::write_snapshot(&mut tx, &change).await?;
            committed.extend(
                PostgresEventLog::append_in_tx(
                    &mut tx,
                    &change.stream,
                    change.events,
                    change.expected_version,
                )
                .await?,
            );
        }

        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("commit_transaction", e))?;
        Ok(committed)
    }
}
