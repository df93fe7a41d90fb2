//! Persistence boundary for the orchestration service.
//!
//! A repository serves current-state snapshots for reads and commits a
//! [`UnitOfWork`] atomically: every staged snapshot is version-checked against
//! the version it was loaded at, then all snapshots are written and all events
//! appended, or nothing is.

pub mod in_memory;
pub mod postgres;
pub mod unit_of_work;

use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

use lpnflow_core::{LocationId, LpnId, Sku, TaskId};
use lpnflow_events::StreamId;
use lpnflow_inventory::InventoryUnit;
use lpnflow_tasks::{InventoryTask, TaskPriority, TaskStatus};

use crate::config::EngineConfig;
use crate::event_store::{EventStoreError, StoredEvent};

pub use in_memory::InMemoryRepository;
pub use postgres::PostgresRepository;
pub use unit_of_work::{Snapshot, StagedChange, Tracked, UnitOfWork};

#[derive(Debug, Error)]
pub enum RepositoryError {
    /// A staged aggregate changed since it was loaded.
    #[error("optimistic concurrency check failed: {0}")]
    Concurrency(String),

    #[error("invalid unit of work: {0}")]
    InvalidUnitOfWork(String),

    #[error("snapshot serialization failed: {0}")]
    Serialization(String),

    #[error("event store error: {0}")]
    EventStore(EventStoreError),

    #[error("storage failure: {0}")]
    Storage(String),
}

impl From<EventStoreError> for RepositoryError {
    fn from(value: EventStoreError) -> Self {
        match value {
            EventStoreError::Concurrency(msg) => RepositoryError::Concurrency(msg),
            other => RepositoryError::EventStore(other),
        }
    }
}

impl RepositoryError {
    pub fn is_concurrency(&self) -> bool {
        matches!(self, RepositoryError::Concurrency(_))
    }
}

/// Predicate over inventory unit snapshots. Fields left `None` match anything.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UnitFilter {
    pub sku: Option<Sku>,
    pub location: Option<LocationId>,
    pub origin_order: Option<String>,
    /// Include Voided/Consumed units.
    pub include_terminal: bool,
}

impl UnitFilter {
    /// Units that still take part in warehouse operations.
    pub fn active() -> Self {
        Self::default()
    }

    pub fn with_sku(mut self, sku: Sku) -> Self {
        self.sku = Some(sku);
        self
    }

    pub fn at_location(mut self, location: LocationId) -> Self {
        self.location = Some(location);
        self
    }

    pub fn from_order(mut self, origin_order: impl Into<String>) -> Self {
        self.origin_order = Some(origin_order.into());
        self
    }

    pub fn matches(&self, unit: &InventoryUnit) -> bool {
        unit.is_created()
            && (self.include_terminal || !unit.status().is_terminal())
            && self.sku.as_ref().is_none_or(|sku| unit.sku() == Some(sku))
            && self
                .location
                .as_ref()
                .is_none_or(|location| unit.location() == Some(location))
            && self
                .origin_order
                .as_deref()
                .is_none_or(|order| unit.origin_order() == Some(order))
    }
}

/// Predicate over task snapshots.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TaskFilter {
    pub status: Option<TaskStatus>,
    pub priority: Option<TaskPriority>,
}

impl TaskFilter {
    pub fn matches(&self, task: &InventoryTask) -> bool {
        self.status.is_none_or(|s| task.status() == s)
            && self.priority.is_none_or(|p| task.priority() == p)
    }
}

/// Repository selected by configuration: Postgres (migrated) when a database
/// URL is set, in-memory otherwise.
pub async fn from_config(config: &EngineConfig) -> anyhow::Result<Arc<dyn Repository>> {
    match &config.database_url {
        Some(url) => {
            let repository = PostgresRepository::connect(url).await?;
            repository.migrate().await?;
            Ok(Arc::new(repository))
        }
        None => Ok(Arc::new(InMemoryRepository::new())),
    }
}

/// Snapshot + event-stream persistence.
#[async_trait]
pub trait Repository: Send + Sync {
    async fn load_unit(&self, lpn_id: &LpnId) -> Result<Option<InventoryUnit>, RepositoryError>;

    async fn load_task(&self, task_id: TaskId) -> Result<Option<InventoryTask>, RepositoryError>;

    async fn query_units(&self, filter: &UnitFilter) -> Result<Vec<InventoryUnit>, RepositoryError>;

    async fn query_tasks(&self, filter: &TaskFilter) -> Result<Vec<InventoryTask>, RepositoryError>;

    /// Full event stream of one aggregate, in sequence order.
    async fn load_stream(&self, stream: &StreamId) -> Result<Vec<StoredEvent>, RepositoryError>;

    /// Atomically persist every staged snapshot and append every staged event.
    ///
    /// Fails with [`RepositoryError::Concurrency`] without writing anything if
    /// any staged aggregate is no longer at its loaded version.
    async fn commit(&self, work: UnitOfWork) -> Result<Vec<StoredEvent>, RepositoryError>;
}

#[async_trait]
impl<R> Repository for Arc<R>
where
    R: Repository + ?Sized,
{
    async fn load_unit(&self, lpn_id: &LpnId) -> Result<Option<InventoryUnit>, RepositoryError> {
        (**self).load_unit(lpn_id).await
    }

    async fn load_task(&self, task_id: TaskId) -> Result<Option<InventoryTask>, RepositoryError> {
        (**self).load_task(task_id).await
    }

    async fn query_units(&self, filter: &UnitFilter) -> Result<Vec<InventoryUnit>, RepositoryError> {
        (**self).query_units(filter).await
    }

    async fn query_tasks(&self, filter: &TaskFilter) -> Result<Vec<InventoryTask>, RepositoryError> {
        (**self).query_tasks(filter).await
    }

    async fn load_stream(&self, stream: &StreamId) -> Result<Vec<StoredEvent>, RepositoryError> {
        (**self).load_stream(stream).await
    }

    async fn commit(&self, work: UnitOfWork) -> Result<Vec<StoredEvent>, RepositoryError> {
        (**self).commit(work).await
    }
}
