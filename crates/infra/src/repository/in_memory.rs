use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::{debug, instrument};

use lpnflow_core::{AggregateRoot, LpnId, TaskId};
use lpnflow_events::StreamId;
use lpnflow_inventory::InventoryUnit;
use lpnflow_tasks::InventoryTask;

use crate::event_store::{InMemoryEventLog, StoredEvent};

use super::{Repository, RepositoryError, Snapshot, TaskFilter, UnitFilter, UnitOfWork};

#[derive(Debug, Default)]
struct State {
    units: HashMap<LpnId, InventoryUnit>,
    tasks: HashMap<TaskId, InventoryTask>,
    log: InMemoryEventLog,
}

impl State {
    fn snapshot_version(&self, snapshot: &Snapshot) -> u64 {
        match snapshot {
            Snapshot::Unit(unit) => self.units.get(unit.lpn_id()).map_or(0, |u| u.version()),
            Snapshot::Task(task) => self.tasks.get(task.id()).map_or(0, |t| t.version()),
        }
    }
}

/// In-memory repository.
///
/// Intended for tests/dev. A single async lock covers snapshots and streams,
/// so a commit's version checks and writes cannot interleave with another
/// commit.
#[derive(Debug, Default)]
pub struct InMemoryRepository {
    state: RwLock<State>,
}

impl InMemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Repository for InMemoryRepository {
    async fn load_unit(&self, lpn_id: &LpnId) -> Result<Option<InventoryUnit>, RepositoryError> {
        Ok(self.state.read().await.units.get(lpn_id).cloned())
    }

    async fn load_task(&self, task_id: TaskId) -> Result<Option<InventoryTask>, RepositoryError> {
        Ok(self.state.read().await.tasks.get(&task_id).cloned())
    }

    async fn query_units(&self, filter: &UnitFilter) -> Result<Vec<InventoryUnit>, RepositoryError> {
        let state = self.state.read().await;
        let mut units: Vec<InventoryUnit> = state
            .units
            .values()
            .filter(|u| filter.matches(u))
            .cloned()
            .collect();
        units.sort_by(|a, b| a.lpn_id().cmp(b.lpn_id()));
        Ok(units)
    }

    async fn query_tasks(&self, filter: &TaskFilter) -> Result<Vec<InventoryTask>, RepositoryError> {
        let state = self.state.read().await;
        Ok(state
            .tasks
            .values()
            .filter(|t| filter.matches(t))
            .cloned()
            .collect())
    }

    async fn load_stream(&self, stream: &StreamId) -> Result<Vec<StoredEvent>, RepositoryError> {
        Ok(self.state.read().await.log.load(stream))
    }

    #[instrument(skip(self, work), fields(changes = work.changes().len(), events = work.event_count()), err)]
    async fn commit(&self, work: UnitOfWork) -> Result<Vec<StoredEvent>, RepositoryError> {
        let mut state = self.state.write().await;

        // Check everything first so a failed commit leaves no partial writes.
        for change in work.changes() {
            let current = state.snapshot_version(&change.snapshot);
            if !change.expected_version.matches(current) {
                return Err(RepositoryError::Concurrency(format!(
                    "{}: expected {:?}, found {current}",
                    change.stream, change.expected_version
                )));
            }
            state
                .log
                .check(&change.stream, &change.events, change.expected_version)?;
        }

        let mut committed = Vec::with_capacity(work.event_count());
        for change in work.into_changes() {
            committed.extend(
                state
                    .log
                    .append(&change.stream, change.events, change.expected_version)?,
            );
            match change.snapshot {
                Snapshot::Unit(unit) => {
                    state.units.insert(unit.lpn_id().clone(), unit);
                }
                Snapshot::Task(task) => {
                    state.tasks.insert(task.task_id(), task);
                }
            }
        }

        debug!(committed = committed.len(), "unit of work committed");
        Ok(committed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use lpnflow_core::{ActorId, LocationId, Sku};
    use lpnflow_inventory::{ContainerType, LockToTask, LpnCommand, PhysicalAttributes, ReceiveUnit};

    use crate::repository::Tracked;

    fn receive(id: &str, sku: &str) -> Tracked<InventoryUnit> {
        let lpn_id = LpnId::parse(id).unwrap();
        let mut unit = Tracked::loaded(InventoryUnit::empty(lpn_id.clone()));
        unit.execute(&LpnCommand::Receive(ReceiveUnit {
            lpn_id,
            sku: Sku::parse(sku).unwrap(),
            quantity: 5,
            container_type: ContainerType::Loose,
            attributes: PhysicalAttributes::default(),
            location: LocationId::parse("STAGE-01").unwrap(),
            origin_order: Some("WH/IN/0001".to_string()),
            actor: ActorId::parse("system").unwrap(),
            occurred_at: Utc::now(),
        }))
        .unwrap();
        unit
    }

    fn lock(unit: InventoryUnit) -> Tracked<InventoryUnit> {
        let mut tracked = Tracked::loaded(unit);
        let lpn_id = tracked.state().lpn_id().clone();
        tracked
            .execute(&LpnCommand::LockToTask(LockToTask {
                lpn_id,
                task_id: TaskId::new(),
                occurred_at: Utc::now(),
            }))
            .unwrap();
        tracked
    }

    #[tokio::test]
    async fn commit_writes_snapshots_and_streams_together() {
        let repo = InMemoryRepository::new();
        let mut work = UnitOfWork::new();
        work.stage_unit(receive("LPN-1", "SKU-A")).unwrap();
        work.stage_unit(receive("LPN-2", "SKU-B")).unwrap();

        let committed = repo.commit(work).await.unwrap();
        assert_eq!(committed.len(), 2);

        let unit = repo.load_unit(&LpnId::parse("LPN-1").unwrap()).await.unwrap().unwrap();
        let stream = repo.load_stream(&StreamId::of(&unit)).await.unwrap();
        assert_eq!(stream.len() as u64, unit.version());
    }

    #[tokio::test]
    async fn stale_snapshot_rejects_whole_unit_of_work() {
        let repo = InMemoryRepository::new();
        let mut work = UnitOfWork::new();
        work.stage_unit(receive("LPN-1", "SKU-A")).unwrap();
        repo.commit(work).await.unwrap();

        let loaded = repo.load_unit(&LpnId::parse("LPN-1").unwrap()).await.unwrap().unwrap();

        let mut first = UnitOfWork::new();
        first.stage_unit(lock(loaded.clone())).unwrap();
        repo.commit(first).await.unwrap();

        // Second writer loaded the same version; its fresh unit must not land either.
        let mut second = UnitOfWork::new();
        second.stage_unit(receive("LPN-9", "SKU-A")).unwrap();
        second.stage_unit(lock(loaded)).unwrap();
        let err = repo.commit(second).await.unwrap_err();

        assert!(err.is_concurrency());
        assert!(repo.load_unit(&LpnId::parse("LPN-9").unwrap()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn query_units_filters_by_sku_in_id_order() {
        let repo = InMemoryRepository::new();
        let mut work = UnitOfWork::new();
        work.stage_unit(receive("LPN-1", "SKU-A")).unwrap();
        work.stage_unit(receive("LPN-2", "SKU-B")).unwrap();
        work.stage_unit(receive("LPN-3", "SKU-A")).unwrap();
        repo.commit(work).await.unwrap();

        let units = repo
            .query_units(&UnitFilter::active().with_sku(Sku::parse("SKU-A").unwrap()))
            .await
            .unwrap();
        let ids: Vec<&str> = units.iter().map(|u| u.lpn_id().as_str()).collect();
        assert_eq!(ids, vec!["LPN-1", "LPN-3"]);
    }
}
