//! Transactional unit of work over tracked aggregates and their pending events.

use serde::Serialize;

use lpnflow_core::{Aggregate, AggregateRoot, ExpectedVersion};
use lpnflow_events::{Event, StreamId};
use lpnflow_inventory::InventoryUnit;
use lpnflow_tasks::InventoryTask;

use crate::event_store::UncommittedEvent;

use super::RepositoryError;

/// An aggregate loaded for mutation, remembering the version it was loaded at
/// and every event emitted since.
#[derive(Debug, Clone)]
pub struct Tracked<A: Aggregate> {
    state: A,
    loaded_version: u64,
    pending: Vec<A::Event>,
}

impl<A: Aggregate> Tracked<A> {
    /// Track an aggregate as loaded from storage (or a fresh `empty` one, whose
    /// version 0 means the stream must not exist yet at commit).
    pub fn loaded(state: A) -> Self {
        let loaded_version = state.version();
        Self {
            state,
            loaded_version,
            pending: Vec::new(),
        }
    }

    /// Decide, apply and remember the emitted events.
    pub fn execute(&mut self, command: &A::Command) -> Result<Vec<A::Event>, A::Error> {
        let events = self.state.execute(command)?;
        self.pending.extend(events.iter().cloned());
        Ok(events)
    }

    pub fn state(&self) -> &A {
        &self.state
    }

    pub fn loaded_version(&self) -> u64 {
        self.loaded_version
    }

    pub fn pending(&self) -> &[A::Event] {
        &self.pending
    }

    pub fn is_dirty(&self) -> bool {
        !self.pending.is_empty()
    }

    pub fn into_state(self) -> A {
        self.state
    }
}

/// Current-state snapshot persisted alongside a stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Snapshot {
    Unit(InventoryUnit),
    Task(InventoryTask),
}

impl Snapshot {
    pub fn version(&self) -> u64 {
        match self {
            Snapshot::Unit(unit) => unit.version(),
            Snapshot::Task(task) => task.version(),
        }
    }

    pub fn stream(&self) -> StreamId {
        match self {
            Snapshot::Unit(unit) => StreamId::of(unit),
            Snapshot::Task(task) => StreamId::of(task),
        }
    }
}

/// One aggregate's share of a commit: its new snapshot and the events that
/// produced it from the loaded version.
#[derive(Debug, Clone)]
pub struct StagedChange {
    pub stream: StreamId,
    pub expected_version: ExpectedVersion,
    pub snapshot: Snapshot,
    pub events: Vec<UncommittedEvent>,
}

/// Everything a use case wants persisted, committed all-or-nothing.
#[derive(Debug, Clone, Default)]
pub struct UnitOfWork {
    changes: Vec<StagedChange>,
}

impl UnitOfWork {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stage_unit(&mut self, unit: Tracked<InventoryUnit>) -> Result<(), RepositoryError> {
        self.stage_with(unit, Snapshot::Unit)
    }

    pub fn stage_task(&mut self, task: Tracked<InventoryTask>) -> Result<(), RepositoryError> {
        self.stage_with(task, Snapshot::Task)
    }

    fn stage_with<A>(
        &mut self,
        tracked: Tracked<A>,
        wrap: fn(A) -> Snapshot,
    ) -> Result<(), RepositoryError>
    where
        A: Aggregate,
        A::Event: Event + Serialize,
    {
        if !tracked.is_dirty() {
            return Ok(());
        }

        let stream = StreamId::of(tracked.state());
        if self.changes.iter().any(|c| c.stream == stream) {
            return Err(RepositoryError::InvalidUnitOfWork(format!(
                "{stream} staged twice"
            )));
        }

        let events = tracked
            .pending()
            .iter()
            .map(|e| UncommittedEvent::from_typed(&stream, e))
            .collect::<Result<Vec<_>, _>>()?;
        let expected_version = ExpectedVersion::from_loaded(tracked.loaded_version());

        self.changes.push(StagedChange {
            stream,
            expected_version,
            snapshot: wrap(tracked.into_state()),
            events,
        });
        Ok(())
    }

    pub fn changes(&self) -> &[StagedChange] {
        &self.changes
    }

    /// Staged changes ordered by stream, so that concurrent commits touch
    /// rows in the same order.
    pub fn into_changes(mut self) -> Vec<StagedChange> {
        self.changes.sort_by(|a, b| a.stream.cmp(&b.stream));
        self.changes
    }

    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }

    pub fn event_count(&self) -> usize {
        self.changes.iter().map(|c| c.events.len()).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use lpnflow_core::{ActorId, LocationId, LpnId, Sku};
    use lpnflow_inventory::{ContainerType, LpnCommand, PhysicalAttributes, ReceiveUnit};

    fn received(id: &str) -> Tracked<InventoryUnit> {
        let lpn_id = LpnId::parse(id).unwrap();
        let mut unit = Tracked::loaded(InventoryUnit::empty(lpn_id.clone()));
        unit.execute(&LpnCommand::Receive(ReceiveUnit {
            lpn_id,
            sku: Sku::parse("SKU-1").unwrap(),
            quantity: 3,
            container_type: ContainerType::Pack,
            attributes: PhysicalAttributes::default(),
            location: LocationId::parse("STAGE-01").unwrap(),
            origin_order: None,
            actor: ActorId::parse("system").unwrap(),
            occurred_at: Utc::now(),
        }))
        .unwrap();
        unit
    }

    #[test]
    fn staging_a_new_aggregate_expects_no_stream() {
        let mut uow = UnitOfWork::new();
        uow.stage_unit(received("LPN-1")).unwrap();

        let change = &uow.changes()[0];
        assert_eq!(change.expected_version, ExpectedVersion::NoStream);
        assert_eq!(change.snapshot.version(), 1);
        assert_eq!(change.events[0].event_type, "inventory.lpn.received");
        assert_eq!(change.stream.to_string(), "inventory.lpn/LPN-1");
    }

    #[test]
    fn clean_aggregates_are_skipped() {
        let mut uow = UnitOfWork::new();
        uow.stage_unit(Tracked::loaded(InventoryUnit::empty(LpnId::parse("LPN-1").unwrap())))
            .unwrap();
        assert!(uow.is_empty());
    }

    #[test]
    fn staging_the_same_stream_twice_is_rejected() {
        let mut uow = UnitOfWork::new();
        uow.stage_unit(received("LPN-1")).unwrap();
        let err = uow.stage_unit(received("LPN-1")).unwrap_err();
        assert!(matches!(err, RepositoryError::InvalidUnitOfWork(_)));
    }

    #[test]
    fn changes_come_out_in_stream_order() {
        let mut uow = UnitOfWork::new();
        for id in ["LPN-9", "LPN-2", "LPN-5"] {
            uow.stage_unit(received(id)).unwrap();
        }
        let streams: Vec<String> = uow
            .into_changes()
            .iter()
            .map(|c| c.stream.to_string())
            .collect();
        assert_eq!(
            streams,
            vec!["inventory.lpn/LPN-2", "inventory.lpn/LPN-5", "inventory.lpn/LPN-9"]
        );
    }
}
