use std::collections::HashMap;

use lpnflow_core::ExpectedVersion;
use lpnflow_events::StreamId;

use super::record::{EventStoreError, StoredEvent, UncommittedEvent};

/// In-memory append-only stream storage.
///
/// Holds no lock of its own: the owner serializes access (the in-memory
/// repository keeps it behind the same lock as its snapshots so that both are
/// written as one unit).
#[derive(Debug, Default)]
pub struct InMemoryEventLog {
    streams: HashMap<StreamId, Vec<StoredEvent>>,
}

impl InMemoryEventLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn current_version(&self, stream: &StreamId) -> u64 {
        self.streams
            .get(stream)
            .and_then(|events| events.last())
            .map(|e| e.sequence_number)
            .unwrap_or(0)
    }

    /// Validate an append without performing it.
    pub fn check(
        &self,
        stream: &StreamId,
        events: &[UncommittedEvent],
        expected_version: ExpectedVersion,
    ) -> Result<(), EventStoreError> {
        for (idx, e) in events.iter().enumerate() {
            if &e.stream != stream {
                return Err(EventStoreError::InvalidAppend(format!(
                    "batch for {stream} contains an event for {} (index {idx})",
                    e.stream
                )));
            }
        }

        let current = self.current_version(stream);
        if !expected_version.matches(current) {
            return Err(EventStoreError::Concurrency(format!(
                "{stream}: expected {expected_version:?}, found {current}"
            )));
        }
        Ok(())
    }

    /// Append events, assigning sequence numbers from `current_version + 1`.
    pub fn append(
        &mut self,
        stream: &StreamId,
        events: Vec<UncommittedEvent>,
        expected_version: ExpectedVersion,
    ) -> Result<Vec<StoredEvent>, EventStoreError> {
        self.check(stream, &events, expected_version)?;
        if events.is_empty() {
            return Ok(vec![]);
        }

        let mut next = self.current_version(stream) + 1;
        let log = self.streams.entry(stream.clone()).or_default();
        let mut committed = Vec::with_capacity(events.len());
        for e in events {
            let stored = StoredEvent::from_uncommitted(e, next);
            next += 1;
            log.push(stored.clone());
            committed.push(stored);
        }
        Ok(committed)
    }

    pub fn load(&self, stream: &StreamId) -> Vec<StoredEvent> {
        self.streams.get(stream).cloned().unwrap_or_default()
    }
}
