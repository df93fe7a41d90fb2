use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use thiserror::Error;
use uuid::Uuid;

use lpnflow_events::{Event, EventEnvelope, StreamId};

/// An event ready to be appended to a stream (not yet assigned a sequence number).
///
/// Built from a typed domain event with [`UncommittedEvent::from_typed`], which
/// serializes the payload and captures the metadata needed to decode it later
/// (`event_type`, schema version, business time).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UncommittedEvent {
    pub event_id: Uuid,
    pub stream: StreamId,

    pub event_type: String,
    pub event_version: u32,
    pub occurred_at: DateTime<Utc>,

    pub payload: JsonValue,
}

impl UncommittedEvent {
    pub fn from_typed<E>(stream: &StreamId, event: &E) -> Result<Self, EventStoreError>
    where
        E: Event + Serialize,
    {
        let payload = serde_json::to_value(event).map_err(|e| {
            EventStoreError::Serialization(format!("payload serialization failed: {e}"))
        })?;

        Ok(Self {
            event_id: Uuid::now_v7(),
            stream: stream.clone(),
            event_type: event.event_type().to_string(),
            event_version: event.version(),
            occurred_at: event.occurred_at(),
            payload,
        })
    }
}

/// A persisted event with its position in the stream.
///
/// Sequence numbers start at 1, increase by one per event and never change.
/// The last sequence number of a stream equals the version of the aggregate
/// snapshot committed with it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredEvent {
    pub event_id: Uuid,
    pub stream: StreamId,

    /// Monotonically increasing position in the aggregate stream.
    pub sequence_number: u64,

    pub event_type: String,
    pub event_version: u32,
    pub occurred_at: DateTime<Utc>,

    pub payload: JsonValue,
}

impl StoredEvent {
    pub(crate) fn from_uncommitted(event: UncommittedEvent, sequence_number: u64) -> Self {
        Self {
            event_id: event.event_id,
            stream: event.stream,
            sequence_number,
            event_type: event.event_type,
            event_version: event.event_version,
            occurred_at: event.occurred_at,
            payload: event.payload,
        }
    }

    /// Decode the payload into a typed envelope.
    pub fn decode<E: DeserializeOwned>(&self) -> Result<EventEnvelope<E>, EventStoreError> {
        let payload = serde_json::from_value(self.payload.clone()).map_err(|e| {
            EventStoreError::Serialization(format!(
                "cannot decode {} #{} ({}): {e}",
                self.stream, self.sequence_number, self.event_type
            ))
        })?;

        Ok(EventEnvelope::new(
            self.event_id,
            self.stream.clone(),
            self.sequence_number,
            self.event_type.clone(),
            self.occurred_at,
            payload,
        ))
    }
}

/// Event store operation error.
///
/// Infrastructure failures (storage, concurrency, encoding) as opposed to
/// domain rule violations.
#[derive(Debug, Error)]
pub enum EventStoreError {
    #[error("optimistic concurrency check failed: {0}")]
    Concurrency(String),

    #[error("aggregate type mismatch: {0}")]
    AggregateTypeMismatch(String),

    #[error("invalid append: {0}")]
    InvalidAppend(String),

    #[error("serialization failed: {0}")]
    Serialization(String),

    #[error("storage failure: {0}")]
    Storage(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Pinged {
        at: DateTime<Utc>,
        note: String,
    }

    impl Event for Pinged {
        fn event_type(&self) -> &'static str {
            "test.pinged"
        }

        fn version(&self) -> u32 {
            2
        }

        fn occurred_at(&self) -> DateTime<Utc> {
            self.at
        }
    }

    #[test]
    fn from_typed_captures_metadata_and_decodes_back() {
        let stream = StreamId::new("test.thing", "T-1");
        let event = Pinged {
            at: Utc::now(),
            note: "hello".to_string(),
        };

        let uncommitted = UncommittedEvent::from_typed(&stream, &event).unwrap();
        assert_eq!(uncommitted.event_type, "test.pinged");
        assert_eq!(uncommitted.event_version, 2);

        let stored = StoredEvent::from_uncommitted(uncommitted, 7);
        let envelope = stored.decode::<Pinged>().unwrap();
        assert_eq!(envelope.sequence_number(), 7);
        assert_eq!(envelope.stream(), &stream);
        assert_eq!(envelope.payload(), &event);
    }

    #[test]
    fn decode_into_wrong_type_is_a_serialization_error() {
        let stream = StreamId::new("test.thing", "T-1");
        let event = Pinged {
            at: Utc::now(),
            note: "x".to_string(),
        };
        let stored =
            StoredEvent::from_uncommitted(UncommittedEvent::from_typed(&stream, &event).unwrap(), 1);

        let err = stored.decode::<u64>().unwrap_err();
        assert!(matches!(err, EventStoreError::Serialization(_)));
    }
}
