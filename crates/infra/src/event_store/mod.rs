//! Append-only event streams.
//!
//! One stream per aggregate instance, keyed by [`StreamId`](lpnflow_events::StreamId).
//! Streams are never written on their own: the repository appends them in
//! the same unit of work as the aggregate snapshots.

pub mod in_memory;
pub mod postgres;
pub mod record;

pub use in_memory::InMemoryEventLog;
pub use postgres::PostgresEventLog;
pub use record::{EventStoreError, StoredEvent, UncommittedEvent};
