//! Event contracts shared by the inventory-unit and task aggregates.
//!
//! Events are the audit trail of the engine: each aggregate owns one
//! append-only stream, and every stored fact is wrapped in an [`EventEnvelope`]
//! carrying its stream position.

pub mod envelope;
pub mod event;

pub use envelope::{EventEnvelope, StreamId};
pub use event::Event;
