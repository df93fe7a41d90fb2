//! Postgres persistence for event streams.
//!
//! Appends run inside a transaction owned by the caller so that the events of
//! a unit of work land together with its snapshots.
//!
//! ## Error Mapping
//!
//! | SQLx Error | PostgreSQL Error Code | EventStoreError |
//! |------------|----------------------|-----------------|
//! | Database (unique violation) | `23505` | `Concurrency` |
//! | Database (check constraint violation) | `23514` | `InvalidAppend` |
//! | Database (other) | Any other | `Storage` |
//! | PoolClosed / other | N/A | `Storage` |

use chrono::{DateTime, Utc};
use sqlx::postgres::PgRow;
use sqlx::{FromRow, PgPool, Postgres, Row, Transaction};
use tracing::instrument;

use lpnflow_core::ExpectedVersion;
use lpnflow_events::StreamId;

use super::record::{EventStoreError, StoredEvent, UncommittedEvent};

pub(crate) const EVENTS_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS events (
    event_id        UUID PRIMARY KEY,
    aggregate_type  TEXT        NOT NULL,
    aggregate_id    TEXT        NOT NULL,
    sequence_number BIGINT      NOT NULL CHECK (sequence_number > 0),
    event_type      TEXT        NOT NULL,
    event_version   INTEGER     NOT NULL,
    occurred_at     TIMESTAMPTZ NOT NULL,
    payload         JSONB       NOT NULL,
    created_at      TIMESTAMPTZ NOT NULL DEFAULT now(),
    UNIQUE (aggregate_type, aggregate_id, sequence_number)
)
"#;

/// Stateless helper over the `events` table.
pub struct PostgresEventLog;

impl PostgresEventLog {
    /// Append events to `stream` inside `tx`, checking `expected_version`
    /// against `MAX(sequence_number)`.
    ///
    /// A concurrent writer that slips past the version check is caught by the
    /// unique constraint on `(aggregate_type, aggregate_id, sequence_number)`.
    #[instrument(
        skip(tx, events),
        fields(stream = %stream, event_count = events.len(), expected_version = ?expected_version),
        err
    )]
    pub async fn append_in_tx(
        tx: &mut Transaction<'_, Postgres>,
        stream: &StreamId,
        events: Vec<UncommittedEvent>,
        expected_version: ExpectedVersion,
    ) -> Result<Vec<StoredEvent>, EventStoreError> {
        if let Some((idx, e)) = events.iter().enumerate().find(|(_, e)| &e.stream != stream) {
            return Err(EventStoreError::InvalidAppend(format!(
                "batch for {stream} contains an event for {} (index {idx})",
                e.stream
            )));
        }

        let current: i64 = sqlx::query(
            r#"
            SELECT COALESCE(MAX(sequence_number), 0) AS current
            FROM events
            WHERE aggregate_type = $1 AND aggregate_id = $2
            "#,
        )
        .bind(&stream.aggregate_type)
        .bind(&stream.aggregate_id)
        .fetch_one(&mut **tx)
        .await
        .map_err(|e| map_sqlx_error("check_stream_version", e))?
        .try_get("current")
        .map_err(|e| map_sqlx_error("check_stream_version", e))?;
        let current = current as u64;

        if !expected_version.matches(current) {
            return Err(EventStoreError::Concurrency(format!(
                "{stream}: expected {expected_version:?}, found {current}"
            )));
        }

        let mut next_sequence = current + 1;
        let mut stored_events = Vec::with_capacity(events.len());
        for event in events {
            sqlx::query(
                r#"
                INSERT INTO events (
                    event_id,
                    aggregate_type,
                    aggregate_id,
                    sequence_number,
                    event_type,
                    event_version,
                    occurred_at,
                    payload
                )
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
                "#,
            )
            .bind(event.event_id)
            .bind(&stream.aggregate_type)
            .bind(&stream.aggregate_id)
            .bind(next_sequence as i64)
            .bind(&event.event_type)
            .bind(event.event_version as i32)
            .bind(event.occurred_at)
            .bind(&event.payload)
            .execute(&mut **tx)
            .await
            .map_err(|e| {
                if is_unique_violation(&e) {
                    EventStoreError::Concurrency(format!(
                        "{stream}: sequence_number {next_sequence} already exists"
                    ))
                } else {
                    map_sqlx_error("insert_event", e)
                }
            })?;

            stored_events.push(StoredEvent::from_uncommitted(event, next_sequence));
            next_sequence += 1;
        }

        Ok(stored_events)
    }

    /// Load a stream in sequence order. Unknown streams are empty.
    #[instrument(skip(pool), fields(stream = %stream), err)]
    pub async fn load(pool: &PgPool, stream: &StreamId) -> Result<Vec<StoredEvent>, EventStoreError> {
        let rows = sqlx::query(
            r#"
            SELECT
                event_id,
                aggregate_type,
                aggregate_id,
                sequence_number,
                event_type,
                event_version,
                occurred_at,
                payload
            FROM events
            WHERE aggregate_type = $1 AND aggregate_id = $2
            ORDER BY sequence_number ASC
            "#,
        )
        .bind(&stream.aggregate_type)
        .bind(&stream.aggregate_id)
        .fetch_all(pool)
        .await
        .map_err(|e| map_sqlx_error("load_stream", e))?;

        rows.iter()
            .map(|row| {
                StoredEventRow::from_row(row)
                    .map(StoredEvent::from)
                    .map_err(|e| {
                        EventStoreError::Storage(format!("failed to read event row: {e}"))
                    })
            })
            .collect()
    }
}

pub(crate) fn map_sqlx_error(operation: &str, err: sqlx::Error) -> EventStoreError {
    match err {
        sqlx::Error::Database(db_err) => {
            let msg = format!("database error in {operation}: {}", db_err.message());
            error_for_sqlstate(db_err.code().as_deref(), msg)
        }
        sqlx::Error::PoolClosed => {
            EventStoreError::Storage(format!("connection pool closed in {operation}"))
        }
        _ => EventStoreError::Storage(format!("sqlx error in {operation}: {err}")),
    }
}

/// Unique violations, serialization failures and deadlocks all mean another
/// writer got there first; they surface as retryable concurrency conflicts.
fn error_for_sqlstate(code: Option<&str>, msg: String) -> EventStoreError {
    match code {
        Some("23505" | "40001" | "40P01") => EventStoreError::Concurrency(msg),
        Some("23514") => EventStoreError::InvalidAppend(msg),
        _ => EventStoreError::Storage(msg),
    }
}

/// Check if an error is a unique constraint violation.
pub(crate) fn is_unique_violation(err: &sqlx::Error) -> bool {
    if let sqlx::Error::Database(db_err) = err {
        if let Some(code) = db_err.code() {
            return code.as_ref() == "23505";
        }
    }
    false
}

// SQLx row types

#[derive(Debug)]
struct StoredEventRow {
    event_id: uuid::Uuid,
    aggregate_type: String,
    aggregate_id: String,
    sequence_number: i64,
    event_type: String,
    event_version: i32,
    occurred_at: DateTime<Utc>,
    payload: serde_json::Value,
}

impl<'r> FromRow<'r, PgRow> for StoredEventRow {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        Ok(StoredEventRow {
            event_id: row.try_get("event_id")?,
            aggregate_type: row.try_get("aggregate_type")?,
            aggregate_id: row.try_get("aggregate_id")?,
            sequence_number: row.try_get("sequence_number")?,
            event_type: row.try_get("event_type")?,
            event_version: row.try_get("event_version")?,
            occurred_at: row.try_get("occurred_at")?,
            payload: row.try_get("payload")?,
        })
    }
}

impl From<StoredEventRow> for StoredEvent {
    fn from(row: StoredEventRow) -> Self {
        StoredEvent {
            event_id: row.event_id,
            stream: StreamId::new(row.aggregate_type, row.aggregate_id),
            sequence_number: row.sequence_number as u64,
            event_type: row.event_type,
            event_version: row.event_version as u32,
            occurred_at: row.occurred_at,
            payload: row.payload,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lost_races_map_to_concurrency() {
        for code in ["23505", "40001", "40P01"] {
            let err = error_for_sqlstate(Some(code), "raced".to_string());
            assert!(matches!(err, EventStoreError::Concurrency(_)), "{code}");
        }
    }

    #[test]
    fn other_sqlstates_are_not_retried() {
        assert!(matches!(
            error_for_sqlstate(Some("23514"), "check".to_string()),
            EventStoreError::InvalidAppend(_)
        ));
        assert!(matches!(
            error_for_sqlstate(Some("42P01"), "missing table".to_string()),
            EventStoreError::Storage(_)
        ));
        assert!(matches!(
            error_for_sqlstate(None, "no code".to_string()),
            EventStoreError::Storage(_)
        ));
    }
}
