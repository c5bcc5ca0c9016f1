//! Postgres-backed event store implementation.
//!
//! Events live in one table keyed by `(stream_id, sequence_number)`, so the
//! database itself rejects two writers claiming the same position.
//!
//! ## Error Mapping
//!
//! | SQLx Error | PostgreSQL Error Code | EventStoreError | Scenario |
//! |------------|----------------------|-----------------|----------|
//! | Database (unique violation on the primary key) | `23505` | `Concurrency` | Concurrent append won the race for the same position |
//! | Database (unique violation on `event_id`) | `23505` | `InvalidAppend` | The same event was submitted twice |
//! | Database (other) | Any other | `InvalidAppend` | Constraint or data errors |
//! | Io / Tls / PoolTimedOut / PoolClosed | N/A | `Unavailable` | Network or pool failures (append outcome unknown) |
//! | ColumnDecode / Decode / row mapping | N/A | `Corrupted` | Stored rows cannot be read back |
//!
//! ## Thread Safety
//!
//! `PostgresEventStore` is `Send + Sync` and can be shared across tasks; the
//! SQLx pool handles connection management.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::{PgPool, Postgres, Row, Transaction};
use tracing::{debug, instrument, warn};

use shiptrack_core::ExpectedVersion;

use super::r#trait::{EventStore, EventStoreError, RecordedEvent, UncommittedEvent};
use super::stream::StreamId;

const EVENT_ID_CONSTRAINT: &str = "event_log_event_id_key";

/// Postgres-backed append-only event store.
///
/// ## Optimistic Concurrency
///
/// `append()` runs in a transaction that:
/// 1. Reads the current tail (`MAX(sequence_number)`)
/// 2. Compares it with `expected`
/// 3. Inserts the batch at `tail + 1 ..`
///
/// If another transaction commits between steps 1 and 3, the primary key on
/// `(stream_id, sequence_number)` makes the insert fail and the append is
/// reported as a concurrency conflict.
#[derive(Debug, Clone)]
pub struct PostgresEventStore {
    pool: PgPool,
}

impl PostgresEventStore {
    /// Create a store over an existing connection pool.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Connect a pool and make sure the event table exists.
    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self, EventStoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await
            .map_err(|e| map_sqlx_error("connect", e))?;

        let store = Self::new(pool);
        store.ensure_schema().await?;
        Ok(store)
    }

    /// Create the event table if it is missing.
    pub async fn ensure_schema(&self) -> Result<(), EventStoreError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS event_log (
                stream_id       TEXT        NOT NULL,
                sequence_number BIGINT      NOT NULL CHECK (sequence_number > 0),
                event_id        UUID        NOT NULL UNIQUE,
                event_type      TEXT        NOT NULL,
                event_version   INTEGER     NOT NULL,
                occurred_at     TIMESTAMPTZ NOT NULL,
                payload         BYTEA       NOT NULL,
                recorded_at     TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                PRIMARY KEY (stream_id, sequence_number)
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("ensure_schema", e))?;

        Ok(())
    }
}

#[async_trait]
impl EventStore for PostgresEventStore {
    #[instrument(
        skip(self, events),
        fields(stream = %stream, event_count = events.len(), expected = %expected),
        err
    )]
    async fn append(
        &self,
        stream: &StreamId,
        expected: ExpectedVersion,
        events: Vec<UncommittedEvent>,
    ) -> Result<u64, EventStoreError> {
        if events.is_empty() {
            return Err(EventStoreError::InvalidAppend(format!(
                "empty batch for {stream}"
            )));
        }

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("begin_transaction", e))?;

        let current = current_version(&mut tx, stream).await?;

        if !expected.matches(current) {
            tx.rollback()
                .await
                .map_err(|e| map_sqlx_error("rollback", e))?;
            return Err(EventStoreError::Concurrency {
                stream: stream.clone(),
                expected,
                actual: current,
            });
        }

        let mut next = current + 1;
        for event in events {
            let sequence_number = to_db_int(next)?;

            let inserted = sqlx::query(
                r#"
                INSERT INTO event_log (
                    stream_id,
                    sequence_number,
                    event_id,
                    event_type,
                    event_version,
                    occurred_at,
                    payload
                )
                VALUES ($1, $2, $3, $4, $5, $6, $7)
                "#,
            )
            .bind(stream.as_str())
            .bind(sequence_number)
            .bind(event.event_id)
            .bind(&event.event_type)
            .bind(i32::try_from(event.event_version).map_err(|_| {
                EventStoreError::InvalidAppend(format!(
                    "event_version {} out of range",
                    event.event_version
                ))
            })?)
            .bind(event.occurred_at)
            .bind(&event.payload)
            .execute(&mut *tx)
            .await;

            if let Err(e) = inserted {
                if is_position_taken(&e) {
                    // The transaction is aborted; learn the real tail outside it.
                    drop(tx);
                    let actual = self.tail_version(stream).await?;
                    warn!(stream = %stream, next, actual, "lost append race");
                    return Err(EventStoreError::Concurrency {
                        stream: stream.clone(),
                        expected,
                        actual,
                    });
                }
                return Err(map_sqlx_error("insert_event", e));
            }

            next += 1;
        }

        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("commit_transaction", e))?;

        let tail = next - 1;
        debug!(tail, "appended events");
        Ok(tail)
    }

    #[instrument(skip(self), fields(stream = %stream), err)]
    async fn read_forward(
        &self,
        stream: &StreamId,
        from_position: u64,
    ) -> Result<Vec<RecordedEvent>, EventStoreError> {
        let rows = sqlx::query(
            r#"
            SELECT
                stream_id,
                sequence_number,
                event_id,
                event_type,
                event_version,
                occurred_at,
                payload,
                recorded_at
            FROM event_log
            WHERE stream_id = $1 AND sequence_number > $2
            ORDER BY sequence_number ASC
            "#,
        )
        .bind(stream.as_str())
        .bind(to_db_int(from_position)?)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("read_forward", e))?;

        let events = rows
            .iter()
            .map(recorded_event_from_row)
            .collect::<Result<Vec<_>, _>>()?;

        debug!(event_count = events.len(), "read stream");
        Ok(events)
    }

    async fn tail_version(&self, stream: &StreamId) -> Result<u64, EventStoreError> {
        let row = sqlx::query(
            "SELECT COALESCE(MAX(sequence_number), 0) AS tail FROM event_log WHERE stream_id = $1",
        )
        .bind(stream.as_str())
        .fetch_one(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("tail_version", e))?;

        read_tail(&row)
    }
}

/// Current tail of a stream inside an open transaction (0 if it doesn't exist).
async fn current_version(
    tx: &mut Transaction<'_, Postgres>,
    stream: &StreamId,
) -> Result<u64, EventStoreError> {
    let row = sqlx::query(
        "SELECT COALESCE(MAX(sequence_number), 0) AS tail FROM event_log WHERE stream_id = $1",
    )
    .bind(stream.as_str())
    .fetch_one(&mut **tx)
    .await
    .map_err(|e| map_sqlx_error("current_version", e))?;

    read_tail(&row)
}

fn read_tail(row: &PgRow) -> Result<u64, EventStoreError> {
    let tail: i64 = row
        .try_get("tail")
        .map_err(|e| EventStoreError::Corrupted(format!("failed to read tail: {e}")))?;
    from_db_int(tail)
}

fn recorded_event_from_row(row: &PgRow) -> Result<RecordedEvent, EventStoreError> {
    let corrupted = |e: sqlx::Error| EventStoreError::Corrupted(format!("bad event row: {e}"));

    let stream_id: String = row.try_get("stream_id").map_err(corrupted)?;
    let sequence_number: i64 = row.try_get("sequence_number").map_err(corrupted)?;
    let event_version: i32 = row.try_get("event_version").map_err(corrupted)?;
    let occurred_at: DateTime<Utc> = row.try_get("occurred_at").map_err(corrupted)?;
    let recorded_at: DateTime<Utc> = row.try_get("recorded_at").map_err(corrupted)?;

    Ok(RecordedEvent {
        event_id: row.try_get("event_id").map_err(corrupted)?,
        stream_id: StreamId::new(stream_id),
        sequence_number: from_db_int(sequence_number)?,
        event_type: row.try_get("event_type").map_err(corrupted)?,
        event_version: u32::try_from(event_version).map_err(|_| {
            EventStoreError::Corrupted(format!("negative event_version {event_version}"))
        })?,
        occurred_at,
        recorded_at,
        payload: row.try_get("payload").map_err(corrupted)?,
    })
}

fn to_db_int(value: u64) -> Result<i64, EventStoreError> {
    i64::try_from(value)
        .map_err(|_| EventStoreError::InvalidAppend(format!("version {value} out of range")))
}

fn from_db_int(value: i64) -> Result<u64, EventStoreError> {
    u64::try_from(value)
        .map_err(|_| EventStoreError::Corrupted(format!("negative sequence number {value}")))
}

/// Map SQLx errors to EventStoreError.
fn map_sqlx_error(operation: &str, err: sqlx::Error) -> EventStoreError {
    match err {
        sqlx::Error::Database(db_err) => {
            let msg = format!("database error in {operation}: {}", db_err.message());
            if db_err.constraint() == Some(EVENT_ID_CONSTRAINT) {
                EventStoreError::InvalidAppend(format!("duplicate event_id ({msg})"))
            } else {
                EventStoreError::InvalidAppend(msg)
            }
        }
        sqlx::Error::Io(_)
        | sqlx::Error::Tls(_)
        | sqlx::Error::PoolTimedOut
        | sqlx::Error::PoolClosed
        | sqlx::Error::WorkerCrashed => {
            EventStoreError::Unavailable(format!("{operation}: {err}"))
        }
        sqlx::Error::ColumnDecode { .. } | sqlx::Error::Decode(_) => {
            EventStoreError::Corrupted(format!("{operation}: {err}"))
        }
        _ => EventStoreError::Unavailable(format!("sqlx error in {operation}: {err}")),
    }
}

/// Whether an insert failed because another writer already holds that position.
fn is_position_taken(err: &sqlx::Error) -> bool {
    if let sqlx::Error::Database(db_err) = err {
        let unique = db_err.code().as_deref() == Some("23505");
        return unique && db_err.constraint() != Some(EVENT_ID_CONSTRAINT);
    }
    false
}
