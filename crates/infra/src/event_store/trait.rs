use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;
use uuid::Uuid;

use shiptrack_core::ExpectedVersion;
use shiptrack_events::{CodecError, EventCodec, EventEnvelope};
use std::sync::Arc;

use super::stream::StreamId;

/// An event ready to be appended to a stream (not yet assigned a sequence number).
///
/// ## Event Lifecycle
///
/// 1. **Domain event**: Created by the aggregate's `handle()` method
/// 2. **UncommittedEvent**: Encoded through the event codec and given an `event_id`
/// 3. **RecordedEvent**: Persisted with an assigned `sequence_number`
/// 4. **EventEnvelope**: Decoded back into the typed event when read
///
/// The `event_id` is generated once per append attempt. It is what lets a
/// writer whose append outcome is unknown find out afterwards whether its
/// event actually landed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UncommittedEvent {
    pub event_id: Uuid,
    pub event_type: String,
    pub event_version: u32,
    pub occurred_at: DateTime<Utc>,
    pub payload: Vec<u8>,
}

impl UncommittedEvent {
    /// Encode a typed event and give it a fresh time-ordered id.
    pub fn from_typed<E>(event: &E) -> Result<Self, CodecError>
    where
        E: EventCodec,
    {
        let encoded = event.encode()?;

        Ok(Self {
            event_id: Uuid::now_v7(),
            event_type: encoded.event_type,
            event_version: event.version(),
            occurred_at: event.occurred_at(),
            payload: encoded.payload,
        })
    }
}

/// An event persisted in an append-only stream.
///
/// ## Sequence Numbers
///
/// Sequence numbers are assigned by the store during append and are:
/// - **1-based**: the first event of a stream has `sequence_number == 1`
/// - **Gapless**: each event gets the previous number + 1
/// - **Stream-scoped**: numbering restarts for every stream
///
/// So the sequence number of the last event is the stream's tail version.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedEvent {
    pub event_id: Uuid,
    pub stream_id: StreamId,

    /// Position in the stream, starting at 1.
    pub sequence_number: u64,

    pub event_type: String,
    pub event_version: u32,
    pub occurred_at: DateTime<Utc>,
    pub recorded_at: DateTime<Utc>,

    pub payload: Vec<u8>,
}

impl RecordedEvent {
    pub fn stream_version(&self) -> u64 {
        self.sequence_number
    }

    /// Decode the payload into the typed event, keeping the stream metadata.
    pub fn decode<E>(&self) -> Result<EventEnvelope<E>, CodecError>
    where
        E: EventCodec,
    {
        let event = E::decode(&self.event_type, &self.payload)?;
        Ok(EventEnvelope::new(
            self.event_id,
            self.stream_id.as_str(),
            self.sequence_number,
            self.recorded_at,
            event,
        ))
    }
}

/// Event store operation error.
///
/// ## Error Categories
///
/// - **Concurrency**: the stream tail did not match the expected version; nothing was written
/// - **InvalidAppend**: the request itself was malformed (e.g. empty batch)
/// - **Unavailable**: the store could not be reached; for appends the outcome is unknown
/// - **Corrupted**: stored data could not be read back
#[derive(Debug, Error)]
pub enum EventStoreError {
    #[error("optimistic concurrency check failed on {stream}: expected {expected}, found {actual}")]
    Concurrency {
        stream: StreamId,
        expected: ExpectedVersion,
        actual: u64,
    },

    #[error("invalid append: {0}")]
    InvalidAppend(String),

    #[error("event store unavailable: {0}")]
    Unavailable(String),

    #[error("stored events are corrupted: {0}")]
    Corrupted(String),
}

impl EventStoreError {
    /// Whether retrying (after re-reading the stream) can succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            EventStoreError::Concurrency { .. } | EventStoreError::Unavailable(_)
        )
    }
}

/// Append-only, per-stream event log with optimistic concurrency.
///
/// ## Append Semantics
///
/// `append()`:
/// - Succeeds iff the stream's tail version equals `expected` at the moment of append
/// - Assigns sequence numbers starting at `tail + 1`
/// - Persists the batch atomically (all or nothing)
/// - Returns the new tail version
///
/// A stream that has never been written has an implicit tail of 0, so an
/// append to it only fails if `expected` is neither `Any` nor `Exact(0)`.
///
/// ## Read Semantics
///
/// `read_forward()`:
/// - Returns events in append order, starting at the 0-based `from_position`
///   (i.e. events with `sequence_number > from_position`)
/// - Ends at the current tail; it is a finite read, not a subscription
/// - Returns an empty vector if the stream doesn't exist
///
/// Appends to different streams must not interfere with each other.
#[async_trait]
pub trait EventStore: Send + Sync {
    async fn append(
        &self,
        stream: &StreamId,
        expected: ExpectedVersion,
        events: Vec<UncommittedEvent>,
    ) -> Result<u64, EventStoreError>;

    async fn read_forward(
        &self,
        stream: &StreamId,
        from_position: u64,
    ) -> Result<Vec<RecordedEvent>, EventStoreError>;

    /// Current tail version of a stream (0 if it doesn't exist).
    async fn tail_version(&self, stream: &StreamId) -> Result<u64, EventStoreError> {
        let events = self.read_forward(stream, 0).await?;
        Ok(events.last().map(RecordedEvent::stream_version).unwrap_or(0))
    }
}

#[async_trait]
impl<S> EventStore for Arc<S>
where
    S: EventStore + ?Sized,
{
    async fn append(
        &self,
        stream: &StreamId,
        expected: ExpectedVersion,
        events: Vec<UncommittedEvent>,
    ) -> Result<u64, EventStoreError> {
        (**self).append(stream, expected, events).await
    }

    async fn read_forward(
        &self,
        stream: &StreamId,
        from_position: u64,
    ) -> Result<Vec<RecordedEvent>, EventStoreError> {
        (**self).read_forward(stream, from_position).await
    }

    async fn tail_version(&self, stream: &StreamId) -> Result<u64, EventStoreError> {
        (**self).tail_version(stream).await
    }
}
