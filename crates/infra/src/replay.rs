//! Hydration: rebuilding an aggregate by folding its persisted stream.
//!
//! Replay reads the stream forward, checks that positions are gapless, decodes
//! every event through the closed codec, and only then applies them. A single
//! bad event aborts the whole replay and leaves the target untouched, so a
//! projection can never reflect a partial or reinterpreted history.

use thiserror::Error;
use tracing::{debug, instrument};

use shiptrack_core::Aggregate;
use shiptrack_events::{CodecError, EventCodec, EventEnvelope};

use crate::event_store::{EventStore, EventStoreError, RecordedEvent, StreamId};

#[derive(Debug, Error)]
pub enum HydrationError {
    /// Reading the stream failed (transient or not, per the store error).
    #[error("failed to read stream: {0}")]
    Store(#[from] EventStoreError),

    /// The stream cannot be interpreted; the aggregate must not be used.
    #[error("stream {stream} is corrupted at sequence {sequence_number}: {reason}")]
    Corrupted {
        stream: StreamId,
        sequence_number: u64,
        reason: String,
    },
}

impl HydrationError {
    fn codec(stream: &StreamId, sequence_number: u64, err: CodecError) -> Self {
        HydrationError::Corrupted {
            stream: stream.clone(),
            sequence_number,
            reason: err.to_string(),
        }
    }

    pub fn is_retryable(&self) -> bool {
        match self {
            HydrationError::Store(e) => e.is_retryable(),
            HydrationError::Corrupted { .. } => false,
        }
    }
}

/// Build an aggregate from the full history of its stream.
///
/// An empty or missing stream yields `A::empty(id)` at version 0.
#[instrument(skip(store), fields(stream = tracing::field::Empty), err)]
pub async fn hydrate<A, S>(store: &S, id: A::Id) -> Result<A, HydrationError>
where
    A: Aggregate,
    A::Event: EventCodec,
    S: EventStore + ?Sized,
{
    let stream = StreamId::for_aggregate::<A>(&id);
    tracing::Span::current().record("stream", tracing::field::display(&stream));

    let mut aggregate = A::empty(id);
    let applied = catch_up(store, &stream, &mut aggregate).await?;

    debug!(applied, version = aggregate.version(), "hydrated aggregate");
    Ok(aggregate)
}

/// Apply every event recorded after `aggregate.version()`.
///
/// Returns the number of events applied. On error nothing is applied.
pub async fn catch_up<A, S>(
    store: &S,
    stream: &StreamId,
    aggregate: &mut A,
) -> Result<usize, HydrationError>
where
    A: Aggregate,
    A::Event: EventCodec,
    S: EventStore + ?Sized,
{
    let recorded = store.read_forward(stream, aggregate.version()).await?;
    let decoded = decode_contiguous::<A::Event>(stream, aggregate.version(), &recorded)?;

    for envelope in &decoded {
        aggregate.apply(envelope.payload());
    }

    Ok(decoded.len())
}

/// Read and decode a whole stream, e.g. for inspection.
pub async fn load_history<E, S>(
    store: &S,
    stream: &StreamId,
) -> Result<Vec<EventEnvelope<E>>, HydrationError>
where
    E: EventCodec,
    S: EventStore + ?Sized,
{
    let recorded = store.read_forward(stream, 0).await?;
    decode_contiguous(stream, 0, &recorded)
}

/// Decode events that must directly follow `after_version`, with no gaps.
pub(crate) fn decode_contiguous<E>(
    stream: &StreamId,
    after_version: u64,
    recorded: &[RecordedEvent],
) -> Result<Vec<EventEnvelope<E>>, HydrationError>
where
    E: EventCodec,
{
    let mut expected = after_version;
    let mut decoded = Vec::with_capacity(recorded.len());

    for event in recorded {
        expected += 1;
        if event.sequence_number != expected {
            return Err(HydrationError::Corrupted {
                stream: stream.clone(),
                sequence_number: event.sequence_number,
                reason: format!("expected sequence number {expected}"),
            });
        }

        let envelope = event
            .decode::<E>()
            .map_err(|e| HydrationError::codec(stream, event.sequence_number, e))?;
        decoded.push(envelope);
    }

    Ok(decoded)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use shiptrack_core::{AggregateRoot, ExpectedVersion};
    use chrono::TimeZone;
    use proptest::prelude::*;
    use shiptrack_shipping::{
        Delivered, PickedUp, Shipment, ShipmentEvent, ShipmentId, ShipmentState, ShipmentStatus,
    };
    use uuid::Uuid;

    use crate::event_store::{InMemoryEventStore, UncommittedEvent};

    fn picked_up() -> ShipmentEvent {
        ShipmentEvent::PickedUp(PickedUp {
            occurred_at: Utc::now(),
        })
    }

    fn delivered() -> ShipmentEvent {
        ShipmentEvent::Delivered(Delivered {
            occurred_at: Utc::now(),
        })
    }

    async fn seed(store: &InMemoryEventStore, id: ShipmentId, events: &[ShipmentEvent]) {
        let stream = StreamId::for_aggregate::<Shipment>(&id);
        let batch = events
            .iter()
            .map(|e| UncommittedEvent::from_typed(e).unwrap())
            .collect();
        store
            .append(&stream, ExpectedVersion::Exact(0), batch)
            .await
            .unwrap();
    }

    fn raw(tag: &str, payload: &[u8]) -> UncommittedEvent {
        UncommittedEvent {
            event_id: Uuid::now_v7(),
            event_type: tag.to_string(),
            event_version: 1,
            occurred_at: Utc::now(),
            payload: payload.to_vec(),
        }
    }

    #[tokio::test]
    async fn missing_stream_hydrates_to_default_at_version_zero() {
        let store = InMemoryEventStore::new();
        let shipment: Shipment = hydrate(&store, ShipmentId::generate()).await.unwrap();

        assert_eq!(shipment.version(), 0);
        assert_eq!(shipment.status(), ShipmentStatus::AwaitingPickup);
        assert_eq!(shipment.state().last_event_at(), None);
    }

    #[tokio::test]
    async fn hydrate_folds_every_event_in_order() {
        let store = InMemoryEventStore::new();
        let id = ShipmentId::generate();
        let events = [picked_up(), delivered()];
        seed(&store, id, &events).await;

        let shipment: Shipment = hydrate(&store, id).await.unwrap();

        assert_eq!(shipment.version(), 2);
        assert_eq!(shipment.status(), ShipmentStatus::Delivered);
        assert_eq!(
            shipment.state().last_event_at(),
            Some(shiptrack_events::Event::occurred_at(&events[1]))
        );
    }

    #[tokio::test]
    async fn hydrating_twice_is_identical() {
        let store = InMemoryEventStore::new();
        let id = ShipmentId::generate();
        seed(&store, id, &[picked_up()]).await;

        let first: Shipment = hydrate(&store, id).await.unwrap();
        let second: Shipment = hydrate(&store, id).await.unwrap();

        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn unknown_event_type_aborts_hydration() {
        let store = InMemoryEventStore::new();
        let id = ShipmentId::generate();
        let stream = StreamId::for_aggregate::<Shipment>(&id);
        store
            .append(
                &stream,
                ExpectedVersion::Exact(0),
                vec![
                    UncommittedEvent::from_typed(&picked_up()).unwrap(),
                    raw("Rerouted", br#"{"DateTime":"2024-05-01T09:00:00Z"}"#),
                ],
            )
            .await
            .unwrap();

        let err = hydrate::<Shipment, _>(&store, id).await.unwrap_err();

        match err {
            HydrationError::Corrupted {
                sequence_number, ..
            } => assert_eq!(sequence_number, 2),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn undecodable_payload_aborts_hydration() {
        let store = InMemoryEventStore::new();
        let id = ShipmentId::generate();
        let stream = StreamId::for_aggregate::<Shipment>(&id);
        store
            .append(&stream, ExpectedVersion::Exact(0), vec![raw("PickedUp", b"not json")])
            .await
            .unwrap();

        let err = hydrate::<Shipment, _>(&store, id).await.unwrap_err();
        assert!(matches!(err, HydrationError::Corrupted { .. }));
        assert!(!err.is_retryable());
    }

    #[tokio::test]
    async fn catch_up_leaves_aggregate_untouched_on_error() {
        let store = InMemoryEventStore::new();
        let id = ShipmentId::generate();
        let stream = StreamId::for_aggregate::<Shipment>(&id);
        store
            .append(
                &stream,
                ExpectedVersion::Exact(0),
                vec![
                    UncommittedEvent::from_typed(&picked_up()).unwrap(),
                    raw("Lost", b"{}"),
                ],
            )
            .await
            .unwrap();

        let mut shipment = Shipment::empty(id);
        assert!(catch_up(&store, &stream, &mut shipment).await.is_err());
        assert_eq!(shipment, Shipment::empty(id));
    }

    #[test]
    fn gaps_in_sequence_numbers_are_corruption() {
        let stream = StreamId::new("Shipment-gap");
        let encoded = UncommittedEvent::from_typed(&picked_up()).unwrap();
        let recorded = RecordedEvent {
            event_id: encoded.event_id,
            stream_id: stream.clone(),
            sequence_number: 2,
            event_type: encoded.event_type,
            event_version: 1,
            occurred_at: encoded.occurred_at,
            recorded_at: Utc::now(),
            payload: encoded.payload,
        };

        let err = decode_contiguous::<ShipmentEvent>(&stream, 0, &[recorded]).unwrap_err();
        assert!(matches!(
            err,
            HydrationError::Corrupted { sequence_number: 2, .. }
        ));
    }

    #[tokio::test]
    async fn load_history_returns_typed_envelopes() {
        let store = InMemoryEventStore::new();
        let id = ShipmentId::generate();
        let events = [picked_up(), delivered()];
        seed(&store, id, &events).await;

        let stream = StreamId::for_aggregate::<Shipment>(&id);
        let history: Vec<EventEnvelope<ShipmentEvent>> =
            load_history(&store, &stream).await.unwrap();
        let recorded = store.read_forward(&stream, 0).await.unwrap();

        assert_eq!(history.len(), 2);
        for (envelope, raw) in history.iter().zip(&recorded) {
            assert_eq!(envelope.event_id(), raw.event_id);
            assert_eq!(envelope.recorded_at(), raw.recorded_at);
        }
        assert_eq!(history[0].sequence_number(), 1);
        assert_eq!(history[0].payload(), &events[0]);
        assert_eq!(history[1].payload(), &events[1]);
        assert_eq!(history[1].stream_id(), stream.as_str());
    }

    /// Any catalogue event at any time, in any order: the store holds
    /// history, not decisions, so sequences the guards would reject must
    /// still replay.
    fn any_event() -> impl Strategy<Value = ShipmentEvent> {
        (any::<bool>(), 0i64..4_000_000_000, 0u32..1_000_000_000).prop_map(
            |(picked_up, secs, nanos)| {
                let occurred_at = Utc.timestamp_opt(secs, nanos).unwrap();
                if picked_up {
                    ShipmentEvent::PickedUp(PickedUp { occurred_at })
                } else {
                    ShipmentEvent::Delivered(Delivered { occurred_at })
                }
            },
        )
    }

    proptest! {
        #![proptest_config(ProptestConfig {
            cases: 128,
            ..ProptestConfig::default()
        })]

        /// Property: hydrating the same persisted stream twice yields equal
        /// aggregates whose version is the stream length and whose state is the
        /// plain fold of the events.
        #[test]
        fn persisted_history_hydrates_deterministically(
            events in prop::collection::vec(any_event(), 0..16)
        ) {
            let rt = tokio::runtime::Builder::new_current_thread().build().unwrap();
            let store = InMemoryEventStore::new();
            let id = ShipmentId::generate();
            if !events.is_empty() {
                rt.block_on(seed(&store, id, &events));
            }

            let first: Shipment = rt.block_on(hydrate(&store, id)).unwrap();
            let second: Shipment = rt.block_on(hydrate(&store, id)).unwrap();

            let folded = events
                .iter()
                .fold(ShipmentState::default(), |state, event| state.fold(event));

            prop_assert_eq!(&first, &second);
            prop_assert_eq!(first.version(), events.len() as u64);
            prop_assert_eq!(first.state(), folded);
        }
    }
}
