use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;
use chrono::Utc;
use tracing::debug;

use shiptrack_core::ExpectedVersion;

use super::r#trait::{EventStore, EventStoreError, RecordedEvent, UncommittedEvent};
use super::stream::StreamId;

/// In-memory append-only event store.
///
/// Intended for tests/dev. Not optimized for performance. The write lock makes
/// each append a compare-and-set on the stream tail.
#[derive(Debug, Default)]
pub struct InMemoryEventStore {
    streams: RwLock<HashMap<StreamId, Vec<RecordedEvent>>>,
}

impl InMemoryEventStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of events currently stored for `stream`.
    pub fn stream_len(&self, stream: &StreamId) -> Result<usize, EventStoreError> {
        let streams = self
            .streams
            .read()
            .map_err(|_| EventStoreError::Unavailable("lock poisoned".to_string()))?;
        Ok(streams.get(stream).map(Vec::len).unwrap_or(0))
    }

    fn current_version(stream: &[RecordedEvent]) -> u64 {
        stream.last().map(|e| e.sequence_number).unwrap_or(0)
    }
}

#[async_trait]
impl EventStore for InMemoryEventStore {
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

        let mut streams = self
            .streams
            .write()
            .map_err(|_| EventStoreError::Unavailable("lock poisoned".to_string()))?;

        let current = streams
            .get(stream)
            .map(|s| Self::current_version(s))
            .unwrap_or(0);

        if !expected.matches(current) {
            return Err(EventStoreError::Concurrency {
                stream: stream.clone(),
                expected,
                actual: current,
            });
        }

        let log = streams.entry(stream.clone()).or_default();
        let recorded_at = Utc::now();

        // Assign sequence numbers and append (append-only).
        let mut next = current + 1;
        for e in events {
            log.push(RecordedEvent {
                event_id: e.event_id,
                stream_id: stream.clone(),
                sequence_number: next,
                event_type: e.event_type,
                event_version: e.event_version,
                occurred_at: e.occurred_at,
                recorded_at,
                payload: e.payload,
            });
            next += 1;
        }

        let tail = Self::current_version(log);
        debug!(stream = %stream, tail, "appended events");
        Ok(tail)
    }

    async fn read_forward(
        &self,
        stream: &StreamId,
        from_position: u64,
    ) -> Result<Vec<RecordedEvent>, EventStoreError> {
        let streams = self
            .streams
            .read()
            .map_err(|_| EventStoreError::Unavailable("lock poisoned".to_string()))?;

        let skip = usize::try_from(from_position).unwrap_or(usize::MAX);
        Ok(streams
            .get(stream)
            .map(|log| log.iter().skip(skip).cloned().collect())
            .unwrap_or_default())
    }

    async fn tail_version(&self, stream: &StreamId) -> Result<u64, EventStoreError> {
        let streams = self
            .streams
            .read()
            .map_err(|_| EventStoreError::Unavailable("lock poisoned".to_string()))?;

        Ok(streams
            .get(stream)
            .map(|s| Self::current_version(s))
            .unwrap_or(0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn event(tag: &str) -> UncommittedEvent {
        UncommittedEvent {
            event_id: Uuid::now_v7(),
            event_type: tag.to_string(),
            event_version: 1,
            occurred_at: Utc::now(),
            payload: b"{}".to_vec(),
        }
    }

    fn stream(name: &str) -> StreamId {
        StreamId::new(name)
    }

    #[tokio::test]
    async fn missing_stream_reads_empty_with_tail_zero() {
        let store = InMemoryEventStore::new();
        let s = stream("Shipment-missing");

        assert!(store.read_forward(&s, 0).await.unwrap().is_empty());
        assert_eq!(store.tail_version(&s).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn append_assigns_one_based_sequence_numbers() {
        let store = InMemoryEventStore::new();
        let s = stream("Shipment-a");

        let tail = store
            .append(&s, ExpectedVersion::Exact(0), vec![event("A"), event("B")])
            .await
            .unwrap();
        assert_eq!(tail, 2);

        let tail = store
            .append(&s, ExpectedVersion::Exact(2), vec![event("C")])
            .await
            .unwrap();
        assert_eq!(tail, 3);

        let read = store.read_forward(&s, 0).await.unwrap();
        let seqs: Vec<u64> = read.iter().map(|e| e.sequence_number).collect();
        let tags: Vec<&str> = read.iter().map(|e| e.event_type.as_str()).collect();
        assert_eq!(seqs, vec![1, 2, 3]);
        assert_eq!(tags, vec!["A", "B", "C"]);
    }

    #[tokio::test]
    async fn stale_expected_version_is_a_conflict_and_writes_nothing() {
        let store = InMemoryEventStore::new();
        let s = stream("Shipment-b");
        store
            .append(&s, ExpectedVersion::Exact(0), vec![event("A")])
            .await
            .unwrap();

        let err = store
            .append(&s, ExpectedVersion::Exact(0), vec![event("B")])
            .await
            .unwrap_err();

        match err {
            EventStoreError::Concurrency {
                expected, actual, ..
            } => {
                assert_eq!(expected, ExpectedVersion::Exact(0));
                assert_eq!(actual, 1);
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(store.stream_len(&s).unwrap(), 1);
    }

    #[tokio::test]
    async fn nonzero_expected_version_on_missing_stream_conflicts() {
        let store = InMemoryEventStore::new();
        let s = stream("Shipment-c");

        let err = store
            .append(&s, ExpectedVersion::Exact(3), vec![event("A")])
            .await
            .unwrap_err();

        assert!(matches!(err, EventStoreError::Concurrency { actual: 0, .. }));
        assert_eq!(store.stream_len(&s).unwrap(), 0);
    }

    #[tokio::test]
    async fn empty_batch_is_rejected() {
        let store = InMemoryEventStore::new();
        let err = store
            .append(&stream("Shipment-d"), ExpectedVersion::Exact(0), vec![])
            .await
            .unwrap_err();
        assert!(matches!(err, EventStoreError::InvalidAppend(_)));
    }

    #[tokio::test]
    async fn read_forward_starts_at_position_inclusive() {
        let store = InMemoryEventStore::new();
        let s = stream("Shipment-e");
        store
            .append(
                &s,
                ExpectedVersion::Exact(0),
                vec![event("A"), event("B"), event("C")],
            )
            .await
            .unwrap();

        let tail: Vec<u64> = store
            .read_forward(&s, 1)
            .await
            .unwrap()
            .iter()
            .map(|e| e.sequence_number)
            .collect();
        assert_eq!(tail, vec![2, 3]);
        assert!(store.read_forward(&s, 3).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn poisoned_lock_is_unavailable_not_empty() {
        let store = std::sync::Arc::new(InMemoryEventStore::new());
        let s = stream("Shipment-f");
        store
            .append(&s, ExpectedVersion::Exact(0), vec![event("A")])
            .await
            .unwrap();

        let poisoner = std::sync::Arc::clone(&store);
        let _ = std::thread::spawn(move || {
            let _guard = poisoner.streams.write().unwrap();
            panic!("writer died holding the lock");
        })
        .join();

        assert!(matches!(
            store.stream_len(&s),
            Err(EventStoreError::Unavailable(_))
        ));
        assert!(matches!(
            store.read_forward(&s, 0).await,
            Err(EventStoreError::Unavailable(_))
        ));
    }

    #[tokio::test]
    async fn streams_do_not_interfere() {
        let store = InMemoryEventStore::new();
        let a = stream("Shipment-x");
        let b = stream("Shipment-y");

        store
            .append(&a, ExpectedVersion::Exact(0), vec![event("A")])
            .await
            .unwrap();
        store
            .append(&b, ExpectedVersion::Exact(0), vec![event("A")])
            .await
            .unwrap();

        assert_eq!(store.tail_version(&a).await.unwrap(), 1);
        assert_eq!(store.tail_version(&b).await.unwrap(), 1);
    }
}
