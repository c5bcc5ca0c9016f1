//! Command execution pipeline for event-sourced aggregates.
//!
//! ## Command Execution Flow
//!
//! ```text
//! AggregateRepository::load(id)
//!   ↓ hydrate (read stream, fold events)
//! AggregateHandle::execute(command)
//!   ↓ 1. decide against the in-memory state (pure; domain errors stop here)
//!   ↓ 2. encode + append at ExpectedVersion::Exact(local version)
//!   ↓ 3. on success apply the events locally (version += 1 per event)
//!   ↓ 4. on conflict return without touching local state
//! ```
//!
//! The handle holds its aggregate behind an async mutex for the whole
//! sequence, so commands against one handle are serialised. The store's
//! compare-and-set remains the authority for conflicts across handles.

use std::marker::PhantomData;
use std::sync::Arc;

use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, instrument, warn};
use uuid::Uuid;

use shiptrack_core::{Aggregate, ExpectedVersion};
use shiptrack_events::{CodecError, EventCodec, EventEnvelope};

use crate::event_store::{EventStore, EventStoreError, StreamId, UncommittedEvent};
use crate::replay::{self, HydrationError};

/// Failure of a single command.
#[derive(Debug, Error)]
pub enum CommandError<E>
where
    E: std::error::Error + 'static,
{
    /// The aggregate rejected the command; nothing was appended.
    #[error(transparent)]
    Domain(E),

    /// The stream moved on since this instance last read it.
    #[error("optimistic concurrency conflict on {stream}: expected {expected}, found {actual}")]
    Conflict {
        stream: StreamId,
        expected: ExpectedVersion,
        actual: u64,
    },

    /// The decided event could not be encoded; nothing was appended.
    #[error("failed to encode event: {0}")]
    Encode(#[from] CodecError),

    /// Re-reading the stream (refresh or reconcile) failed.
    #[error(transparent)]
    Hydration(#[from] HydrationError),

    /// The store failed; for `Unavailable` the append outcome is unknown.
    #[error("event store error: {0}")]
    Store(EventStoreError),
}

impl<E> From<EventStoreError> for CommandError<E>
where
    E: std::error::Error + 'static,
{
    fn from(value: EventStoreError) -> Self {
        match value {
            EventStoreError::Concurrency {
                stream,
                expected,
                actual,
            } => CommandError::Conflict {
                stream,
                expected,
                actual,
            },
            other => CommandError::Store(other),
        }
    }
}

impl<E> CommandError<E>
where
    E: std::error::Error + 'static,
{
    /// Whether re-reading the stream and re-issuing the command may succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            CommandError::Conflict { .. } => true,
            CommandError::Store(e) => e.is_retryable(),
            CommandError::Hydration(e) => e.is_retryable(),
            CommandError::Domain(_) | CommandError::Encode(_) => false,
        }
    }

    pub fn domain(&self) -> Option<&E> {
        match self {
            CommandError::Domain(e) => Some(e),
            _ => None,
        }
    }
}

/// Loads aggregates of type `A` from an event store.
///
/// The store is injected; the repository never constructs its own client.
#[derive(Debug)]
pub struct AggregateRepository<A, S> {
    store: Arc<S>,
    _aggregate: PhantomData<fn() -> A>,
}

impl<A, S> Clone for AggregateRepository<A, S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            _aggregate: PhantomData,
        }
    }
}

impl<A, S> AggregateRepository<A, S>
where
    A: Aggregate,
    A::Event: EventCodec,
    A::Error: std::error::Error + 'static,
    S: EventStore,
{
    pub fn new(store: Arc<S>) -> Self {
        Self {
            store,
            _aggregate: PhantomData,
        }
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    /// Hydrate an aggregate and wrap it in a handle that accepts commands.
    pub async fn load(&self, id: A::Id) -> Result<AggregateHandle<A, S>, HydrationError> {
        let stream = StreamId::for_aggregate::<A>(&id);
        let aggregate = replay::hydrate::<A, S>(&*self.store, id).await?;

        Ok(AggregateHandle {
            stream,
            store: Arc::clone(&self.store),
            aggregate: Mutex::new(aggregate),
        })
    }

    /// Decoded history of one aggregate's stream.
    pub async fn history(&self, id: &A::Id) -> Result<Vec<EventEnvelope<A::Event>>, HydrationError> {
        let stream = StreamId::for_aggregate::<A>(id);
        replay::load_history(&*self.store, &stream).await
    }
}

/// Events decided for one command, encoded and ready to append.
struct Pending<Ev> {
    events: Vec<Ev>,
    uncommitted: Vec<UncommittedEvent>,
}

impl<Ev> Pending<Ev> {
    fn first_event_id(&self) -> Option<Uuid> {
        self.uncommitted.first().map(|e| e.event_id)
    }
}

/// A hydrated aggregate instance bound to its stream.
#[derive(Debug)]
pub struct AggregateHandle<A, S> {
    stream: StreamId,
    store: Arc<S>,
    aggregate: Mutex<A>,
}

impl<A, S> AggregateHandle<A, S>
where
    A: Aggregate,
    A::Event: EventCodec,
    A::Error: std::error::Error + 'static,
    S: EventStore,
{
    pub fn stream(&self) -> &StreamId {
        &self.stream
    }

    /// Read the current in-memory state. No I/O.
    pub async fn read<R>(&self, f: impl FnOnce(&A) -> R) -> R {
        let aggregate = self.aggregate.lock().await;
        f(&aggregate)
    }

    pub async fn version(&self) -> u64 {
        self.read(|a| a.version()).await
    }

    /// Run one command: decide, append at the local version, then apply.
    ///
    /// Returns the stream version after the append. Any error leaves the local
    /// state exactly as it was.
    #[instrument(skip(self), fields(stream = %self.stream), err(Display))]
    pub async fn execute(&self, command: A::Command) -> Result<u64, CommandError<A::Error>> {
        let mut aggregate = self.aggregate.lock().await;

        let pending = Self::decide(&aggregate, &command)?;
        self.commit(&mut aggregate, pending).await
    }

    /// Run a command, recovering from conflicts and unknown append outcomes.
    ///
    /// - On a conflict the aggregate is re-hydrated and the command re-issued,
    ///   so a precondition that no longer holds surfaces as the domain error.
    /// - When the store is unavailable mid-append, the stream is re-read first:
    ///   if the pending event is already there the command counts as done and
    ///   is not appended again.
    ///
    /// At most `max_retries` extra attempts are made; the last error is returned.
    #[instrument(skip(self), fields(stream = %self.stream), err(Display))]
    pub async fn execute_with_retry(
        &self,
        command: A::Command,
        max_retries: u32,
    ) -> Result<u64, CommandError<A::Error>> {
        let mut aggregate = self.aggregate.lock().await;
        let mut attempt = 0u32;

        loop {
            let pending = Self::decide(&aggregate, &command)?;
            let expected = aggregate.version();
            let pending_id = pending.first_event_id();

            let err = match self.commit(&mut aggregate, pending).await {
                Ok(version) => return Ok(version),
                Err(err) => err,
            };

            if attempt >= max_retries || !err.is_retryable() {
                return Err(err);
            }
            attempt += 1;

            match &err {
                CommandError::Store(EventStoreError::Unavailable(reason)) => {
                    warn!(attempt, %reason, "append outcome unknown; reconciling");
                    if let Some(version) = self
                        .reconcile(&mut aggregate, expected, pending_id)
                        .await?
                    {
                        return Ok(version);
                    }
                }
                _ => {
                    warn!(attempt, error = %err, "retrying after refresh");
                    let id = aggregate.id().clone();
                    *aggregate = replay::hydrate::<A, S>(&*self.store, id).await?;
                }
            }
        }
    }

    /// Discard local state and rebuild it from the store.
    pub async fn refresh(&self) -> Result<u64, HydrationError> {
        let mut aggregate = self.aggregate.lock().await;
        let id = aggregate.id().clone();
        *aggregate = replay::hydrate::<A, S>(&*self.store, id).await?;
        Ok(aggregate.version())
    }

    fn decide(
        aggregate: &A,
        command: &A::Command,
    ) -> Result<Pending<A::Event>, CommandError<A::Error>> {
        let events = aggregate.handle(command).map_err(CommandError::Domain)?;
        let uncommitted = events
            .iter()
            .map(UncommittedEvent::from_typed)
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Pending {
            events,
            uncommitted,
        })
    }

    async fn commit(
        &self,
        aggregate: &mut A,
        pending: Pending<A::Event>,
    ) -> Result<u64, CommandError<A::Error>> {
        let current = aggregate.version();
        if pending.events.is_empty() {
            return Ok(current);
        }

        let expected = ExpectedVersion::Exact(current);
        let count = pending.events.len() as u64;
        let tail = self
            .store
            .append(&self.stream, expected, pending.uncommitted)
            .await?;

        if tail != current + count {
            return Err(CommandError::Store(EventStoreError::Corrupted(format!(
                "append to {} reported tail {tail}, expected {}",
                self.stream,
                current + count
            ))));
        }

        for event in &pending.events {
            aggregate.apply(event);
        }

        debug!(version = aggregate.version(), "command committed");
        Ok(aggregate.version())
    }

    /// Find out whether an append with an unknown outcome actually landed.
    ///
    /// Catches the aggregate up with whatever the store now holds after
    /// `expected`. Returns the new version if the first event read is the
    /// pending one, `None` if it is not (the command must be decided again).
    async fn reconcile(
        &self,
        aggregate: &mut A,
        expected: u64,
        pending_id: Option<Uuid>,
    ) -> Result<Option<u64>, CommandError<A::Error>> {
        let recorded = self.store.read_forward(&self.stream, expected).await?;
        let landed = match (recorded.first(), pending_id) {
            (Some(first), Some(id)) => first.event_id == id,
            _ => false,
        };

        let decoded = replay::decode_contiguous::<A::Event>(&self.stream, expected, &recorded)?;
        for envelope in &decoded {
            aggregate.apply(envelope.payload());
        }

        if landed {
            debug!(version = aggregate.version(), "pending append had landed");
            Ok(Some(aggregate.version()))
        } else {
            Ok(None)
        }
    }
}
