//! Append-only event log boundary.
//!
//! This module defines the store contract the aggregate core consumes
//! (optimistic-concurrency append, forward read) plus the stream naming rule,
//! and ships an in-memory store for tests/dev and a Postgres store.

pub mod in_memory;
pub mod postgres;
pub mod stream;
pub mod r#trait;

pub use in_memory::InMemoryEventStore;
pub use postgres::PostgresEventStore;
pub use r#trait::{EventStore, EventStoreError, RecordedEvent, UncommittedEvent};
pub use stream::StreamId;
