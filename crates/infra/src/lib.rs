//! Infrastructure layer: event storage, replay, command execution, config.

pub mod cache;
pub mod config;
pub mod event_store;
pub mod replay;
pub mod repository;
pub mod shipment_service;

pub use cache::AggregateCache;
pub use config::{ConfigError, ShiptrackConfig, StoreBackend};
pub use event_store::{
    EventStore, EventStoreError, InMemoryEventStore, PostgresEventStore, RecordedEvent, StreamId,
    UncommittedEvent,
};
pub use replay::HydrationError;
pub use repository::{AggregateHandle, AggregateRepository, CommandError};
pub use shipment_service::{ShipmentCommandError, ShipmentService};
