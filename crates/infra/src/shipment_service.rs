//! Caller-facing API for shipments.
//!
//! `ShipmentService` is what a host process talks to. It resolves a shipment
//! by id through the [`AggregateCache`] (hydrating on first reference),
//! stamps commands with the current time (`Utc::now()`) and runs them with the configured
//! retry budget.
//!
//! ```text
//! pickup(id) / deliver(id)
//!   ↓ cache.get_or_load(id)          (hydrate on miss)
//!   ↓ handle.execute_with_retry(cmd) (conflict → refresh → retry)
//!   ↓ new version
//! ```

use std::sync::Arc;

use tracing::{info, instrument};

use shiptrack_events::EventEnvelope;
use shiptrack_core::AggregateRoot;
use shiptrack_shipping::{
    Shipment, ShipmentCommand, ShipmentError, ShipmentEvent, ShipmentId, ShipmentState,
    ShipmentStatus,
};

use crate::cache::AggregateCache;
use crate::event_store::EventStore;
use crate::replay::HydrationError;
use crate::repository::{AggregateRepository, CommandError};

pub type ShipmentCommandError = CommandError<ShipmentError>;

/// Retry budget used when none is configured.
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Shipment commands and queries over one event store.
///
/// ## Memory
///
/// Every shipment referenced through this service keeps a cached handle until
/// the host calls [`evict`](Self::evict). The service never evicts on its own
/// and has no expiry, so a long-running host must evict shipments it is done
/// with (e.g. after delivery); otherwise one handle per shipment ever seen
/// stays resident. Evicting is always safe: the next access re-hydrates.
pub struct ShipmentService<S> {
    cache: AggregateCache<Shipment, S>,
    max_retries: u32,
}

impl<S> ShipmentService<S>
where
    S: EventStore,
{
    pub fn new(store: Arc<S>) -> Self {
        Self::with_max_retries(store, DEFAULT_MAX_RETRIES)
    }

    pub fn with_max_retries(store: Arc<S>, max_retries: u32) -> Self {
        Self {
            cache: AggregateCache::new(AggregateRepository::new(store)),
            max_retries,
        }
    }

    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    pub fn store(&self) -> &Arc<S> {
        self.cache.repository().store()
    }

    /// Record that the shipment left the origin. Returns the new version.
    #[instrument(skip(self), fields(shipment_id = %id), err(Display))]
    pub async fn pickup(&self, id: ShipmentId) -> Result<u64, ShipmentCommandError> {
        let version = self.execute(id, ShipmentCommand::pickup_now()).await?;

        info!(version, "shipment picked up");
        Ok(version)
    }

    /// Record that the shipment reached its destination. Returns the new version.
    #[instrument(skip(self), fields(shipment_id = %id), err(Display))]
    pub async fn deliver(&self, id: ShipmentId) -> Result<u64, ShipmentCommandError> {
        let version = self.execute(id, ShipmentCommand::deliver_now()).await?;

        info!(version, "shipment delivered");
        Ok(version)
    }

    /// Current status. Hydrates on first reference, otherwise no I/O.
    pub async fn status(&self, id: ShipmentId) -> Result<ShipmentStatus, HydrationError> {
        let handle = self.cache.get_or_load(&id).await?;
        Ok(handle.read(Shipment::status).await)
    }

    /// Projection and version as seen by the cached instance.
    pub async fn snapshot(&self, id: ShipmentId) -> Result<(ShipmentState, u64), HydrationError> {
        let handle = self.cache.get_or_load(&id).await?;
        Ok(handle
            .read(|shipment| (shipment.state(), shipment.version()))
            .await)
    }

    /// Every persisted event of the shipment, read straight from the store.
    pub async fn history(
        &self,
        id: ShipmentId,
    ) -> Result<Vec<EventEnvelope<ShipmentEvent>>, HydrationError> {
        self.cache.repository().history(&id).await
    }

    /// Forget the in-memory instance; the next access hydrates from the store.
    pub async fn evict(&self, id: ShipmentId) -> bool {
        self.cache.evict(&id).await
    }

    async fn execute(
        &self,
        id: ShipmentId,
        command: ShipmentCommand,
    ) -> Result<u64, ShipmentCommandError> {
        let handle = self.cache.get_or_load(&id).await?;
        handle.execute_with_retry(command, self.max_retries).await
    }
}
