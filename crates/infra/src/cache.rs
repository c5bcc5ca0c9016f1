//! In-process cache of live aggregate handles.
//!
//! A handle is created on first reference (hydrating from the store) and kept
//! until it is explicitly evicted. There is no time-based expiry; callers that
//! want a cold reload call [`AggregateCache::evict`] and the next access
//! hydrates a fresh instance.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::debug;

use shiptrack_core::Aggregate;
use shiptrack_events::EventCodec;

use crate::event_store::EventStore;
use crate::replay::HydrationError;
use crate::repository::{AggregateHandle, AggregateRepository};

pub struct AggregateCache<A, S>
where
    A: Aggregate,
{
    repository: AggregateRepository<A, S>,
    handles: RwLock<HashMap<A::Id, Arc<AggregateHandle<A, S>>>>,
}

impl<A, S> AggregateCache<A, S>
where
    A: Aggregate,
    A::Event: EventCodec,
    A::Error: std::error::Error + 'static,
    S: EventStore,
{
    pub fn new(repository: AggregateRepository<A, S>) -> Self {
        Self {
            repository,
            handles: RwLock::new(HashMap::new()),
        }
    }

    pub fn repository(&self) -> &AggregateRepository<A, S> {
        &self.repository
    }

    /// Return the cached handle for `id`, hydrating one if there is none.
    ///
    /// If two callers miss at the same time both hydrate, but only the first
    /// handle inserted is kept and returned to both.
    pub async fn get_or_load(&self, id: &A::Id) -> Result<Arc<AggregateHandle<A, S>>, HydrationError> {
        // Fast path: read lock.
        {
            let handles = self.handles.read().await;
            if let Some(handle) = handles.get(id) {
                return Ok(Arc::clone(handle));
            }
        }

        debug!(aggregate_type = A::AGGREGATE_TYPE, id = %id, "hydrating aggregate");
        let loaded = Arc::new(self.repository.load(id.clone()).await?);

        let mut handles = self.handles.write().await;
        let handle = handles.entry(id.clone()).or_insert(loaded);
        Ok(Arc::clone(handle))
    }

    /// Drop the cached handle for `id`. Returns whether one was cached.
    ///
    /// Callers still holding the old `Arc` keep a working handle; the store's
    /// version check keeps it from overwriting newer history.
    pub async fn evict(&self, id: &A::Id) -> bool {
        let removed = self.handles.write().await.remove(id).is_some();
        if removed {
            debug!(aggregate_type = A::AGGREGATE_TYPE, id = %id, "evicted aggregate");
        }
        removed
    }

    pub async fn contains(&self, id: &A::Id) -> bool {
        self.handles.read().await.contains_key(id)
    }

    pub async fn len(&self) -> usize {
        self.handles.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.handles.read().await.is_empty()
    }

    pub async fn clear(&self) {
        self.handles.write().await.clear();
    }
}
