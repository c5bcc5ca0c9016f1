//! Demonstration driver: walks one shipment through its lifecycle and proves
//! that a cold reload from the event log reproduces the same state.

mod demo;

use std::sync::Arc;

use anyhow::Context;

use shiptrack_infra::{InMemoryEventStore, PostgresEventStore, ShiptrackConfig, StoreBackend};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    shiptrack_observability::init();

    let config = ShiptrackConfig::from_env().context("failed to load configuration")?;
    let id = demo::shipment_id_from_args(std::env::args().skip(1))?;

    match &config.store {
        StoreBackend::Memory => {
            tracing::warn!("using in-memory event store; history is lost on exit");
            demo::run(Arc::new(InMemoryEventStore::new()), id, config.max_retries).await
        }
        StoreBackend::Postgres {
            database_url,
            max_connections,
        } => {
            let store = PostgresEventStore::connect(database_url, *max_connections)
                .await
                .context("failed to connect to postgres event store")?;
            demo::run(Arc::new(store), id, config.max_retries).await
        }
    }
}
