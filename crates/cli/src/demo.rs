use std::sync::Arc;

use anyhow::{bail, Context};
use tracing::info;

use shiptrack_events::Event;
use shiptrack_infra::{EventStore, ShipmentService};
use shiptrack_shipping::ShipmentId;

/// Shipment to drive: the first argument if given, otherwise a fresh id.
pub fn shipment_id_from_args<I>(mut args: I) -> anyhow::Result<ShipmentId>
where
    I: Iterator<Item = String>,
{
    let id = match args.next() {
        Some(raw) => raw
            .parse::<ShipmentId>()
            .with_context(|| format!("invalid shipment id {raw:?}"))?,
        None => ShipmentId::generate(),
    };

    if let Some(extra) = args.next() {
        bail!("unexpected argument {extra:?}; usage: shiptrack-demo [SHIPMENT_ID]");
    }
    Ok(id)
}

pub async fn run<S>(store: Arc<S>, id: ShipmentId, max_retries: u32) -> anyhow::Result<()>
where
    S: EventStore,
{
    let service = ShipmentService::with_max_retries(store, max_retries);

    let status = service.status(id).await.context("failed to load shipment")?;
    info!(shipment_id = %id, %status, "shipment loaded");

    service.pickup(id).await.context("pickup failed")?;
    let status = service.status(id).await?;
    info!(shipment_id = %id, %status, "after pickup");

    service.deliver(id).await.context("delivery failed")?;
    let (state, version) = service.snapshot(id).await?;
    info!(shipment_id = %id, status = %state.status(), version, "after delivery");

    service.evict(id).await;
    let (reloaded, reloaded_version) = service
        .snapshot(id)
        .await
        .context("failed to rehydrate shipment")?;
    info!(
        shipment_id = %id,
        status = %reloaded.status(),
        version = reloaded_version,
        "rehydrated from event log"
    );

    if (reloaded, reloaded_version) != (state, version) {
        bail!("rehydrated state differs from live state for {id}");
    }

    for envelope in service.history(id).await.context("failed to read history")? {
        info!(
            shipment_id = %id,
            sequence_number = envelope.sequence_number(),
            event_type = envelope.payload().event_type(),
            event_id = %envelope.event_id(),
            recorded_at = %envelope.recorded_at(),
            "history"
        );
    }
    Ok(())
}
