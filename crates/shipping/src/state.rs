//! Shipment status and the projection folded from its events.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::event::ShipmentEvent;

/// Where a shipment is in its lifecycle.
///
/// Variants are declared in progression order, so `Ord` reflects the only
/// direction a shipment may move.
#[derive(
    Debug, Copy, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub enum ShipmentStatus {
    #[default]
    AwaitingPickup,
    InTransit,
    Delivered,
}

impl core::fmt::Display for ShipmentStatus {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let s = match self {
            ShipmentStatus::AwaitingPickup => "AwaitingPickup",
            ShipmentStatus::InTransit => "InTransit",
            ShipmentStatus::Delivered => "Delivered",
        };
        f.write_str(s)
    }
}

/// Current-state view of a shipment.
///
/// Never persisted: it is always the fold of the stream's events, in order,
/// starting from `ShipmentState::default()`. There are no serde impls;
/// `fold` is the only way to reach a non-default value.
///
/// ```compile_fail
/// fn deserializable<T: serde::de::DeserializeOwned>() {}
/// deserializable::<shiptrack_shipping::ShipmentState>();
/// ```
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq)]
pub struct ShipmentState {
    status: ShipmentStatus,
    last_event_at: Option<DateTime<Utc>>,
}

impl ShipmentState {
    pub fn status(&self) -> ShipmentStatus {
        self.status
    }

    pub fn last_event_at(&self) -> Option<DateTime<Utc>> {
        self.last_event_at
    }

    /// Fold one event into the projection.
    ///
    /// Total over the catalogue: legality is checked when a command is handled,
    /// not here, so replaying any persisted history always succeeds.
    #[must_use]
    pub fn fold(self, event: &ShipmentEvent) -> Self {
        match event {
            ShipmentEvent::PickedUp(e) => Self {
                status: ShipmentStatus::InTransit,
                last_event_at: Some(e.occurred_at),
            },
            ShipmentEvent::Delivered(e) => Self {
                status: ShipmentStatus::Delivered,
                last_event_at: Some(e.occurred_at),
            },
        }
    }
}
