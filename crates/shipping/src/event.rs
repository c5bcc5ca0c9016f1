//! Shipment events and their wire encoding.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use shiptrack_events::codec::{decode_json, encode_json};
use shiptrack_events::{CodecError, EncodedEvent, Event, EventCodec};

pub const PICKED_UP: &str = "PickedUp";
pub const DELIVERED: &str = "Delivered";

/// Event: PickedUp.
///
/// The payload field is named `DateTime` on the wire to stay readable
/// alongside streams written by the previous service.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PickedUp {
    #[serde(rename = "DateTime")]
    pub occurred_at: DateTime<Utc>,
}

/// Event: Delivered.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Delivered {
    #[serde(rename = "DateTime")]
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ShipmentEvent {
    PickedUp(PickedUp),
    Delivered(Delivered),
}

impl Event for ShipmentEvent {
    fn event_type(&self) -> &'static str {
        match self {
            ShipmentEvent::PickedUp(_) => PICKED_UP,
            ShipmentEvent::Delivered(_) => DELIVERED,
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            ShipmentEvent::PickedUp(e) => e.occurred_at,
            ShipmentEvent::Delivered(e) => e.occurred_at,
        }
    }
}

impl EventCodec for ShipmentEvent {
    fn encode(&self) -> Result<EncodedEvent, CodecError> {
        match self {
            ShipmentEvent::PickedUp(e) => encode_json(PICKED_UP, e),
            ShipmentEvent::Delivered(e) => encode_json(DELIVERED, e),
        }
    }

    fn decode(event_type: &str, payload: &[u8]) -> Result<Self, CodecError> {
        match event_type {
            PICKED_UP => decode_json(event_type, payload).map(ShipmentEvent::PickedUp),
            DELIVERED => decode_json(event_type, payload).map(ShipmentEvent::Delivered),
            other => Err(CodecError::UnknownEventType(other.to_string())),
        }
    }
}
