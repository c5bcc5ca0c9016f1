use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use shiptrack_core::{Aggregate, AggregateId, AggregateRoot, DomainError};

use crate::error::ShipmentError;
use crate::event::{Delivered, PickedUp, ShipmentEvent};
use crate::state::{ShipmentState, ShipmentStatus};

/// Shipment identifier; also names the shipment's event stream.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ShipmentId(pub AggregateId);

impl ShipmentId {
    pub fn new(id: AggregateId) -> Self {
        Self(id)
    }

    pub fn generate() -> Self {
        Self(AggregateId::new())
    }
}

impl core::fmt::Display for ShipmentId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

impl core::str::FromStr for ShipmentId {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.parse().map(Self)
    }
}

/// Aggregate root: Shipment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Shipment {
    id: ShipmentId,
    state: ShipmentState,
    version: u64,
}

impl Shipment {
    pub fn state(&self) -> ShipmentState {
        self.state
    }

    pub fn status(&self) -> ShipmentStatus {
        self.state.status()
    }
}

impl AggregateRoot for Shipment {
    type Id = ShipmentId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

/// Command: Pickup.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pickup {
    pub occurred_at: DateTime<Utc>,
}

/// Command: Deliver.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Deliver {
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ShipmentCommand {
    Pickup(Pickup),
    Deliver(Deliver),
}

impl ShipmentCommand {
    pub fn pickup_now() -> Self {
        ShipmentCommand::Pickup(Pickup {
            occurred_at: Utc::now(),
        })
    }

    pub fn deliver_now() -> Self {
        ShipmentCommand::Deliver(Deliver {
            occurred_at: Utc::now(),
        })
    }
}

impl Aggregate for Shipment {
    const AGGREGATE_TYPE: &'static str = "Shipment";

    type Command = ShipmentCommand;
    type Event = ShipmentEvent;
    type Error = ShipmentError;

    fn empty(id: Self::Id) -> Self {
        Self {
            id,
            state: ShipmentState::default(),
            version: 0,
        }
    }

    fn apply(&mut self, event: &Self::Event) {
        self.state = self.state.fold(event);

        // Deterministic version tracking: +1 per applied event.
        self.version += 1;
    }

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        match command {
            ShipmentCommand::Pickup(cmd) => self.handle_pickup(cmd),
            ShipmentCommand::Deliver(cmd) => self.handle_deliver(cmd),
        }
    }
}

impl Shipment {
    fn handle_pickup(&self, cmd: &Pickup) -> Result<Vec<ShipmentEvent>, ShipmentError> {
        match self.status() {
            ShipmentStatus::AwaitingPickup => Ok(vec![ShipmentEvent::PickedUp(PickedUp {
                occurred_at: cmd.occurred_at,
            })]),
            ShipmentStatus::InTransit => Err(ShipmentError::AlreadyPickedUp),
            ShipmentStatus::Delivered => Err(ShipmentError::AlreadyDelivered),
        }
    }

    fn handle_deliver(&self, cmd: &Deliver) -> Result<Vec<ShipmentEvent>, ShipmentError> {
        match self.status() {
            ShipmentStatus::InTransit => Ok(vec![ShipmentEvent::Delivered(Delivered {
                occurred_at: cmd.occurred_at,
            })]),
            ShipmentStatus::AwaitingPickup => Err(ShipmentError::NotYetPickedUp),
            ShipmentStatus::Delivered => Err(ShipmentError::AlreadyDelivered),
        }
    }
}
