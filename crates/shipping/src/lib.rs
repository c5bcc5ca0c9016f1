//! Shipment domain module (event-sourced).
//!
//! This crate contains the business rules for a shipment in transit,
//! implemented purely as deterministic domain logic (no IO, no storage).

pub mod error;
pub mod event;
pub mod shipment;
pub mod state;

pub use error::ShipmentError;
pub use event::{Delivered, PickedUp, ShipmentEvent};
pub use shipment::{Deliver, Pickup, Shipment, ShipmentCommand, ShipmentId};
pub use state::{ShipmentState, ShipmentStatus};
