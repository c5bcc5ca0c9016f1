use thiserror::Error;

/// A shipment command was rejected because the current status does not allow it.
///
/// These are raised before anything is encoded or appended, and retrying the
/// same command against the same state yields the same error.
#[derive(Debug, Error, Copy, Clone, PartialEq, Eq)]
pub enum ShipmentError {
    #[error("shipment has already been picked up")]
    AlreadyPickedUp,

    #[error("shipment has already been delivered")]
    AlreadyDelivered,

    #[error("shipment has not yet been picked up")]
    NotYetPickedUp,
}
