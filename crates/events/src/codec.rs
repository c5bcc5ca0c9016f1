//! Conversion between typed events and their tagged wire form.
//!
//! The event log stores `(event_type, payload bytes)` pairs. Each event
//! catalogue implements [`EventCodec`] with an explicit `match` over its tags,
//! so an unknown tag is a hard error rather than something to skip.

use serde::Serialize;
use serde::de::DeserializeOwned;
use thiserror::Error;

use crate::event::Event;

/// Tagged, serialized representation of a single event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedEvent {
    pub event_type: String,
    pub payload: Vec<u8>,
}

/// Codec failure.
///
/// During replay both variants mean the stored history can no longer be
/// interpreted, and hydration must abort.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CodecError {
    /// The tag is not part of the (closed) event catalogue.
    #[error("unknown event type '{0}'")]
    UnknownEventType(String),

    /// The payload could not be serialized or deserialized.
    #[error("invalid payload for '{event_type}': {reason}")]
    Payload { event_type: String, reason: String },
}

/// Two-way mapping between an event catalogue and its wire form.
///
/// `decode(encode(x)) == x` must hold for every member of the catalogue.
pub trait EventCodec: Event + Sized {
    fn encode(&self) -> Result<EncodedEvent, CodecError>;

    fn decode(event_type: &str, payload: &[u8]) -> Result<Self, CodecError>;
}

/// Serialize one payload struct as JSON under the given tag.
pub fn encode_json<T>(event_type: &str, payload: &T) -> Result<EncodedEvent, CodecError>
where
    T: Serialize,
{
    let bytes = serde_json::to_vec(payload).map_err(|e| CodecError::Payload {
        event_type: event_type.to_string(),
        reason: e.to_string(),
    })?;

    Ok(EncodedEvent {
        event_type: event_type.to_string(),
        payload: bytes,
    })
}

/// Deserialize a JSON payload previously written under `event_type`.
pub fn decode_json<T>(event_type: &str, payload: &[u8]) -> Result<T, CodecError>
where
    T: DeserializeOwned,
{
    serde_json::from_slice(payload).map_err(|e| CodecError::Payload {
        event_type: event_type.to_string(),
        reason: e.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Ping {
        n: u32,
    }

    #[test]
    fn json_helpers_round_trip() {
        let encoded = encode_json("Ping", &Ping { n: 4 }).unwrap();
        assert_eq!(encoded.event_type, "Ping");
        assert_eq!(encoded.payload, br#"{"n":4}"#.to_vec());

        let decoded: Ping = decode_json("Ping", &encoded.payload).unwrap();
        assert_eq!(decoded, Ping { n: 4 });
    }

    #[test]
    fn malformed_payload_names_the_tag() {
        let err = decode_json::<Ping>("Ping", b"{").unwrap_err();
        match err {
            CodecError::Payload { event_type, .. } => assert_eq!(event_type, "Ping"),
            other => panic!("unexpected error: {other:?}"),
        }
    }
}
