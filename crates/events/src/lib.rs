//! Event primitives: the event trait, the wire codec, and the envelope that
//! pairs a decoded event with its stream metadata.

pub mod codec;
pub mod envelope;
pub mod event;

pub use codec::{CodecError, EncodedEvent, EventCodec};
pub use envelope::EventEnvelope;
pub use event::Event;
