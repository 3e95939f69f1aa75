//! Wire codecs
//!
//! Binary voice frames for the voice channel and line-delimited JSON
//! messages for the session control channel.

pub mod control;
pub mod voice;

pub use control::{MessageType, NetworkMessage, ProtocolVersion, CLIENT_VERSION, MINIMUM_PROTOCOL_VERSION};
pub use voice::{TransmitChannel, VoiceFrame};
