//! Session control messages
//!
//! One JSON object per line. Field names and the integer message types
//! follow the session server's wire format.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use crate::error::{CodecError, SyncError};
use crate::roster::PeerRecord;

/// Version this client advertises
pub const CLIENT_VERSION: &str = "1.9.6.0";

/// Oldest server protocol version this client talks to
pub const MINIMUM_PROTOCOL_VERSION: &str = "1.9.0.0";

/// Control message kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum MessageType {
    Update = 0,
    Ping = 1,
    Sync = 2,
    RadioUpdate = 3,
    ServerSettings = 4,
    ClientDisconnect = 5,
    VersionMismatch = 6,
    ExternalAwacsModePassword = 7,
    ExternalAwacsModeDisconnect = 8,
}

impl From<MessageType> for u8 {
    fn from(t: MessageType) -> u8 {
        t as u8
    }
}

impl TryFrom<u8> for MessageType {
    type Error = CodecError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(MessageType::Update),
            1 => Ok(MessageType::Ping),
            2 => Ok(MessageType::Sync),
            3 => Ok(MessageType::RadioUpdate),
            4 => Ok(MessageType::ServerSettings),
            5 => Ok(MessageType::ClientDisconnect),
            6 => Ok(MessageType::VersionMismatch),
            7 => Ok(MessageType::ExternalAwacsModePassword),
            8 => Ok(MessageType::ExternalAwacsModeDisconnect),
            other => Err(CodecError::MalformedMessage(format!("unknown message type {}", other))),
        }
    }
}

/// A control-channel message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NetworkMessage {
    #[serde(rename = "MsgType")]
    pub msg_type: MessageType,

    #[serde(rename = "Client", default, skip_serializing_if = "Option::is_none")]
    pub client: Option<PeerRecord>,

    #[serde(rename = "Clients", default, skip_serializing_if = "Option::is_none")]
    pub clients: Option<Vec<PeerRecord>>,

    #[serde(rename = "ServerSettings", default, skip_serializing_if = "Option::is_none")]
    pub server_settings: Option<HashMap<String, String>>,

    #[serde(
        rename = "ExternalAWACSModePassword",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub external_mode_password: Option<String>,

    #[serde(rename = "Version", default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
}

impl NetworkMessage {
    pub fn new(msg_type: MessageType) -> Self {
        Self {
            msg_type,
            client: None,
            clients: None,
            server_settings: None,
            external_mode_password: None,
            version: None,
        }
    }

    pub fn with_client(mut self, client: PeerRecord) -> Self {
        self.client = Some(client);
        self
    }

    /// Encode as a single line, stamping our version
    pub fn encode_line(&self) -> Result<String, CodecError> {
        let mut stamped = self.clone();
        stamped.version = Some(CLIENT_VERSION.to_string());
        let mut line = serde_json::to_string(&stamped)
            .map_err(|e| CodecError::MalformedMessage(e.to_string()))?;
        line.push('\n');
        Ok(line)
    }

    /// Decode one line (trailing newline optional)
    pub fn decode_line(line: &str) -> Result<Self, CodecError> {
        serde_json::from_str(line.trim_end_matches(['\r', '\n']))
            .map_err(|e| CodecError::MalformedMessage(e.to_string()))
    }
}

/// Dotted numeric version such as `1.9.0.0`
#[derive(Debug, Clone, Eq)]
pub struct ProtocolVersion(Vec<u32>);

impl ProtocolVersion {
    pub fn minimum() -> Self {
        // constant is well-formed
        MINIMUM_PROTOCOL_VERSION
            .parse()
            .unwrap_or_else(|_| ProtocolVersion(vec![0]))
    }

    /// Check a server-advertised version against the minimum
    pub fn check_compatible(advertised: Option<&str>) -> Result<ProtocolVersion, SyncError> {
        let advertised = advertised.ok_or(SyncError::MissingVersion)?;
        let server: ProtocolVersion = advertised.parse()?;
        if server < Self::minimum() {
            return Err(SyncError::VersionMismatch {
                server: advertised.to_string(),
                minimum: MINIMUM_PROTOCOL_VERSION.to_string(),
            });
        }
        Ok(server)
    }

    fn component(&self, i: usize) -> u32 {
        self.0.get(i).copied().unwrap_or(0)
    }
}

impl FromStr for ProtocolVersion {
    type Err = SyncError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts = s
            .trim()
            .split('.')
            .map(|p| p.parse::<u32>())
            .collect::<Result<Vec<_>, _>>()
            .map_err(|_| SyncError::InvalidVersion(s.to_string()))?;
        if parts.is_empty() {
            return Err(SyncError::InvalidVersion(s.to_string()));
        }
        Ok(ProtocolVersion(parts))
    }
}

impl PartialEq for ProtocolVersion {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Ord for ProtocolVersion {
    fn cmp(&self, other: &Self) -> Ordering {
        let len = self.0.len().max(other.0.len());
        (0..len)
            .map(|i| self.component(i).cmp(&other.component(i)))
            .find(|o| *o != Ordering::Equal)
            .unwrap_or(Ordering::Equal)
    }
}

impl PartialOrd for ProtocolVersion {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for ProtocolVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self.0.iter().map(|p| p.to_string()).collect();
        write!(f, "{}", parts.join("."))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_type_is_integer() {
        let line = NetworkMessage::new(MessageType::Sync).encode_line().unwrap();
        assert!(line.ends_with('\n'));
        let value: serde_json::Value = serde_json::from_str(line.trim()).unwrap();
        assert_eq!(value["MsgType"], 2);
        assert_eq!(value["Version"], CLIENT_VERSION);
        assert!(value.get("Client").is_none());
    }

    #[test]
    fn test_decode_update_with_null_radio() {
        let line = r#"{"MsgType":0,"Client":{"ClientGuid":"abc","Name":"Dog 1","Coalition":2,"RadioInfo":null},"Version":"1.9.6.0"}"#;
        let msg = NetworkMessage::decode_line(line).unwrap();
        assert_eq!(msg.msg_type, MessageType::Update);
        let client = msg.client.unwrap();
        assert_eq!(client.id, "abc");
        assert_eq!(client.coalition, 2);
        assert!(client.radio_info.is_none());
    }

    #[test]
    fn test_decode_sync_with_settings() {
        let line = r#"{"MsgType":2,"Clients":[{"ClientGuid":"a"},{"ClientGuid":"b"}],"ServerSettings":{"LOS_ENABLED":"true"},"Version":"2.0.0.0"}"#;
        let msg = NetworkMessage::decode_line(line).unwrap();
        assert_eq!(msg.clients.map(|c| c.len()), Some(2));
        assert_eq!(
            msg.server_settings.unwrap().get("LOS_ENABLED").map(String::as_str),
            Some("true")
        );
    }

    #[test]
    fn test_decode_rejects_garbage() {
        assert!(NetworkMessage::decode_line("not json").is_err());
        assert!(NetworkMessage::decode_line(r#"{"MsgType":99}"#).is_err());
    }

    #[test]
    fn test_version_ordering() {
        let v = |s: &str| s.parse::<ProtocolVersion>().unwrap();
        assert!(v("1.9.0.0") < v("1.9.0.1"));
        assert!(v("1.10") > v("1.9.9.9"));
        assert_eq!(v("1.9"), v("1.9.0.0"));
        assert!("1.x".parse::<ProtocolVersion>().is_err());
        assert_eq!(v("1.9.6.0").to_string(), "1.9.6.0");
    }

    #[test]
    fn test_check_compatible() {
        assert!(ProtocolVersion::check_compatible(Some("1.9.6.0")).is_ok());
        assert_eq!(
            ProtocolVersion::check_compatible(None),
            Err(SyncError::MissingVersion)
        );
        assert!(matches!(
            ProtocolVersion::check_compatible(Some("1.8.0.0")),
            Err(SyncError::VersionMismatch { .. })
        ));
    }
}
