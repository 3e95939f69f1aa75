//! Error types for the radio client

use thiserror::Error;

/// Main error type for the client
#[derive(Error, Debug)]
pub enum Error {
    #[error("Codec error: {0}")]
    Codec(#[from] CodecError),

    #[error("Network error: {0}")]
    Network(#[from] NetworkError),

    #[error("Sync error: {0}")]
    Sync(#[from] SyncError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Wire codec errors (voice frames and control messages)
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CodecError {
    #[error("Frame too short: {0} bytes")]
    Truncated(usize),

    #[error("Length field mismatch: header says {declared}, buffer has {actual}")]
    LengthMismatch { declared: usize, actual: usize },

    #[error("Invalid transmit section length: {0}")]
    InvalidTransmitSection(usize),

    #[error("Frame carries no transmit channels")]
    NoTransmitChannels,

    #[error("Unknown modulation: {0}")]
    UnknownModulation(u8),

    #[error("Invalid sender id: {0}")]
    InvalidSenderId(String),

    #[error("Frame too large: {0} bytes")]
    FrameTooLarge(usize),

    #[error("Malformed control message: {0}")]
    MalformedMessage(String),
}

/// Network errors
#[derive(Error, Debug)]
pub enum NetworkError {
    #[error("Socket bind failed: {0}")]
    BindFailed(String),

    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Send failed: {0}")]
    SendFailed(String),

    #[error("Receive failed: {0}")]
    ReceiveFailed(String),

    #[error("Connection closed by peer")]
    Closed,

    #[error("Not connected")]
    NotConnected,

    #[error("Timeout")]
    Timeout,
}

/// Session control errors
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SyncError {
    #[error("Server did not advertise a protocol version")]
    MissingVersion,

    #[error("Invalid version string: {0}")]
    InvalidVersion(String),

    #[error("Server version {server} is older than minimum {minimum}")]
    VersionMismatch { server: String, minimum: String },

    #[error("Too many consecutive decode errors: {0}")]
    TooManyDecodeErrors(u32),
}

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },

    #[error("Failed to parse {path}: {message}")]
    Parse { path: String, message: String },

    #[error("No configuration directory available")]
    NoConfigDir,

    #[error("Invalid {field}: {message}")]
    Invalid { field: String, message: String },
}

/// Result type alias for the client
pub type Result<T> = std::result::Result<T, Error>;
