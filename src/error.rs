//! Error types
//!
//! One crate-level [`Error`] wrapping a small enum per layer. Session-level
//! failures are not errors in this sense: they end up as
//! [`FailureReason`](crate::session::FailureReason) on the publish state.

use std::fmt;

/// Result alias used throughout the crate
pub type Result<T> = std::result::Result<T, Error>;

/// Crate-level error
#[derive(Debug)]
pub enum Error {
    /// Socket or file I/O failure
    Io(std::io::Error),
    /// RTMP handshake failure
    Handshake(HandshakeError),
    /// AMF encoding/decoding failure
    Amf(AmfError),
    /// RTMP protocol violation or rejected command
    Protocol(ProtocolError),
    /// Malformed media payload
    Media(MediaError),
    /// Shared configuration store failure
    Store(StoreError),
    /// No tokio runtime to spawn the session on
    Runtime(tokio::runtime::TryCurrentError),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Io(e) => write!(f, "I/O error: {}", e),
            Error::Handshake(e) => write!(f, "Handshake error: {}", e),
            Error::Amf(e) => write!(f, "AMF error: {}", e),
            Error::Protocol(e) => write!(f, "Protocol error: {}", e),
            Error::Media(e) => write!(f, "Media error: {}", e),
            Error::Store(e) => write!(f, "Store error: {}", e),
            Error::Runtime(e) => write!(f, "Runtime error: {}", e),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Io(e) => Some(e),
            Error::Store(StoreError::Io(e)) => Some(e),
            Error::Store(StoreError::Format(e)) => Some(e),
            Error::Runtime(e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::Io(e)
    }
}

impl From<HandshakeError> for Error {
    fn from(e: HandshakeError) -> Self {
        Error::Handshake(e)
    }
}

impl From<AmfError> for Error {
    fn from(e: AmfError) -> Self {
        Error::Amf(e)
    }
}

impl From<ProtocolError> for Error {
    fn from(e: ProtocolError) -> Self {
        Error::Protocol(e)
    }
}

impl From<MediaError> for Error {
    fn from(e: MediaError) -> Self {
        Error::Media(e)
    }
}

impl From<StoreError> for Error {
    fn from(e: StoreError) -> Self {
        Error::Store(e)
    }
}

impl From<tokio::runtime::TryCurrentError> for Error {
    fn from(e: tokio::runtime::TryCurrentError) -> Self {
        Error::Runtime(e)
    }
}

/// Handshake errors
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HandshakeError {
    /// Peer answered with a version below 3
    InvalidVersion(u8),
    /// Handshake driven out of order
    InvalidState,
}

impl fmt::Display for HandshakeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HandshakeError::InvalidVersion(v) => write!(f, "invalid RTMP version {}", v),
            HandshakeError::InvalidState => write!(f, "handshake step out of order"),
        }
    }
}

/// AMF errors
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AmfError {
    UnexpectedEof,
    UnknownMarker(u8),
    InvalidUtf8,
    InvalidReference(u16),
    InvalidObjectEnd,
    NestingTooDeep,
}

impl fmt::Display for AmfError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AmfError::UnexpectedEof => write!(f, "unexpected end of data"),
            AmfError::UnknownMarker(m) => write!(f, "unknown type marker 0x{:02x}", m),
            AmfError::InvalidUtf8 => write!(f, "invalid UTF-8 string"),
            AmfError::InvalidReference(i) => write!(f, "invalid reference index {}", i),
            AmfError::InvalidObjectEnd => write!(f, "invalid object end marker"),
            AmfError::NestingTooDeep => write!(f, "nesting too deep"),
        }
    }
}

/// RTMP protocol errors
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// URL is not an `rtmp://host[:port]/app` endpoint
    InvalidUrl(String),
    /// URL scheme this client cannot speak (e.g. `rtmps`)
    UnsupportedScheme(String),
    /// Chunk header references a chunk stream we have no state for
    InvalidChunkHeader(u32),
    /// Message larger than we accept
    MessageTooLarge(u32),
    /// Message that makes no sense at this point
    UnexpectedMessage(String),
    /// Server answered a command with `_error`
    CommandFailed { command: String, code: String, description: String },
    /// Server refused the publish request
    PublishRejected { code: String, description: String },
    /// Peer closed the connection
    ConnectionClosed,
    /// Operation requires an established connection
    NotConnected,
}

impl fmt::Display for ProtocolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProtocolError::InvalidUrl(url) => write!(f, "invalid RTMP url: {:?}", url),
            ProtocolError::UnsupportedScheme(s) => write!(f, "unsupported scheme: {}", s),
            ProtocolError::InvalidChunkHeader(csid) => {
                write!(f, "chunk header without prior state on csid {}", csid)
            }
            ProtocolError::MessageTooLarge(len) => write!(f, "message too large: {} bytes", len),
            ProtocolError::UnexpectedMessage(msg) => write!(f, "unexpected message: {}", msg),
            ProtocolError::CommandFailed {
                command,
                code,
                description,
            } => write!(f, "{} failed: {} ({})", command, code, description),
            ProtocolError::PublishRejected { code, description } => {
                write!(f, "publish rejected: {} ({})", code, description)
            }
            ProtocolError::ConnectionClosed => write!(f, "connection closed by peer"),
            ProtocolError::NotConnected => write!(f, "not connected"),
        }
    }
}

/// Media payload errors
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MediaError {
    InvalidAvcPacket,
    InvalidAacPacket,
    InvalidFlvHeader,
    TruncatedFlvTag,
}

impl fmt::Display for MediaError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MediaError::InvalidAvcPacket => write!(f, "invalid AVC packet"),
            MediaError::InvalidAacPacket => write!(f, "invalid AAC packet"),
            MediaError::InvalidFlvHeader => write!(f, "invalid FLV header"),
            MediaError::TruncatedFlvTag => write!(f, "truncated FLV tag"),
        }
    }
}

/// Shared configuration store errors
#[derive(Debug)]
pub enum StoreError {
    Io(std::io::Error),
    Format(serde_json::Error),
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StoreError::Io(e) => write!(f, "{}", e),
            StoreError::Format(e) => write!(f, "malformed shared document: {}", e),
        }
    }
}
