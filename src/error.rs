//! Unified error types for rtmp-publish

use std::fmt;
use std::io;

/// Result type alias using the library's Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Unified error type for all RTMP operations
#[derive(Debug)]
pub enum Error {
    /// I/O error during network operations
    Io(io::Error),
    /// RTMP protocol violation
    Protocol(ProtocolError),
    /// AMF encoding/decoding error
    Amf(AmfError),
    /// Handshake failure
    Handshake(HandshakeError),
    /// Authentication failure
    Auth(AuthError),
    /// Connection rejected by peer
    Rejected(String),
    /// Operation timed out
    Timeout,
    /// Connection was closed
    ConnectionClosed,
    /// Invalid configuration
    Config(String),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Io(e) => write!(f, "I/O error: {}", e),
            Error::Protocol(e) => write!(f, "Protocol error: {}", e),
            Error::Amf(e) => write!(f, "AMF error: {}", e),
            Error::Handshake(e) => write!(f, "Handshake error: {}", e),
            Error::Auth(e) => write!(f, "Authentication error: {}", e),
            Error::Rejected(msg) => write!(f, "Connection rejected: {}", msg),
            Error::Timeout => write!(f, "Operation timed out"),
            Error::ConnectionClosed => write!(f, "Connection closed"),
            Error::Config(msg) => write!(f, "Configuration error: {}", msg),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Self {
        Error::Io(err)
    }
}

impl From<ProtocolError> for Error {
    fn from(err: ProtocolError) -> Self {
        Error::Protocol(err)
    }
}

impl From<AmfError> for Error {
    fn from(err: AmfError) -> Self {
        Error::Amf(err)
    }
}

impl From<HandshakeError> for Error {
    fn from(err: HandshakeError) -> Self {
        Error::Handshake(err)
    }
}

impl From<AuthError> for Error {
    fn from(err: AuthError) -> Self {
        Error::Auth(err)
    }
}

/// Protocol-level errors
#[derive(Debug)]
pub enum ProtocolError {
    InvalidChunkHeader,
    /// Type 3 chunk arrived on a chunk stream with no prior header
    OrphanContinuation(u32),
    UnknownMessageType(u8),
    MessageTooLarge { size: u32, max: u32 },
    InvalidChunkStreamId(u32),
    InvalidChunkSize(u32),
    UnexpectedMessage(String),
    MissingField(String),
    InvalidCommand(String),
    StreamNotFound(u32),
}

impl fmt::Display for ProtocolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProtocolError::InvalidChunkHeader => write!(f, "Invalid chunk header"),
            ProtocolError::OrphanContinuation(csid) => {
                write!(f, "Continuation chunk without prior header on csid {}", csid)
            }
            ProtocolError::UnknownMessageType(t) => write!(f, "Unknown message type: {}", t),
            ProtocolError::MessageTooLarge { size, max } => {
                write!(f, "Message too large: {} bytes (max {})", size, max)
            }
            ProtocolError::InvalidChunkStreamId(id) => write!(f, "Invalid chunk stream ID: {}", id),
            ProtocolError::InvalidChunkSize(size) => write!(f, "Invalid chunk size: {}", size),
            ProtocolError::UnexpectedMessage(msg) => write!(f, "Unexpected message: {}", msg),
            ProtocolError::MissingField(field) => write!(f, "Missing required field: {}", field),
            ProtocolError::InvalidCommand(cmd) => write!(f, "Invalid command: {}", cmd),
            ProtocolError::StreamNotFound(id) => write!(f, "Stream not found: {}", id),
        }
    }
}

impl std::error::Error for ProtocolError {}

/// AMF encoding/decoding errors
#[derive(Debug)]
pub enum AmfError {
    UnknownMarker(u8),
    UnexpectedEof,
    InvalidUtf8,
    NestingTooDeep,
    InvalidObjectEnd,
    /// Typed accessor used on a value of the wrong kind
    TypeMismatch {
        expected: &'static str,
        actual: &'static str,
    },
    MissingProperty(String),
}

impl fmt::Display for AmfError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AmfError::UnknownMarker(m) => write!(f, "Unknown AMF marker: 0x{:02x}", m),
            AmfError::UnexpectedEof => write!(f, "Unexpected end of AMF data"),
            AmfError::InvalidUtf8 => write!(f, "Invalid UTF-8 in AMF string"),
            AmfError::NestingTooDeep => write!(f, "AMF nesting too deep"),
            AmfError::InvalidObjectEnd => write!(f, "Invalid object end marker"),
            AmfError::TypeMismatch { expected, actual } => {
                write!(f, "AMF type mismatch: expected {}, got {}", expected, actual)
            }
            AmfError::MissingProperty(key) => write!(f, "Missing AMF property: {}", key),
        }
    }
}

impl std::error::Error for AmfError {}

/// Handshake-specific errors
#[derive(Debug)]
pub enum HandshakeError {
    InvalidVersion(u8),
    InvalidState,
    ResponseMismatch,
}

impl fmt::Display for HandshakeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HandshakeError::InvalidVersion(v) => write!(f, "Invalid RTMP version: {}", v),
            HandshakeError::InvalidState => write!(f, "Invalid handshake state"),
            HandshakeError::ResponseMismatch => write!(f, "Handshake response mismatch"),
        }
    }
}

impl std::error::Error for HandshakeError {}

/// Adobe authentication errors
#[derive(Debug)]
pub enum AuthError {
    /// Server asked for auth but no credentials were supplied in the URL
    MissingCredentials,
    /// Rejection description carried no parseable challenge
    MalformedChallenge(String),
    /// Server rejected the credentials outright (nosuchuser / authfailed)
    CredentialsRejected(String),
}

impl fmt::Display for AuthError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AuthError::MissingCredentials => {
                write!(f, "Server requires authentication but URL has no credentials")
            }
            AuthError::MalformedChallenge(desc) => {
                write!(f, "Unparseable auth challenge: {}", desc)
            }
            AuthError::CredentialsRejected(reason) => {
                write!(f, "Credentials rejected: {}", reason)
            }
        }
    }
}

impl std::error::Error for AuthError {}
