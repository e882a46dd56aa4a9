//! Error types for Marquee Core

use crate::media_info::StreamType;
use crate::types::{CommandKind, PlaybackState};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type alias for player operations
pub type Result<T> = std::result::Result<T, Error>;

/// Player error types
#[derive(Error, Debug)]
pub enum Error {
    /// Command rejected synchronously for the current state
    #[error(transparent)]
    Precondition(#[from] PreconditionError),

    /// Engine notification could not be understood
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// Engine-reported failure during a playback cycle
    #[error(transparent)]
    Playback(#[from] PlaybackError),

    // Configuration errors
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

impl Error {
    /// Returns true if the player is still usable after this error
    pub fn is_recoverable(&self) -> bool {
        // Every error cycle ends in a reusable stopped state.
        !matches!(self, Error::InvalidConfig(_))
    }

    /// Returns the error code for logs and diagnostics
    pub fn error_code(&self) -> &'static str {
        match self {
            Error::Precondition(e) => e.error_code(),
            Error::Protocol(e) => e.error_code(),
            Error::Playback(e) => e.class.error_code(),
            Error::InvalidConfig(_) => "INVALID_CONFIG",
        }
    }
}

/// Illegal command for the current playback state
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PreconditionError {
    #[error("No URI set")]
    NoUri,

    #[error("URI must not be empty")]
    EmptyUri,

    #[error("Invalid URI {uri:?}: {reason}")]
    InvalidUri { uri: String, reason: String },

    #[error("Cannot {command} while {state}")]
    InvalidCommand {
        command: CommandKind,
        state: PlaybackState,
    },

    #[error("No media info available")]
    NoMediaInfo,

    #[error("No {stream_type} stream with index {index}")]
    NoSuchStream { stream_type: StreamType, index: u32 },
}

impl PreconditionError {
    pub fn error_code(&self) -> &'static str {
        match self {
            PreconditionError::NoUri => "NO_URI",
            PreconditionError::EmptyUri => "EMPTY_URI",
            PreconditionError::InvalidUri { .. } => "INVALID_URI",
            PreconditionError::InvalidCommand { .. } => "INVALID_COMMAND",
            PreconditionError::NoMediaInfo => "NO_MEDIA_INFO",
            PreconditionError::NoSuchStream { .. } => "NO_SUCH_STREAM",
        }
    }
}

/// Malformed or unexpected engine notification
#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("Unknown notification kind: {0}")]
    UnknownKind(String),

    #[error("Malformed {kind} payload: {source}")]
    MalformedPayload {
        kind: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("{kind} notification field {field} out of range: {value}")]
    OutOfRange {
        kind: String,
        field: &'static str,
        value: String,
    },
}

impl ProtocolError {
    pub fn error_code(&self) -> &'static str {
        match self {
            ProtocolError::UnknownKind(_) => "UNKNOWN_NOTIFICATION",
            ProtocolError::MalformedPayload { .. } => "MALFORMED_PAYLOAD",
            ProtocolError::OutOfRange { .. } => "OUT_OF_RANGE",
        }
    }
}

/// Failure classes reported by the engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ErrorClass {
    /// URI could not be resolved or opened
    ResourceNotFound,
    /// Container/codec not understood or caps negotiation failed
    Format,
    /// Network transport failure
    Network,
    /// Anything else, including malformed error reports
    Internal,
}

impl ErrorClass {
    /// Returns the error code for logs and diagnostics
    pub fn error_code(&self) -> &'static str {
        match self {
            ErrorClass::ResourceNotFound => "RESOURCE_NOT_FOUND",
            ErrorClass::Format => "FORMAT",
            ErrorClass::Network => "NETWORK",
            ErrorClass::Internal => "INTERNAL",
        }
    }
}

impl std::fmt::Display for ErrorClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ErrorClass::ResourceNotFound => write!(f, "resource-not-found"),
            ErrorClass::Format => write!(f, "format"),
            ErrorClass::Network => write!(f, "network"),
            ErrorClass::Internal => write!(f, "internal"),
        }
    }
}

/// Engine failure surfaced to observers through the error signal
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[error("{class} error: {message}")]
pub struct PlaybackError {
    /// Classification used for diagnostics
    pub class: ErrorClass,
    /// Engine-specific error code, verbatim
    pub code: String,
    /// Human-readable message
    pub message: String,
    /// Optional engine debug detail
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

/// Failure returned synchronously by an engine command
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EngineError {
    #[error("Unsupported URI: {0}")]
    UnsupportedUri(String),

    #[error("Unsupported operation: {0}")]
    Unsupported(&'static str),

    #[error("Unknown pipeline handle")]
    UnknownPipeline,

    #[error("Engine failure: {0}")]
    Failed(String),
}
