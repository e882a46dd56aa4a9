//! Error classification and recovery policy
//!
//! Every playback failure lands in `Stopped`; classification only feeds logs
//! and diagnostics.

use crate::error::{EngineError, ErrorClass, PlaybackError};
use tracing::error;

/// What the state machine does after a playback error
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoveryAction {
    /// Tear down the pipeline and apply the stopped reset
    Stop,
}

impl ErrorClass {
    /// Map an engine error code onto a class
    pub fn from_code(code: &str) -> Self {
        match code.to_ascii_lowercase().as_str() {
            "resource-not-found" | "not-found" | "no-uri-handler" | "open-failed" => {
                ErrorClass::ResourceNotFound
            }
            "format" | "not-negotiated" | "type-not-found" | "decode" | "demux"
            | "codec-not-found" => ErrorClass::Format,
            "network" | "timeout" | "connection-refused" | "http" => ErrorClass::Network,
            _ => ErrorClass::Internal,
        }
    }

    /// Whether retrying the same URI later could succeed
    pub fn is_transient(&self) -> bool {
        matches!(self, ErrorClass::Network)
    }
}

/// Shapes engine failures into the payload observers receive
#[derive(Debug, Default, Clone, Copy)]
pub struct RecoveryPolicy;

impl RecoveryPolicy {
    pub fn new() -> Self {
        Self
    }

    /// Error notification reported asynchronously by the engine
    pub fn from_notification(
        &self,
        code: &str,
        message: impl Into<String>,
        detail: Option<String>,
    ) -> PlaybackError {
        PlaybackError {
            class: ErrorClass::from_code(code),
            code: code.to_string(),
            message: message.into(),
            detail,
        }
    }

    /// Error notification whose payload could not be decoded
    pub fn malformed(&self, detail: impl Into<String>) -> PlaybackError {
        PlaybackError {
            class: ErrorClass::Internal,
            code: "malformed-error".to_string(),
            message: "Engine reported an error with an unreadable payload".to_string(),
            detail: Some(detail.into()),
        }
    }

    /// Engine command that failed synchronously
    pub fn from_engine(&self, err: &EngineError) -> PlaybackError {
        let (class, code) = match err {
            EngineError::UnsupportedUri(_) => (ErrorClass::ResourceNotFound, "unsupported-uri"),
            EngineError::Unsupported(_) => (ErrorClass::Internal, "unsupported"),
            EngineError::UnknownPipeline => (ErrorClass::Internal, "unknown-pipeline"),
            EngineError::Failed(_) => (ErrorClass::Internal, "engine-failed"),
        };
        PlaybackError {
            class,
            code: code.to_string(),
            message: err.to_string(),
            detail: None,
        }
    }

    /// Decide the landing transition; never a silent retry
    pub fn decide(&self, err: &PlaybackError) -> RecoveryAction {
        error!(
            class = %err.class,
            code = %err.code,
            transient = err.class.is_transient(),
            message = %err.message,
            "Playback error"
        );
        RecoveryAction::Stop
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classification() {
        assert_eq!(ErrorClass::from_code("resource-not-found"), ErrorClass::ResourceNotFound);
        assert_eq!(ErrorClass::from_code("NOT-NEGOTIATED"), ErrorClass::Format);
        assert_eq!(ErrorClass::from_code("timeout"), ErrorClass::Network);
        assert_eq!(ErrorClass::from_code("segfault"), ErrorClass::Internal);
        assert!(ErrorClass::Network.is_transient());
        assert!(!ErrorClass::Format.is_transient());
    }

    #[test]
    fn test_every_error_stops() {
        let policy = RecoveryPolicy::new();
        let network = policy.from_notification("network", "connection reset", None);
        assert_eq!(policy.decide(&network), RecoveryAction::Stop);
        let malformed = policy.malformed("expected object");
        assert_eq!(malformed.class, ErrorClass::Internal);
        assert_eq!(policy.decide(&malformed), RecoveryAction::Stop);
    }

    #[test]
    fn test_engine_error_shaping() {
        let policy = RecoveryPolicy::new();
        let err = policy.from_engine(&EngineError::UnsupportedUri("foo://bar".into()));
        assert_eq!(err.class, ErrorClass::ResourceNotFound);
        assert_eq!(err.code, "unsupported-uri");
        assert!(err.message.contains("foo://bar"));
    }
}
