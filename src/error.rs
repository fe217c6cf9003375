//! Unified error handling for snaplink.
//!
//! Connection-level failures and capture failures are kept apart: the first
//! family degrades to "will retry", the second is reported per request over
//! the relay and never touches connection state.

use snaplink_proto::ProtoError;
use thiserror::Error;

use crate::connection::TransportError;

// ============================================================================
// Relay Errors (connection manager)
// ============================================================================

/// Errors surfaced by the connection manager.
#[derive(Debug, Error)]
pub enum RelayError {
    /// The pairing code is not exactly six digits. Not retried.
    #[error("invalid pairing code format: {0:?}")]
    InvalidCodeFormat(String),

    /// A reconnect was requested before any code was set.
    #[error("no pairing code configured")]
    NoCode,

    /// Transport failure. Always retried through backoff.
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    /// No inbound traffic within the heartbeat window; the link was force-closed.
    #[error("relay unresponsive, heartbeat timed out")]
    HeartbeatTimeout,

    /// An outbound frame could not be encoded.
    #[error("failed to encode frame: {0}")]
    Encode(#[from] ProtoError),

    /// The manager has been shut down and refuses new connections.
    #[error("connection manager is shut down")]
    ShutDown,
}

impl RelayError {
    /// Get a static error code string for log labeling.
    #[inline]
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::InvalidCodeFormat(_) => "invalid_code_format",
            Self::NoCode => "no_code",
            Self::Transport(_) => "transport_error",
            Self::HeartbeatTimeout => "heartbeat_timeout",
            Self::Encode(_) => "encode_error",
            Self::ShutDown => "shut_down",
        }
    }

    /// Whether the manager will recover from this on its own.
    pub fn is_retried(&self) -> bool {
        matches!(self, Self::Transport(_) | Self::HeartbeatTimeout)
    }
}

// ============================================================================
// Capture Errors (per-request results)
// ============================================================================

/// Reasons a screenshot request could not be served.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CaptureError {
    /// Buffer mode was requested but nothing is buffered.
    #[error("no screenshots in buffer")]
    BufferEmpty,

    /// The capture provider has no display to capture.
    #[error("no display available for capture")]
    NoDisplayAvailable,

    /// The capture provider failed.
    #[error("capture failed: {0}")]
    CaptureFailed(String),

    /// The request named a mode this agent does not serve.
    #[error("unsupported screenshot mode")]
    UnknownMode,
}

impl CaptureError {
    /// The `type` carried in a `screenshot_error` frame.
    pub fn wire_type(&self) -> &'static str {
        match self {
            Self::BufferEmpty => "BufferEmpty",
            Self::NoDisplayAvailable => "NoDisplayAvailable",
            Self::CaptureFailed(_) => "CaptureFailed",
            Self::UnknownMode => "Unknown screenshot mode",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes() {
        assert_eq!(
            RelayError::InvalidCodeFormat("12a456".into()).error_code(),
            "invalid_code_format"
        );
        assert_eq!(RelayError::HeartbeatTimeout.error_code(), "heartbeat_timeout");
        assert_eq!(RelayError::ShutDown.error_code(), "shut_down");
    }

    #[test]
    fn test_only_link_failures_are_retried() {
        assert!(RelayError::Transport(TransportError::Closed).is_retried());
        assert!(RelayError::HeartbeatTimeout.is_retried());
        assert!(!RelayError::InvalidCodeFormat("1".into()).is_retried());
        assert!(!RelayError::ShutDown.is_retried());
    }

    #[test]
    fn test_capture_wire_types() {
        assert_eq!(CaptureError::BufferEmpty.wire_type(), "BufferEmpty");
        assert_eq!(
            CaptureError::NoDisplayAvailable.wire_type(),
            "NoDisplayAvailable"
        );
        assert_eq!(
            CaptureError::CaptureFailed("x".into()).wire_type(),
            "CaptureFailed"
        );
        assert_eq!(CaptureError::UnknownMode.wire_type(), "Unknown screenshot mode");
    }
}
