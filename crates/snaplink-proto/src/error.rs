//! Error types for the relay wire protocol.

use thiserror::Error;

/// Convenience type alias for Results using [`ProtoError`].
pub type Result<T, E = ProtoError> = std::result::Result<T, E>;

/// Errors produced while validating codes or decoding frames.
#[derive(Debug, Error)]
pub enum ProtoError {
    /// The pairing code is not exactly six ASCII digits.
    #[error("invalid pairing code {0:?}: expected exactly 6 digits")]
    InvalidCode(String),

    /// The frame is not valid JSON or a known frame has the wrong shape.
    #[error("malformed frame: {0}")]
    Malformed(#[from] serde_json::Error),

    /// The frame is a JSON object without a string `type` field.
    #[error("frame has no type discriminator")]
    MissingType,
}
