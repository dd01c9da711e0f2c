//! Bamboo error types
//!
//! Comprehensive error handling for envelope, framing, and transport failures.

use thiserror::Error;

/// Main error type for bamboo-core operations.
#[derive(Error, Debug)]
pub enum BambooError {
    /// A direct (non-broadcast) REQ/CONFIG/PUB message was built without a key.
    #[error("invalid envelope: {0}")]
    InvalidEnvelope(String),

    /// The transport reported an I/O failure while sending a frame.
    #[error("transport error: {0}")]
    Transport(#[from] std::io::Error),

    /// An inbound frame's header failed to parse as the envelope JSON shape,
    /// including the case where it carries a header field this version of
    /// the protocol does not know (`deny_unknown_fields`).
    #[error("decode error: {0}")]
    Decode(#[from] serde_json::Error),
}

/// Result type alias for bamboo-core operations.
pub type Result<T> = std::result::Result<T, BambooError>;

impl BambooError {
    /// Create an invalid-envelope error with a message.
    pub fn invalid_envelope(msg: impl Into<String>) -> Self {
        Self::InvalidEnvelope(msg.into())
    }
}
