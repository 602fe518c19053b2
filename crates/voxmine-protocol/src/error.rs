//! Error types for the protocol layer.

/// Errors raised while encoding or decoding frames.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    /// A value could not be turned into bytes.
    #[cfg(feature = "json")]
    #[error("encode failed: {0}")]
    Encode(serde_json::Error),

    /// The bytes were malformed, truncated, or did not match any message.
    #[cfg(feature = "json")]
    #[error("decode failed: {0}")]
    Decode(serde_json::Error),

    /// The frame decoded but cannot be used, e.g. a binary frame that is
    /// not valid UTF-8.
    #[error("invalid message: {0}")]
    InvalidMessage(String),
}
