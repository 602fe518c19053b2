//! Error types for the session layer.

/// Errors raised while identifying a player.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    /// The wallet reference does not have the expected shape.
    #[error("invalid wallet reference {0:?}")]
    InvalidWallet(String),

    /// The balance lookup could not produce a stake.
    #[error("balance lookup failed: {0}")]
    LookupFailed(String),
}
