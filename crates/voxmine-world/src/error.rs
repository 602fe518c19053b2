//! Error types for the world layer.

/// Errors raised by a [`DeltaStorage`](crate::DeltaStorage) backend.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("storage I/O failed: {0}")]
    Io(#[from] std::io::Error),

    /// The key would escape the storage directory or is empty.
    #[error("invalid storage key {0:?}")]
    InvalidKey(String),

    /// The backend refused the operation (used by in-memory fault injection).
    #[error("storage unavailable: {0}")]
    Unavailable(String),
}

/// Errors raised while persisting or restoring a [`DeltaStore`](crate::DeltaStore).
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error("failed to encode world delta: {0}")]
    Encode(#[source] serde_json::Error),

    #[error("failed to decode world delta: {0}")]
    Decode(#[source] serde_json::Error),

    #[error("unsupported world delta version {0}")]
    UnsupportedVersion(u32),

    /// The stored record has not been read yet, so writing would clobber it.
    #[error("world delta not loaded from storage yet")]
    NotLoaded,
}
