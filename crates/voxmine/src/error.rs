//! Unified error type for the Voxmine server.

use voxmine_protocol::ProtocolError;
use voxmine_room::RoomError;
use voxmine_session::SessionError;
use voxmine_transport::TransportError;
use voxmine_world::StoreError;

/// Top-level error that wraps all crate-specific errors.
///
/// The `#[from]` attribute on each variant auto-generates `From` impls,
/// so the `?` operator converts sub-crate errors automatically.
#[derive(Debug, thiserror::Error)]
pub enum VoxmineError {
    /// A transport-level error (bind, accept, send, recv).
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// A protocol-level error (encode, decode, invalid message).
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    #[error(transparent)]
    Session(#[from] SessionError),

    #[error(transparent)]
    Room(#[from] RoomError),

    /// Persisting or restoring a world delta failed.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// An environment variable could not be parsed.
    #[error("invalid configuration: {0}")]
    Config(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_transport_error() {
        let err = TransportError::ConnectionClosed("gone".into());
        let voxmine_err: VoxmineError = err.into();
        assert!(matches!(voxmine_err, VoxmineError::Transport(_)));
        assert!(voxmine_err.to_string().contains("gone"));
    }

    #[test]
    fn test_from_protocol_error() {
        let err = ProtocolError::InvalidMessage("bad".into());
        let voxmine_err: VoxmineError = err.into();
        assert!(matches!(voxmine_err, VoxmineError::Protocol(_)));
    }

    #[test]
    fn test_from_session_error() {
        let err = SessionError::LookupFailed("timeout".into());
        let voxmine_err: VoxmineError = err.into();
        assert!(matches!(voxmine_err, VoxmineError::Session(_)));
    }

    #[test]
    fn test_from_room_error() {
        let err = RoomError::Unavailable(voxmine_protocol::RoomId(1));
        let voxmine_err: VoxmineError = err.into();
        assert!(matches!(voxmine_err, VoxmineError::Room(_)));
        assert_eq!(voxmine_err.to_string(), "room R-1 is unavailable");
    }

    #[test]
    fn test_from_store_error() {
        let err = StoreError::UnsupportedVersion(9);
        let voxmine_err: VoxmineError = err.into();
        assert!(matches!(voxmine_err, VoxmineError::Store(_)));
    }
}
