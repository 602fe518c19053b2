//! Error types for the room layer.

use voxmine_protocol::RoomId;
use voxmine_session::PlayerSession;

use crate::AdmitRejection;

/// Errors raised when talking to a room actor.
#[derive(Debug, thiserror::Error)]
pub enum RoomError {
    /// The room's actor has stopped; its command channel is closed.
    #[error("room {0} is unavailable")]
    Unavailable(RoomId),
}

/// A failed [`RoomHandle::add_player`](crate::RoomHandle::add_player).
///
/// Whenever possible the session comes back to the caller so it can be
/// offered to another room or kept pending.
#[derive(Debug, thiserror::Error)]
pub enum JoinError {
    #[error("room turned the session away: {0:?}")]
    Rejected(AdmitRejection, PlayerSession),

    /// The actor is gone. The session is recovered if the command never
    /// reached it.
    #[error("room {0} is unavailable")]
    Unavailable(RoomId, Option<PlayerSession>),
}

impl JoinError {
    /// Takes back the session, if it survived.
    pub fn into_session(self) -> Option<PlayerSession> {
        match self {
            Self::Rejected(_, session) => Some(session),
            Self::Unavailable(_, session) => session,
        }
    }
}
