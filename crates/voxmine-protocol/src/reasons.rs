//! Stable reason codes carried by rejection messages.
//!
//! Every enum here serializes as a SCREAMING_SNAKE_CASE string. Clients
//! branch on these values, so variants may be added but never renamed.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Why a `MINE_BLOCK` request was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MineRejection {
    /// The player mined less than the cooldown ago.
    Cooldown,
    /// The block centre is beyond the mining range.
    OutOfRange,
    /// The claimed block type cannot be extracted.
    NotMineable,
    /// The coordinate already holds an AIR override.
    AlreadyMined,
    /// The session left the room before the request was processed.
    NotInRoom,
}

/// Why a `COLLECT_LOOT` request was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LootRejection {
    NotFound,
    AlreadyCollected,
    OutOfRange,
    NotInRoom,
}

/// Why a `LOGIN` attempt failed. The session stays pending and may retry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LoginFailure {
    InvalidWallet,
    /// The balance lookup failed.
    ServerError,
    RoomFull,
    AlreadyInRoom,
    /// Another login for the same session is still awaiting its lookup.
    LoginInProgress,
    /// The session disconnected or was never registered.
    UnknownSession,
}

/// Codes carried by the generic `ERROR` message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    NotInRoom,
    UnknownMessage,
    MalformedMessage,
}

/// Categories of anti-cheat violation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ViolationKind {
    Teleport,
    MineRange,
    LootRange,
}

/// What a loot drop looks like to the client. The server treats all kinds
/// alike; only `value` matters economically.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LootKind {
    Coins,
    Gem,
    Artifact,
}

impl LootKind {
    pub const ALL: [LootKind; 3] = [LootKind::Coins, LootKind::Gem, LootKind::Artifact];
}

macro_rules! display_as_code {
    ($($ty:ty),* $(,)?) => {
        $(
            impl fmt::Display for $ty {
                fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                    fmt::Debug::fmt(self, f)
                }
            }
        )*
    };
}

display_as_code!(
    MineRejection,
    LootRejection,
    LoginFailure,
    ErrorCode,
    ViolationKind,
    LootKind,
);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reason_codes_serialize_screaming_snake() {
        assert_eq!(
            serde_json::to_string(&MineRejection::AlreadyMined).unwrap(),
            "\"ALREADY_MINED\""
        );
        assert_eq!(
            serde_json::to_string(&LoginFailure::LoginInProgress).unwrap(),
            "\"LOGIN_IN_PROGRESS\""
        );
        assert_eq!(
            serde_json::to_string(&ErrorCode::NotInRoom).unwrap(),
            "\"NOT_IN_ROOM\""
        );
        assert_eq!(
            serde_json::to_string(&LootRejection::AlreadyCollected).unwrap(),
            "\"ALREADY_COLLECTED\""
        );
    }
}
