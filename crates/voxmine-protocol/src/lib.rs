//! # voxmine-protocol
//!
//! Wire vocabulary for the Voxmine server: identifiers, spatial types,
//! block and tier tables, reason codes, and the client/server message
//! catalogs, plus the [`Codec`] used to put them in frames.
//!
//! Nothing in this crate performs I/O. Every other Voxmine crate depends on
//! it, and it depends on no other Voxmine crate.

mod codec;
mod error;
mod messages;
mod reasons;
mod types;

pub use codec::Codec;
#[cfg(feature = "json")]
pub use codec::JsonCodec;
pub use error::ProtocolError;
pub use messages::{BlockOverride, ClientMessage, LootView, MemberState, ServerMessage};
pub use reasons::{
    ErrorCode, LoginFailure, LootKind, LootRejection, MineRejection, ViolationKind,
};
pub use types::{
    BlockType, PlayerId, Recipient, RoomId, Tier, Vec3, VoxelCoord, round2, unix_millis,
};
