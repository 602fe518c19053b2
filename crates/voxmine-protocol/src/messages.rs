//! Client and server message catalogs.
//!
//! Each WebSocket text frame carries exactly one JSON object, discriminated
//! by its `"type"` field:
//!
//! ```json
//! { "type": "MINE_BLOCK", "x": 1, "y": 2, "z": 3, "block_type": 6 }
//! ```
//!
//! Inbound messages are a closed sum type. A frame whose `type` is not in
//! the catalog decodes to [`ClientMessage::Unrecognized`] instead of failing,
//! so the server can answer it with `ERROR { UNKNOWN_MESSAGE }`.

use serde::{Deserialize, Serialize};

use crate::reasons::{ErrorCode, LoginFailure, LootKind, LootRejection, MineRejection};
use crate::types::{BlockType, PlayerId, RoomId, Tier, Vec3, VoxelCoord};

// ---------------------------------------------------------------------------
// Inbound
// ---------------------------------------------------------------------------

/// Messages a client may send.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ClientMessage {
    /// Claim a wallet and ask to be placed in a room.
    Login { wallet: String },

    /// Desired position and facing. Buffered until the next tick; only the
    /// latest input between two ticks is applied.
    Input { x: f32, y: f32, z: f32, yaw: f32 },

    /// Extract the block at a world-space point. `block_type` is what the
    /// client's procedural world shows at that coordinate.
    MineBlock {
        x: f64,
        y: f64,
        z: f64,
        block_type: BlockType,
    },

    /// Pick up the loot lying at a world-space point.
    CollectLoot { x: f64, y: f64, z: f64 },

    /// Latency check, echoed back in `PONG`.
    Ping { client_time: u64 },

    Chat { text: String },

    /// Any `type` this server does not understand.
    #[serde(other)]
    Unrecognized,
}

impl ClientMessage {
    /// The wire name of this message, for logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Login { .. } => "LOGIN",
            Self::Input { .. } => "INPUT",
            Self::MineBlock { .. } => "MINE_BLOCK",
            Self::CollectLoot { .. } => "COLLECT_LOOT",
            Self::Ping { .. } => "PING",
            Self::Chat { .. } => "CHAT",
            Self::Unrecognized => "UNRECOGNIZED",
        }
    }
}

// ---------------------------------------------------------------------------
// Payload structs
// ---------------------------------------------------------------------------

/// One member's entry in a `STATE` broadcast.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemberState {
    pub id: PlayerId,
    pub x: f32,
    pub y: f32,
    pub z: f32,
    pub yaw: f32,
    pub tier: Tier,
    pub earnings: u64,
}

/// A single deviation from the procedural world.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockOverride {
    pub coord: VoxelCoord,
    pub block_type: BlockType,
}

/// An uncollected loot drop as the client sees it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LootView {
    pub coord: VoxelCoord,
    pub kind: LootKind,
    pub value: u32,
}

// ---------------------------------------------------------------------------
// Outbound
// ---------------------------------------------------------------------------

/// Messages the server sends.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ServerMessage {
    /// First message on every connection.
    Connected { session_id: PlayerId, server_time: u64 },

    LoginFailed { reason: LoginFailure },

    /// Admission succeeded. Carries everything needed to render the room:
    /// the tier settings, the spawn point, and the world deltas.
    RoomJoined {
        room_id: RoomId,
        tier: Tier,
        capacity: usize,
        loot_multiplier: f64,
        tick_rate: u32,
        spawn: Vec3,
        occupancy: usize,
        world: Vec<BlockOverride>,
        loot: Vec<LootView>,
    },

    PlayerJoined { player_id: PlayerId, occupancy: usize },

    PlayerLeft { player_id: PlayerId, occupancy: usize },

    /// Per-tick snapshot of every member, in id order.
    State {
        tick: u64,
        timestamp: u64,
        room_id: RoomId,
        players: Vec<MemberState>,
    },

    /// The requested move was rejected; snap back to this position.
    PositionCorrection { position: Vec3, yaw: f32 },

    MineSuccess {
        coord: VoxelCoord,
        reward: u64,
        balance: u64,
        high_value: bool,
    },

    MineFailed {
        coord: VoxelCoord,
        reason: MineRejection,
    },

    /// Someone else mined a block; set it to AIR locally.
    BlockMined { coord: VoxelCoord, by: PlayerId },

    LootSpawned {
        coord: VoxelCoord,
        kind: LootKind,
        value: u32,
    },

    LootCollected {
        coord: VoxelCoord,
        reward: u64,
        balance: u64,
    },

    LootFailed {
        coord: VoxelCoord,
        reason: LootRejection,
    },

    /// Someone else picked up the loot at `coord`.
    LootTaken { coord: VoxelCoord, by: PlayerId },

    Pong {
        client_time: u64,
        server_time: u64,
        tick: u64,
    },

    Chat { from: PlayerId, text: String },

    /// The session is being removed from its room and disconnected.
    Kicked { reason: String },

    ServerShutdown { message: String },

    Error { code: ErrorCode, message: String },
}

impl ServerMessage {
    /// Whether losing this message under backpressure is harmless because a
    /// newer one supersedes it.
    pub fn is_unreliable(&self) -> bool {
        matches!(self, Self::State { .. })
    }
}
