//! Core value types shared by every Voxmine crate.
//!
//! Everything here travels on the wire or lands in a persisted record, so
//! the serde attributes are part of the contract with the client.

use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Identity types
// ---------------------------------------------------------------------------

/// A session-scoped identifier for a connected player.
///
/// Assigned on connect and never persisted: a player who reconnects gets a
/// fresh id. `#[serde(transparent)]` keeps it a plain number in JSON.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct PlayerId(pub u64);

impl fmt::Display for PlayerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "P-{}", self.0)
    }
}

/// A unique identifier for a room (one simulated shard of the world).
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct RoomId(pub u64);

impl fmt::Display for RoomId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "R-{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// Spatial types
// ---------------------------------------------------------------------------

/// A world-space position.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Vec3 {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

impl Vec3 {
    pub const ZERO: Self = Self::new(0.0, 0.0, 0.0);

    pub const fn new(x: f32, y: f32, z: f32) -> Self {
        Self { x, y, z }
    }

    /// Euclidean distance between two points.
    pub fn distance(self, other: Self) -> f32 {
        (other - self).length()
    }

    pub fn length(self) -> f32 {
        (self.x * self.x + self.y * self.y + self.z * self.z).sqrt()
    }

    /// Multiplies every component by `factor`.
    pub fn scale(self, factor: f32) -> Self {
        Self::new(self.x * factor, self.y * factor, self.z * factor)
    }

    /// `true` when no component is NaN or infinite.
    pub fn is_finite(self) -> bool {
        self.x.is_finite() && self.y.is_finite() && self.z.is_finite()
    }

    /// Rounds each component to two decimals for compact broadcasts.
    pub fn rounded(self) -> Self {
        Self::new(round2(self.x), round2(self.y), round2(self.z))
    }
}

impl std::ops::Add for Vec3 {
    type Output = Self;

    fn add(self, rhs: Self) -> Self {
        Self::new(self.x + rhs.x, self.y + rhs.y, self.z + rhs.z)
    }
}

impl std::ops::Sub for Vec3 {
    type Output = Self;

    fn sub(self, rhs: Self) -> Self {
        Self::new(self.x - rhs.x, self.y - rhs.y, self.z - rhs.z)
    }
}

/// Rounds to two decimal places.
pub fn round2(v: f32) -> f32 {
    (v * 100.0).round() / 100.0
}

/// Integer coordinate of a single voxel.
///
/// This is the key of every world-delta map. It is a plain struct rather
/// than a formatted string, so negative coordinates need no parsing and
/// lookups never allocate.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
pub struct VoxelCoord {
    pub x: i32,
    pub y: i32,
    pub z: i32,
}

impl VoxelCoord {
    pub const fn new(x: i32, y: i32, z: i32) -> Self {
        Self { x, y, z }
    }

    /// Normalizes a world-space point to the voxel containing it.
    ///
    /// Uses `floor`, so `-0.5` lands in voxel `-1`, not `0`.
    pub fn from_world(x: f64, y: f64, z: f64) -> Self {
        Self::new(x.floor() as i32, y.floor() as i32, z.floor() as i32)
    }

    /// The centre of this voxel in world space.
    pub fn center(self) -> Vec3 {
        Vec3::new(
            self.x as f32 + 0.5,
            self.y as f32 + 0.5,
            self.z as f32 + 0.5,
        )
    }
}

impl fmt::Display for VoxelCoord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {}, {})", self.x, self.y, self.z)
    }
}

// ---------------------------------------------------------------------------
// Blocks
// ---------------------------------------------------------------------------

/// A block type id.
///
/// Kept as a raw `u8` newtype instead of a closed enum: clients may send
/// ids this server does not know, and those must reach the mineability
/// check (and fail it) rather than fail decoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BlockType(pub u8);

impl BlockType {
    pub const AIR: Self = Self(0);
    pub const GRASS: Self = Self(1);
    pub const DIRT: Self = Self(2);
    pub const STONE: Self = Self(3);
    pub const COAL: Self = Self(4);
    pub const IRON: Self = Self(5);
    pub const GOLD: Self = Self(6);
    pub const DIAMOND: Self = Self(7);
    pub const BEDROCK: Self = Self(8);

    /// The block type that counts toward the "high value" statistic.
    pub const HIGH_VALUE: Self = Self::GOLD;

    /// Whether a player may extract this block.
    pub fn is_mineable(self) -> bool {
        matches!(
            self,
            Self::GRASS
                | Self::DIRT
                | Self::STONE
                | Self::COAL
                | Self::IRON
                | Self::GOLD
                | Self::DIAMOND
        )
    }

    /// Economic value of one extraction, before the tier multiplier.
    /// Types without an entry are worth 1.
    pub fn base_value(self) -> u32 {
        match self {
            Self::COAL => 3,
            Self::IRON => 5,
            Self::GOLD => 10,
            Self::DIAMOND => 25,
            _ => 1,
        }
    }

    pub fn is_high_value(self) -> bool {
        self == Self::HIGH_VALUE
    }
}

// ---------------------------------------------------------------------------
// Tier
// ---------------------------------------------------------------------------

/// Economic bracket a player is sorted into by stake.
///
/// Ordered from lowest to highest, so `Tier::Mid > Tier::Unranked` holds.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Tier {
    Unranked,
    Mid,
    High,
}

impl Tier {
    /// Every tier, lowest first.
    pub const ALL: [Tier; 3] = [Tier::Unranked, Tier::Mid, Tier::High];

    /// Lowercase name used in storage keys and logs.
    pub fn slug(self) -> &'static str {
        match self {
            Self::Unranked => "unranked",
            Self::Mid => "mid",
            Self::High => "high",
        }
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.slug())
    }
}

// ---------------------------------------------------------------------------
// Recipient
// ---------------------------------------------------------------------------

/// Who inside a room should receive an outbound message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Recipient {
    /// Every member of the room.
    All,

    /// One member.
    Player(PlayerId),

    /// Every member except one (usually the one who caused the event).
    AllExcept(PlayerId),
}

impl Recipient {
    /// Whether `player` is addressed by this recipient.
    pub fn includes(self, player: PlayerId) -> bool {
        match self {
            Self::All => true,
            Self::Player(p) => p == player,
            Self::AllExcept(p) => p != player,
        }
    }
}

/// Milliseconds since the Unix epoch, used for every wire timestamp.
pub fn unix_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
