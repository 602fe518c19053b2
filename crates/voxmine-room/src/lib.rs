//! Room simulation for Voxmine.
//!
//! Each room runs as an isolated Tokio task (actor model) that owns its
//! members, its world delta, and a 30 Hz tick loop.
//!
//! # Key types
//!
//! - [`Room`]: the synchronous state machine (membership, movement, mining, loot)
//! - [`RoomHandle`]: send commands to a running room actor
//! - [`spawn_room`]: start an actor for a room
//! - [`RoomConfig`] / [`SimulationRules`]: per-tier and server-wide settings
//! - [`validate_move`]: the movement anti-cheat rule

mod actor;
mod config;
mod error;
mod movement;
mod room;

pub use actor::{RoomHandle, spawn_room};
pub use config::{RoomConfig, SimulationRules};
pub use error::{JoinError, RoomError};
pub use movement::{MoveVerdict, validate_move};
pub use room::{Admission, AdmitRejection, KICK_REASON_VIOLATIONS, Room, RoomInfo};
