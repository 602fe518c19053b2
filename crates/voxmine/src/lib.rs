//! # Voxmine
//!
//! Server-authoritative backend for a multiplayer voxel mining game.
//!
//! Players connect over WebSocket, log in with a wallet, and are placed in
//! a room matching their stake tier. Each room runs its own 30 Hz
//! simulation: movement validation, mining, loot, and periodic persistence
//! of everything that differs from the procedural world.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use voxmine::prelude::*;
//!
//! # async fn start() -> Result<(), VoxmineError> {
//! let server = VoxmineServerBuilder::new()
//!     .bind("0.0.0.0:8080")
//!     .build(StaticBalanceLookup::new(0.0), Arc::new(FileStorage::new("data/rooms")))
//!     .await?;
//! server.run().await
//! # }
//! ```

mod config;
mod error;
mod gatekeeper;
mod handler;
mod server;

pub use config::ServerConfig;
pub use error::VoxmineError;
pub use gatekeeper::{Gatekeeper, GatekeeperConfig};
pub use server::{SHUTDOWN_MESSAGE, ShutdownHandle, VoxmineServer, VoxmineServerBuilder};

/// Everything needed to configure, start, and talk to a server.
pub mod prelude {
    pub use crate::{
        Gatekeeper, GatekeeperConfig, SHUTDOWN_MESSAGE, ServerConfig, ShutdownHandle, VoxmineError,
        VoxmineServer, VoxmineServerBuilder,
    };
    pub use voxmine_protocol::{
        BlockType, ClientMessage, ErrorCode, LoginFailure, LootRejection, MineRejection, PlayerId,
        RoomId, ServerMessage, Tier, Vec3, VoxelCoord,
    };
    pub use voxmine_room::{RoomConfig, SimulationRules};
    pub use voxmine_session::{
        BalanceLookup, SessionConfig, SessionError, StaticBalanceLookup, TierThresholds,
    };
    pub use voxmine_tick::TickConfig;
    pub use voxmine_world::{DeltaStorage, FileStorage, MemoryStorage};
}
