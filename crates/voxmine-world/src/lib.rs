//! # voxmine-world
//!
//! The mutable subset of a room's world: block overrides on top of the
//! procedural baseline, loot drops, and mining counters.
//!
//! [`DeltaStore`] holds that state in memory and enforces the mining and
//! loot rules. [`DeltaStorage`] is the seam to durable storage, with a
//! file-backed and an in-memory implementation.

mod error;
mod storage;
mod store;

pub use error::{StorageError, StoreError};
pub use storage::{DeltaStorage, FileStorage, MemoryStorage};
pub use store::{
    DELTA_FORMAT_VERSION, DeltaStore, LootEntry, MinedBlock, MiningStats, RestoreOutcome,
};
