//! The per-room world-delta store.
//!
//! The world itself is procedural: every client can regenerate the baseline
//! from the seed. Only deviations from that baseline live here:
//!
//! - **overrides**: coordinates whose block differs from the baseline
//!   (in practice, mined blocks set to AIR),
//! - **loot**: drops spawned by mining, collected or not,
//! - **stats**: running counters for the room.
//!
//! A store is owned by exactly one room actor and never shared.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use voxmine_protocol::{
    BlockOverride, BlockType, LootKind, LootRejection, LootView, MineRejection, VoxelCoord,
    unix_millis,
};

use crate::{DeltaStorage, StoreError};

/// Version tag written into every persisted record.
pub const DELTA_FORMAT_VERSION: u32 = 1;

// ---------------------------------------------------------------------------
// Data
// ---------------------------------------------------------------------------

/// A loot drop lying at a coordinate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LootEntry {
    pub kind: LootKind,
    pub value: u32,
    pub spawned_at_ms: u64,
    pub collected: bool,
}

/// Running counters for one room.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MiningStats {
    pub blocks_mined: u64,
    pub high_value_mined: u64,
}

/// Result of a successful [`DeltaStore::mine`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MinedBlock {
    /// Base value of the block, before any tier multiplier.
    pub value: u32,
    pub high_value: bool,
}

/// What [`DeltaStore::restore`] found in storage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RestoreOutcome {
    /// No record existed; the store starts empty.
    Fresh,
    /// A record was loaded in full.
    Restored { overrides: usize, loot: usize },
    /// A record existed but could not be used; the store starts empty.
    Discarded,
    /// The backend could not be read. Nothing is written until a later
    /// [`DeltaStore::retry_load`] succeeds.
    LoadFailed,
}

// ---------------------------------------------------------------------------
// Persisted format
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct VersionHeader {
    version: u32,
}

#[derive(Debug, Serialize, Deserialize)]
struct PersistedLoot {
    coord: VoxelCoord,
    #[serde(flatten)]
    entry: LootEntry,
}

#[derive(Debug, Serialize, Deserialize)]
struct PersistedDelta {
    version: u32,
    stats: MiningStats,
    overrides: Vec<BlockOverride>,
    loot: Vec<PersistedLoot>,
}

// ---------------------------------------------------------------------------
// DeltaStore
// ---------------------------------------------------------------------------

/// Authoritative record of every deviation from the procedural world in
/// one room.
#[derive(Debug)]
pub struct DeltaStore {
    storage_key: String,
    overrides: HashMap<VoxelCoord, BlockType>,
    loot: HashMap<VoxelCoord, LootEntry>,
    stats: MiningStats,
    dirty: bool,
    load_pending: bool,
}

impl DeltaStore {
    /// Creates an empty, clean store that persists under `storage_key`.
    pub fn new(storage_key: impl Into<String>) -> Self {
        Self {
            storage_key: storage_key.into(),
            overrides: HashMap::new(),
            loot: HashMap::new(),
            stats: MiningStats::default(),
            dirty: false,
            load_pending: false,
        }
    }

    pub fn storage_key(&self) -> &str {
        &self.storage_key
    }

    /// Whether there are changes not yet written to storage.
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Whether the last load from storage failed and has not been retried
    /// successfully.
    pub fn is_load_pending(&self) -> bool {
        self.load_pending
    }

    pub fn stats(&self) -> MiningStats {
        self.stats
    }

    pub fn override_count(&self) -> usize {
        self.overrides.len()
    }

    // -- Overrides ----------------------------------------------------------

    pub fn is_modified(&self, coord: VoxelCoord) -> bool {
        self.overrides.contains_key(&coord)
    }

    /// The block at `coord` if it deviates from the baseline. `None` means
    /// the caller should fall back to procedural generation.
    pub fn get_override(&self, coord: VoxelCoord) -> Option<BlockType> {
        self.overrides.get(&coord).copied()
    }

    /// Unconditionally records `block` at `coord`.
    pub fn set_override(&mut self, coord: VoxelCoord, block: BlockType) {
        self.overrides.insert(coord, block);
        self.dirty = true;
    }

    /// Extracts the block at `coord`, whose baseline type is `original`.
    ///
    /// An AIR override means the block is gone for good, so mining the same
    /// coordinate twice always fails the second time with `AlreadyMined`.
    pub fn mine(
        &mut self,
        coord: VoxelCoord,
        original: BlockType,
    ) -> Result<MinedBlock, MineRejection> {
        if self.get_override(coord) == Some(BlockType::AIR) {
            return Err(MineRejection::AlreadyMined);
        }
        if !original.is_mineable() {
            return Err(MineRejection::NotMineable);
        }

        self.overrides.insert(coord, BlockType::AIR);
        let high_value = original.is_high_value();
        self.stats.blocks_mined += 1;
        if high_value {
            self.stats.high_value_mined += 1;
        }
        self.dirty = true;

        Ok(MinedBlock {
            value: original.base_value(),
            high_value,
        })
    }

    // -- Loot ---------------------------------------------------------------

    /// Places a fresh, uncollected drop at `coord`, replacing whatever was
    /// there.
    pub fn register_loot(&mut self, coord: VoxelCoord, kind: LootKind, value: u32) {
        self.loot.insert(
            coord,
            LootEntry {
                kind,
                value,
                spawned_at_ms: unix_millis(),
                collected: false,
            },
        );
        self.dirty = true;
    }

    /// The uncollected drop at `coord`, if any.
    pub fn peek_loot(&self, coord: VoxelCoord) -> Option<&LootEntry> {
        self.loot.get(&coord).filter(|entry| !entry.collected)
    }

    /// Marks the drop at `coord` collected and returns its value.
    pub fn collect_loot(&mut self, coord: VoxelCoord) -> Result<u32, LootRejection> {
        let entry = self.loot.get_mut(&coord).ok_or(LootRejection::NotFound)?;
        if entry.collected {
            return Err(LootRejection::AlreadyCollected);
        }
        entry.collected = true;
        self.dirty = true;
        Ok(entry.value)
    }

    // -- Sync ---------------------------------------------------------------

    /// Every override as an absolute block type, sorted by coordinate.
    pub fn snapshot_for_sync(&self) -> Vec<BlockOverride> {
        let mut out: Vec<BlockOverride> = self
            .overrides
            .iter()
            .map(|(&coord, &block_type)| BlockOverride { coord, block_type })
            .collect();
        out.sort_by_key(|o| o.coord);
        out
    }

    /// Every uncollected drop, sorted by coordinate.
    pub fn active_loot(&self) -> Vec<LootView> {
        let mut out: Vec<LootView> = self
            .loot
            .iter()
            .filter(|(_, entry)| !entry.collected)
            .map(|(&coord, entry)| LootView {
                coord,
                kind: entry.kind,
                value: entry.value,
            })
            .collect();
        out.sort_by_key(|l| l.coord);
        out
    }

    // -- Persistence --------------------------------------------------------

    /// Writes the store to `storage` if it has unsaved changes.
    ///
    /// On failure the store stays dirty, so the next flush retries. While a
    /// load is pending nothing is written, since the stored record may hold
    /// state this store has never seen.
    pub async fn persist<S: DeltaStorage>(&mut self, storage: &S) -> Result<(), StoreError> {
        if !self.dirty {
            return Ok(());
        }
        if self.load_pending {
            tracing::debug!(key = %self.storage_key, "world delta not loaded yet, skipping persist");
            return Err(StoreError::NotLoaded);
        }

        let result = async {
            let bytes = serde_json::to_vec(&self.to_persisted()).map_err(StoreError::Encode)?;
            storage.save(&self.storage_key, &bytes).await?;
            Ok::<_, StoreError>(bytes.len())
        }
        .await;

        match result {
            Ok(len) => {
                self.dirty = false;
                tracing::debug!(key = %self.storage_key, len, "world delta persisted");
                Ok(())
            }
            Err(e) => {
                tracing::warn!(key = %self.storage_key, error = %e, "failed to persist world delta");
                Err(e)
            }
        }
    }

    /// Replaces the contents of the store with the record in `storage`.
    ///
    /// All or nothing: a record with an unknown version or malformed body
    /// is logged and ignored, and the store starts empty. A backend read
    /// error leaves the load pending instead; see [`retry_load`](Self::retry_load).
    pub async fn restore<S: DeltaStorage>(&mut self, storage: &S) -> RestoreOutcome {
        self.overrides.clear();
        self.loot.clear();
        self.stats = MiningStats::default();
        self.dirty = false;
        self.load_pending = false;
        self.load(storage).await
    }

    /// Retries a load that failed earlier. Returns `None` if none is pending.
    ///
    /// Changes made since the failure win over the stored record, and the
    /// counters of both are added up.
    pub async fn retry_load<S: DeltaStorage>(&mut self, storage: &S) -> Option<RestoreOutcome> {
        if !self.load_pending {
            return None;
        }
        Some(self.load(storage).await)
    }

    async fn load<S: DeltaStorage>(&mut self, storage: &S) -> RestoreOutcome {
        let bytes = match storage.load(&self.storage_key).await {
            Ok(Some(bytes)) => bytes,
            Ok(None) => {
                self.load_pending = false;
                return RestoreOutcome::Fresh;
            }
            Err(e) => {
                tracing::warn!(key = %self.storage_key, error = %e, "failed to load world delta");
                self.load_pending = true;
                return RestoreOutcome::LoadFailed;
            }
        };
        self.load_pending = false;

        match decode(&bytes) {
            Ok(record) => {
                let outcome = RestoreOutcome::Restored {
                    overrides: record.overrides.len(),
                    loot: record.loot.len(),
                };
                self.stats.blocks_mined += record.stats.blocks_mined;
                self.stats.high_value_mined += record.stats.high_value_mined;
                for o in record.overrides {
                    self.overrides.entry(o.coord).or_insert(o.block_type);
                }
                for l in record.loot {
                    self.loot.entry(l.coord).or_insert(l.entry);
                }
                tracing::info!(key = %self.storage_key, ?outcome, "world delta restored");
                outcome
            }
            Err(e) => {
                tracing::warn!(
                    key = %self.storage_key,
                    error = %e,
                    "discarding unusable world delta record"
                );
                RestoreOutcome::Discarded
            }
        }
    }

    fn to_persisted(&self) -> PersistedDelta {
        let mut loot: Vec<PersistedLoot> = self
            .loot
            .iter()
            .map(|(&coord, &entry)| PersistedLoot { coord, entry })
            .collect();
        loot.sort_by_key(|l| l.coord);

        PersistedDelta {
            version: DELTA_FORMAT_VERSION,
            stats: self.stats,
            overrides: self.snapshot_for_sync(),
            loot,
        }
    }
}

fn decode(bytes: &[u8]) -> Result<PersistedDelta, StoreError> {
    let header: VersionHeader = serde_json::from_slice(bytes).map_err(StoreError::Decode)?;
    if header.version != DELTA_FORMAT_VERSION {
        return Err(StoreError::UnsupportedVersion(header.version));
    }
    serde_json::from_slice(bytes).map_err(StoreError::Decode)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> DeltaStore {
        DeltaStore::new("test-room")
    }

    // =====================================================================
    // Mining
    // =====================================================================

    #[test]
    fn test_mine_gold_returns_value_and_high_value_flag() {
        let mut s = store();
        let c = VoxelCoord::new(1, 2, 3);

        let mined = s.mine(c, BlockType::GOLD).unwrap();

        assert_eq!(mined, MinedBlock { value: 10, high_value: true });
        assert_eq!(s.get_override(c), Some(BlockType::AIR));
        assert_eq!(s.stats(), MiningStats { blocks_mined: 1, high_value_mined: 1 });
        assert!(s.is_dirty());
    }

    #[test]
    fn test_mine_same_coord_twice_already_mined() {
        let mut s = store();
        let c = VoxelCoord::new(0, 0, 0);
        s.mine(c, BlockType::STONE).unwrap();

        assert_eq!(s.mine(c, BlockType::STONE), Err(MineRejection::AlreadyMined));
        assert_eq!(s.mine(c, BlockType::BEDROCK), Err(MineRejection::AlreadyMined));
        assert_eq!(s.stats().blocks_mined, 1);
    }

    #[test]
    fn test_mine_unmineable_leaves_store_clean() {
        let mut s = store();
        let c = VoxelCoord::new(5, 5, 5);

        assert_eq!(s.mine(c, BlockType::BEDROCK), Err(MineRejection::NotMineable));
        assert_eq!(s.mine(c, BlockType::AIR), Err(MineRejection::NotMineable));
        assert!(!s.is_modified(c));
        assert!(!s.is_dirty());
    }

    #[test]
    fn test_mine_over_non_air_override_succeeds() {
        let mut s = store();
        let c = VoxelCoord::new(2, 2, 2);
        s.set_override(c, BlockType::STONE);

        assert!(s.mine(c, BlockType::STONE).is_ok());
        assert_eq!(s.get_override(c), Some(BlockType::AIR));
    }

    #[test]
    fn test_set_override_marks_dirty() {
        let mut s = store();
        assert!(!s.is_dirty());
        s.set_override(VoxelCoord::new(-1, 0, 0), BlockType::DIRT);
        assert!(s.is_dirty());
        assert!(s.is_modified(VoxelCoord::new(-1, 0, 0)));
    }

    // =====================================================================
    // Loot
    // =====================================================================

    #[test]
    fn test_collect_loot_once_then_already_collected() {
        let mut s = store();
        let c = VoxelCoord::new(1, 1, 1);
        s.register_loot(c, LootKind::Gem, 40);

        assert_eq!(s.peek_loot(c).map(|e| e.value), Some(40));
        assert_eq!(s.collect_loot(c), Ok(40));
        assert_eq!(s.collect_loot(c), Err(LootRejection::AlreadyCollected));
        assert!(s.peek_loot(c).is_none());
    }

    #[test]
    fn test_collect_loot_missing_not_found() {
        let mut s = store();
        assert_eq!(
            s.collect_loot(VoxelCoord::new(9, 9, 9)),
            Err(LootRejection::NotFound)
        );
    }

    #[test]
    fn test_register_loot_overwrites_collected_entry() {
        let mut s = store();
        let c = VoxelCoord::new(3, 3, 3);
        s.register_loot(c, LootKind::Coins, 5);
        s.collect_loot(c).unwrap();

        s.register_loot(c, LootKind::Artifact, 80);

        let entry = s.peek_loot(c).unwrap();
        assert_eq!(entry.kind, LootKind::Artifact);
        assert!(!entry.collected);
    }

    #[test]
    fn test_active_loot_skips_collected() {
        let mut s = store();
        s.register_loot(VoxelCoord::new(1, 0, 0), LootKind::Coins, 5);
        s.register_loot(VoxelCoord::new(0, 0, 0), LootKind::Gem, 7);
        s.collect_loot(VoxelCoord::new(1, 0, 0)).unwrap();

        let active = s.active_loot();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].coord, VoxelCoord::new(0, 0, 0));
    }

    // =====================================================================
    // Sync
    // =====================================================================

    #[test]
    fn test_snapshot_for_sync_sorted_by_coord() {
        let mut s = store();
        s.mine(VoxelCoord::new(2, 0, 0), BlockType::DIRT).unwrap();
        s.mine(VoxelCoord::new(-3, 0, 0), BlockType::DIRT).unwrap();
        s.set_override(VoxelCoord::new(0, 5, 0), BlockType::STONE);

        let snap = s.snapshot_for_sync();
        let xs: Vec<i32> = snap.iter().map(|o| o.coord.x).collect();
        assert_eq!(xs, vec![-3, 0, 2]);
        assert_eq!(snap[1].block_type, BlockType::STONE);
    }

    #[test]
    fn test_decode_rejects_unknown_version() {
        let bytes = br#"{"version":2,"stats":{},"overrides":[],"loot":[]}"#;
        assert!(matches!(
            decode(bytes),
            Err(StoreError::UnsupportedVersion(2))
        ));
    }
}
