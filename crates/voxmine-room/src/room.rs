//! The room state machine.
//!
//! [`Room`] is plain synchronous state: members, world deltas, and the tick
//! clock. Every operation takes `now` explicitly and pushes its replies
//! straight into the members' outbound channels. The actor in
//! [`crate::actor`] owns one `Room` and serializes access to it.

use std::collections::BTreeMap;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tokio::time::Instant;
use voxmine_protocol::{
    BlockType, LootKind, LootRejection, MemberState, MineRejection, PlayerId, Recipient, RoomId,
    ServerMessage, Tier, ViolationKind, VoxelCoord, unix_millis,
};
use voxmine_session::{PlayerSession, SessionPhase};
use voxmine_world::DeltaStore;

use crate::movement::{MoveVerdict, validate_move};
use crate::{RoomConfig, SimulationRules};

/// Reason sent with `KICKED` when the anti-cheat threshold is reached.
pub const KICK_REASON_VIOLATIONS: &str = "too many anti-cheat violations";

// ---------------------------------------------------------------------------
// Results
// ---------------------------------------------------------------------------

/// A successful admission.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Admission {
    pub room_id: RoomId,
    pub tier: Tier,
    /// Member count including the new player.
    pub occupancy: usize,
}

/// Why a room turned a session away.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdmitRejection {
    RoomFull,
    /// The room actor stopped before the join was processed.
    Closing,
}

/// A snapshot of room metadata.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoomInfo {
    pub room_id: RoomId,
    pub tier: Tier,
    pub default: bool,
    pub occupancy: usize,
    pub capacity: usize,
    pub tick: u64,
    pub blocks_mined: u64,
    pub reclaimable: bool,
}

// ---------------------------------------------------------------------------
// Room
// ---------------------------------------------------------------------------

/// One simulated shard of the world.
pub struct Room {
    id: RoomId,
    config: RoomConfig,
    rules: SimulationRules,
    default: bool,
    members: BTreeMap<PlayerId, PlayerSession>,
    store: DeltaStore,
    tick: u64,
    last_tick_at: Instant,
    empty_since: Option<Instant>,
    rng: StdRng,
}

impl Room {
    /// Creates an empty room. `default` rooms are never reclaimed when idle.
    pub fn new(
        id: RoomId,
        config: RoomConfig,
        rules: SimulationRules,
        default: bool,
        store: DeltaStore,
        now: Instant,
    ) -> Self {
        Self {
            id,
            config,
            rules,
            default,
            members: BTreeMap::new(),
            store,
            tick: 0,
            last_tick_at: now,
            empty_since: Some(now),
            rng: StdRng::seed_from_u64(rand::random()),
        }
    }

    /// Replaces the loot RNG with a deterministic one.
    pub fn seed_rng(&mut self, seed: u64) {
        self.rng = StdRng::seed_from_u64(seed);
    }

    // -- Accessors ----------------------------------------------------------

    pub fn id(&self) -> RoomId {
        self.id
    }

    pub fn tier(&self) -> Tier {
        self.config.tier
    }

    pub fn config(&self) -> &RoomConfig {
        &self.config
    }

    pub fn rules(&self) -> &SimulationRules {
        &self.rules
    }

    pub fn is_default(&self) -> bool {
        self.default
    }

    pub fn occupancy(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    pub fn has_space(&self) -> bool {
        self.members.len() < self.config.capacity
    }

    pub fn contains(&self, player_id: PlayerId) -> bool {
        self.members.contains_key(&player_id)
    }

    pub fn member(&self, player_id: PlayerId) -> Option<&PlayerSession> {
        self.members.get(&player_id)
    }

    pub fn current_tick(&self) -> u64 {
        self.tick
    }

    pub fn store(&self) -> &DeltaStore {
        &self.store
    }

    pub fn store_mut(&mut self) -> &mut DeltaStore {
        &mut self.store
    }

    pub fn info(&self, now: Instant) -> RoomInfo {
        RoomInfo {
            room_id: self.id,
            tier: self.config.tier,
            default: self.default,
            occupancy: self.members.len(),
            capacity: self.config.capacity,
            tick: self.tick,
            blocks_mined: self.store.stats().blocks_mined,
            reclaimable: self.is_reclaimable(now),
        }
    }

    // -- Membership ---------------------------------------------------------

    /// Admits `session`, placing it at the spawn point.
    ///
    /// At capacity the session is handed back untouched, so the caller can
    /// try another room.
    pub fn add_player(
        &mut self,
        mut session: PlayerSession,
        now: Instant,
    ) -> Result<Admission, (AdmitRejection, PlayerSession)> {
        if !self.has_space() {
            return Err((AdmitRejection::RoomFull, session));
        }

        if self.members.is_empty() {
            // The tick clock was stopped; restart it from here.
            self.last_tick_at = now;
            self.empty_since = None;
        }

        let player_id = session.id();
        session.take_input();
        session.apply_validated_move(self.rules.spawn, 0.0);
        session.set_phase(SessionPhase::InRoom(self.id));
        self.members.insert(player_id, session);
        let occupancy = self.members.len();

        self.dispatch(
            Recipient::Player(player_id),
            ServerMessage::RoomJoined {
                room_id: self.id,
                tier: self.config.tier,
                capacity: self.config.capacity,
                loot_multiplier: self.config.loot_multiplier,
                tick_rate: self.rules.tick_rate_hz,
                spawn: self.rules.spawn,
                occupancy,
                world: self.store.snapshot_for_sync(),
                loot: self.store.active_loot(),
            },
        );
        self.dispatch(
            Recipient::AllExcept(player_id),
            ServerMessage::PlayerJoined {
                player_id,
                occupancy,
            },
        );

        tracing::info!(
            room_id = %self.id,
            %player_id,
            occupancy,
            capacity = self.config.capacity,
            "player joined room"
        );

        Ok(Admission {
            room_id: self.id,
            tier: self.config.tier,
            occupancy,
        })
    }

    /// Removes a member and tells everyone left. Returns the session, or
    /// `None` if the player was not here.
    pub fn remove_player(&mut self, player_id: PlayerId, now: Instant) -> Option<PlayerSession> {
        let mut session = self.members.remove(&player_id)?;
        session.set_phase(SessionPhase::Terminated);
        let occupancy = self.members.len();

        self.dispatch(
            Recipient::All,
            ServerMessage::PlayerLeft {
                player_id,
                occupancy,
            },
        );
        if self.members.is_empty() {
            self.empty_since = Some(now);
        }

        tracing::info!(room_id = %self.id, %player_id, occupancy, "player left room");
        Some(session)
    }

    /// Sends `KICKED`, asks the connection to close, and removes the member.
    pub fn kick(&mut self, player_id: PlayerId, reason: &str, now: Instant) {
        if let Some(session) = self.members.get(&player_id) {
            session.send(ServerMessage::Kicked {
                reason: reason.to_string(),
            });
            session.close(reason);
            tracing::warn!(room_id = %self.id, %player_id, reason, "player kicked");
        }
        self.remove_player(player_id, now);
    }

    /// Whether this room may be torn down: not a default room, and empty
    /// for at least the idle window.
    pub fn is_reclaimable(&self, now: Instant) -> bool {
        !self.default
            && self.members.is_empty()
            && self
                .empty_since
                .is_some_and(|since| now.saturating_duration_since(since) >= self.rules.idle_teardown)
    }

    // -- Simulation ---------------------------------------------------------

    /// Buffers a member's movement request for the next tick.
    pub fn set_input(&mut self, player_id: PlayerId, x: f32, y: f32, z: f32, yaw: f32, now: Instant) {
        if let Some(session) = self.members.get_mut(&player_id) {
            session.set_input(x, y, z, yaw, now);
        }
    }

    /// Advances the simulation by one tick and broadcasts `STATE`.
    ///
    /// Does nothing and returns `false` while the room is empty.
    pub fn tick(&mut self, now: Instant) -> bool {
        if self.members.is_empty() {
            return false;
        }

        let elapsed = now.saturating_duration_since(self.last_tick_at).as_secs_f32();
        self.last_tick_at = now;
        self.tick += 1;

        let mut kicks = Vec::new();
        for (&player_id, session) in self.members.iter_mut() {
            let Some(input) = session.take_input() else {
                continue;
            };
            let verdict = if input.yaw.is_finite() {
                validate_move(session.position(), input.position, elapsed, &self.rules)
            } else {
                MoveVerdict::Invalid
            };
            match verdict {
                MoveVerdict::Accept(p) | MoveVerdict::Clamp(p) => {
                    session.apply_validated_move(p, input.yaw);
                }
                MoveVerdict::Reject => {
                    session.send(ServerMessage::PositionCorrection {
                        position: session.position(),
                        yaw: session.yaw(),
                    });
                    if session.record_violation(ViolationKind::Teleport, now) {
                        kicks.push(player_id);
                    }
                }
                MoveVerdict::Invalid => {
                    tracing::debug!(room_id = %self.id, %player_id, "dropping non-finite input");
                }
            }
        }
        for player_id in kicks {
            self.kick(player_id, KICK_REASON_VIOLATIONS, now);
        }

        let players: Vec<MemberState> = self.members.values().map(PlayerSession::member_state).collect();
        self.dispatch(
            Recipient::All,
            ServerMessage::State {
                tick: self.tick,
                timestamp: unix_millis(),
                room_id: self.id,
                players,
            },
        );
        true
    }

    /// Handles a mining request. Replies to the miner either way and, on
    /// success, tells everyone else the block is gone.
    ///
    /// Returns the credited reward.
    pub fn mine(
        &mut self,
        player_id: PlayerId,
        coord: VoxelCoord,
        claimed: BlockType,
        now: Instant,
    ) -> Result<u64, MineRejection> {
        let Some(session) = self.members.get_mut(&player_id) else {
            return Err(MineRejection::NotInRoom);
        };

        let checked = if !session.mine_ready(now, self.rules.mining_cooldown) {
            Err((MineRejection::Cooldown, false))
        } else if !session.within_reach(coord, self.rules.mining_range) {
            let escalate = session.record_violation(ViolationKind::MineRange, now);
            Err((MineRejection::OutOfRange, escalate))
        } else if !claimed.is_mineable() {
            Err((MineRejection::NotMineable, false))
        } else {
            self.store.mine(coord, claimed).map_err(|r| (r, false))
        };

        let mined = match checked {
            Ok(mined) => mined,
            Err((reason, escalate)) => {
                session.send(ServerMessage::MineFailed { coord, reason });
                tracing::debug!(room_id = %self.id, %player_id, %coord, %reason, "mine rejected");
                if escalate {
                    self.kick(player_id, KICK_REASON_VIOLATIONS, now);
                }
                return Err(reason);
            }
        };

        let reward = self.config.reward_for(mined.value);
        let balance = session.record_earnings(reward, now);
        session.send(ServerMessage::MineSuccess {
            coord,
            reward,
            balance,
            high_value: mined.high_value,
        });
        self.dispatch(
            Recipient::AllExcept(player_id),
            ServerMessage::BlockMined {
                coord,
                by: player_id,
            },
        );

        if mined.high_value {
            tracing::info!(room_id = %self.id, %player_id, %coord, reward, "high-value block mined");
        }

        self.maybe_spawn_loot(coord);
        Ok(reward)
    }

    fn maybe_spawn_loot(&mut self, coord: VoxelCoord) {
        if !self.rng.random_bool(self.config.loot_spawn_chance.clamp(0.0, 1.0)) {
            return;
        }
        let kind = LootKind::ALL[self.rng.random_range(0..LootKind::ALL.len())];
        let lo = self.config.loot_value_min;
        let hi = self.config.loot_value_max.max(lo);
        let value = self.rng.random_range(lo..=hi);

        self.store.register_loot(coord, kind, value);
        self.dispatch(
            Recipient::All,
            ServerMessage::LootSpawned { coord, kind, value },
        );
        tracing::debug!(room_id = %self.id, %coord, %kind, value, "loot spawned");
    }

    /// Handles a loot pickup. Returns the credited reward.
    pub fn collect_loot(
        &mut self,
        player_id: PlayerId,
        coord: VoxelCoord,
        now: Instant,
    ) -> Result<u64, LootRejection> {
        let Some(session) = self.members.get_mut(&player_id) else {
            return Err(LootRejection::NotInRoom);
        };

        let checked = if !session.within_reach(coord, self.rules.mining_range) {
            let escalate = session.record_violation(ViolationKind::LootRange, now);
            Err((LootRejection::OutOfRange, escalate))
        } else {
            self.store.collect_loot(coord).map_err(|r| (r, false))
        };

        let value = match checked {
            Ok(value) => value,
            Err((reason, escalate)) => {
                session.send(ServerMessage::LootFailed { coord, reason });
                if escalate {
                    self.kick(player_id, KICK_REASON_VIOLATIONS, now);
                }
                return Err(reason);
            }
        };

        let reward = self.config.reward_for(value);
        let balance = session.credit(reward);
        session.send(ServerMessage::LootCollected {
            coord,
            reward,
            balance,
        });
        self.dispatch(
            Recipient::AllExcept(player_id),
            ServerMessage::LootTaken {
                coord,
                by: player_id,
            },
        );
        Ok(reward)
    }

    /// Answers a latency check with the server clock and current tick.
    pub fn ping(&self, player_id: PlayerId, client_time: u64) {
        self.dispatch(
            Recipient::Player(player_id),
            ServerMessage::Pong {
                client_time,
                server_time: unix_millis(),
                tick: self.tick,
            },
        );
    }

    /// Broadcasts chat from a member, cut to the length limit.
    pub fn chat(&self, player_id: PlayerId, text: &str) {
        if !self.contains(player_id) {
            return;
        }
        let text: String = text.chars().take(self.rules.chat_max_len).collect();
        self.dispatch(
            Recipient::All,
            ServerMessage::Chat {
                from: player_id,
                text,
            },
        );
    }

    /// Sends `SERVER_SHUTDOWN` to every member and closes their connections.
    pub fn announce_shutdown(&self, message: &str) {
        self.dispatch(
            Recipient::All,
            ServerMessage::ServerShutdown {
                message: message.to_string(),
            },
        );
        for session in self.members.values() {
            session.close("server shutdown");
        }
    }

    // -- Delivery -----------------------------------------------------------

    /// Queues `msg` for every member `recipient` addresses. Members whose
    /// connection is gone are skipped.
    pub fn dispatch(&self, recipient: Recipient, msg: ServerMessage) {
        match recipient {
            Recipient::Player(player_id) => {
                if let Some(session) = self.members.get(&player_id) {
                    session.send(msg);
                }
            }
            Recipient::All | Recipient::AllExcept(_) => {
                for session in self.members.values() {
                    if recipient.includes(session.id()) {
                        session.send(msg.clone());
                    }
                }
            }
        }
    }
}
