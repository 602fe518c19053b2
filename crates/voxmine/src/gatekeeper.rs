//! The room gatekeeper: session intake, login, room selection, and routing.
//!
//! Every connection is registered here as a pending [`PlayerSession`]. A
//! successful `LOGIN` resolves the wallet's stake, picks a room of the
//! matching tier (creating one when every room is full), and moves the
//! session into that room by value. From then on the gatekeeper only keeps
//! a `player -> room` index and forwards gameplay messages.
//!
//! All bookkeeping lives in one [`Registry`] behind an async mutex. The
//! lock is never held while awaiting the balance lookup or a room actor, so
//! a backed-up room only slows down the players in it.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::net::SocketAddr;
use std::sync::Arc;

use tokio::sync::Mutex;
use tokio::time::Instant;
use voxmine_protocol::{
    ClientMessage, ErrorCode, LoginFailure, PlayerId, RoomId, ServerMessage, Tier, VoxelCoord,
    unix_millis,
};
use voxmine_room::{Admission, JoinError, Room, RoomConfig, RoomHandle, SimulationRules, spawn_room};
use voxmine_session::{
    BalanceLookup, Outbound, PlayerSender, PlayerSession, SessionConfig, TierThresholds, validate_wallet,
};
use voxmine_world::{DeltaStorage, DeltaStore};

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Settings for the gatekeeper and every room it creates.
#[derive(Debug, Clone)]
pub struct GatekeeperConfig {
    pub rules: SimulationRules,
    pub thresholds: TierThresholds,
    pub session: SessionConfig,
    /// Rooms created per tier at startup. These are never reclaimed.
    pub default_rooms_per_tier: usize,
}

impl Default for GatekeeperConfig {
    fn default() -> Self {
        Self {
            rules: SimulationRules::default(),
            thresholds: TierThresholds::default(),
            session: SessionConfig::default(),
            default_rooms_per_tier: 1,
        }
    }
}

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

struct PendingEntry {
    session: PlayerSession,
    login_in_flight: bool,
}

struct RoomEntry {
    handle: RoomHandle,
    tier: Tier,
    /// Per-tier slot number; also names the room's storage key.
    slot: usize,
    default: bool,
}

#[derive(Default)]
struct Registry {
    /// Connected, not yet in a room.
    pending: HashMap<PlayerId, PendingEntry>,
    /// Outbound channel of every connected player, pending or not.
    contacts: HashMap<PlayerId, PlayerSender>,
    rooms: BTreeMap<RoomId, RoomEntry>,
    player_rooms: HashMap<PlayerId, RoomId>,
    /// Authenticated sessions currently being offered to rooms.
    admitting: HashSet<PlayerId>,
    next_player_id: u64,
    next_room_id: u64,
    shut_down: bool,
}

impl Registry {
    fn notify(&self, player_id: PlayerId, msg: ServerMessage) {
        if let Some(sender) = self.contacts.get(&player_id) {
            let _ = sender.send(Outbound::Message(msg));
        }
    }

    fn room_of(&self, player_id: PlayerId) -> Option<RoomHandle> {
        let room_id = self.player_rooms.get(&player_id)?;
        self.rooms.get(room_id).map(|entry| entry.handle.clone())
    }

    /// Live rooms of `tier`, lowest id first.
    fn rooms_of(&self, tier: Tier) -> Vec<RoomHandle> {
        self.rooms
            .values()
            .filter(|entry| entry.tier == tier)
            .map(|entry| entry.handle.clone())
            .collect()
    }

    /// Starts a new room actor for `tier` and registers it.
    fn create_room<S: DeltaStorage>(
        &mut self,
        tier: Tier,
        default: bool,
        rules: &SimulationRules,
        storage: &Arc<S>,
    ) -> RoomHandle {
        let room_id = RoomId(self.next_room_id);
        self.next_room_id += 1;
        let slot = self.free_slot(tier);

        let room = Room::new(
            room_id,
            RoomConfig::for_tier(tier),
            rules.clone(),
            default,
            DeltaStore::new(format!("{}-{slot}", tier.slug())),
            Instant::now(),
        );
        let handle = spawn_room(room, Arc::clone(storage));
        self.rooms.insert(
            room_id,
            RoomEntry {
                handle: handle.clone(),
                tier,
                slot,
                default,
            },
        );

        tracing::info!(%room_id, %tier, slot, default, "room created");
        handle
    }

    /// The lowest slot number no live room of `tier` is using.
    fn free_slot(&self, tier: Tier) -> usize {
        (1..)
            .find(|slot| {
                !self
                    .rooms
                    .values()
                    .any(|entry| entry.tier == tier && entry.slot == *slot)
            })
            .unwrap_or(1)
    }
}

/// Where an authenticated session ended up.
enum Placement {
    Admitted(Admission),
    /// No room took it; the session goes back to pending.
    Refused(PlayerSession, LoginFailure),
    /// A room stopped while holding it.
    Lost,
}

// ---------------------------------------------------------------------------
// Gatekeeper
// ---------------------------------------------------------------------------

/// Admits players into rooms and routes their messages.
pub struct Gatekeeper<L: BalanceLookup, S: DeltaStorage> {
    registry: Mutex<Registry>,
    lookup: L,
    storage: Arc<S>,
    config: GatekeeperConfig,
}

impl<L: BalanceLookup, S: DeltaStorage> Gatekeeper<L, S> {
    /// Creates the gatekeeper and starts its default rooms.
    ///
    /// Must be called from inside a Tokio runtime.
    pub fn new(config: GatekeeperConfig, lookup: L, storage: Arc<S>) -> Self {
        let mut registry = Registry {
            next_player_id: 1,
            next_room_id: 1,
            ..Registry::default()
        };
        for tier in Tier::ALL {
            for _ in 0..config.default_rooms_per_tier {
                registry.create_room(tier, true, &config.rules, &storage);
            }
        }

        Self {
            registry: Mutex::new(registry),
            lookup,
            storage,
            config,
        }
    }

    pub fn config(&self) -> &GatekeeperConfig {
        &self.config
    }

    // -- Connections --------------------------------------------------------

    /// Registers a new connection as a pending session and greets it with
    /// `CONNECTED`.
    pub async fn on_connect(&self, sender: PlayerSender, remote_addr: SocketAddr) -> PlayerId {
        let mut registry = self.registry.lock().await;
        let player_id = PlayerId(registry.next_player_id);
        registry.next_player_id += 1;

        let session = PlayerSession::new(
            player_id,
            remote_addr,
            sender.clone(),
            self.config.session.clone(),
        );
        registry.pending.insert(
            player_id,
            PendingEntry {
                session,
                login_in_flight: false,
            },
        );
        registry.contacts.insert(player_id, sender);
        registry.notify(
            player_id,
            ServerMessage::Connected {
                session_id: player_id,
                server_time: unix_millis(),
            },
        );

        tracing::info!(%player_id, %remote_addr, "player connected");
        player_id
    }

    /// Forgets a connection, removing its session from whichever room
    /// holds it.
    pub async fn on_disconnect(&self, player_id: PlayerId) {
        let (room_id, handle) = {
            let mut registry = self.registry.lock().await;
            registry.contacts.remove(&player_id);

            if registry.pending.remove(&player_id).is_some() {
                tracing::info!(%player_id, "pending player disconnected");
                return;
            }
            if registry.admitting.remove(&player_id) {
                // The login in flight sees this and backs the session out.
                tracing::info!(%player_id, "player disconnected during admission");
                return;
            }
            let Some(room_id) = registry.player_rooms.remove(&player_id) else {
                return;
            };
            let handle = registry.rooms.get(&room_id).map(|entry| entry.handle.clone());
            (room_id, handle)
        };

        if let Some(handle) = handle {
            if let Err(e) = handle.remove_player(player_id).await {
                tracing::debug!(%player_id, %room_id, error = %e, "room already gone");
            }
        }
        tracing::info!(%player_id, %room_id, "player disconnected");
    }

    /// Number of connected players, pending or in a room.
    pub async fn connected(&self) -> usize {
        self.registry.lock().await.contacts.len()
    }

    /// The room `player_id` is in, if any.
    pub async fn room_of(&self, player_id: PlayerId) -> Option<RoomId> {
        self.registry.lock().await.player_rooms.get(&player_id).copied()
    }

    /// Ids of every live room, with their tier and default flag.
    pub async fn rooms(&self) -> Vec<(RoomId, Tier, bool)> {
        self.registry
            .lock()
            .await
            .rooms
            .iter()
            .map(|(&id, entry)| (id, entry.tier, entry.default))
            .collect()
    }

    /// A handle to a live room.
    pub async fn room_handle(&self, room_id: RoomId) -> Option<RoomHandle> {
        self.registry
            .lock()
            .await
            .rooms
            .get(&room_id)
            .map(|entry| entry.handle.clone())
    }

    // -- Login --------------------------------------------------------------

    /// Authenticates a pending session and places it in a room of its tier.
    ///
    /// Every failure is also sent to the player as `LOGIN_FAILED`; the
    /// session stays pending and may retry.
    pub async fn login(&self, player_id: PlayerId, wallet: &str) -> Result<Admission, LoginFailure> {
        let result = self.try_login(player_id, wallet).await;
        if let Err(reason) = result {
            tracing::info!(%player_id, %reason, "login failed");
            self.registry
                .lock()
                .await
                .notify(player_id, ServerMessage::LoginFailed { reason });
        }
        result
    }

    async fn try_login(&self, player_id: PlayerId, wallet: &str) -> Result<Admission, LoginFailure> {
        {
            let mut registry = self.registry.lock().await;
            if registry.player_rooms.contains_key(&player_id) {
                return Err(LoginFailure::AlreadyInRoom);
            }
            if registry.admitting.contains(&player_id) {
                return Err(LoginFailure::LoginInProgress);
            }
            let shut_down = registry.shut_down;
            let entry = registry
                .pending
                .get_mut(&player_id)
                .ok_or(LoginFailure::UnknownSession)?;
            if entry.login_in_flight {
                return Err(LoginFailure::LoginInProgress);
            }
            validate_wallet(wallet).map_err(|_| LoginFailure::InvalidWallet)?;
            if shut_down {
                return Err(LoginFailure::ServerError);
            }
            entry.login_in_flight = true;
        }

        let lookup = self.lookup.stake_of(wallet).await;

        let (session, candidates) = {
            let mut registry = self.registry.lock().await;
            let Some(entry) = registry.pending.get_mut(&player_id) else {
                // Disconnected while the lookup was running.
                return Err(LoginFailure::UnknownSession);
            };
            entry.login_in_flight = false;

            let stake = match lookup {
                Ok(stake) if stake.is_finite() && stake >= 0.0 => stake,
                Ok(stake) => {
                    tracing::warn!(%player_id, stake, "balance lookup returned an unusable stake");
                    return Err(LoginFailure::ServerError);
                }
                Err(e) => {
                    tracing::warn!(%player_id, error = %e, "balance lookup failed");
                    return Err(LoginFailure::ServerError);
                }
            };
            if registry.shut_down {
                return Err(LoginFailure::ServerError);
            }

            let Some(PendingEntry { mut session, .. }) = registry.pending.remove(&player_id) else {
                return Err(LoginFailure::UnknownSession);
            };
            let tier = session.authenticate(wallet, stake, &self.config.thresholds);
            tracing::info!(%player_id, stake, %tier, "player authenticated");

            registry.admitting.insert(player_id);
            (session, registry.rooms_of(tier))
        };

        let placement = self.place(session, candidates).await;

        let mut registry = self.registry.lock().await;
        let still_connected = registry.admitting.remove(&player_id);
        match placement {
            Placement::Admitted(admission) if still_connected && !registry.shut_down => {
                registry.player_rooms.insert(player_id, admission.room_id);
                Ok(admission)
            }
            Placement::Admitted(admission) => {
                // Disconnected or shut down while the room was admitting.
                let reason = if registry.shut_down {
                    LoginFailure::ServerError
                } else {
                    LoginFailure::UnknownSession
                };
                let handle = registry
                    .rooms
                    .get(&admission.room_id)
                    .map(|entry| entry.handle.clone());
                drop(registry);
                if let Some(handle) = handle {
                    let _ = handle.remove_player(player_id).await;
                }
                Err(reason)
            }
            Placement::Refused(session, reason) => {
                if !still_connected {
                    return Err(LoginFailure::UnknownSession);
                }
                registry.pending.insert(
                    player_id,
                    PendingEntry {
                        session,
                        login_in_flight: false,
                    },
                );
                Err(reason)
            }
            Placement::Lost => Err(LoginFailure::ServerError),
        }
    }

    /// Offers `session` to each room of its tier in turn, creating one
    /// room when every existing one turns it away.
    ///
    /// Rooms registered while this runs are offered too, so concurrent
    /// logins spilling over share the new room.
    async fn place(&self, mut session: PlayerSession, candidates: Vec<RoomHandle>) -> Placement {
        let tier = session.tier();
        let mut queue = candidates.into_iter();
        let mut tried = HashSet::new();
        let mut created = false;
        loop {
            let handle = match queue.next() {
                Some(handle) if tried.contains(&handle.room_id()) => continue,
                Some(handle) => handle,
                None => {
                    let mut registry = self.registry.lock().await;
                    if registry.shut_down {
                        return Placement::Refused(session, LoginFailure::ServerError);
                    }
                    let fresh: Vec<RoomHandle> = registry
                        .rooms_of(tier)
                        .into_iter()
                        .filter(|handle| !tried.contains(&handle.room_id()))
                        .collect();
                    if !fresh.is_empty() {
                        queue = fresh.into_iter();
                        continue;
                    }
                    if created {
                        return Placement::Refused(session, LoginFailure::RoomFull);
                    }
                    created = true;
                    registry.create_room(tier, false, &self.config.rules, &self.storage)
                }
            };
            tried.insert(handle.room_id());

            match handle.add_player(session).await {
                Ok(admission) => return Placement::Admitted(admission),
                Err(JoinError::Rejected(_, returned)) => session = returned,
                Err(JoinError::Unavailable(room_id, returned)) => {
                    tracing::warn!(%room_id, "room stopped during admission");
                    self.registry.lock().await.rooms.remove(&room_id);
                    match returned {
                        Some(returned) => session = returned,
                        None => return Placement::Lost,
                    }
                }
            }
        }
    }

    // -- Routing ------------------------------------------------------------

    /// Dispatches one decoded client message.
    pub async fn route(&self, player_id: PlayerId, msg: ClientMessage) {
        let kind = msg.kind();
        let handle = match &msg {
            ClientMessage::Login { wallet } => {
                let _ = self.login(player_id, wallet).await;
                return;
            }
            ClientMessage::Unrecognized => {
                tracing::debug!(%player_id, "unrecognized message type");
                self.send_error(player_id, ErrorCode::UnknownMessage, "unknown message type")
                    .await;
                return;
            }
            _ => self.registry.lock().await.room_of(player_id),
        };
        let Some(handle) = handle else {
            tracing::debug!(%player_id, kind, "message before room assignment");
            self.send_error(player_id, ErrorCode::NotInRoom, "join a room first")
                .await;
            return;
        };

        let result = match msg {
            ClientMessage::Input { x, y, z, yaw } => handle.input(player_id, x, y, z, yaw).await,
            ClientMessage::MineBlock {
                x,
                y,
                z,
                block_type,
            } => {
                handle
                    .mine(player_id, VoxelCoord::from_world(x, y, z), block_type)
                    .await
            }
            ClientMessage::CollectLoot { x, y, z } => {
                handle
                    .collect_loot(player_id, VoxelCoord::from_world(x, y, z))
                    .await
            }
            ClientMessage::Ping { client_time } => handle.ping(player_id, client_time).await,
            ClientMessage::Chat { text } => handle.chat(player_id, text).await,
            ClientMessage::Login { .. } | ClientMessage::Unrecognized => Ok(()),
        };
        if let Err(e) = result {
            tracing::debug!(%player_id, kind, error = %e, "room unavailable");
            self.send_error(player_id, ErrorCode::NotInRoom, "room unavailable")
                .await;
        }
    }

    /// Answers a frame that could not be decoded.
    pub async fn reject_malformed(&self, player_id: PlayerId, detail: &str) {
        tracing::debug!(%player_id, detail, "malformed message");
        self.send_error(player_id, ErrorCode::MalformedMessage, detail)
            .await;
    }

    async fn send_error(&self, player_id: PlayerId, code: ErrorCode, message: &str) {
        self.registry.lock().await.notify(
            player_id,
            ServerMessage::Error {
                code,
                message: message.to_string(),
            },
        );
    }

    // -- Lifecycle ----------------------------------------------------------

    /// Tears down every non-default room that has been empty for the idle
    /// window, flushing its world delta first. Returns the rooms removed.
    pub async fn sweep(&self, now: Instant) -> Vec<RoomId> {
        let candidates: Vec<(RoomId, RoomHandle)> = self
            .registry
            .lock()
            .await
            .rooms
            .iter()
            .filter(|(_, entry)| !entry.default)
            .map(|(&id, entry)| (id, entry.handle.clone()))
            .collect();

        let mut reclaimed = Vec::new();
        for (room_id, handle) in candidates {
            match handle.reclaim_if_idle(now).await {
                Ok(false) => {}
                Ok(true) | Err(_) => reclaimed.push(room_id),
            }
        }
        if !reclaimed.is_empty() {
            let mut registry = self.registry.lock().await;
            for room_id in &reclaimed {
                registry.rooms.remove(room_id);
            }
            tracing::info!(rooms = ?reclaimed, "reclaimed idle rooms");
        }
        reclaimed
    }

    /// Tells everyone the server is going away, flushes every room, and
    /// stops every room actor. Later logins fail with `SERVER_ERROR`.
    pub async fn shutdown(&self, message: &str) {
        let rooms = {
            let mut registry = self.registry.lock().await;
            registry.shut_down = true;
            registry.player_rooms.clear();

            for entry in registry.pending.values() {
                entry.session.send(ServerMessage::ServerShutdown {
                    message: message.to_string(),
                });
                entry.session.close("server shutdown");
            }
            tracing::info!(pending = registry.pending.len(), "notified pending players");
            std::mem::take(&mut registry.rooms)
        };

        for (room_id, entry) in rooms {
            if let Err(e) = entry.handle.teardown(Some(message.to_string())).await {
                tracing::warn!(%room_id, error = %e, "room stopped before shutdown");
            }
        }
        tracing::info!("gatekeeper shut down");
    }
}
