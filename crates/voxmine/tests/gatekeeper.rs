//! Integration tests for the gatekeeper: login, room selection, routing,
//! sweeping, and shutdown.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Notify;
use tokio::time::Instant;
use voxmine::prelude::*;
use voxmine_session::{Outbound, PlayerReceiver, outbound_channel};

// =========================================================================
// Lookups
// =========================================================================

/// Always fails, like an unreachable chain node.
struct FailingLookup;

impl BalanceLookup for FailingLookup {
    async fn stake_of(&self, _wallet: &str) -> Result<f64, SessionError> {
        Err(SessionError::LookupFailed("node unreachable".into()))
    }
}

/// Blocks every lookup until the test opens the gate.
struct GatedLookup {
    entered: Arc<Notify>,
    gate: Arc<Notify>,
}

impl BalanceLookup for GatedLookup {
    async fn stake_of(&self, _wallet: &str) -> Result<f64, SessionError> {
        self.entered.notify_one();
        self.gate.notified().await;
        Ok(50.0)
    }
}

// =========================================================================
// Helpers
// =========================================================================

fn wallet(fill: char) -> String {
    format!("0x{}", fill.to_string().repeat(40))
}

fn config(default_rooms: usize) -> GatekeeperConfig {
    GatekeeperConfig {
        default_rooms_per_tier: default_rooms,
        ..GatekeeperConfig::default()
    }
}

fn gatekeeper(
    lookup: StaticBalanceLookup,
    default_rooms: usize,
) -> (Gatekeeper<StaticBalanceLookup, MemoryStorage>, Arc<MemoryStorage>) {
    let storage = Arc::new(MemoryStorage::new());
    let gk = Gatekeeper::new(config(default_rooms), lookup, Arc::clone(&storage));
    (gk, storage)
}

async fn connect<L: BalanceLookup, S: DeltaStorage>(
    gk: &Gatekeeper<L, S>,
) -> (PlayerId, PlayerReceiver) {
    let (tx, mut rx) = outbound_channel();
    let addr: SocketAddr = "127.0.0.1:4000".parse().unwrap();
    let id = gk.on_connect(tx, addr).await;
    assert!(matches!(
        next_message(&mut rx).await,
        ServerMessage::Connected { .. }
    ));
    (id, rx)
}

async fn next_outbound(rx: &mut PlayerReceiver) -> Outbound {
    tokio::time::timeout(Duration::from_secs(2), async {
        loop {
            match rx.recv().await.expect("outbound channel closed") {
                Outbound::Message(ServerMessage::State { .. }) => continue,
                other => return other,
            }
        }
    })
    .await
    .expect("timed out waiting for a message")
}

/// Next message that is not a `STATE` broadcast.
async fn next_message(rx: &mut PlayerReceiver) -> ServerMessage {
    match next_outbound(rx).await {
        Outbound::Message(msg) => msg,
        Outbound::Close { reason } => panic!("unexpected close: {reason}"),
    }
}

// =========================================================================
// Connect / login
// =========================================================================

#[tokio::test]
async fn test_on_connect_sends_connected_with_session_id() {
    let (gk, _) = gatekeeper(StaticBalanceLookup::new(0.0), 1);
    let (tx, mut rx) = outbound_channel();
    let id = gk.on_connect(tx, "127.0.0.1:1".parse().unwrap()).await;

    match next_message(&mut rx).await {
        ServerMessage::Connected { session_id, .. } => assert_eq!(session_id, id),
        other => panic!("expected CONNECTED, got {other:?}"),
    }
    assert_eq!(gk.connected().await, 1);
    assert_eq!(gk.room_of(id).await, None);
}

#[tokio::test]
async fn test_new_starts_default_rooms_for_every_tier() {
    let (gk, _) = gatekeeper(StaticBalanceLookup::new(0.0), 2);
    let rooms = gk.rooms().await;
    assert_eq!(rooms.len(), 6);
    assert!(rooms.iter().all(|(_, _, default)| *default));
    for tier in Tier::ALL {
        assert_eq!(rooms.iter().filter(|(_, t, _)| *t == tier).count(), 2);
    }
}

#[tokio::test]
async fn test_login_routes_by_stake_tier() {
    let lookup = StaticBalanceLookup::new(0.0)
        .with_balance(wallet('a'), 50.0)
        .with_balance(wallet('b'), 150.0)
        .with_balance(wallet('c'), 5000.0);
    let (gk, _) = gatekeeper(lookup, 1);

    for (fill, tier) in [('a', Tier::Unranked), ('b', Tier::Mid), ('c', Tier::High)] {
        let (id, mut rx) = connect(&gk).await;
        let admission = gk.login(id, &wallet(fill)).await.unwrap();
        assert_eq!(admission.tier, tier);
        assert_eq!(gk.room_of(id).await, Some(admission.room_id));
        match next_message(&mut rx).await {
            ServerMessage::RoomJoined { tier: joined, room_id, .. } => {
                assert_eq!(joined, tier);
                assert_eq!(room_id, admission.room_id);
            }
            other => panic!("expected ROOM_JOINED, got {other:?}"),
        }
    }
}

#[tokio::test]
async fn test_login_invalid_wallet_stays_pending_and_can_retry() {
    let (gk, _) = gatekeeper(StaticBalanceLookup::new(0.0), 1);
    let (id, mut rx) = connect(&gk).await;

    assert_eq!(gk.login(id, "0x123").await, Err(LoginFailure::InvalidWallet));
    assert_eq!(
        next_message(&mut rx).await,
        ServerMessage::LoginFailed {
            reason: LoginFailure::InvalidWallet
        }
    );
    assert_eq!(gk.room_of(id).await, None);

    assert!(gk.login(id, &wallet('d')).await.is_ok());
}

#[tokio::test]
async fn test_login_twice_already_in_room() {
    let (gk, _) = gatekeeper(StaticBalanceLookup::new(0.0), 1);
    let (id, mut rx) = connect(&gk).await;
    gk.login(id, &wallet('a')).await.unwrap();
    next_message(&mut rx).await;

    assert_eq!(
        gk.login(id, &wallet('a')).await,
        Err(LoginFailure::AlreadyInRoom)
    );
    assert_eq!(
        next_message(&mut rx).await,
        ServerMessage::LoginFailed {
            reason: LoginFailure::AlreadyInRoom
        }
    );
}

#[tokio::test]
async fn test_login_lookup_failure_server_error() {
    let storage = Arc::new(MemoryStorage::new());
    let gk = Gatekeeper::new(config(1), FailingLookup, storage);
    let (id, mut rx) = connect(&gk).await;

    assert_eq!(
        gk.login(id, &wallet('e')).await,
        Err(LoginFailure::ServerError)
    );
    assert_eq!(
        next_message(&mut rx).await,
        ServerMessage::LoginFailed {
            reason: LoginFailure::ServerError
        }
    );

    // Still pending: gameplay is refused.
    gk.route(id, ClientMessage::Ping { client_time: 1 }).await;
    assert!(matches!(
        next_message(&mut rx).await,
        ServerMessage::Error {
            code: ErrorCode::NotInRoom,
            ..
        }
    ));
}

#[tokio::test]
async fn test_login_while_lookup_pending_login_in_progress() {
    let entered = Arc::new(Notify::new());
    let gate = Arc::new(Notify::new());
    let lookup = GatedLookup {
        entered: Arc::clone(&entered),
        gate: Arc::clone(&gate),
    };
    let gk = Arc::new(Gatekeeper::new(
        config(1),
        lookup,
        Arc::new(MemoryStorage::new()),
    ));
    let (id, _rx) = connect(gk.as_ref()).await;

    let first = {
        let gk = Arc::clone(&gk);
        tokio::spawn(async move { gk.login(id, &wallet('f')).await })
    };
    entered.notified().await;

    assert_eq!(
        gk.login(id, &wallet('f')).await,
        Err(LoginFailure::LoginInProgress)
    );

    gate.notify_one();
    let admission = first.await.unwrap().unwrap();
    assert_eq!(admission.tier, Tier::Unranked);
}

#[tokio::test]
async fn test_login_disconnect_during_lookup_unknown_session() {
    let entered = Arc::new(Notify::new());
    let gate = Arc::new(Notify::new());
    let lookup = GatedLookup {
        entered: Arc::clone(&entered),
        gate: Arc::clone(&gate),
    };
    let gk = Arc::new(Gatekeeper::new(
        config(1),
        lookup,
        Arc::new(MemoryStorage::new()),
    ));
    let (id, _rx) = connect(gk.as_ref()).await;

    let first = {
        let gk = Arc::clone(&gk);
        tokio::spawn(async move { gk.login(id, &wallet('g')).await })
    };
    entered.notified().await;
    gk.on_disconnect(id).await;
    gate.notify_one();

    assert_eq!(
        first.await.unwrap(),
        Err(LoginFailure::UnknownSession)
    );
    assert_eq!(gk.connected().await, 0);
}

#[tokio::test]
async fn test_login_full_room_creates_another() {
    let (gk, _) = gatekeeper(StaticBalanceLookup::new(5000.0), 1);
    let mut receivers = Vec::new();
    let mut rooms = Vec::new();

    for i in 0..16 {
        let (id, rx) = connect(&gk).await;
        receivers.push(rx);
        let fill = char::from_digit(i % 10, 10).unwrap();
        rooms.push(gk.login(id, &wallet(fill)).await.unwrap().room_id);
    }

    assert!(rooms[..15].iter().all(|r| *r == rooms[0]));
    assert_ne!(rooms[15], rooms[0]);
    let high_rooms = gk
        .rooms()
        .await
        .into_iter()
        .filter(|(_, tier, _)| *tier == Tier::High)
        .count();
    assert_eq!(high_rooms, 2);
}

#[tokio::test]
async fn test_login_concurrent_overflow_never_exceeds_capacity() {
    let (gk, _) = gatekeeper(StaticBalanceLookup::new(5000.0), 1);
    let mut ids = Vec::new();
    let mut receivers = Vec::new();
    for _ in 0..20 {
        let (id, rx) = connect(&gk).await;
        ids.push(id);
        receivers.push(rx);
    }

    let wallets: Vec<String> = (0..20).map(|i| format!("0x{i:040x}")).collect();
    let results = futures_util::future::join_all(
        ids.iter().zip(&wallets).map(|(&id, w)| gk.login(id, w)),
    )
    .await;
    assert!(results.iter().all(Result::is_ok), "{results:?}");

    let high: Vec<RoomId> = gk
        .rooms()
        .await
        .into_iter()
        .filter(|(_, tier, _)| *tier == Tier::High)
        .map(|(id, _, _)| id)
        .collect();
    assert_eq!(high.len(), 2);

    let mut occupancy = Vec::new();
    for room_id in high {
        let info = gk.room_handle(room_id).await.unwrap().info().await.unwrap();
        assert!(info.occupancy <= info.capacity);
        occupancy.push(info.occupancy);
    }
    assert_eq!(occupancy, vec![15, 5]);
}

// =========================================================================
// Routing
// =========================================================================

#[tokio::test]
async fn test_route_unrecognized_unknown_message() {
    let (gk, _) = gatekeeper(StaticBalanceLookup::new(0.0), 1);
    let (id, mut rx) = connect(&gk).await;

    gk.route(id, ClientMessage::Unrecognized).await;
    assert!(matches!(
        next_message(&mut rx).await,
        ServerMessage::Error {
            code: ErrorCode::UnknownMessage,
            ..
        }
    ));
}

#[tokio::test]
async fn test_reject_malformed_sends_error() {
    let (gk, _) = gatekeeper(StaticBalanceLookup::new(0.0), 1);
    let (id, mut rx) = connect(&gk).await;

    gk.reject_malformed(id, "expected value at line 1").await;
    assert!(matches!(
        next_message(&mut rx).await,
        ServerMessage::Error {
            code: ErrorCode::MalformedMessage,
            ..
        }
    ));
}

#[tokio::test]
async fn test_route_mine_forwards_to_room() {
    let (gk, _) = gatekeeper(StaticBalanceLookup::new(0.0), 1);
    let (id, mut rx) = connect(&gk).await;
    gk.login(id, &wallet('h')).await.unwrap();
    next_message(&mut rx).await;

    gk.route(
        id,
        ClientMessage::MineBlock {
            x: 1.2,
            y: 64.0,
            z: 0.3,
            block_type: BlockType::COAL,
        },
    )
    .await;

    assert_eq!(
        next_message(&mut rx).await,
        ServerMessage::MineSuccess {
            coord: VoxelCoord::new(1, 64, 0),
            reward: 3,
            balance: 3,
            high_value: false,
        }
    );
}

#[tokio::test]
async fn test_route_chat_reaches_room_mates() {
    let (gk, _) = gatekeeper(StaticBalanceLookup::new(0.0), 1);
    let (a, mut rx_a) = connect(&gk).await;
    let (b, mut rx_b) = connect(&gk).await;
    gk.login(a, &wallet('a')).await.unwrap();
    gk.login(b, &wallet('b')).await.unwrap();
    next_message(&mut rx_a).await; // ROOM_JOINED
    next_message(&mut rx_a).await; // PLAYER_JOINED
    next_message(&mut rx_b).await; // ROOM_JOINED

    gk.route(a, ClientMessage::Chat { text: "hi".into() }).await;
    assert_eq!(
        next_message(&mut rx_b).await,
        ServerMessage::Chat {
            from: a,
            text: "hi".into()
        }
    );
}

#[tokio::test]
async fn test_on_disconnect_removes_from_room() {
    let (gk, _) = gatekeeper(StaticBalanceLookup::new(0.0), 1);
    let (a, mut rx_a) = connect(&gk).await;
    let (b, _rx_b) = connect(&gk).await;
    gk.login(a, &wallet('a')).await.unwrap();
    gk.login(b, &wallet('b')).await.unwrap();
    next_message(&mut rx_a).await;
    next_message(&mut rx_a).await;

    gk.on_disconnect(b).await;
    assert_eq!(
        next_message(&mut rx_a).await,
        ServerMessage::PlayerLeft {
            player_id: b,
            occupancy: 1
        }
    );
    assert_eq!(gk.connected().await, 1);
    assert_eq!(gk.room_of(b).await, None);
}

// =========================================================================
// Sweep / shutdown
// =========================================================================

#[tokio::test]
async fn test_sweep_reclaims_idle_dynamic_rooms_only() {
    let (gk, _) = gatekeeper(StaticBalanceLookup::new(0.0), 0);
    assert!(gk.rooms().await.is_empty());

    let (id, _rx) = connect(&gk).await;
    let room_id = gk.login(id, &wallet('a')).await.unwrap().room_id;
    assert!(gk.sweep(Instant::now() + Duration::from_secs(1000)).await.is_empty());

    gk.on_disconnect(id).await;
    assert!(gk.sweep(Instant::now()).await.is_empty());
    assert_eq!(
        gk.sweep(Instant::now() + Duration::from_secs(301)).await,
        vec![room_id]
    );
    assert!(gk.rooms().await.is_empty());
}

#[tokio::test]
async fn test_sweep_keeps_default_rooms() {
    let (gk, _) = gatekeeper(StaticBalanceLookup::new(0.0), 1);
    let later = Instant::now() + Duration::from_secs(10_000);
    assert!(gk.sweep(later).await.is_empty());
    assert_eq!(gk.rooms().await.len(), 3);
}

#[tokio::test]
async fn test_shutdown_notifies_flushes_and_refuses_logins() {
    let (gk, storage) = gatekeeper(StaticBalanceLookup::new(0.0), 1);
    let (playing, mut rx_playing) = connect(&gk).await;
    let (waiting, mut rx_waiting) = connect(&gk).await;
    gk.login(playing, &wallet('a')).await.unwrap();
    next_message(&mut rx_playing).await;
    gk.route(
        playing,
        ClientMessage::MineBlock {
            x: 0.5,
            y: 63.5,
            z: 0.5,
            block_type: BlockType::STONE,
        },
    )
    .await;

    gk.shutdown(SHUTDOWN_MESSAGE).await;

    assert!(storage.get("unranked-1").is_some());
    for rx in [&mut rx_playing, &mut rx_waiting] {
        loop {
            match next_outbound(rx).await {
                Outbound::Message(ServerMessage::ServerShutdown { message }) => {
                    assert_eq!(message, SHUTDOWN_MESSAGE);
                    break;
                }
                Outbound::Message(_) => continue,
                Outbound::Close { reason } => panic!("closed before notice: {reason}"),
            }
        }
        assert!(matches!(next_outbound(rx).await, Outbound::Close { .. }));
    }
    assert_eq!(
        gk.login(waiting, &wallet('b')).await,
        Err(LoginFailure::ServerError)
    );
}

#[tokio::test]
async fn test_world_delta_survives_restart() {
    let storage = Arc::new(MemoryStorage::new());
    let coord = VoxelCoord::new(1, 64, 0);
    {
        let gk = Gatekeeper::new(config(1), StaticBalanceLookup::new(0.0), Arc::clone(&storage));
        let (id, mut rx) = connect(&gk).await;
        gk.login(id, &wallet('a')).await.unwrap();
        next_message(&mut rx).await;
        gk.route(
            id,
            ClientMessage::MineBlock {
                x: 1.5,
                y: 64.5,
                z: 0.5,
                block_type: BlockType::IRON,
            },
        )
        .await;
        assert!(matches!(
            next_message(&mut rx).await,
            ServerMessage::MineSuccess { .. }
        ));
        gk.shutdown(SHUTDOWN_MESSAGE).await;
    }

    let gk = Gatekeeper::new(config(1), StaticBalanceLookup::new(0.0), storage);
    let (id, mut rx) = connect(&gk).await;
    gk.login(id, &wallet('a')).await.unwrap();
    match next_message(&mut rx).await {
        ServerMessage::RoomJoined { world, .. } => {
            assert_eq!(world.len(), 1);
            assert_eq!(world[0].coord, coord);
            assert_eq!(world[0].block_type, BlockType::AIR);
        }
        other => panic!("expected ROOM_JOINED, got {other:?}"),
    }
}
