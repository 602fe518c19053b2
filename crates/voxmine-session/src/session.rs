//! The per-player session record.

use std::net::SocketAddr;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::Instant;
use voxmine_protocol::{
    MemberState, PlayerId, RoomId, ServerMessage, Tier, Vec3, ViolationKind, VoxelCoord,
};

use crate::TierThresholds;

// ---------------------------------------------------------------------------
// Outbound channel
// ---------------------------------------------------------------------------

/// What a connection's writer task is asked to do.
#[derive(Debug, Clone, PartialEq)]
pub enum Outbound {
    /// Encode and send this message.
    Message(ServerMessage),
    /// Close the connection after everything queued before it is sent.
    Close { reason: String },
}

pub type PlayerSender = mpsc::UnboundedSender<Outbound>;
pub type PlayerReceiver = mpsc::UnboundedReceiver<Outbound>;

/// Creates the channel between a session and its connection writer.
pub fn outbound_channel() -> (PlayerSender, PlayerReceiver) {
    mpsc::unbounded_channel()
}

// ---------------------------------------------------------------------------
// Config and state
// ---------------------------------------------------------------------------

/// Anti-cheat settings applied to every session.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Violations inside the window that get a player kicked.
    pub violation_threshold: u32,
    /// A violation older than this no longer counts toward the threshold.
    pub violation_window: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            violation_threshold: 5,
            violation_window: Duration::from_secs(30),
        }
    }
}

/// Where a session is in its lifecycle.
///
/// ```text
/// Pending ──(admitted)──→ InRoom(room) ──(disconnect / kick)──→ Terminated
/// ```
///
/// A failed login leaves the session `Pending`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    Pending,
    InRoom(RoomId),
    Terminated,
}

/// A movement request waiting for the next tick.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PendingInput {
    pub position: Vec3,
    pub yaw: f32,
    pub received_at: Instant,
}

// ---------------------------------------------------------------------------
// PlayerSession
// ---------------------------------------------------------------------------

/// Everything the server knows about one connected player.
#[derive(Debug)]
pub struct PlayerSession {
    id: PlayerId,
    remote_addr: SocketAddr,

    wallet: Option<String>,
    authenticated: bool,
    stake: f64,
    tier: Tier,

    position: Vec3,
    yaw: f32,
    pending_input: Option<PendingInput>,

    earnings: u64,
    extractions: u64,
    last_extraction: Option<Instant>,

    violations: u32,
    last_violation: Option<Instant>,

    phase: SessionPhase,
    sender: PlayerSender,
    config: SessionConfig,
}

impl PlayerSession {
    /// Creates an unauthenticated, pending session at the origin.
    pub fn new(
        id: PlayerId,
        remote_addr: SocketAddr,
        sender: PlayerSender,
        config: SessionConfig,
    ) -> Self {
        Self {
            id,
            remote_addr,
            wallet: None,
            authenticated: false,
            stake: 0.0,
            tier: Tier::Unranked,
            position: Vec3::ZERO,
            yaw: 0.0,
            pending_input: None,
            earnings: 0,
            extractions: 0,
            last_extraction: None,
            violations: 0,
            last_violation: None,
            phase: SessionPhase::Pending,
            sender,
            config,
        }
    }

    // -- Accessors ----------------------------------------------------------

    pub fn id(&self) -> PlayerId {
        self.id
    }

    pub fn remote_addr(&self) -> SocketAddr {
        self.remote_addr
    }

    pub fn wallet(&self) -> Option<&str> {
        self.wallet.as_deref()
    }

    pub fn is_authenticated(&self) -> bool {
        self.authenticated
    }

    pub fn stake(&self) -> f64 {
        self.stake
    }

    pub fn tier(&self) -> Tier {
        self.tier
    }

    pub fn position(&self) -> Vec3 {
        self.position
    }

    pub fn yaw(&self) -> f32 {
        self.yaw
    }

    pub fn earnings(&self) -> u64 {
        self.earnings
    }

    pub fn extractions(&self) -> u64 {
        self.extractions
    }

    pub fn violations(&self) -> u32 {
        self.violations
    }

    pub fn phase(&self) -> SessionPhase {
        self.phase
    }

    pub fn set_phase(&mut self, phase: SessionPhase) {
        self.phase = phase;
    }

    pub fn has_pending_input(&self) -> bool {
        self.pending_input.is_some()
    }

    // -- Identity -----------------------------------------------------------

    /// Records the wallet and stake and returns the resulting tier.
    /// Calling it again overwrites all three.
    pub fn authenticate(
        &mut self,
        wallet: impl Into<String>,
        stake: f64,
        thresholds: &TierThresholds,
    ) -> Tier {
        self.wallet = Some(wallet.into());
        self.stake = stake;
        self.tier = thresholds.tier_for(stake);
        self.authenticated = true;
        self.tier
    }

    // -- Movement -----------------------------------------------------------

    /// Buffers a movement request. Only the latest one before a tick counts.
    pub fn set_input(&mut self, x: f32, y: f32, z: f32, yaw: f32, now: Instant) {
        self.pending_input = Some(PendingInput {
            position: Vec3::new(x, y, z),
            yaw,
            received_at: now,
        });
    }

    /// Removes and returns the buffered movement request.
    pub fn take_input(&mut self) -> Option<PendingInput> {
        self.pending_input.take()
    }

    /// Moves the player to a position the room has already validated.
    pub fn apply_validated_move(&mut self, position: Vec3, yaw: f32) {
        self.position = position;
        self.yaw = yaw;
    }

    /// Whether the centre of the block at `coord` is within `max` units.
    pub fn within_reach(&self, coord: VoxelCoord, max: f32) -> bool {
        self.position.distance(coord.center()) <= max
    }

    // -- Anti-cheat ---------------------------------------------------------

    /// Counts a violation and returns `true` exactly when the count reaches
    /// the kick threshold.
    ///
    /// If the previous violation is older than the window, the count starts
    /// over first, so spaced-out violations never accumulate to a kick.
    pub fn record_violation(&mut self, kind: ViolationKind, now: Instant) -> bool {
        if let Some(last) = self.last_violation {
            if now.saturating_duration_since(last) > self.config.violation_window {
                self.violations = 0;
            }
        }
        self.violations += 1;
        self.last_violation = Some(now);

        tracing::warn!(
            player_id = %self.id,
            %kind,
            count = self.violations,
            threshold = self.config.violation_threshold,
            "anti-cheat violation"
        );

        self.violations == self.config.violation_threshold
    }

    // -- Economy ------------------------------------------------------------

    /// Whether at least `cooldown` has passed since the last extraction.
    pub fn mine_ready(&self, now: Instant, cooldown: Duration) -> bool {
        self.last_extraction
            .is_none_or(|last| now.saturating_duration_since(last) >= cooldown)
    }

    /// Credits an extraction reward and returns the new balance.
    pub fn record_earnings(&mut self, amount: u64, now: Instant) -> u64 {
        self.earnings += amount;
        self.extractions += 1;
        self.last_extraction = Some(now);
        self.earnings
    }

    /// Credits a reward that is not an extraction (e.g. loot).
    pub fn credit(&mut self, amount: u64) -> u64 {
        self.earnings += amount;
        self.earnings
    }

    /// This session's entry in a `STATE` broadcast, rounded for the wire.
    pub fn member_state(&self) -> MemberState {
        let p = self.position.rounded();
        MemberState {
            id: self.id,
            x: p.x,
            y: p.y,
            z: p.z,
            yaw: voxmine_protocol::round2(self.yaw),
            tier: self.tier,
            earnings: self.earnings,
        }
    }

    // -- Outbound -----------------------------------------------------------

    /// Queues a message for the connection. Returns `false` if the
    /// connection is already gone.
    pub fn send(&self, msg: ServerMessage) -> bool {
        self.sender.send(Outbound::Message(msg)).is_ok()
    }

    /// Asks the connection to close once queued messages are flushed.
    pub fn close(&self, reason: impl Into<String>) {
        let _ = self.sender.send(Outbound::Close {
            reason: reason.into(),
        });
    }

    /// A clone of the outbound sender, for replying after the session has
    /// moved to another owner.
    pub fn sender(&self) -> PlayerSender {
        self.sender.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use voxmine_protocol::ErrorCode;

    fn session() -> (PlayerSession, crate::PlayerReceiver) {
        let (tx, rx) = outbound_channel();
        let addr: SocketAddr = "127.0.0.1:5000".parse().unwrap();
        (
            PlayerSession::new(PlayerId(1), addr, tx, SessionConfig::default()),
            rx,
        )
    }

    // =====================================================================
    // Identity
    // =====================================================================

    #[test]
    fn test_new_session_is_pending_and_unranked() {
        let (s, _rx) = session();
        assert_eq!(s.phase(), SessionPhase::Pending);
        assert_eq!(s.tier(), Tier::Unranked);
        assert!(!s.is_authenticated());
        assert_eq!(s.wallet(), None);
    }

    #[test]
    fn test_authenticate_sets_tier_and_is_idempotent() {
        let (mut s, _rx) = session();
        let t = TierThresholds::default();

        assert_eq!(s.authenticate("0xabc", 150.0, &t), Tier::Mid);
        assert_eq!(s.authenticate("0xdef", 5000.0, &t), Tier::High);
        assert_eq!(s.wallet(), Some("0xdef"));
        assert_eq!(s.stake(), 5000.0);
        assert!(s.is_authenticated());
    }

    // =====================================================================
    // Movement
    // =====================================================================

    #[test]
    fn test_set_input_last_write_wins() {
        let (mut s, _rx) = session();
        let now = Instant::now();
        s.set_input(1.0, 2.0, 3.0, 0.5, now);
        s.set_input(4.0, 5.0, 6.0, 1.0, now);

        let input = s.take_input().unwrap();
        assert_eq!(input.position, Vec3::new(4.0, 5.0, 6.0));
        assert_eq!(input.yaw, 1.0);
        assert!(s.take_input().is_none());
    }

    #[test]
    fn test_within_reach_measures_to_block_centre() {
        let (mut s, _rx) = session();
        s.apply_validated_move(Vec3::new(0.5, 0.5, 0.5), 0.0);

        // Centre of (6, 0, 0) is 6.0 units away along x.
        assert!(s.within_reach(VoxelCoord::new(6, 0, 0), 6.0));
        assert!(!s.within_reach(VoxelCoord::new(7, 0, 0), 6.0));
        assert!(s.within_reach(VoxelCoord::new(0, 0, 0), 0.0));
    }

    // =====================================================================
    // Anti-cheat
    // =====================================================================

    #[test]
    fn test_record_violation_five_in_window_escalates_once() {
        let (mut s, _rx) = session();
        let start = Instant::now();

        let results: Vec<bool> = (0..5)
            .map(|i| s.record_violation(ViolationKind::Teleport, start + Duration::from_secs(i)))
            .collect();

        assert_eq!(results, vec![false, false, false, false, true]);
        assert_eq!(s.violations(), 5);
    }

    #[test]
    fn test_record_violation_spaced_beyond_window_never_escalates() {
        let (mut s, _rx) = session();
        let start = Instant::now();

        for i in 0..20 {
            let at = start + Duration::from_secs(31 * i);
            assert!(!s.record_violation(ViolationKind::MineRange, at));
            assert_eq!(s.violations(), 1);
        }
    }

    #[test]
    fn test_record_violation_exactly_at_window_still_counts() {
        let (mut s, _rx) = session();
        let start = Instant::now();
        s.record_violation(ViolationKind::Teleport, start);
        s.record_violation(ViolationKind::Teleport, start + Duration::from_secs(30));
        assert_eq!(s.violations(), 2);
    }

    // =====================================================================
    // Economy
    // =====================================================================

    #[test]
    fn test_record_earnings_updates_counters() {
        let (mut s, _rx) = session();
        let now = Instant::now();
        assert_eq!(s.record_earnings(25, now), 25);
        assert_eq!(s.record_earnings(10, now), 35);
        assert_eq!(s.extractions(), 2);
        assert_eq!(s.credit(5), 40);
        assert_eq!(s.extractions(), 2);
    }

    #[test]
    fn test_mine_ready_respects_cooldown() {
        let (mut s, _rx) = session();
        let now = Instant::now();
        let cooldown = Duration::from_millis(250);
        assert!(s.mine_ready(now, cooldown));

        s.record_earnings(1, now);
        assert!(!s.mine_ready(now + Duration::from_millis(100), cooldown));
        assert!(s.mine_ready(now + Duration::from_millis(250), cooldown));
    }

    #[test]
    fn test_member_state_rounds_position() {
        let (mut s, _rx) = session();
        s.apply_validated_move(Vec3::new(1.23456, 64.0, -0.001), 1.23456);
        let m = s.member_state();
        assert_eq!(m.x, 1.23);
        assert_eq!(m.yaw, 1.23);
        assert_eq!(m.z, 0.0);
    }

    // =====================================================================
    // Outbound
    // =====================================================================

    #[test]
    fn test_send_and_close_reach_receiver_in_order() {
        let (s, mut rx) = session();
        let msg = ServerMessage::Error {
            code: ErrorCode::NotInRoom,
            message: "x".into(),
        };
        assert!(s.send(msg.clone()));
        s.close("kicked");

        assert_eq!(rx.try_recv().unwrap(), Outbound::Message(msg));
        assert_eq!(
            rx.try_recv().unwrap(),
            Outbound::Close {
                reason: "kicked".into()
            }
        );
    }

    #[test]
    fn test_send_after_receiver_dropped_returns_false() {
        let (s, rx) = session();
        drop(rx);
        assert!(!s.send(ServerMessage::ServerShutdown {
            message: "bye".into()
        }));
    }
}
