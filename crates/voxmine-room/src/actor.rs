//! Room actor: one Tokio task per room.
//!
//! The actor owns a [`Room`] and is the only thing that touches it. The
//! outside world talks to it through a [`RoomHandle`], which wraps a bounded
//! `mpsc` channel. Commands that need an answer carry a `oneshot` reply
//! channel; everything else is fire-and-forget, since the room replies to
//! players directly through their outbound channels.
//!
//! Inside the task a `tokio::select!` loop interleaves commands, simulation
//! ticks, and periodic flushes of the world delta. The tick scheduler is
//! paused whenever the room is empty.

use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};
use tokio::time::{self, Instant, MissedTickBehavior};
use voxmine_protocol::{BlockType, PlayerId, RoomId, VoxelCoord};
use voxmine_session::PlayerSession;
use voxmine_tick::{TickConfig, TickScheduler};
use voxmine_world::DeltaStorage;

use crate::{AdmitRejection, Admission, JoinError, Room, RoomError, RoomInfo};

type JoinReply = oneshot::Sender<Result<Admission, (AdmitRejection, PlayerSession)>>;

pub(crate) enum RoomCommand {
    Join {
        session: PlayerSession,
        reply: JoinReply,
    },
    Leave {
        player_id: PlayerId,
        reply: oneshot::Sender<bool>,
    },
    Input {
        player_id: PlayerId,
        x: f32,
        y: f32,
        z: f32,
        yaw: f32,
    },
    Mine {
        player_id: PlayerId,
        coord: VoxelCoord,
        block_type: BlockType,
    },
    CollectLoot {
        player_id: PlayerId,
        coord: VoxelCoord,
    },
    Ping {
        player_id: PlayerId,
        client_time: u64,
    },
    Chat {
        player_id: PlayerId,
        text: String,
    },
    Info {
        reply: oneshot::Sender<RoomInfo>,
    },
    /// Stop the actor if the room is reclaimable at `now`.
    Reclaim {
        now: Instant,
        reply: oneshot::Sender<bool>,
    },
    /// Flush and stop, optionally telling members why first.
    Teardown {
        notice: Option<String>,
        reply: oneshot::Sender<()>,
    },
}

// ---------------------------------------------------------------------------
// Handle
// ---------------------------------------------------------------------------

/// Handle to a running room actor. Cheap to clone.
#[derive(Clone)]
pub struct RoomHandle {
    room_id: RoomId,
    sender: mpsc::Sender<RoomCommand>,
}

impl RoomHandle {
    pub fn room_id(&self) -> RoomId {
        self.room_id
    }

    /// Whether the actor has stopped.
    pub fn is_closed(&self) -> bool {
        self.sender.is_closed()
    }

    /// Offers a session to the room.
    pub async fn add_player(&self, session: PlayerSession) -> Result<Admission, JoinError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        let cmd = RoomCommand::Join {
            session,
            reply: reply_tx,
        };
        if let Err(mpsc::error::SendError(cmd)) = self.sender.send(cmd).await {
            let session = match cmd {
                RoomCommand::Join { session, .. } => Some(session),
                _ => None,
            };
            return Err(JoinError::Unavailable(self.room_id, session));
        }
        match reply_rx.await {
            Ok(Ok(admission)) => Ok(admission),
            Ok(Err((reason, session))) => Err(JoinError::Rejected(reason, session)),
            Err(_) => Err(JoinError::Unavailable(self.room_id, None)),
        }
    }

    /// Removes a member. Returns `false` if the player was not in the room.
    pub async fn remove_player(&self, player_id: PlayerId) -> Result<bool, RoomError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.request(RoomCommand::Leave {
            player_id,
            reply: reply_tx,
        })
        .await?;
        reply_rx.await.map_err(|_| RoomError::Unavailable(self.room_id))
    }

    pub async fn input(
        &self,
        player_id: PlayerId,
        x: f32,
        y: f32,
        z: f32,
        yaw: f32,
    ) -> Result<(), RoomError> {
        self.request(RoomCommand::Input {
            player_id,
            x,
            y,
            z,
            yaw,
        })
        .await
    }

    pub async fn mine(
        &self,
        player_id: PlayerId,
        coord: VoxelCoord,
        block_type: BlockType,
    ) -> Result<(), RoomError> {
        self.request(RoomCommand::Mine {
            player_id,
            coord,
            block_type,
        })
        .await
    }

    pub async fn collect_loot(&self, player_id: PlayerId, coord: VoxelCoord) -> Result<(), RoomError> {
        self.request(RoomCommand::CollectLoot { player_id, coord }).await
    }

    pub async fn ping(&self, player_id: PlayerId, client_time: u64) -> Result<(), RoomError> {
        self.request(RoomCommand::Ping {
            player_id,
            client_time,
        })
        .await
    }

    pub async fn chat(&self, player_id: PlayerId, text: String) -> Result<(), RoomError> {
        self.request(RoomCommand::Chat { player_id, text }).await
    }

    pub async fn info(&self) -> Result<RoomInfo, RoomError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.request(RoomCommand::Info { reply: reply_tx }).await?;
        reply_rx.await.map_err(|_| RoomError::Unavailable(self.room_id))
    }

    /// Stops the room if it is reclaimable at `now`, flushing its world
    /// delta first. Returns whether it stopped.
    pub async fn reclaim_if_idle(&self, now: Instant) -> Result<bool, RoomError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.request(RoomCommand::Reclaim {
            now,
            reply: reply_tx,
        })
        .await?;
        reply_rx.await.map_err(|_| RoomError::Unavailable(self.room_id))
    }

    /// Flushes and stops the room. With a `notice`, members get
    /// `SERVER_SHUTDOWN` and their connections are closed first.
    pub async fn teardown(&self, notice: Option<String>) -> Result<(), RoomError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.request(RoomCommand::Teardown {
            notice,
            reply: reply_tx,
        })
        .await?;
        reply_rx.await.map_err(|_| RoomError::Unavailable(self.room_id))
    }

    async fn request(&self, cmd: RoomCommand) -> Result<(), RoomError> {
        self.sender
            .send(cmd)
            .await
            .map_err(|_| RoomError::Unavailable(self.room_id))
    }
}

// ---------------------------------------------------------------------------
// Actor
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Flow {
    Continue,
    Stop,
}

struct RoomActor<S: DeltaStorage> {
    room: Room,
    storage: Arc<S>,
    scheduler: TickScheduler,
    receiver: mpsc::Receiver<RoomCommand>,
}

impl<S: DeltaStorage> RoomActor<S> {
    async fn run(mut self) {
        let room_id = self.room.id();
        let outcome = self.room.store_mut().restore(self.storage.as_ref()).await;
        tracing::info!(
            %room_id,
            tier = %self.room.tier(),
            default = self.room.is_default(),
            ?outcome,
            "room actor started"
        );

        let every = self.room.rules().flush_interval;
        let mut flush = time::interval_at(Instant::now() + every, every);
        flush.set_missed_tick_behavior(MissedTickBehavior::Delay);
        self.sync_scheduler();

        loop {
            tokio::select! {
                cmd = self.receiver.recv() => {
                    let Some(cmd) = cmd else {
                        // Every handle is gone.
                        self.flush().await;
                        break;
                    };
                    if self.handle(cmd).await == Flow::Stop {
                        break;
                    }
                    self.sync_scheduler();
                }
                _ = self.scheduler.wait_for_tick() => {
                    self.room.tick(Instant::now());
                    self.scheduler.record_tick_end();
                    self.sync_scheduler();
                }
                _ = flush.tick() => {
                    self.flush().await;
                }
            }
        }

        // Joins still queued get their sessions back so the caller can
        // place them elsewhere.
        self.receiver.close();
        while let Some(cmd) = self.receiver.recv().await {
            if let RoomCommand::Join { session, reply } = cmd {
                let _ = reply.send(Err((AdmitRejection::Closing, session)));
            }
        }

        tracing::info!(
            %room_id,
            ticks = self.scheduler.metrics().total_ticks,
            overruns = self.scheduler.metrics().total_overruns,
            "room actor stopped"
        );
    }

    async fn handle(&mut self, cmd: RoomCommand) -> Flow {
        let now = Instant::now();
        match cmd {
            RoomCommand::Join { session, reply } => {
                let _ = reply.send(self.room.add_player(session, now));
            }
            RoomCommand::Leave { player_id, reply } => {
                let removed = self.room.remove_player(player_id, now).is_some();
                let _ = reply.send(removed);
            }
            RoomCommand::Input {
                player_id,
                x,
                y,
                z,
                yaw,
            } => {
                self.room.set_input(player_id, x, y, z, yaw, now);
            }
            RoomCommand::Mine {
                player_id,
                coord,
                block_type,
            } => {
                let _ = self.room.mine(player_id, coord, block_type, now);
            }
            RoomCommand::CollectLoot { player_id, coord } => {
                let _ = self.room.collect_loot(player_id, coord, now);
            }
            RoomCommand::Ping {
                player_id,
                client_time,
            } => {
                self.room.ping(player_id, client_time);
            }
            RoomCommand::Chat { player_id, text } => {
                self.room.chat(player_id, &text);
            }
            RoomCommand::Info { reply } => {
                let _ = reply.send(self.room.info(now));
            }
            RoomCommand::Reclaim { now, reply } => {
                if !self.room.is_reclaimable(now) {
                    let _ = reply.send(false);
                    return Flow::Continue;
                }
                tracing::info!(room_id = %self.room.id(), "reclaiming idle room");
                self.flush().await;
                let _ = reply.send(true);
                return Flow::Stop;
            }
            RoomCommand::Teardown { notice, reply } => {
                if let Some(message) = notice {
                    self.room.announce_shutdown(&message);
                }
                self.flush().await;
                let _ = reply.send(());
                return Flow::Stop;
            }
        }
        Flow::Continue
    }

    fn sync_scheduler(&mut self) {
        if self.room.is_empty() {
            self.scheduler.pause();
        } else {
            self.scheduler.resume();
        }
    }

    async fn flush(&mut self) {
        let storage = self.storage.as_ref();
        if let Some(outcome) = self.room.store_mut().retry_load(storage).await {
            tracing::info!(room_id = %self.room.id(), ?outcome, "retried world delta load");
        }
        // Failures are logged by the store, which stays dirty for the next
        // attempt.
        let _ = self.room.store_mut().persist(storage).await;
    }
}

/// Spawns the actor for `room` and returns a handle to it.
///
/// The actor first restores the room's world delta from `storage`, so
/// commands sent right away are only processed once that finishes.
pub fn spawn_room<S: DeltaStorage>(room: Room, storage: Arc<S>) -> RoomHandle {
    let rules = room.rules();
    let (tx, rx) = mpsc::channel(rules.command_buffer.max(1));
    let scheduler = TickScheduler::new(TickConfig::with_rate(rules.tick_rate_hz));
    let room_id = room.id();

    let actor = RoomActor {
        room,
        storage,
        scheduler,
        receiver: rx,
    };
    tokio::spawn(actor.run());

    RoomHandle {
        room_id,
        sender: tx,
    }
}
