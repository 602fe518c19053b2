//! `VoxmineServer` builder and server loop.
//!
//! This is the entry point for running a Voxmine game server. It ties
//! together all the layers: transport → protocol → gatekeeper → rooms.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::{self, Instant, MissedTickBehavior};
use voxmine_protocol::{Codec, JsonCodec};
use voxmine_room::SimulationRules;
use voxmine_session::{BalanceLookup, SessionConfig, TierThresholds};
use voxmine_transport::{Transport, WebSocketTransport};
use voxmine_world::DeltaStorage;

use crate::gatekeeper::{Gatekeeper, GatekeeperConfig};
use crate::handler::handle_connection;
use crate::{ServerConfig, VoxmineError};

/// Message sent to every player when the server stops.
pub const SHUTDOWN_MESSAGE: &str = "server is shutting down";

/// Shared server state passed to each connection handler task.
pub(crate) struct ServerState<L: BalanceLookup, S: DeltaStorage, C: Codec> {
    pub(crate) gatekeeper: Arc<Gatekeeper<L, S>>,
    pub(crate) codec: C,
    pub(crate) idle_timeout: Duration,
}

/// Builder for configuring and starting a Voxmine server.
///
/// # Example
///
/// ```rust,ignore
/// use voxmine::prelude::*;
///
/// let server = VoxmineServerBuilder::new()
///     .bind("0.0.0.0:8080")
///     .build(StaticBalanceLookup::new(0.0), Arc::new(FileStorage::new("data/rooms")))
///     .await?;
/// server.run().await
/// ```
pub struct VoxmineServerBuilder {
    bind_addr: String,
    gatekeeper: GatekeeperConfig,
    sweep_interval: Duration,
    idle_timeout: Duration,
}

impl VoxmineServerBuilder {
    pub fn new() -> Self {
        Self {
            bind_addr: "127.0.0.1:8080".to_string(),
            gatekeeper: GatekeeperConfig::default(),
            sweep_interval: Duration::from_secs(300),
            idle_timeout: Duration::from_secs(60),
        }
    }

    /// Applies every setting in a [`ServerConfig`].
    pub fn config(self, config: &ServerConfig) -> Self {
        self.bind(&config.bind_addr)
            .sweep_interval(config.sweep_interval)
            .idle_timeout(config.idle_timeout)
            .default_rooms_per_tier(config.default_rooms_per_tier)
    }

    /// Sets the address to bind the server to.
    pub fn bind(mut self, addr: &str) -> Self {
        self.bind_addr = addr.to_string();
        self
    }

    pub fn rules(mut self, rules: SimulationRules) -> Self {
        self.gatekeeper.rules = rules;
        self
    }

    pub fn thresholds(mut self, thresholds: TierThresholds) -> Self {
        self.gatekeeper.thresholds = thresholds;
        self
    }

    pub fn session_config(mut self, config: SessionConfig) -> Self {
        self.gatekeeper.session = config;
        self
    }

    pub fn default_rooms_per_tier(mut self, count: usize) -> Self {
        self.gatekeeper.default_rooms_per_tier = count;
        self
    }

    pub fn sweep_interval(mut self, interval: Duration) -> Self {
        self.sweep_interval = interval;
        self
    }

    pub fn idle_timeout(mut self, timeout: Duration) -> Self {
        self.idle_timeout = timeout;
        self
    }

    /// Binds the listener and starts the default rooms.
    ///
    /// Uses `JsonCodec` and `WebSocketTransport`.
    pub async fn build<L, S>(
        self,
        lookup: L,
        storage: Arc<S>,
    ) -> Result<VoxmineServer<L, S, JsonCodec>, VoxmineError>
    where
        L: BalanceLookup,
        S: DeltaStorage,
    {
        let transport = WebSocketTransport::bind(&self.bind_addr).await?;

        let state = Arc::new(ServerState {
            gatekeeper: Arc::new(Gatekeeper::new(self.gatekeeper, lookup, storage)),
            codec: JsonCodec,
            idle_timeout: self.idle_timeout,
        });
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        Ok(VoxmineServer {
            transport,
            state,
            sweep_interval: self.sweep_interval,
            shutdown_tx,
            shutdown_rx,
        })
    }
}

impl Default for VoxmineServerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Stops a running [`VoxmineServer`] from another task.
#[derive(Clone)]
pub struct ShutdownHandle {
    sender: watch::Sender<bool>,
}

impl ShutdownHandle {
    pub fn shutdown(&self) {
        let _ = self.sender.send(true);
    }
}

/// A Voxmine game server, bound and ready.
///
/// Call [`run()`](Self::run) to start accepting connections.
pub struct VoxmineServer<L: BalanceLookup, S: DeltaStorage, C: Codec> {
    transport: WebSocketTransport,
    state: Arc<ServerState<L, S, C>>,
    sweep_interval: Duration,
    shutdown_tx: watch::Sender<bool>,
    shutdown_rx: watch::Receiver<bool>,
}

impl<L, S, C> VoxmineServer<L, S, C>
where
    L: BalanceLookup,
    S: DeltaStorage,
    C: Codec,
{
    /// Returns the local address the server is bound to.
    pub fn local_addr(&self) -> Result<SocketAddr, VoxmineError> {
        Ok(self.transport.local_addr()?)
    }

    /// The gatekeeper, for inspecting connections and rooms from outside
    /// the server loop.
    pub fn gatekeeper(&self) -> Arc<Gatekeeper<L, S>> {
        Arc::clone(&self.state.gatekeeper)
    }

    /// A handle that makes [`run`](Self::run) return after a clean shutdown.
    pub fn shutdown_handle(&self) -> ShutdownHandle {
        ShutdownHandle {
            sender: self.shutdown_tx.clone(),
        }
    }

    /// Runs the accept loop and the idle-room sweeper.
    ///
    /// Returns once a [`ShutdownHandle`] fires: every player is told, every
    /// room is flushed and stopped, and no new connection is accepted.
    pub async fn run(mut self) -> Result<(), VoxmineError> {
        tracing::info!(addr = ?self.transport.local_addr().ok(), "Voxmine server running");

        let mut sweep = time::interval_at(Instant::now() + self.sweep_interval, self.sweep_interval);
        sweep.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut shutdown = self.shutdown_rx.clone();

        loop {
            tokio::select! {
                accepted = self.transport.accept() => match accepted {
                    Ok(conn) => {
                        let state = Arc::clone(&self.state);
                        tokio::spawn(async move {
                            if let Err(e) = handle_connection(conn, state).await {
                                tracing::debug!(error = %e, "connection ended with error");
                            }
                        });
                    }
                    Err(e) => {
                        tracing::error!(error = %e, "accept failed");
                    }
                },
                _ = sweep.tick() => {
                    self.state.gatekeeper.sweep(Instant::now()).await;
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        tracing::info!("Voxmine server shutting down");
        self.transport.shutdown().await?;
        self.state.gatekeeper.shutdown(SHUTDOWN_MESSAGE).await;
        Ok(())
    }
}
