//! Per-connection handler: greeting, message loop, and outbound writer.
//!
//! Each accepted connection gets its own Tokio task running this handler.
//! The flow is:
//!   1. Register with the gatekeeper, which queues `CONNECTED`
//!   2. Spawn a writer task draining the player's outbound channel
//!   3. Loop: receive frames, decode, hand them to the gatekeeper, until
//!      the peer goes away or the writer stops (a kick or shutdown)
//!   4. On exit the drop guard deregisters the player

use std::sync::Arc;

use voxmine_protocol::{ClientMessage, Codec, PlayerId};
use voxmine_session::{BalanceLookup, Outbound, PlayerReceiver, outbound_channel};
use voxmine_transport::{Connection, WebSocketConnection};
use voxmine_world::DeltaStorage;

use crate::VoxmineError;
use crate::server::ServerState;

/// Drop guard that deregisters a player when the handler exits.
///
/// Runs even if the handler panics. `Drop` is synchronous, so the async
/// cleanup is spawned as a fire-and-forget task.
struct DisconnectGuard<L: BalanceLookup, S: DeltaStorage, C: Codec> {
    player_id: PlayerId,
    state: Arc<ServerState<L, S, C>>,
}

impl<L: BalanceLookup, S: DeltaStorage, C: Codec> Drop for DisconnectGuard<L, S, C> {
    fn drop(&mut self) {
        let player_id = self.player_id;
        let state = Arc::clone(&self.state);
        tokio::spawn(async move {
            state.gatekeeper.on_disconnect(player_id).await;
        });
    }
}

/// Handles a single connection from accept to close.
pub(crate) async fn handle_connection<L, S, C>(
    conn: WebSocketConnection,
    state: Arc<ServerState<L, S, C>>,
) -> Result<(), VoxmineError>
where
    L: BalanceLookup,
    S: DeltaStorage,
    C: Codec,
{
    let conn = Arc::new(conn);
    let conn_id = conn.id();
    let (sender, receiver) = outbound_channel();

    let player_id = state.gatekeeper.on_connect(sender, conn.remote_addr()).await;
    let _guard = DisconnectGuard {
        player_id,
        state: Arc::clone(&state),
    };
    tracing::debug!(%conn_id, %player_id, "handling new connection");

    let mut writer = tokio::spawn(write_loop(Arc::clone(&conn), receiver, Arc::clone(&state)));

    loop {
        let received = tokio::select! {
            received = tokio::time::timeout(state.idle_timeout, conn.recv()) => received,
            _ = &mut writer => {
                tracing::info!(%player_id, "connection closed by server");
                break;
            }
        };
        let data = match received {
            Ok(Ok(Some(data))) => data,
            Ok(Ok(None)) => {
                tracing::info!(%player_id, "connection closed cleanly");
                break;
            }
            Ok(Err(e)) => {
                tracing::debug!(%player_id, error = %e, "recv error");
                break;
            }
            Err(_) => {
                tracing::info!(%player_id, "connection timed out");
                break;
            }
        };

        let msg: ClientMessage = match state.codec.decode(&data) {
            Ok(msg) => msg,
            Err(e) => {
                state
                    .gatekeeper
                    .reject_malformed(player_id, &e.to_string())
                    .await;
                continue;
            }
        };

        match msg {
            // The balance lookup may be slow; keep reading meanwhile.
            ClientMessage::Login { wallet } => {
                let state = Arc::clone(&state);
                tokio::spawn(async move {
                    let _ = state.gatekeeper.login(player_id, &wallet).await;
                });
            }
            msg => state.gatekeeper.route(player_id, msg).await,
        }
    }

    // _guard drops here and the player is deregistered.
    Ok(())
}

/// Sends everything queued for one player until the channel closes or a
/// close is requested, then closes the connection.
async fn write_loop<L, S, C>(
    conn: Arc<WebSocketConnection>,
    mut receiver: PlayerReceiver,
    state: Arc<ServerState<L, S, C>>,
) where
    L: BalanceLookup,
    S: DeltaStorage,
    C: Codec,
{
    while let Some(outbound) = receiver.recv().await {
        let msg = match outbound {
            Outbound::Message(msg) => msg,
            Outbound::Close { reason } => {
                tracing::debug!(conn_id = %conn.id(), %reason, "closing connection");
                break;
            }
        };
        let bytes = match state.codec.encode(&msg) {
            Ok(bytes) => bytes,
            Err(e) => {
                tracing::warn!(error = %e, "failed to encode outbound message");
                continue;
            }
        };
        let sent = if msg.is_unreliable() {
            conn.send_unreliable(&bytes).await
        } else {
            conn.send(&bytes).await
        };
        if let Err(e) = sent {
            tracing::debug!(conn_id = %conn.id(), error = %e, "send failed");
            break;
        }
    }
    let _ = conn.close().await;
}
