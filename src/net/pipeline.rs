//! Per-connection pipeline stages
//!
//! Receive, execute and send run as three independent tasks per connection,
//! coupled only by FIFO queues. Teardown is triggered once from whichever
//! stage observes the end first and is idempotent; in-flight work drains,
//! new work stops being queued.

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::ecs::store::ok_or_log;
use crate::ecs::templates;
use crate::game::context::GameContext;
use crate::net::commands;
use crate::net::connection::Connection;
use crate::net::framing;
use crate::net::protocol::{self, unix_now_ms, ClientCommand, ServerPacket};

/// Bound of the receive-to-execute queue
pub const EXECUTE_QUEUE_DEPTH: usize = 256;

/// Wire up a freshly accepted socket and start its three stages
pub fn spawn(ctx: Arc<GameContext>, stream: TcpStream, addr: SocketAddr) {
    let (reader, writer) = stream.into_split();
    let (out_tx, out_rx) = mpsc::unbounded_channel();
    let (exec_tx, exec_rx) = mpsc::channel(EXECUTE_QUEUE_DEPTH);

    let id = ctx.connections.allocate_id();
    let session = templates::client_session(&ctx.store);
    let conn = Arc::new(Connection::new(id, addr, session, out_tx.clone()));
    ctx.store.register_sink(id, out_tx);
    ctx.connections.insert(conn.clone());
    info!(connection = id, %addr, "New socket connected");

    conn.push(ServerPacket::InitTime { server_unix_ms: unix_now_ms() });
    ok_or_log(ctx.store.share(session, id), "share session");

    tokio::spawn(receive_loop(ctx.clone(), conn.clone(), reader, exec_tx));
    tokio::spawn(execute_loop(ctx.clone(), conn.clone(), exec_rx));
    tokio::spawn(send_loop(ctx, conn, writer, out_rx));
}

/// Receive stage: frames in, decoded commands forwarded in arrival order.
/// Transport disconnects tear down quietly; undecodable frames are fatal to
/// the connection but never to the process.
pub async fn receive_loop<R: AsyncRead + Unpin>(
    ctx: Arc<GameContext>,
    conn: Arc<Connection>,
    mut reader: R,
    exec_tx: mpsc::Sender<ClientCommand>,
) {
    'recv: loop {
        if conn.is_torn_down() {
            break;
        }
        match framing::read_frame(&mut reader).await {
            Ok(frame) => match protocol::decode_frame(&frame) {
                Ok(batch) => {
                    conn.touch();
                    for command in batch {
                        if exec_tx.send(command).await.is_err() {
                            // Execute stage is gone; nothing left to feed
                            break 'recv;
                        }
                    }
                }
                Err(e) => {
                    error!(connection = conn.id, "Undecodable frame, dropping connection: {e}");
                    break;
                }
            },
            Err(e) if e.is_disconnect() => {
                debug!(connection = conn.id, "Socket disconnected");
                break;
            }
            Err(e) => {
                error!(connection = conn.id, "Transport fault while receiving: {e}");
                break;
            }
        }
    }
    teardown(&ctx, &conn);
}

/// Execute stage: commands run one by one against game state. A failing
/// command is logged and dropped; the loop always continues.
pub async fn execute_loop(
    ctx: Arc<GameContext>,
    conn: Arc<Connection>,
    mut exec_rx: mpsc::Receiver<ClientCommand>,
) {
    while let Some(command) = exec_rx.recv().await {
        if let Err(e) = commands::execute(command, &ctx, &conn) {
            warn!(connection = conn.id, "Command failed: {e:#}");
        }
    }
}

/// Send stage: outbound packets encoded and written in FIFO order. Encode
/// and transport failures are logged without stalling the loop; only a
/// disconnect ends it.
pub async fn send_loop<W: AsyncWrite + Unpin>(
    ctx: Arc<GameContext>,
    conn: Arc<Connection>,
    mut writer: W,
    mut out_rx: mpsc::UnboundedReceiver<ServerPacket>,
) {
    while let Some(packet) = out_rx.recv().await {
        match protocol::encode_packet(&packet) {
            Ok(bytes) => {
                if let Err(e) = framing::write_frame(&mut writer, &bytes).await {
                    if e.is_disconnect() {
                        debug!(connection = conn.id, "Socket closed while sending");
                        break;
                    }
                    warn!(connection = conn.id, "Failed to send packet: {e}");
                }
            }
            Err(e) => warn!(connection = conn.id, "Failed to encode packet: {e}"),
        }
    }
    teardown(&ctx, &conn);
}

/// Orderly teardown; safe to call from any stage, any number of times.
///
/// Leaves the owning battle, retracts the user entity from connections that
/// are not inside a lobby, releases this connection's share references
/// (deleting entities nobody shares anymore) and closes the queues.
pub fn teardown(ctx: &Arc<GameContext>, conn: &Arc<Connection>) {
    if !conn.begin_teardown() {
        return;
    }
    info!(connection = conn.id, "Connection teardown");

    if let Some((battle, player)) = conn.battle() {
        if player.in_battle_as_tank() || player.is_spectator {
            battle.remove_player(&player);
        } else {
            battle.remove_player_from_lobby(&player);
        }
    }

    if let Some(user) = conn.user_entity() {
        for other in ctx.connections.all() {
            if other.id != conn.id && !other.in_lobby() {
                ok_or_log(ctx.store.unshare(user, other.id), "teardown user unshare");
            }
        }
        ok_or_log(ctx.store.remove(user), "teardown user removal");
    }

    ctx.store.release_connection(conn.id);
    ctx.connections.remove(conn.id);
    conn.close_outbound();
}
