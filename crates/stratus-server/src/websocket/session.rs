//! Lifecycle of one websocket connection, from upgrade to disconnect.

use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket};
use futures::stream::SplitSink;
use futures::{SinkExt, StreamExt};
use metrics::{counter, gauge, histogram};
use stratus_core::{ClientConnection, ConnectionId, Session};
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, instrument, warn};

use super::callbacks::ConnectionContext;
use super::handler::FrameRouter;
use crate::metrics::{WS_CONNECTIONS_ACTIVE, WS_CONNECTIONS_TOTAL, WS_DISCONNECTIONS_TOTAL};
use crate::server::AppState;

/// Frame sent to an unauthenticated client before the socket is closed.
pub const UNAUTHORIZED_FRAME: &str = r#"{"status":401,"text":"Unauthorized"}"#;

/// How long the writer may keep flushing after the read loop ends.
const WRITER_DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

/// Drive an authenticated connection until it closes.
///
/// Registers the connection, runs `on_connect`, then routes every inbound
/// frame until the peer closes, a read fails, a close is requested or the
/// server shuts down. The connection is unregistered before
/// `on_disconnect` runs.
#[instrument(skip_all, fields(conn_id = %connection_id, session_id = session.id.redacted()))]
pub async fn run_ws_session(
    socket: WebSocket,
    connection_id: ConnectionId,
    session: Session,
    state: AppState,
) {
    let (ws_tx, mut ws_rx) = socket.split();
    let (send_tx, send_rx) = mpsc::channel::<String>(state.config.send_queue_capacity.max(1));
    let connection = Arc::new(ClientConnection::new(
        connection_id.clone(),
        session.id.clone(),
        send_tx,
    ));

    if let Err(error) = state.connections.register(Arc::clone(&connection)) {
        warn!(%error, "could not register connection");
        return;
    }
    counter!(WS_CONNECTIONS_TOTAL).increment(1);
    gauge!(WS_CONNECTIONS_ACTIVE).increment(1.0);
    info!("client connected");

    let ctx = ConnectionContext::new(
        Arc::clone(&connection),
        Arc::clone(&state.sessions),
        Arc::clone(&state.connections),
    );
    state.handler.on_connect(&ctx, &session).await;

    let writer = tokio::spawn(write_loop(
        ws_tx,
        send_rx,
        Arc::clone(&connection),
        state.config.heartbeat_interval(),
        state.config.pong_timeout(),
    ));
    let writer_abort = writer.abort_handle();

    let router = FrameRouter::new(
        Arc::clone(&state.methods),
        Arc::clone(&state.handler),
        state.config.concurrent_dispatch,
    );
    let shutdown = state.shutdown.token();

    loop {
        let frame = tokio::select! {
            () = connection.closed() => {
                debug!("close requested");
                break;
            }
            () = shutdown.cancelled() => {
                debug!("server shutting down");
                break;
            }
            frame = ws_rx.next() => frame,
        };

        let text = match frame {
            Some(Ok(Message::Text(text))) => text.to_string(),
            Some(Ok(Message::Binary(data))) => match String::from_utf8(data.to_vec()) {
                Ok(text) => text,
                Err(_) => {
                    debug!(len = data.len(), "ignoring non-UTF-8 binary frame");
                    continue;
                }
            },
            Some(Ok(Message::Ping(_) | Message::Pong(_))) => {
                connection.mark_alive();
                continue;
            }
            Some(Ok(Message::Close(_))) => {
                info!("client sent close frame");
                break;
            }
            Some(Err(error)) => {
                debug!(%error, "websocket read failed");
                break;
            }
            None => break,
        };

        connection.mark_alive();
        let _ = router.route(&ctx, text).await;
    }

    let _ = state.connections.unregister(&connection_id);
    state.handler.on_disconnect(&ctx).await;

    counter!(WS_DISCONNECTIONS_TOTAL).increment(1);
    gauge!(WS_CONNECTIONS_ACTIVE).decrement(1.0);
    histogram!("ws_connection_duration_seconds").record(connection.age().as_secs_f64());
    info!(dropped = connection.drop_count(), "client disconnected");

    if tokio::time::timeout(WRITER_DRAIN_TIMEOUT, writer).await.is_err() {
        warn!("writer did not finish, aborting");
        writer_abort.abort();
    }
}

/// Forward queued messages to the socket and ping on an interval.
///
/// Ends once the queue is closed (after unregister), sending a Close frame
/// first, or when the socket stops accepting writes.
async fn write_loop(
    mut ws_tx: SplitSink<WebSocket, Message>,
    mut send_rx: mpsc::Receiver<String>,
    connection: Arc<ClientConnection>,
    ping_interval: Duration,
    pong_timeout: Duration,
) {
    let mut ticker = tokio::time::interval(ping_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let _ = ticker.tick().await;

    loop {
        tokio::select! {
            msg = send_rx.recv() => match msg {
                Some(text) => {
                    if ws_tx.send(Message::Text(text.into())).await.is_err() {
                        connection.request_close();
                        break;
                    }
                }
                None => {
                    let _ = ws_tx.send(Message::Close(None)).await;
                    break;
                }
            },
            _ = ticker.tick() => {
                if !connection.is_open() {
                    continue;
                }
                if heartbeat_expired(&connection, pong_timeout) {
                    warn!(?pong_timeout, "client unresponsive, disconnecting");
                    connection.request_close();
                    continue;
                }
                if ws_tx.send(Message::Ping(Vec::new().into())).await.is_err() {
                    connection.request_close();
                    break;
                }
            }
        }
    }
}

/// Whether a client has been silent past `pong_timeout`.
///
/// Consumes the alive flag, so a client that answered since the previous
/// tick is never expired.
fn heartbeat_expired(connection: &ClientConnection, pong_timeout: Duration) -> bool {
    !connection.check_alive() && connection.last_pong_elapsed() > pong_timeout
}

/// Tell an unauthenticated client why it is being dropped, then close.
pub async fn reject_unauthenticated(mut socket: WebSocket) {
    let _ = socket
        .send(Message::Text(UNAUTHORIZED_FRAME.into()))
        .await;
    let _ = socket.send(Message::Close(None)).await;
}
