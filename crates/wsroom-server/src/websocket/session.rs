//! Socket lifecycle: one writer task and one reader loop per connection.
//!
//! The writer owns the sink half and drains the connection's outbound
//! queue, applying the write deadline to each frame. The reader owns the
//! stream half, applies the read deadline, records liveness and dispatches
//! text frames. Either side stopping cancels the connection token, which
//! stops the other.

use std::sync::Arc;
use std::time::Duration;

use axum::body::Bytes;
use axum::extract::ws::{CloseFrame, Message as WsMessage, Utf8Bytes, WebSocket, close_code};
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use super::connection::{Connection, Outbound};
use super::handler::handle_message;
use crate::events::Context;
use crate::registry::{Registry, UpgradeInfo};

/// Serve an upgraded socket until either side closes it.
#[instrument(skip_all, fields(remote_addr = %info.remote_addr))]
pub async fn run_ws_session(socket: WebSocket, registry: Registry, info: UpgradeInfo) {
    let (mut sink, stream) = socket.split();
    let (tx, rx) = mpsc::channel(registry.config().outbound_buffer);

    let conn = match registry.register(info, tx) {
        Ok(conn) => conn,
        Err(e) => {
            warn!(error = %e, "failed to register connection");
            let _ = send_close(&mut sink, close_code::AWAY, "server shutting down").await;
            return;
        }
    };

    let writer = spawn_writer(sink, rx, &conn, registry.config().write_wait);
    conn.attach_writer(writer);

    let ctx = Context::new(conn.clone(), registry.clone());
    read_loop(stream, &ctx).await;
    let _ = registry.remove_connection(conn.id());
}

/// Complete the handshake then close with a policy violation.
pub async fn reject_socket(socket: WebSocket, reason: &str) {
    let (mut sink, _stream) = socket.split();
    if let Err(e) = send_close(&mut sink, close_code::POLICY, reason).await {
        debug!(error = %e, "failed to send rejection close frame");
    }
}

async fn send_close(
    sink: &mut SplitSink<WebSocket, WsMessage>,
    code: u16,
    reason: &str,
) -> Result<(), axum::Error> {
    let frame = CloseFrame {
        code,
        reason: Utf8Bytes::from(reason),
    };
    sink.send(WsMessage::Close(Some(frame))).await
}

fn spawn_writer(
    sink: SplitSink<WebSocket, WsMessage>,
    rx: mpsc::Receiver<Outbound>,
    conn: &Arc<Connection>,
    write_wait: Duration,
) -> JoinHandle<()> {
    let cancel = conn.cancel_token();
    let id = conn.id().clone();
    tokio::spawn(async move {
        write_loop(sink, rx, cancel, write_wait).await;
        debug!(connection_id = %id, "writer stopped");
    })
}

async fn write_loop(
    mut sink: SplitSink<WebSocket, WsMessage>,
    mut rx: mpsc::Receiver<Outbound>,
    cancel: CancellationToken,
    write_wait: Duration,
) {
    loop {
        let frame = tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            frame = rx.recv() => match frame {
                Some(frame) => frame,
                None => break,
            },
        };

        let message = match frame {
            Outbound::Text(text) => WsMessage::Text(text),
            Outbound::Ping => WsMessage::Ping(Bytes::new()),
        };
        match timeout(write_wait, sink.send(message)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                debug!(error = %e, "write failed");
                cancel.cancel();
                return;
            }
            Err(_) => {
                warn!(?write_wait, "write deadline exceeded");
                cancel.cancel();
                return;
            }
        }
    }

    let _ = timeout(write_wait, send_close(&mut sink, close_code::NORMAL, "")).await;
}

async fn read_loop(mut stream: SplitStream<WebSocket>, ctx: &Context) {
    let conn = ctx.connection();
    let cancel = conn.cancel_token();
    let pong_wait = ctx.registry().config().pong_wait;

    loop {
        let next = tokio::select! {
            () = cancel.cancelled() => break,
            next = timeout(pong_wait, stream.next()) => next,
        };
        let message = match next {
            Err(_) => {
                debug!(connection_id = %conn.id(), ?pong_wait, "read deadline exceeded");
                break;
            }
            Ok(next) => next,
        };
        let message = match message {
            Some(Ok(message)) => message,
            Some(Err(e)) => {
                debug!(connection_id = %conn.id(), error = %e, "read failed");
                break;
            }
            None => break,
        };

        match message {
            WsMessage::Text(text) => {
                let _ = handle_message(text.as_str(), ctx).await;
            }
            WsMessage::Binary(data) => match std::str::from_utf8(&data) {
                Ok(text) => {
                    let _ = handle_message(text, ctx).await;
                }
                Err(_) => {
                    info!(connection_id = %conn.id(), len = data.len(), "ignoring non-UTF8 binary frame");
                }
            },
            WsMessage::Ping(_) | WsMessage::Pong(_) => conn.mark_alive(),
            WsMessage::Close(frame) => {
                debug!(connection_id = %conn.id(), ?frame, "peer sent close frame");
                break;
            }
        }
    }
    cancel.cancel();
}
