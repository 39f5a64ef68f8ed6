//! Async client: a reader task routing inbound events and a writer task
//! draining an outbound queue.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use futures::{Sink, SinkExt, Stream, StreamExt};
use parking_lot::RwLock;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use wsroom_core::Message;

use crate::errors::{ClientError, Result};

/// Query parameter carrying the token, matching the server default.
pub const DEFAULT_TOKEN_PARAM: &str = "jwt";

const QUEUE_CAPACITY: usize = 256;
const CLOSE_TIMEOUT: Duration = Duration::from_secs(5);

type Handler = Arc<dyn Fn(Message) + Send + Sync>;
type Handlers = Arc<RwLock<HashMap<String, Handler>>>;

/// A connection to a wsroom server.
pub struct Client {
    outbound: mpsc::Sender<WsMessage>,
    inbox: mpsc::Receiver<Message>,
    handlers: Handlers,
    cancel: CancellationToken,
    reader: JoinHandle<()>,
    writer: JoinHandle<()>,
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client").finish_non_exhaustive()
    }
}

impl Client {
    /// Dial `url`, passing `token` as the `jwt` query parameter when given.
    pub async fn connect(url: &str, token: Option<&str>) -> Result<Self> {
        let url = with_token(url, DEFAULT_TOKEN_PARAM, token);
        let (stream, response) = connect_async(url.as_str()).await?;
        debug!(status = %response.status(), "connected");

        let (sink, stream) = stream.split();
        let (outbound, outbound_rx) = mpsc::channel(QUEUE_CAPACITY);
        let (inbox_tx, inbox) = mpsc::channel(QUEUE_CAPACITY);
        let handlers: Handlers = Arc::default();
        let cancel = CancellationToken::new();

        let writer = tokio::spawn(write_loop(sink, outbound_rx, cancel.clone()));
        let reader = tokio::spawn(read_loop(stream, handlers.clone(), inbox_tx, cancel.clone()));

        Ok(Self {
            outbound,
            inbox,
            handlers,
            cancel,
            reader,
            writer,
        })
    }

    /// Route inbound `event` messages to `handler` instead of [`recv`](Self::recv).
    ///
    /// Replaces any previous handler for the event.
    pub fn on(&self, event: &str, handler: impl Fn(Message) + Send + Sync + 'static) {
        let _ = self
            .handlers
            .write()
            .insert(event.to_owned(), Arc::new(handler));
    }

    /// Send a message.
    pub async fn emit(&self, message: &Message) -> Result<()> {
        let text = message.to_json()?;
        self.outbound
            .send(WsMessage::text(text))
            .await
            .map_err(|_| ClientError::Closed)
    }

    /// Send `event` with `data` as its payload.
    pub async fn emit_event(&self, event: &str, data: &Value) -> Result<()> {
        self.emit(&Message::with_data(event, data)?).await
    }

    /// Next inbound message without a registered handler.
    ///
    /// Returns `None` once the connection is closed and the backlog drained.
    pub async fn recv(&mut self) -> Option<Message> {
        self.inbox.recv().await
    }

    /// Whether the connection has closed.
    pub fn is_closed(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Send a normal close frame and wait for the server to close.
    pub async fn close(self) -> Result<()> {
        let frame = CloseFrame {
            code: CloseCode::Normal,
            reason: "".into(),
        };
        let sent = self.outbound.send(WsMessage::Close(Some(frame))).await;
        if tokio::time::timeout(CLOSE_TIMEOUT, self.reader).await.is_err() {
            warn!("server did not close in time");
        }
        self.cancel.cancel();
        let _ = self.writer.await;
        sent.map_err(|_| ClientError::Closed)
    }
}

fn with_token(url: &str, param: &str, token: Option<&str>) -> String {
    match token {
        Some(token) if !token.is_empty() => {
            let sep = if url.contains('?') { '&' } else { '?' };
            format!("{url}{sep}{param}={token}")
        }
        _ => url.to_owned(),
    }
}

async fn write_loop<S>(mut sink: S, mut rx: mpsc::Receiver<WsMessage>, cancel: CancellationToken)
where
    S: Sink<WsMessage> + Unpin,
    S::Error: std::fmt::Display,
{
    loop {
        let frame = tokio::select! {
            () = cancel.cancelled() => break,
            frame = rx.recv() => match frame {
                Some(frame) => frame,
                None => break,
            },
        };
        if let Err(e) = sink.send(frame).await {
            debug!(error = %e, "write failed");
            break;
        }
    }
    cancel.cancel();
}

async fn read_loop<S>(
    mut stream: S,
    handlers: Handlers,
    inbox: mpsc::Sender<Message>,
    cancel: CancellationToken,
) where
    S: Stream<Item = std::result::Result<WsMessage, tokio_tungstenite::tungstenite::Error>> + Unpin,
{
    loop {
        let next = tokio::select! {
            () = cancel.cancelled() => break,
            next = stream.next() => next,
        };
        let text = match next {
            Some(Ok(WsMessage::Text(text))) => text,
            Some(Ok(WsMessage::Close(frame))) => {
                debug!(?frame, "server closed connection");
                break;
            }
            Some(Ok(_)) => continue,
            Some(Err(e)) => {
                debug!(error = %e, "read failed");
                break;
            }
            None => break,
        };

        let message = match Message::parse(text.as_str()) {
            Ok(message) => message,
            Err(e) => {
                warn!(error = %e, "dropping malformed message");
                continue;
            }
        };
        let handler = handlers.read().get(&message.event_name).cloned();
        match handler {
            Some(handler) => handler(message),
            None => {
                if inbox.send(message).await.is_err() {
                    break;
                }
            }
        }
    }
    cancel.cancel();
}
