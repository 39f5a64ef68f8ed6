//! Per-socket connection state.

use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use axum::extract::ws::Utf8Bytes;
use parking_lot::{Mutex, ReentrantMutex, ReentrantMutexGuard, RwLock};
use serde_json::Value;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use wsroom_core::{ConnectionId, Message};

use crate::errors::{HubError, Result};
use crate::registry::Room;

/// A frame queued for the connection's writer task.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Outbound {
    /// A serialized [`Message`].
    Text(Utf8Bytes),
    /// A liveness probe.
    Ping,
}

/// Lifecycle of a connection.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConnectionState {
    /// Minted but not yet registered.
    Connecting,
    /// Registered and serving traffic.
    Open,
    /// Teardown started.
    Closing,
    /// Removed from the registry and transport released.
    Closed,
}

/// One live socket and the state attached to it.
pub struct Connection {
    id: ConnectionId,
    remote_addr: IpAddr,
    identity: Option<String>,
    connected_at: Instant,
    /// Cached name of the owning session.
    session: Mutex<Option<String>>,
    room: RwLock<Room>,
    data: Mutex<HashMap<String, Value>>,
    state: Mutex<ConnectionState>,
    last_pong: Mutex<Instant>,
    tx: mpsc::Sender<Outbound>,
    cancel: CancellationToken,
    writer: Mutex<Option<JoinHandle<()>>>,
    /// Held while opening and while closing, so `on_close` never runs
    /// before `on_connect` has returned.
    lifecycle: ReentrantMutex<()>,
    dropped_messages: AtomicU64,
}

impl Connection {
    /// Create a connection in the `Connecting` state.
    pub fn new(
        id: ConnectionId,
        remote_addr: IpAddr,
        identity: Option<String>,
        tx: mpsc::Sender<Outbound>,
    ) -> Self {
        let now = Instant::now();
        Self {
            id,
            remote_addr,
            identity,
            connected_at: now,
            session: Mutex::new(None),
            room: RwLock::new(Room::default()),
            data: Mutex::new(HashMap::new()),
            state: Mutex::new(ConnectionState::Connecting),
            last_pong: Mutex::new(now),
            tx,
            cancel: CancellationToken::new(),
            writer: Mutex::new(None),
            lifecycle: ReentrantMutex::new(()),
            dropped_messages: AtomicU64::new(0),
        }
    }

    /// Connection ID.
    pub fn id(&self) -> &ConnectionId {
        &self.id
    }

    /// Remote address, after any proxy header override.
    pub fn remote_addr(&self) -> IpAddr {
        self.remote_addr
    }

    /// Identity the connection authenticated as, if any.
    pub fn identity(&self) -> Option<&str> {
        self.identity.as_deref()
    }

    /// Time since the connection was created.
    pub fn age(&self) -> Duration {
        self.connected_at.elapsed()
    }

    // ── Sending ─────────────────────────────────────────────────────

    /// Queue pre-serialized text without waiting.
    ///
    /// Fails when the connection is closing or its queue is full or closed.
    pub fn send_text(&self, text: Utf8Bytes) -> Result<()> {
        self.enqueue(Outbound::Text(text))
    }

    /// Serialize and queue a message.
    pub fn send_message(&self, message: &Message) -> Result<()> {
        let json = message.to_json().map_err(|e| self.send_failure(e.to_string()))?;
        self.send_text(json.into())
    }

    /// Queue a liveness probe.
    ///
    /// Returns `Ok(false)` when the queue is full and the probe was skipped;
    /// backpressure alone never marks the connection dead.
    pub fn probe(&self) -> Result<bool> {
        match self.enqueue(Outbound::Ping) {
            Ok(()) => Ok(true),
            Err(_) if !self.is_closing() && !self.tx.is_closed() => Ok(false),
            Err(e) => Err(e),
        }
    }

    fn enqueue(&self, frame: Outbound) -> Result<()> {
        if self.is_closing() {
            return Err(self.send_failure("connection closing".into()));
        }
        self.tx.try_send(frame).map_err(|e| {
            let _ = self.dropped_messages.fetch_add(1, Ordering::Relaxed);
            let reason = match e {
                TrySendError::Full(_) => "outbound queue full",
                TrySendError::Closed(_) => "outbound queue closed",
            };
            self.send_failure(reason.into())
        })
    }

    fn send_failure(&self, reason: String) -> HubError {
        HubError::SendFailure {
            connection_id: self.id.clone(),
            reason,
        }
    }

    /// Total messages that could not be queued.
    pub fn drop_count(&self) -> u64 {
        self.dropped_messages.load(Ordering::Relaxed)
    }

    // ── Liveness ────────────────────────────────────────────────────

    /// Record a liveness acknowledgment.
    pub fn mark_alive(&self) {
        *self.last_pong.lock() = Instant::now();
    }

    /// Time since the last acknowledgment (or creation).
    pub fn last_pong_elapsed(&self) -> Duration {
        self.last_pong.lock().elapsed()
    }

    // ── Lifecycle ───────────────────────────────────────────────────

    /// Current lifecycle state.
    pub fn state(&self) -> ConnectionState {
        *self.state.lock()
    }

    /// Whether teardown has started.
    pub fn is_closing(&self) -> bool {
        matches!(
            self.state(),
            ConnectionState::Closing | ConnectionState::Closed
        )
    }

    /// Token cancelled when the connection is torn down.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub(crate) fn lifecycle(&self) -> ReentrantMutexGuard<'_, ()> {
        self.lifecycle.lock()
    }

    pub(crate) fn mark_open(&self) {
        let mut state = self.state.lock();
        if *state == ConnectionState::Connecting {
            *state = ConnectionState::Open;
        }
    }

    /// Move to `Closing` and stop the connection's tasks.
    ///
    /// Returns `true` only for the call that started teardown.
    pub(crate) fn begin_close(&self) -> bool {
        let started = {
            let mut state = self.state.lock();
            match *state {
                ConnectionState::Connecting | ConnectionState::Open => {
                    *state = ConnectionState::Closing;
                    true
                }
                ConnectionState::Closing | ConnectionState::Closed => false,
            }
        };
        self.cancel.cancel();
        started
    }

    pub(crate) fn mark_closed(&self) {
        *self.state.lock() = ConnectionState::Closed;
    }

    pub(crate) fn attach_writer(&self, handle: JoinHandle<()>) {
        *self.writer.lock() = Some(handle);
    }

    pub(crate) fn take_writer(&self) -> Option<JoinHandle<()>> {
        self.writer.lock().take()
    }

    // ── Session / room ──────────────────────────────────────────────

    /// Cached name of the owning session.
    pub fn session(&self) -> Option<String> {
        self.session.lock().clone()
    }

    pub(crate) fn bind_session(&self, name: &str) {
        *self.session.lock() = Some(name.to_owned());
    }

    pub(crate) fn clear_session(&self) -> Option<String> {
        self.session.lock().take()
    }

    /// Current room tag.
    pub fn room(&self) -> Room {
        self.room.read().clone()
    }

    /// Whether the connection is in a room.
    pub fn in_room(&self) -> bool {
        self.room.read().is_set()
    }

    pub(crate) fn with_room<R>(&self, f: impl FnOnce(&Room) -> R) -> R {
        f(&self.room.read())
    }

    pub(crate) fn set_room(&self, room: Room) {
        *self.room.write() = room;
    }

    pub(crate) fn set_channel(&self, channel: &str) -> bool {
        let mut room = self.room.write();
        if !room.is_set() {
            return false;
        }
        channel.clone_into(&mut room.channel);
        true
    }

    // ── Key/value store ─────────────────────────────────────────────

    /// Store a value under `key`, replacing any previous one.
    pub fn set_data(&self, key: impl Into<String>, value: Value) {
        let _ = self.data.lock().insert(key.into(), value);
    }

    /// Value stored under `key`.
    pub fn get_data(&self, key: &str) -> Option<Value> {
        self.data.lock().get(key).cloned()
    }

    /// Remove and return the value under `key`.
    pub fn delete_data(&self, key: &str) -> Option<Value> {
        self.data.lock().remove(key)
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("remote_addr", &self.remote_addr)
            .field("identity", &self.identity)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}
