//! Connection and session registry.
//!
//! A single [`parking_lot::RwLock`] guards both the connection map and the
//! session map. The lock is never held across an `.await`, a handler call or
//! a hook callback. Broadcasts snapshot their targets under the read lock,
//! release it, then queue the serialized message on each target without
//! waiting, so one slow peer cannot stall a fan-out.
//!
//! Each connection also carries a lifecycle gate held across `on_connect`
//! and teardown, so a close racing registration fires `on_close` strictly
//! after `on_connect`.

mod room;
mod session;

use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::Utf8Bytes;
use metrics::{counter, gauge, histogram};
use parking_lot::RwLock;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use wsroom_auth::{AuthError, TokenVerifier};
use wsroom_core::{ConnectionId, Message};

pub use room::Room;
pub use session::Session;

use crate::config::ServerConfig;
use crate::errors::{HubError, Result};
use crate::events::{Context, EventTable};
use crate::hooks::{ConnectionHooks, NoopHooks};
use crate::metrics::{
    WS_CONNECTION_DURATION_SECONDS, WS_CONNECTIONS_ACTIVE, WS_CONNECTIONS_TOTAL,
    WS_DISCONNECTIONS_TOTAL, WS_SEND_FAILURES_TOTAL, WS_SESSIONS_ACTIVE,
};
use crate::shutdown::ShutdownCoordinator;
use crate::websocket::connection::{Connection, Outbound};
use crate::websocket::heartbeat::{HeartbeatResult, run_heartbeat};

/// What the upgrade path learned about a new connection.
#[derive(Clone, Debug)]
pub struct UpgradeInfo {
    /// Remote address after any proxy header override.
    pub remote_addr: IpAddr,
    /// Authenticated identity, absent for anonymous connections.
    pub identity: Option<String>,
}

/// Outcome of a fan-out send.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SendReport {
    /// Connections selected by the filter.
    pub recipients: usize,
    /// Connections the message was queued for.
    pub delivered: usize,
    /// Connections the message could not be queued for.
    pub failed: Vec<ConnectionId>,
}

impl SendReport {
    /// Whether every recipient received the message.
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }
}

#[derive(Default)]
struct State {
    connections: HashMap<ConnectionId, Arc<Connection>>,
    sessions: HashMap<String, Session>,
}

impl State {
    fn connection(&self, id: &ConnectionId) -> Result<Arc<Connection>> {
        self.connections
            .get(id)
            .cloned()
            .ok_or_else(|| HubError::ConnectionNotFound(id.clone()))
    }

    /// Drop `conn` from its current session, deleting the session if emptied.
    fn unbind(&mut self, conn: &Connection) {
        let Some(name) = conn.clear_session() else {
            return;
        };
        if let Some(session) = self.sessions.get_mut(&name) {
            let _ = session.remove(conn.id());
            if session.is_empty() {
                let _ = self.sessions.remove(&name);
                gauge!(WS_SESSIONS_ACTIVE).decrement(1.0);
                debug!(session = %name, "session removed");
            }
        }
    }

    /// Bind `conn` to `name`, creating the session when `create` is set.
    fn bind(&mut self, name: &str, conn: &Connection, create: bool) -> Result<()> {
        match (self.sessions.contains_key(name), create) {
            (true, true) => return Err(HubError::SessionConflict(name.to_owned())),
            (false, false) => return Err(HubError::SessionNotFound(name.to_owned())),
            _ => {}
        }
        if conn.session().as_deref() != Some(name) {
            self.unbind(conn);
        }
        if let Some(session) = self.sessions.get_mut(name) {
            let _ = session.insert(conn.id().clone());
        } else {
            let _ = self
                .sessions
                .insert(name.to_owned(), Session::new(name, conn.id().clone()));
            gauge!(WS_SESSIONS_ACTIVE).increment(1.0);
            debug!(session = name, "session created");
        }
        conn.bind_session(name);
        Ok(())
    }
}

struct RegistryInner {
    config: ServerConfig,
    state: RwLock<State>,
    events: EventTable,
    hooks: Arc<dyn ConnectionHooks>,
    verifier: Option<Arc<dyn TokenVerifier>>,
    shutdown: ShutdownCoordinator,
}

/// Concurrency-safe owner of all connections and sessions.
///
/// Cheap to clone; clones share state.
#[derive(Clone)]
pub struct Registry {
    inner: Arc<RegistryInner>,
}

/// Builder for [`Registry`].
pub struct RegistryBuilder {
    config: ServerConfig,
    hooks: Arc<dyn ConnectionHooks>,
    verifier: Option<Arc<dyn TokenVerifier>>,
}

impl RegistryBuilder {
    /// Verify upgrade tokens with `verifier`.
    #[must_use]
    pub fn verifier(mut self, verifier: Arc<dyn TokenVerifier>) -> Self {
        self.verifier = Some(verifier);
        self
    }

    /// Fire `hooks` on connection open and close.
    #[must_use]
    pub fn hooks(mut self, hooks: Arc<dyn ConnectionHooks>) -> Self {
        self.hooks = hooks;
        self
    }

    /// Build the registry.
    pub fn build(self) -> Registry {
        Registry {
            inner: Arc::new(RegistryInner {
                config: self.config,
                state: RwLock::new(State::default()),
                events: EventTable::new(),
                hooks: self.hooks,
                verifier: self.verifier,
                shutdown: ShutdownCoordinator::new(),
            }),
        }
    }
}

impl Registry {
    /// Start building a registry with `config`.
    pub fn builder(config: ServerConfig) -> RegistryBuilder {
        RegistryBuilder {
            config,
            hooks: Arc::new(NoopHooks),
            verifier: None,
        }
    }

    /// Runtime configuration.
    pub fn config(&self) -> &ServerConfig {
        &self.inner.config
    }

    /// The event dispatch table.
    pub fn events(&self) -> &EventTable {
        &self.inner.events
    }

    /// Whether shutdown has begun.
    pub fn is_shutting_down(&self) -> bool {
        self.inner.shutdown.is_shutting_down()
    }

    /// Token cancelled when shutdown begins.
    pub fn shutdown_token(&self) -> tokio_util::sync::CancellationToken {
        self.inner.shutdown.token()
    }

    // ── Authentication ──────────────────────────────────────────────

    /// Verify a raw upgrade token.
    ///
    /// Missing and placeholder tokens are rejected before the verifier runs.
    pub fn authenticate(&self, token: Option<&str>) -> std::result::Result<String, AuthError> {
        match &self.inner.verifier {
            Some(verifier) => wsroom_auth::authenticate(verifier.as_ref(), token),
            None if token.is_none_or(wsroom_auth::is_placeholder) => Err(AuthError::MissingToken),
            None => Err(AuthError::NotConfigured),
        }
    }

    // ── Lifecycle ───────────────────────────────────────────────────

    /// Register a new connection writing into `tx`.
    ///
    /// Mints the ID, inserts the connection (binding it to its session when
    /// auto-binding is enabled), marks it open, fires `on_connect` and
    /// starts its heartbeat.
    pub fn register(&self, info: UpgradeInfo, tx: mpsc::Sender<Outbound>) -> Result<Arc<Connection>> {
        if self.is_shutting_down() {
            return Err(HubError::Upgrade("registry is shutting down".into()));
        }

        let conn = Arc::new(Connection::new(
            ConnectionId::new(),
            info.remote_addr,
            info.identity,
            tx,
        ));

        let opening = conn.lifecycle();
        {
            let mut state = self.inner.state.write();
            // Ordered against `shutdown`, which flips the flag under this lock.
            if self.is_shutting_down() {
                return Err(HubError::Upgrade("registry is shutting down".into()));
            }
            if let Some(identity) = conn.identity().filter(|_| self.inner.config.auto_session) {
                let create = !state.sessions.contains_key(identity);
                state.bind(identity, &conn, create)?;
            }
            let _ = state.connections.insert(conn.id().clone(), conn.clone());
            conn.mark_open();
        }

        info!(
            connection_id = %conn.id(),
            remote_addr = %conn.remote_addr(),
            identity = conn.identity().unwrap_or("-"),
            "connection opened"
        );
        counter!(WS_CONNECTIONS_TOTAL).increment(1);
        gauge!(WS_CONNECTIONS_ACTIVE).increment(1.0);

        self.inner
            .hooks
            .on_connect(&Context::new(conn.clone(), self.clone()));
        drop(opening);
        self.spawn_heartbeat(&conn);
        Ok(conn)
    }

    fn spawn_heartbeat(&self, conn: &Arc<Connection>) {
        let registry = self.clone();
        let conn = conn.clone();
        let ping_period = self.inner.config.ping_period;
        let pong_wait = self.inner.config.pong_wait;
        let _ = tokio::spawn(async move {
            let result = run_heartbeat(conn.clone(), ping_period, pong_wait, conn.cancel_token()).await;
            match result {
                HeartbeatResult::Cancelled => {}
                HeartbeatResult::TimedOut | HeartbeatResult::ProbeFailed => {
                    warn!(connection_id = %conn.id(), ?result, "heartbeat failed, closing connection");
                    let _ = registry.remove_connection(conn.id());
                }
            }
        });
    }

    /// Tear down a connection.
    ///
    /// Removes it from its session (deleting the session if emptied) and the
    /// connection map, stops its tasks and fires `on_close`. Only the first
    /// call for an ID does anything; later calls return `false`.
    pub fn remove_connection(&self, id: &ConnectionId) -> bool {
        let conn = {
            let mut state = self.inner.state.write();
            let Some(conn) = state.connections.remove(id) else {
                return false;
            };
            if let Some(name) = conn.session() {
                if let Some(session) = state.sessions.get_mut(&name) {
                    let _ = session.remove(id);
                    if session.is_empty() {
                        let _ = state.sessions.remove(&name);
                        gauge!(WS_SESSIONS_ACTIVE).decrement(1.0);
                        debug!(session = %name, "session removed");
                    }
                }
            }
            conn
        };

        let _closing = conn.lifecycle();
        let _ = conn.begin_close();
        info!(
            connection_id = %id,
            age_ms = u64::try_from(conn.age().as_millis()).unwrap_or(u64::MAX),
            "connection closed"
        );
        counter!(WS_DISCONNECTIONS_TOTAL).increment(1);
        gauge!(WS_CONNECTIONS_ACTIVE).decrement(1.0);
        histogram!(WS_CONNECTION_DURATION_SECONDS).record(conn.age().as_secs_f64());

        self.inner
            .hooks
            .on_close(&Context::new(conn.clone(), self.clone()));
        let _ = conn.clear_session();
        conn.mark_closed();
        true
    }

    /// Close a connection on behalf of application code.
    pub fn close_connection(&self, id: &ConnectionId) -> Result<()> {
        if self.remove_connection(id) {
            Ok(())
        } else {
            Err(HubError::ConnectionNotFound(id.clone()))
        }
    }

    /// Stop accepting, close every connection and wait up to `deadline`
    /// for their writers to flush the close frame.
    ///
    /// Returns `false` if the deadline passed first.
    pub async fn shutdown(&self, deadline: Duration) -> bool {
        let connections: Vec<Arc<Connection>> = {
            let state = self.inner.state.write();
            self.inner.shutdown.shutdown();
            state.connections.values().cloned().collect()
        };
        info!(connections = connections.len(), "closing all connections");

        let writers: Vec<JoinHandle<()>> = connections
            .iter()
            .filter_map(|conn| {
                let writer = conn.take_writer();
                let _ = self.remove_connection(conn.id());
                writer
            })
            .collect();

        self.inner
            .shutdown
            .graceful_shutdown(writers, deadline)
            .await
    }

    // ── Sessions ────────────────────────────────────────────────────

    /// Create a session named `identity` holding `id`.
    ///
    /// A connection bound elsewhere is moved; its previous session is
    /// removed if that leaves it empty.
    pub fn add_session(&self, identity: &str, id: &ConnectionId) -> Result<()> {
        let mut state = self.inner.state.write();
        let conn = state.connection(id)?;
        state.bind(identity, &conn, true)
    }

    /// Bind `id` to the existing session `identity`.
    pub fn update_session(&self, identity: &str, id: &ConnectionId) -> Result<()> {
        let mut state = self.inner.state.write();
        if !state.sessions.contains_key(identity) {
            return Err(HubError::SessionNotFound(identity.to_owned()));
        }
        let conn = state.connection(id)?;
        state.bind(identity, &conn, false)
    }

    /// Remove the session `identity`. Its connections stay open, unbound.
    pub fn delete_session(&self, identity: &str) -> Result<()> {
        let mut state = self.inner.state.write();
        let session = state
            .sessions
            .remove(identity)
            .ok_or_else(|| HubError::SessionNotFound(identity.to_owned()))?;
        gauge!(WS_SESSIONS_ACTIVE).decrement(1.0);
        for id in session.connections() {
            if let Some(conn) = state.connections.get(id) {
                if conn.session().as_deref() == Some(identity) {
                    let _ = conn.clear_session();
                }
            }
        }
        debug!(session = identity, "session deleted");
        Ok(())
    }

    /// Whether a session named `identity` exists.
    pub fn check_if_session_exists(&self, identity: &str) -> bool {
        self.inner.state.read().sessions.contains_key(identity)
    }

    /// Connections bound to `identity`, in ID order. Empty if absent.
    pub fn session_connections(&self, identity: &str) -> Vec<ConnectionId> {
        self.inner
            .state
            .read()
            .sessions
            .get(identity)
            .map(|s| s.connections().cloned().collect())
            .unwrap_or_default()
    }

    /// Number of connections bound to `identity`.
    pub fn session_len(&self, identity: &str) -> usize {
        self.inner
            .state
            .read()
            .sessions
            .get(identity)
            .map_or(0, Session::len)
    }

    /// Number of live sessions.
    pub fn session_count(&self) -> usize {
        self.inner.state.read().sessions.len()
    }

    // ── Connections ─────────────────────────────────────────────────

    /// Look up a live connection.
    pub fn connection(&self, id: &ConnectionId) -> Option<Arc<Connection>> {
        self.inner.state.read().connections.get(id).cloned()
    }

    fn require(&self, id: &ConnectionId) -> Result<Arc<Connection>> {
        self.inner.state.read().connection(id)
    }

    /// Number of live connections.
    pub fn connection_count(&self) -> usize {
        self.inner.state.read().connections.len()
    }

    // ── Rooms ───────────────────────────────────────────────────────

    /// Put `id` in `room`, clearing its channel.
    pub fn join_room(&self, id: &ConnectionId, room: &str) -> Result<()> {
        self.require(id)?.set_room(Room::new(room));
        Ok(())
    }

    /// Set the channel of `id` within its current room.
    pub fn join_room_channel(&self, id: &ConnectionId, channel: &str) -> Result<()> {
        if self.require(id)?.set_channel(channel) {
            Ok(())
        } else {
            Err(HubError::NotInRoom(id.clone()))
        }
    }

    /// Take `id` out of its room.
    pub fn leave_room(&self, id: &ConnectionId) -> Result<()> {
        self.require(id)?.set_room(Room::default());
        Ok(())
    }

    /// Whether `id` is in a room.
    pub fn user_in_a_room(&self, id: &ConnectionId) -> Result<bool> {
        Ok(self.require(id)?.in_room())
    }

    /// Room of `id`, looked up through the session `identity`.
    ///
    /// Empty when the connection is not in a room.
    pub fn get_user_room(&self, identity: &str, id: &ConnectionId) -> Result<String> {
        Ok(self.session_member(identity, id)?.room().name)
    }

    /// Channel of `id`, looked up through the session `identity`.
    pub fn get_user_room_channel(&self, identity: &str, id: &ConnectionId) -> Result<String> {
        Ok(self.session_member(identity, id)?.room().channel)
    }

    fn session_member(&self, identity: &str, id: &ConnectionId) -> Result<Arc<Connection>> {
        let state = self.inner.state.read();
        let session = state
            .sessions
            .get(identity)
            .ok_or_else(|| HubError::SessionNotFound(identity.to_owned()))?;
        if !session.contains(id) {
            return Err(HubError::ConnectionNotFound(id.clone()));
        }
        state.connection(id)
    }

    /// Connections currently in `room`, in ID order.
    pub fn room_members(&self, room: &str) -> Vec<ConnectionId> {
        let mut ids: Vec<ConnectionId> = self
            .inner
            .state
            .read()
            .connections
            .values()
            .filter(|c| c.with_room(|r| r.matches(room)))
            .map(|c| c.id().clone())
            .collect();
        ids.sort();
        ids
    }

    // ── Sending ─────────────────────────────────────────────────────

    /// Send to one connection.
    pub fn emit(&self, id: &ConnectionId, message: &Message) -> Result<()> {
        let result = self.require(id)?.send_message(message);
        if let Err(err) = &result {
            counter!(WS_SEND_FAILURES_TOTAL).increment(1);
            warn!(connection_id = %id, event = %message.event_name, error = %err, "emit failed");
        }
        result
    }

    /// Send to every connection of the session `identity`.
    pub fn emit_to_session(&self, identity: &str, message: &Message) -> Result<SendReport> {
        let targets: Vec<Arc<Connection>> = {
            let state = self.inner.state.read();
            let session = state
                .sessions
                .get(identity)
                .ok_or_else(|| HubError::SessionNotFound(identity.to_owned()))?;
            session
                .connections()
                .filter_map(|id| state.connections.get(id).cloned())
                .collect()
        };
        Ok(self.send_all(&targets, message))
    }

    /// Send to every live connection.
    pub fn broadcast(&self, message: &Message) -> SendReport {
        self.fan_out(message, None, |_| true)
    }

    /// Send to every connection in `room` except `exclude`.
    pub fn broadcast_to_room(
        &self,
        room: &str,
        message: &Message,
        exclude: Option<&ConnectionId>,
    ) -> SendReport {
        self.fan_out(message, exclude, |r| r.matches(room))
    }

    /// Send to every connection on `channel` of `room` except `exclude`.
    pub fn broadcast_to_room_channel(
        &self,
        room: &str,
        channel: &str,
        message: &Message,
        exclude: Option<&ConnectionId>,
    ) -> SendReport {
        self.fan_out(message, exclude, |r| r.matches_channel(room, channel))
    }

    fn fan_out(
        &self,
        message: &Message,
        exclude: Option<&ConnectionId>,
        filter: impl Fn(&Room) -> bool,
    ) -> SendReport {
        let targets: Vec<Arc<Connection>> = self
            .inner
            .state
            .read()
            .connections
            .values()
            .filter(|c| Some(c.id()) != exclude && c.with_room(&filter))
            .cloned()
            .collect();
        self.send_all(&targets, message)
    }

    fn send_all(&self, targets: &[Arc<Connection>], message: &Message) -> SendReport {
        let mut report = SendReport {
            recipients: targets.len(),
            ..SendReport::default()
        };
        let payload: Utf8Bytes = match message.to_json() {
            Ok(json) => json.into(),
            Err(e) => {
                warn!(event = %message.event_name, error = %e, "failed to serialize message");
                report.failed = targets.iter().map(|c| c.id().clone()).collect();
                return report;
            }
        };

        for conn in targets {
            match conn.send_text(payload.clone()) {
                Ok(()) => report.delivered += 1,
                Err(err) => {
                    counter!(WS_SEND_FAILURES_TOTAL).increment(1);
                    warn!(connection_id = %conn.id(), event = %message.event_name, error = %err, "failed to send to connection");
                    report.failed.push(conn.id().clone());
                }
            }
        }
        debug!(
            event = %message.event_name,
            recipients = report.recipients,
            delivered = report.delivered,
            "fan-out complete"
        );
        report
    }
}

impl std::fmt::Debug for Registry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registry")
            .field("connections", &self.connection_count())
            .field("sessions", &self.session_count())
            .finish_non_exhaustive()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
