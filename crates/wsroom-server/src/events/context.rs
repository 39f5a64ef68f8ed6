//! Per-message handler context.

use std::net::IpAddr;
use std::sync::Arc;

use wsroom_core::{ConnectionId, Message};

use crate::errors::{HubError, Result};
use crate::registry::{Registry, SendReport};
use crate::websocket::connection::Connection;

/// What a handler sees: the originating connection and the registry.
#[derive(Clone)]
pub struct Context {
    connection: Arc<Connection>,
    registry: Registry,
}

impl Context {
    /// Context for `connection` within `registry`.
    pub fn new(connection: Arc<Connection>, registry: Registry) -> Self {
        Self {
            connection,
            registry,
        }
    }

    /// The originating connection.
    pub fn connection(&self) -> &Arc<Connection> {
        &self.connection
    }

    /// The owning registry.
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Originating connection ID.
    pub fn id(&self) -> &ConnectionId {
        self.connection.id()
    }

    /// Remote address of the originating connection.
    pub fn remote_addr(&self) -> IpAddr {
        self.connection.remote_addr()
    }

    /// Authenticated identity, if any.
    pub fn identity(&self) -> Option<&str> {
        self.connection.identity()
    }

    /// Cached name of the connection's session.
    pub fn session(&self) -> Option<String> {
        self.connection.session()
    }

    /// Whether the connection's session exists with at least one connection.
    pub fn has_session(&self) -> bool {
        self.connection
            .session()
            .is_some_and(|name| self.registry.session_len(&name) > 0)
    }

    /// Send to the originating connection.
    pub fn emit(&self, message: &Message) -> Result<()> {
        self.connection.send_message(message)
    }

    /// Send to every connection of the originating connection's session.
    pub fn emit_to_session(&self, message: &Message) -> Result<SendReport> {
        let name = self
            .connection
            .session()
            .ok_or_else(|| HubError::SessionNotFound(self.identity().unwrap_or_default().into()))?;
        self.registry.emit_to_session(&name, message)
    }
}

impl std::fmt::Debug for Context {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Context")
            .field("connection", &self.connection)
            .finish_non_exhaustive()
    }
}
