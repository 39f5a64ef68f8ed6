//! # wsroom-server
//!
//! WebSocket pub/sub registry served over Axum.
//!
//! - Connection registry with per-identity sessions
//! - Room/channel tags and filtered broadcast
//! - Event dispatch to registered handlers, with protected events
//! - Ping/pong heartbeat and per-frame write deadlines
//! - Health and Prometheus endpoints, graceful shutdown

#![deny(unsafe_code)]

pub mod config;
pub mod errors;
pub mod events;
pub mod health;
pub mod hooks;
pub mod metrics;
pub mod registry;
pub mod server;
pub mod shutdown;
pub mod websocket;

pub use config::ServerConfig;
pub use errors::{HubError, Result};
pub use events::{
    Context, DispatchOutcome, EventHandler, EventTable, HandlerError, HandlerResult, handler_fn,
};
pub use hooks::{ConnectionHooks, NoopHooks};
pub use registry::{Registry, RegistryBuilder, Room, SendReport, Session, UpgradeInfo};
pub use server::WsroomServer;
pub use websocket::connection::{Connection, ConnectionState};
pub use wsroom_core::{ConnectionId, Message};
