//! WebSocket transport: per-connection state, heartbeat, upgrade and the
//! reader/writer tasks.

pub mod connection;
pub mod handler;
pub mod heartbeat;
pub mod session;
pub mod upgrade;
