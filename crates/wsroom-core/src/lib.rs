//! # wsroom-core
//!
//! Foundation types shared by every wsroom crate.
//!
//! - **Connection IDs**: [`ConnectionId`], a time-ordered newtype over `String`
//! - **Wire messages**: [`Message`], the `{ "eventName", "data" }` envelope with a raw payload
//! - **Logging**: [`logging::init_subscriber`] for the `tracing` subscriber

#![deny(unsafe_code)]

pub mod ids;
pub mod logging;
pub mod message;

pub use ids::ConnectionId;
pub use message::Message;
