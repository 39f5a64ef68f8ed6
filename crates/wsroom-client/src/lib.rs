//! # wsroom-client
//!
//! Async client for wsroom servers: dial with an optional token, route
//! inbound events to callbacks or read them in order, emit events.

#![deny(unsafe_code)]

pub mod client;
pub mod errors;

pub use client::{Client, DEFAULT_TOKEN_PARAM};
pub use errors::{ClientError, Result};
pub use wsroom_core::Message;
