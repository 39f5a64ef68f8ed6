//! Room tags attached to connections.

use serde::{Deserialize, Serialize};

/// Two-level topic tag. The default (empty name) means "not in a room".
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Room {
    /// Room name; empty when not in a room.
    pub name: String,
    /// Channel within the room; empty when none.
    pub channel: String,
}

impl Room {
    /// A room with no channel.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            channel: String::new(),
        }
    }

    /// A room and channel.
    pub fn with_channel(name: impl Into<String>, channel: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            channel: channel.into(),
        }
    }

    /// Whether this tag places the connection in a room.
    pub fn is_set(&self) -> bool {
        !self.name.is_empty()
    }

    /// Whether the tag is in `room`. An empty `room` matches nothing.
    pub fn matches(&self, room: &str) -> bool {
        self.is_set() && self.name == room
    }

    /// Whether the tag is in `room` on exactly `channel`.
    pub fn matches_channel(&self, room: &str, channel: &str) -> bool {
        self.matches(room) && self.channel == channel
    }
}
