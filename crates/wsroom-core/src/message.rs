//! Wire envelope exchanged with clients.
//!
//! Both directions use the same JSON shape:
//!
//! ```json
//! { "eventName": "room.message", "data": { "text": "hi" } }
//! ```
//!
//! The `data` field is kept as an undecoded [`RawValue`]. Routing code only
//! looks at `eventName`; each handler decodes the payload into its own type
//! with [`Message::decode`].

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::value::RawValue;

/// A named event with an opaque JSON payload.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    /// Event name used for dispatch.
    pub event_name: String,
    /// Raw payload; `None` when absent or `null`.
    #[serde(default)]
    pub data: Option<Box<RawValue>>,
}

impl Message {
    /// Create a message without payload.
    #[must_use]
    pub fn new(event_name: impl Into<String>) -> Self {
        Self {
            event_name: event_name.into(),
            data: None,
        }
    }

    /// Create a message carrying `data` serialized as JSON.
    pub fn with_data<T: Serialize + ?Sized>(
        event_name: impl Into<String>,
        data: &T,
    ) -> serde_json::Result<Self> {
        Ok(Self {
            event_name: event_name.into(),
            data: Some(serde_json::value::to_raw_value(data)?),
        })
    }

    /// Parse an inbound text frame.
    pub fn parse(text: &str) -> serde_json::Result<Self> {
        serde_json::from_str(text)
    }

    /// Serialize for an outbound text frame.
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }

    /// Decode the payload into `T`. A missing payload decodes from `null`.
    pub fn decode<T: DeserializeOwned>(&self) -> serde_json::Result<T> {
        match &self.data {
            Some(raw) => serde_json::from_str(raw.get()),
            None => serde_json::from_str("null"),
        }
    }

    /// Raw JSON text of the payload, if any.
    pub fn raw_data(&self) -> Option<&str> {
        self.data.as_deref().map(RawValue::get)
    }
}
