//! Event types as they travel over the wire.
//!
//! The field names are the ones the browser client reads, so they stay in
//! camelCase regardless of Rust naming.

use serde::{Deserialize, Serialize};
use std::fmt;

/// The kind of a broadcast event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventKind {
    /// An identity was seen for the first time.
    Join,
    /// An identity timed out and was evicted from presence.
    Part,
    /// A chat message.
    Message,
}

impl EventKind {
    /// Lowercase name, as used on the wire and in metric labels.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::Join => "join",
            EventKind::Part => "part",
            EventKind::Message => "message",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A sequenced event in transport form.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WireEvent {
    /// Position in the global event stream, starting at 1.
    pub sequence: u64,
    /// Event kind.
    #[serde(rename = "type")]
    pub kind: EventKind,
    /// Nickname of the identity the event is about.
    pub nick_name: String,
    /// Avatar URL, `null` when the identity carried no email.
    pub gravatar: Option<String>,
    /// Message text, only present on `message` events.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// RFC 3339 UTC timestamp of the append.
    pub date_time: String,
}

/// A present identity, as listed by `/users`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WireUser {
    /// Nickname.
    pub nick_name: String,
    /// Avatar URL, `null` when unknown.
    pub gravatar: Option<String>,
}
