//! Chat events.
//!
//! An `Event` is built unsequenced and handed to `EventLog::append`, which
//! stamps it and freezes it behind an `Arc`.

use chrono::{DateTime, SecondsFormat, Utc};
use parley_protocol::WireEvent;

pub use parley_protocol::{EventKind, Identity};

/// A broadcast event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Event {
    /// Position in the global stream. Zero until appended.
    pub sequence: u64,
    /// Event kind.
    pub kind: EventKind,
    /// The identity the event is about.
    pub identity: Identity,
    /// Message text, only set for `EventKind::Message`.
    pub message: Option<String>,
    /// Wall-clock time of the append.
    pub timestamp: DateTime<Utc>,
}

impl Event {
    /// Create a new, unsequenced event.
    #[must_use]
    pub fn new(kind: EventKind, identity: Identity) -> Self {
        Self {
            sequence: 0,
            kind,
            identity,
            message: None,
            timestamp: Utc::now(),
        }
    }

    #[must_use]
    pub fn join(identity: Identity) -> Self {
        Self::new(EventKind::Join, identity)
    }

    #[must_use]
    pub fn part(identity: Identity) -> Self {
        Self::new(EventKind::Part, identity)
    }

    #[must_use]
    pub fn message(identity: Identity, text: impl Into<String>) -> Self {
        let mut event = Self::new(EventKind::Message, identity);
        event.message = Some(text.into());
        event
    }

    /// Nickname of the identity this event is about.
    #[must_use]
    pub fn nick_name(&self) -> &str {
        &self.identity.nick_name
    }

    /// Whether the event has been assigned a place in the log.
    #[must_use]
    pub fn is_sequenced(&self) -> bool {
        self.sequence > 0
    }

    /// Convert to the transport form, deriving the gravatar URL.
    #[must_use]
    pub fn to_wire(&self) -> WireEvent {
        WireEvent {
            sequence: self.sequence,
            kind: self.kind,
            nick_name: self.identity.nick_name.clone(),
            gravatar: self.identity.gravatar(),
            message: self.message.clone(),
            date_time: self.timestamp.to_rfc3339_opts(SecondsFormat::Millis, true),
        }
    }
}
