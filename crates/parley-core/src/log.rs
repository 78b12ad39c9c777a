//! Append-only, sequenced event log.
//!
//! The log hands out sequence numbers, keeps the backlog that clients resume
//! from, and publishes every appended event on a broadcast channel that
//! parked polls subscribe to.

use crate::event::Event;
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, trace};

/// Default capacity of the append notification channel.
const DEFAULT_NOTIFY_CAPACITY: usize = 1024;

/// Event log configuration.
#[derive(Debug, Clone)]
pub struct EventLogConfig {
    /// Maximum number of retained events. `None` keeps everything.
    pub max_events: Option<usize>,
    /// Capacity of the append notification channel.
    pub notify_capacity: usize,
}

impl Default for EventLogConfig {
    fn default() -> Self {
        Self {
            max_events: None,
            notify_capacity: DEFAULT_NOTIFY_CAPACITY,
        }
    }
}

/// The global event stream.
#[derive(Debug)]
pub struct EventLog {
    /// Retained events, ascending by sequence.
    events: VecDeque<Arc<Event>>,
    /// Highest sequence handed out so far.
    last_sequence: u64,
    /// Append notifications.
    sender: broadcast::Sender<Arc<Event>>,
    config: EventLogConfig,
}

impl EventLog {
    /// Create an unbounded event log.
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(EventLogConfig::default())
    }

    /// Create an event log with custom configuration.
    #[must_use]
    pub fn with_config(config: EventLogConfig) -> Self {
        let (sender, _) = broadcast::channel(config.notify_capacity.max(1));
        Self {
            events: VecDeque::new(),
            last_sequence: 0,
            sender,
            config,
        }
    }

    /// Append an event, assigning it the next sequence number.
    ///
    /// Every current subscriber is notified with the sequenced event.
    /// Returns the assigned sequence.
    pub fn append(&mut self, mut event: Event) -> u64 {
        debug_assert!(!event.is_sequenced(), "event appended twice");

        self.last_sequence += 1;
        event.sequence = self.last_sequence;
        event.timestamp = chrono::Utc::now();

        let event = Arc::new(event);
        self.events.push_back(Arc::clone(&event));
        self.enforce_retention();

        let sequence = event.sequence;
        let kind = event.kind;
        let receivers = self.sender.send(event).unwrap_or_default();
        trace!(sequence, kind = %kind, receivers, "Appended event");

        sequence
    }

    /// All retained events with `sequence > after`, in ascending order.
    #[must_use]
    pub fn since(&self, after: u64) -> Vec<Arc<Event>> {
        let start = self.events.partition_point(|e| e.sequence <= after);
        self.events.range(start..).cloned().collect()
    }

    /// The oldest retained event with `sequence > after`.
    #[must_use]
    pub fn first_after(&self, after: u64) -> Option<Arc<Event>> {
        let start = self.events.partition_point(|e| e.sequence <= after);
        self.events.get(start).cloned()
    }

    /// Subscribe to append notifications.
    ///
    /// The receiver sees every event appended after this call.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<Arc<Event>> {
        self.sender.subscribe()
    }

    /// Highest sequence assigned so far, 0 if nothing was appended.
    #[must_use]
    pub fn last_sequence(&self) -> u64 {
        self.last_sequence
    }

    /// Number of retained events.
    #[must_use]
    pub fn len(&self) -> usize {
        self.events.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    fn enforce_retention(&mut self) {
        let Some(max) = self.config.max_events else {
            return;
        };
        let excess = self.events.len().saturating_sub(max);
        if excess > 0 {
            self.events.drain(..excess);
            debug!(dropped = excess, retained = self.events.len(), "Trimmed event log");
        }
    }
}

impl Default for EventLog {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::{EventKind, Identity};

    fn alice() -> Identity {
        Identity::new("alice", "a@x")
    }

    #[test]
    fn test_sequences_start_at_one() {
        let mut log = EventLog::new();
        assert_eq!(log.last_sequence(), 0);
        assert!(log.is_empty());

        assert_eq!(log.append(Event::join(alice())), 1);
        assert_eq!(log.append(Event::message(alice(), "hi")), 2);
        assert_eq!(log.last_sequence(), 2);
        assert_eq!(log.len(), 2);
    }

    #[test]
    fn test_since_zero_returns_everything_in_order() {
        let mut log = EventLog::new();
        for i in 0..10 {
            log.append(Event::message(alice(), format!("m{i}")));
        }

        let all = log.since(0);
        let sequences: Vec<u64> = all.iter().map(|e| e.sequence).collect();
        assert_eq!(sequences, (1..=10).collect::<Vec<_>>());
        assert_eq!(all[0].message.as_deref(), Some("m0"));
        assert_eq!(all[9].message.as_deref(), Some("m9"));
    }

    #[test]
    fn test_since_every_cursor() {
        let mut log = EventLog::new();
        let n = 6;
        for _ in 0..n {
            log.append(Event::join(alice()));
        }

        for k in 0..=n {
            let tail = log.since(k);
            assert_eq!(tail.len() as u64, n - k);
            assert!(tail.iter().all(|e| e.sequence > k));
            assert!(tail.windows(2).all(|w| w[0].sequence < w[1].sequence));
        }

        // A cursor past the end is just empty.
        assert!(log.since(n + 5).is_empty());
    }

    #[test]
    fn test_since_is_pure() {
        let mut log = EventLog::new();
        log.append(Event::join(alice()));
        let _ = log.since(0);
        let _ = log.since(0);
        assert_eq!(log.len(), 1);
        assert_eq!(log.last_sequence(), 1);
    }

    #[tokio::test]
    async fn test_append_notifies_subscribers() {
        let mut log = EventLog::new();
        log.append(Event::join(alice()));

        let mut rx1 = log.subscribe();
        let mut rx2 = log.subscribe();
        log.append(Event::message(alice(), "hi"));

        let e1 = rx1.recv().await.unwrap();
        let e2 = rx2.recv().await.unwrap();
        assert_eq!(e1.sequence, 2);
        assert_eq!(e1.kind, EventKind::Message);
        assert!(Arc::ptr_eq(&e1, &e2));
    }

    #[test]
    fn test_retention_cap_keeps_sequences() {
        let mut log = EventLog::with_config(EventLogConfig {
            max_events: Some(3),
            ..Default::default()
        });
        for _ in 0..5 {
            log.append(Event::join(alice()));
        }

        assert_eq!(log.len(), 3);
        assert_eq!(log.last_sequence(), 5);
        let sequences: Vec<u64> = log.since(0).iter().map(|e| e.sequence).collect();
        assert_eq!(sequences, vec![3, 4, 5]);
        assert_eq!(log.since(4).len(), 1);
        assert_eq!(log.first_after(0).map(|e| e.sequence), Some(3));
        assert_eq!(log.first_after(3).map(|e| e.sequence), Some(4));
        assert!(log.first_after(5).is_none());
    }
}
