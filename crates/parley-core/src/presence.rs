//! Presence tracking for Parley.
//!
//! Clients hold no connection, so presence is inferred from recency: every
//! join or poll refreshes an identity's `last_seen`, and a periodic sweep
//! evicts identities that went quiet for longer than their poll mode allows.
//! First sight emits a `join` event and eviction emits a `part` event, both
//! through the event log.

use crate::event::{Event, Identity};
use crate::log::EventLog;
use std::collections::HashMap;
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

/// Default timeout for an identity doing ordinary polls.
pub const DEFAULT_SHORT_TIMEOUT: Duration = Duration::from_secs(60);

/// Default timeout for an identity whose poll is parked.
pub const DEFAULT_LONG_TIMEOUT: Duration = Duration::from_secs(600);

/// How an identity is currently polling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PollMode {
    /// Ordinary request/response activity.
    Short,
    /// A poll is parked on the server waiting for the next event.
    Long,
}

/// Presence timeouts.
#[derive(Debug, Clone)]
pub struct PresenceConfig {
    pub short_timeout: Duration,
    pub long_timeout: Duration,
}

impl PresenceConfig {
    /// Timeout applied to a record in the given mode.
    #[must_use]
    pub fn timeout(&self, mode: PollMode) -> Duration {
        match mode {
            PollMode::Short => self.short_timeout,
            PollMode::Long => self.long_timeout,
        }
    }
}

impl Default for PresenceConfig {
    fn default() -> Self {
        Self {
            short_timeout: DEFAULT_SHORT_TIMEOUT,
            long_timeout: DEFAULT_LONG_TIMEOUT,
        }
    }
}

/// Presence state for a single identity.
#[derive(Debug, Clone)]
pub struct PresenceRecord {
    /// Identity, keyed by nickname.
    pub identity: Identity,
    /// When the identity was first seen.
    pub joined_at: Instant,
    /// Last join or poll.
    pub last_seen: Instant,
    /// Current poll mode.
    pub poll_mode: PollMode,
}

impl PresenceRecord {
    fn new(identity: Identity, poll_mode: PollMode, now: Instant) -> Self {
        Self {
            identity,
            joined_at: now,
            last_seen: now,
            poll_mode,
        }
    }

    /// Whether the record has been quiet for longer than its mode allows.
    #[must_use]
    pub fn is_stale(&self, now: Instant, config: &PresenceConfig) -> bool {
        now.saturating_duration_since(self.last_seen) > config.timeout(self.poll_mode)
    }
}

/// Registry of present identities.
#[derive(Debug, Default)]
pub struct PresenceRegistry {
    /// Map of nickname to presence record.
    records: HashMap<String, PresenceRecord>,
    config: PresenceConfig,
}

impl PresenceRegistry {
    /// Create a registry with default timeouts.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a registry with custom timeouts.
    #[must_use]
    pub fn with_config(config: PresenceConfig) -> Self {
        Self {
            records: HashMap::new(),
            config,
        }
    }

    /// Record activity for an identity.
    ///
    /// On first sight a record is created and a `join` event appended to
    /// `log`. Otherwise `last_seen` is refreshed and, when `poll_mode` is
    /// given, the mode updated; no event is emitted.
    ///
    /// Returns `true` if the identity was new.
    pub fn touch(
        &mut self,
        identity: &Identity,
        poll_mode: Option<PollMode>,
        now: Instant,
        log: &mut EventLog,
    ) -> bool {
        if let Some(record) = self.records.get_mut(&identity.nick_name) {
            record.last_seen = now;
            if let Some(mode) = poll_mode {
                record.poll_mode = mode;
            }
            if record.identity.email.is_none() && identity.email.is_some() {
                record.identity.email = identity.email.clone();
            }
            return false;
        }

        let mode = poll_mode.unwrap_or(PollMode::Short);
        self.records.insert(
            identity.nick_name.clone(),
            PresenceRecord::new(identity.clone(), mode, now),
        );
        let sequence = log.append(Event::join(identity.clone()));
        debug!(nick = %identity, sequence, "Presence: joined");
        true
    }

    /// Refresh an identity that is already present. Unknown identities are
    /// left absent and nothing is appended.
    ///
    /// Returns `true` if the identity was present.
    pub fn refresh(&mut self, identity: &Identity, poll_mode: PollMode, now: Instant) -> bool {
        match self.records.get_mut(&identity.nick_name) {
            Some(record) => {
                record.last_seen = now;
                record.poll_mode = poll_mode;
                true
            }
            None => false,
        }
    }

    /// Evict every record that is stale at `now`, appending a `part` event
    /// for each, in nickname order.
    ///
    /// Returns the evicted records.
    pub fn sweep(&mut self, now: Instant, log: &mut EventLog) -> Vec<PresenceRecord> {
        let mut stale: Vec<String> = self
            .records
            .iter()
            .filter(|(_, record)| record.is_stale(now, &self.config))
            .map(|(nick, _)| nick.clone())
            .collect();
        stale.sort_unstable();

        let mut evicted = Vec::with_capacity(stale.len());
        for nick in stale {
            if let Some(record) = self.records.remove(&nick) {
                let sequence = log.append(Event::part(record.identity.clone()));
                debug!(nick = %nick, mode = ?record.poll_mode, sequence, "Presence: timed out");
                evicted.push(record);
            }
        }
        evicted
    }

    /// Get the record for a nickname.
    #[must_use]
    pub fn get(&self, nick_name: &str) -> Option<&PresenceRecord> {
        self.records.get(nick_name)
    }

    #[must_use]
    pub fn is_present(&self, nick_name: &str) -> bool {
        self.records.contains_key(nick_name)
    }

    /// Number of present identities.
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// All present identities, in the order they joined.
    #[must_use]
    pub fn snapshot(&self) -> Vec<PresenceRecord> {
        let mut records: Vec<PresenceRecord> = self.records.values().cloned().collect();
        records.sort_by(|a, b| {
            a.joined_at
                .cmp(&b.joined_at)
                .then_with(|| a.identity.nick_name.cmp(&b.identity.nick_name))
        });
        records
    }

    /// The configured timeouts.
    #[must_use]
    pub fn config(&self) -> &PresenceConfig {
        &self.config
    }
}
