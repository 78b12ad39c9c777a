//! The chat room: the single exclusion domain for events and presence.
//!
//! `EventLog` and `PresenceRegistry` live behind one mutex because both
//! `touch` and `sweep` may append. Parked polls wait outside the lock, on
//! their own subscription.

use crate::event::{Event, Identity};
use crate::log::{EventLog, EventLogConfig};
use crate::poll::{LongPollCoordinator, PendingPoll, PollError};
use crate::presence::{PollMode, PresenceConfig, PresenceRecord, PresenceRegistry};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info};

/// Default interval between presence sweeps.
pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(6);

/// Default time a poll may stay parked before it is answered empty.
pub const DEFAULT_POLL_IDLE_TIMEOUT: Duration = Duration::from_secs(120);

/// Room configuration.
#[derive(Debug, Clone)]
pub struct RoomConfig {
    /// Event log retention.
    pub log: EventLogConfig,
    /// Presence timeouts.
    pub presence: PresenceConfig,
    /// Interval of the background presence sweep.
    pub sweep_interval: Duration,
    /// How long a poll may stay parked. `None` waits indefinitely.
    pub poll_idle_timeout: Option<Duration>,
}

impl Default for RoomConfig {
    fn default() -> Self {
        Self {
            log: EventLogConfig::default(),
            presence: PresenceConfig::default(),
            sweep_interval: DEFAULT_SWEEP_INTERVAL,
            poll_idle_timeout: Some(DEFAULT_POLL_IDLE_TIMEOUT),
        }
    }
}

/// State guarded by the room lock.
struct RoomState {
    log: EventLog,
    presence: PresenceRegistry,
}

impl RoomState {
    fn touch(&mut self, identity: &Identity, poll_mode: Option<PollMode>) -> bool {
        let RoomState { log, presence } = self;
        presence.touch(identity, poll_mode, Instant::now(), log)
    }

    fn refresh(&mut self, identity: &Identity, poll_mode: PollMode) -> bool {
        self.presence.refresh(identity, poll_mode, Instant::now())
    }
}

/// A single global chat room.
pub struct ChatRoom {
    state: Mutex<RoomState>,
    coordinator: LongPollCoordinator,
    config: RoomConfig,
}

impl ChatRoom {
    /// Create a room with default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(RoomConfig::default())
    }

    /// Create a room with custom configuration.
    #[must_use]
    pub fn with_config(config: RoomConfig) -> Self {
        info!("Creating chat room with config: {:?}", config);
        Self {
            state: Mutex::new(RoomState {
                log: EventLog::with_config(config.log.clone()),
                presence: PresenceRegistry::with_config(config.presence.clone()),
            }),
            coordinator: LongPollCoordinator::new(),
            config,
        }
    }

    /// The room configuration.
    #[must_use]
    pub fn config(&self) -> &RoomConfig {
        &self.config
    }

    /// Register an identity as present.
    ///
    /// Returns `true` if this was the identity's first sight, in which case
    /// a `join` event was appended.
    pub fn join(&self, identity: &Identity) -> bool {
        self.touch(identity, Some(PollMode::Short))
    }

    /// Record activity for an identity. See `PresenceRegistry::touch`.
    pub fn touch(&self, identity: &Identity, poll_mode: Option<PollMode>) -> bool {
        self.state.lock().touch(identity, poll_mode)
    }

    /// Post a message, returning its sequence.
    ///
    /// The sender's presence is refreshed first, so a sender nobody has seen
    /// yet is announced with a `join` before the message.
    pub fn send_message(&self, identity: &Identity, text: impl Into<String>) -> u64 {
        let mut state = self.state.lock();
        state.touch(identity, None);
        let sequence = state.log.append(Event::message(identity.clone(), text));
        debug!(nick = %identity, sequence, "Message posted");
        sequence
    }

    /// Retained events with `sequence > after`.
    #[must_use]
    pub fn since(&self, after: u64) -> Vec<Arc<Event>> {
        self.state.lock().log.since(after)
    }

    /// Answer a poll.
    ///
    /// Returns the backlog after `since` straight away if there is one.
    /// Otherwise parks until the next event is appended anywhere in the
    /// room and returns just that event; the client resumes from its
    /// sequence to catch up on anything appended meanwhile.
    ///
    /// Polling refreshes the poller's presence (`Short` when answered,
    /// `Long` while parked) but never creates it: an identity only becomes
    /// present by joining or sending a message.
    ///
    /// # Errors
    ///
    /// Returns `PollError::TimedOut` if the idle timeout elapsed with no
    /// event, and `PollError::Closed` if the room's event stream closed.
    /// A parked poll whose subscription overflowed is answered from the
    /// log, so `PollError::Lagged` does not escape.
    pub async fn poll(&self, identity: &Identity, since: u64) -> Result<Vec<Arc<Event>>, PollError> {
        let parked = {
            let mut state = self.state.lock();
            let backlog = state.log.since(since);
            if !backlog.is_empty() {
                state.refresh(identity, PollMode::Short);
                return Ok(backlog);
            }
            state.refresh(identity, PollMode::Long);
            // Subscribing under the lock: no append can land between the
            // empty backlog check and the subscription.
            let receiver = state.log.subscribe();
            self.coordinator.park(identity, since, receiver)
        };

        let outcome = match parked.wait(self.config.poll_idle_timeout).await {
            Err(PollError::Lagged(skipped)) => {
                debug!(nick = %identity, since, skipped, "Answering lagged poll from the log");
                self.state
                    .lock()
                    .log
                    .first_after(since)
                    .ok_or(PollError::Lagged(skipped))
            }
            other => other,
        };
        if !matches!(outcome, Err(PollError::Closed)) {
            self.state.lock().refresh(identity, PollMode::Short);
        }
        outcome.map(|event| vec![event])
    }

    /// Evict identities that are stale at `now`, appending a `part` event
    /// for each. Returns the evicted records.
    pub fn sweep(&self, now: Instant) -> Vec<PresenceRecord> {
        let mut state = self.state.lock();
        let RoomState { log, presence } = &mut *state;
        presence.sweep(now, log)
    }

    /// Subscribe to every event appended from now on.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<Arc<Event>> {
        self.state.lock().log.subscribe()
    }

    /// Present identities, in join order.
    #[must_use]
    pub fn users(&self) -> Vec<PresenceRecord> {
        self.state.lock().presence.snapshot()
    }

    /// Currently parked polls.
    #[must_use]
    pub fn pending_polls(&self) -> Vec<PendingPoll> {
        self.coordinator.pending()
    }

    /// Room statistics.
    #[must_use]
    pub fn stats(&self) -> RoomStats {
        let state = self.state.lock();
        RoomStats {
            last_sequence: state.log.last_sequence(),
            retained_events: state.log.len(),
            present: state.presence.len(),
            pending_polls: self.coordinator.pending_count(),
        }
    }

    /// Spawn the periodic presence sweep.
    ///
    /// The task holds only a weak reference and ends once the room is
    /// dropped.
    pub fn spawn_sweeper(self: &Arc<Self>) -> JoinHandle<()> {
        let room = Arc::downgrade(self);
        let period = self.config.sweep_interval;

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let Some(room) = room.upgrade() else {
                    break;
                };
                let evicted = room.sweep(Instant::now());
                if !evicted.is_empty() {
                    debug!(evicted = evicted.len(), "Presence sweep");
                }
            }
            debug!("Presence sweeper stopped");
        })
    }
}

impl Default for ChatRoom {
    fn default() -> Self {
        Self::new()
    }
}

/// Room statistics.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoomStats {
    /// Highest sequence assigned.
    pub last_sequence: u64,
    /// Events currently retained in the log.
    pub retained_events: usize,
    /// Present identities.
    pub present: usize,
    /// Parked polls.
    pub pending_polls: usize,
}
