//! Long-poll coordination.
//!
//! A poll that finds no backlog is parked: it registers a `PendingPoll` and
//! waits on its own subscription to the event log for the next append. The
//! `ParkedPoll` handle owns both the subscription and the registration, and
//! dropping it deregisters the poll. Resolution, idle timeout and a client
//! disconnect (axum drops the handler future) therefore all leave the
//! pending set exactly once.

use crate::event::{Event, Identity};
use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::broadcast;
use tokio::time::Instant;
use tracing::{debug, trace, warn};

/// Identifier of a parked poll.
pub type PollId = u64;

/// Reasons a parked poll ends without an event.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum PollError {
    /// No event arrived within the idle timeout.
    #[error("Poll timed out waiting for events")]
    TimedOut,

    /// The event stream was closed.
    #[error("Event stream closed")]
    Closed,

    /// The subscription overflowed before the poll woke, so the next
    /// append is no longer in the channel. The caller must answer from
    /// the log instead.
    #[error("Parked poll missed {0} events")]
    Lagged(u64),
}

/// A currently parked poll.
#[derive(Debug, Clone)]
pub struct PendingPoll {
    pub id: PollId,
    pub identity: Identity,
    /// Cursor the client polled with.
    pub since: u64,
    pub parked_at: Instant,
}

/// Tracks parked polls.
#[derive(Debug, Default)]
pub struct LongPollCoordinator {
    pending: Arc<DashMap<PollId, PendingPoll>>,
    next_id: AtomicU64,
}

impl LongPollCoordinator {
    /// Create an empty coordinator.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Park a poll on `receiver`.
    ///
    /// The receiver must have been subscribed while the backlog was known
    /// to be empty, so that the first event it yields is the next append.
    pub fn park(
        &self,
        identity: &Identity,
        since: u64,
        receiver: broadcast::Receiver<Arc<Event>>,
    ) -> ParkedPoll {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        let parked_at = Instant::now();
        self.pending.insert(
            id,
            PendingPoll {
                id,
                identity: identity.clone(),
                since,
                parked_at,
            },
        );
        debug!(poll = id, nick = %identity, since, "Poll parked");

        ParkedPoll {
            id,
            parked_at,
            receiver,
            pending: Arc::clone(&self.pending),
        }
    }

    /// Number of parked polls.
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// Number of parked polls for a nickname.
    #[must_use]
    pub fn pending_for(&self, nick_name: &str) -> usize {
        self.pending
            .iter()
            .filter(|p| p.identity.nick_name == nick_name)
            .count()
    }

    /// Snapshot of the parked polls, oldest first.
    #[must_use]
    pub fn pending(&self) -> Vec<PendingPoll> {
        let mut polls: Vec<PendingPoll> = self.pending.iter().map(|p| p.value().clone()).collect();
        polls.sort_by_key(|p| p.id);
        polls
    }
}

/// Handle to a parked poll. Dropping it deregisters the poll.
#[derive(Debug)]
pub struct ParkedPoll {
    id: PollId,
    parked_at: Instant,
    receiver: broadcast::Receiver<Arc<Event>>,
    pending: Arc<DashMap<PollId, PendingPoll>>,
}

impl ParkedPoll {
    /// The poll's identifier.
    #[must_use]
    pub fn id(&self) -> PollId {
        self.id
    }

    /// Wait for the next appended event.
    ///
    /// Resolves with exactly one event, whatever its kind or identity.
    /// With `idle_timeout` set, gives up after that long.
    ///
    /// # Errors
    ///
    /// Returns `PollError::TimedOut` if the idle timeout elapses first,
    /// `PollError::Closed` if the log was dropped and `PollError::Lagged`
    /// if the next append was pushed out of the channel.
    pub async fn wait(mut self, idle_timeout: Option<Duration>) -> Result<Arc<Event>, PollError> {
        let next = next_event(self.id, &mut self.receiver);
        let outcome = match idle_timeout {
            Some(limit) => tokio::time::timeout(limit, next)
                .await
                .unwrap_or(Err(PollError::TimedOut)),
            None => next.await,
        };
        self.release();

        match &outcome {
            Ok(event) => trace!(
                poll = self.id,
                sequence = event.sequence,
                waited_ms = self.parked_at.elapsed().as_millis() as u64,
                "Poll resolved"
            ),
            Err(e) => debug!(poll = self.id, error = %e, "Poll ended without event"),
        }
        outcome
    }

    fn release(&self) -> bool {
        self.pending.remove(&self.id).is_some()
    }
}

impl Drop for ParkedPoll {
    fn drop(&mut self) {
        if self.release() {
            debug!(poll = self.id, "Poll cancelled");
        }
    }
}

async fn next_event(
    id: PollId,
    receiver: &mut broadcast::Receiver<Arc<Event>>,
) -> Result<Arc<Event>, PollError> {
    match receiver.recv().await {
        Ok(event) => Ok(event),
        Err(broadcast::error::RecvError::Lagged(skipped)) => {
            warn!(poll = id, skipped, "Parked poll lagged behind the event log");
            Err(PollError::Lagged(skipped))
        }
        Err(broadcast::error::RecvError::Closed) => Err(PollError::Closed),
    }
}
