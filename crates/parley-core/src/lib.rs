//! # parley-core
//!
//! Event distribution for the Parley long-polling chat server.
//!
//! Clients cannot hold a socket open, so they repeatedly ask "what happened
//! after sequence N?". This crate answers that question without gaps or
//! duplicates:
//!
//! - **EventLog** - append-only, sequenced backlog with append notifications
//! - **PresenceRegistry** - recency-based presence with timeout eviction
//! - **LongPollCoordinator** - parks polls until the next append
//! - **ChatRoom** - the single lock that ties them together
//!
//! ## Architecture
//!
//! ```text
//!  join / message         poll
//!        │                  │
//!        ▼                  ▼
//! ┌──────────────────────────────────┐      ┌─────────────────────┐
//! │ ChatRoom (mutex)                 │      │ LongPollCoordinator │
//! │  ┌──────────────┐  ┌──────────┐  │park  │   pending polls     │
//! │  │ Presence     │─▶│ EventLog │──┼─────▶│                     │
//! │  └──────────────┘  └──────────┘  │notify└─────────────────────┘
//! └──────────────────────────────────┘
//!        ▲
//!        │ sweep (every 6 s)
//! ```

pub mod event;
pub mod log;
pub mod poll;
pub mod presence;
pub mod room;

pub use event::{Event, EventKind, Identity};
pub use log::{EventLog, EventLogConfig};
pub use poll::{LongPollCoordinator, ParkedPoll, PendingPoll, PollError, PollId};
pub use presence::{PollMode, PresenceConfig, PresenceRecord, PresenceRegistry};
pub use room::{ChatRoom, RoomConfig, RoomStats};
