//! # parley-protocol
//!
//! Wire-level definitions for the Parley long-polling chat server.
//!
//! Clients speak plain HTTP: they join with a nickname and email, send
//! messages, and repeatedly poll `/eventpoll?since=N` for the events they
//! have not seen yet. This crate holds everything both sides agree on:
//!
//! - `EventKind` / `WireEvent` - the JSON shape of a broadcast event
//! - `JoinRequest` / `MessageRequest` / `PollRequest` - ingress parameters
//!   and their validation
//! - `codec` - JSON batch encoding of event lists
//! - `gravatar` - avatar URL derivation from an email address
//!
//! ## Example
//!
//! ```rust
//! use parley_protocol::{codec, EventKind, WireEvent};
//!
//! let event = WireEvent {
//!     sequence: 1,
//!     kind: EventKind::Join,
//!     nick_name: "alice".into(),
//!     gravatar: None,
//!     message: None,
//!     date_time: "2024-01-01T00:00:00.000Z".into(),
//! };
//!
//! let encoded = codec::encode(&[event.clone()]).unwrap();
//! let decoded = codec::decode(&encoded).unwrap();
//! assert_eq!(decoded, vec![event]);
//! ```

pub mod codec;
pub mod event;
pub mod gravatar;
pub mod request;

pub use codec::{decode, encode, ProtocolError};
pub use event::{EventKind, WireEvent, WireUser};
pub use gravatar::gravatar_url;
pub use request::{Identity, JoinRequest, MessageRequest, PollRequest};

/// Wire protocol version, reported by `/health`. Bumped when the event
/// shape or the endpoint parameters change.
pub const PROTOCOL_VERSION: &str = "1";
