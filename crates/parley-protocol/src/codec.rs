//! Codec for event batches.
//!
//! A poll response is a JSON array of `WireEvent`s. The server encodes
//! straight into a `BytesMut`; clients and tests decode from a byte slice.

use bytes::{BufMut, Bytes, BytesMut};
use thiserror::Error;

use crate::event::WireEvent;

/// Initial buffer capacity reserved per event when encoding.
const BYTES_PER_EVENT_HINT: usize = 160;

/// Protocol errors: request validation and batch encoding.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// A required request field was absent or empty.
    #[error("Missing required field: {0}")]
    MissingField(&'static str),

    /// A request field exceeded its length limit.
    #[error("Field {field} exceeds {max} bytes")]
    FieldTooLong {
        /// Field name as it appears on the wire.
        field: &'static str,
        /// Limit in bytes.
        max: usize,
    },

    /// JSON encoding or decoding error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Encode a batch of events to bytes.
///
/// # Errors
///
/// Returns an error if serialization fails.
pub fn encode(events: &[WireEvent]) -> Result<Bytes, ProtocolError> {
    let mut buf = BytesMut::with_capacity(2 + events.len() * BYTES_PER_EVENT_HINT);
    encode_into(events, &mut buf)?;
    Ok(buf.freeze())
}

/// Encode a batch of events into an existing buffer.
///
/// # Errors
///
/// Returns an error if serialization fails.
pub fn encode_into(events: &[WireEvent], buf: &mut BytesMut) -> Result<(), ProtocolError> {
    serde_json::to_writer(buf.writer(), events)?;
    Ok(())
}

/// Decode a batch of events from bytes.
///
/// # Errors
///
/// Returns an error if the data is not a JSON array of events.
pub fn decode(data: &[u8]) -> Result<Vec<WireEvent>, ProtocolError> {
    Ok(serde_json::from_slice(data)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::EventKind;

    fn event(sequence: u64, kind: EventKind, message: Option<&str>) -> WireEvent {
        WireEvent {
            sequence,
            kind,
            nick_name: "alice".into(),
            gravatar: None,
            message: message.map(String::from),
            date_time: "2024-01-01T00:00:00.000Z".into(),
        }
    }

    #[test]
    fn test_encode_decode_batch() {
        let events = vec![
            event(1, EventKind::Join, None),
            event(2, EventKind::Message, Some("hi")),
            event(3, EventKind::Part, None),
        ];

        let encoded = encode(&events).unwrap();
        assert_eq!(encoded[0], b'[');
        assert_eq!(decode(&encoded).unwrap(), events);
    }

    #[test]
    fn test_empty_batch() {
        let encoded = encode(&[]).unwrap();
        assert_eq!(&encoded[..], b"[]");
    }

    #[test]
    fn test_encode_into_appends() {
        let mut buf = BytesMut::new();
        encode_into(&[event(1, EventKind::Join, None)], &mut buf).unwrap();
        let len = buf.len();
        encode_into(&[], &mut buf).unwrap();
        assert_eq!(&buf[len..], b"[]");
    }

    #[test]
    fn test_decode_rejects_garbage() {
        match decode(b"{not json") {
            Err(ProtocolError::Json(_)) => {}
            other => panic!("Expected Json error, got {:?}", other),
        }
    }
}
