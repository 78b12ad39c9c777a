//! Ingress request parameters and their validation.
//!
//! Every field arrives optional so that the HTTP layer can report which one
//! is missing instead of failing deserialization wholesale. `validate`
//! turns a request into the values the chat room works with.

use crate::codec::ProtocolError;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Maximum nickname length in bytes.
pub const MAX_NICK_NAME_LENGTH: usize = 64;

/// Maximum email length in bytes (RFC 5321 path limit).
pub const MAX_EMAIL_LENGTH: usize = 254;

/// Default maximum message length in bytes.
pub const DEFAULT_MAX_MESSAGE_LENGTH: usize = 4 * 1024;

/// A chat participant, keyed by nickname.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Identity {
    /// Nickname, unique within the room.
    pub nick_name: String,
    /// Email address used for gravatar derivation.
    pub email: Option<String>,
}

impl Identity {
    /// Create an identity with an email address.
    #[must_use]
    pub fn new(nick_name: impl Into<String>, email: impl Into<String>) -> Self {
        Self {
            nick_name: nick_name.into(),
            email: Some(email.into()),
        }
    }

    /// Create an identity that only carries a nickname.
    #[must_use]
    pub fn anonymous(nick_name: impl Into<String>) -> Self {
        Self {
            nick_name: nick_name.into(),
            email: None,
        }
    }

    /// Gravatar URL for this identity, if an email is known.
    #[must_use]
    pub fn gravatar(&self) -> Option<String> {
        self.email.as_deref().map(crate::gravatar::gravatar_url)
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.nick_name)
    }
}

/// `/join` parameters.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JoinRequest {
    pub nick_name: Option<String>,
    pub email: Option<String>,
}

impl JoinRequest {
    /// Validate and extract the identity.
    ///
    /// # Errors
    ///
    /// Returns an error if `nickName` or `email` is missing or too long.
    pub fn validate(self) -> Result<Identity, ProtocolError> {
        identity(self.nick_name, self.email)
    }
}

/// `/message` parameters.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageRequest {
    pub nick_name: Option<String>,
    pub email: Option<String>,
    pub message: Option<String>,
}

impl MessageRequest {
    /// Validate and extract the identity and message text.
    ///
    /// # Errors
    ///
    /// Returns an error if any field is missing, or the message exceeds
    /// `max_message_length` bytes.
    pub fn validate(self, max_message_length: usize) -> Result<(Identity, String), ProtocolError> {
        let identity = identity(self.nick_name, self.email)?;
        let message = self
            .message
            .filter(|m| !m.trim().is_empty())
            .ok_or(ProtocolError::MissingField("message"))?;
        if message.len() > max_message_length {
            return Err(ProtocolError::FieldTooLong {
                field: "message",
                max: max_message_length,
            });
        }
        Ok((identity, message))
    }
}

/// `/eventpoll` parameters.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PollRequest {
    pub nick_name: Option<String>,
    pub email: Option<String>,
    /// Last sequence the client has seen. Absent means 0.
    pub since: Option<u64>,
}

impl PollRequest {
    /// Validate and extract the identity and resume cursor.
    ///
    /// # Errors
    ///
    /// Returns an error if `nickName` or `email` is missing or too long.
    pub fn validate(self) -> Result<(Identity, u64), ProtocolError> {
        let identity = identity(self.nick_name, self.email)?;
        Ok((identity, self.since.unwrap_or(0)))
    }
}

fn identity(nick_name: Option<String>, email: Option<String>) -> Result<Identity, ProtocolError> {
    let nick_name = required("nickName", nick_name, MAX_NICK_NAME_LENGTH)?;
    let email = required("email", email, MAX_EMAIL_LENGTH)?;
    Ok(Identity {
        nick_name,
        email: Some(email),
    })
}

fn required(
    field: &'static str,
    value: Option<String>,
    max: usize,
) -> Result<String, ProtocolError> {
    let value = value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .ok_or(ProtocolError::MissingField(field))?;
    if value.len() > max {
        return Err(ProtocolError::FieldTooLong { field, max });
    }
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_join_requires_both_fields() {
        let request = JoinRequest {
            nick_name: Some("alice".into()),
            email: None,
        };
        assert!(matches!(
            request.validate(),
            Err(ProtocolError::MissingField("email"))
        ));

        let request = JoinRequest {
            nick_name: Some("   ".into()),
            email: Some("a@x".into()),
        };
        assert!(matches!(
            request.validate(),
            Err(ProtocolError::MissingField("nickName"))
        ));
    }

    #[test]
    fn test_join_trims_fields() {
        let request = JoinRequest {
            nick_name: Some(" alice ".into()),
            email: Some("a@x".into()),
        };
        let identity = request.validate().unwrap();
        assert_eq!(identity, Identity::new("alice", "a@x"));
    }

    #[test]
    fn test_message_validation() {
        let request = MessageRequest {
            nick_name: Some("alice".into()),
            email: Some("a@x".into()),
            message: Some("hi".into()),
        };
        let (identity, text) = request.validate(DEFAULT_MAX_MESSAGE_LENGTH).unwrap();
        assert_eq!(identity.nick_name, "alice");
        assert_eq!(text, "hi");

        let request = MessageRequest {
            nick_name: Some("alice".into()),
            email: Some("a@x".into()),
            message: Some("x".repeat(11)),
        };
        assert!(matches!(
            request.validate(10),
            Err(ProtocolError::FieldTooLong { field: "message", max: 10 })
        ));

        let request = MessageRequest {
            nick_name: Some("alice".into()),
            email: Some("a@x".into()),
            message: None,
        };
        assert!(matches!(
            request.validate(10),
            Err(ProtocolError::MissingField("message"))
        ));
    }

    #[test]
    fn test_message_text_kept_verbatim() {
        let request = MessageRequest {
            nick_name: Some(" alice ".into()),
            email: Some("a@x".into()),
            message: Some("  indented\n".into()),
        };
        let (identity, text) = request.validate(DEFAULT_MAX_MESSAGE_LENGTH).unwrap();
        assert_eq!(identity.nick_name, "alice");
        assert_eq!(text, "  indented\n");

        let request = MessageRequest {
            nick_name: Some("alice".into()),
            email: Some("a@x".into()),
            message: Some(" \t ".into()),
        };
        assert!(matches!(
            request.validate(10),
            Err(ProtocolError::MissingField("message"))
        ));
    }

    #[test]
    fn test_poll_since_defaults_to_zero() {
        let request = PollRequest {
            nick_name: Some("carol".into()),
            email: Some("c@x".into()),
            since: None,
        };
        let (_, since) = request.validate().unwrap();
        assert_eq!(since, 0);
    }

    #[test]
    fn test_nick_name_too_long() {
        let request = JoinRequest {
            nick_name: Some("n".repeat(MAX_NICK_NAME_LENGTH + 1)),
            email: Some("a@x".into()),
        };
        assert!(matches!(
            request.validate(),
            Err(ProtocolError::FieldTooLong { field: "nickName", .. })
        ));
    }

    #[test]
    fn test_identity_gravatar() {
        assert!(Identity::anonymous("ghost").gravatar().is_none());
        assert!(Identity::new("alice", "a@x")
            .gravatar()
            .unwrap()
            .starts_with(crate::gravatar::GRAVATAR_BASE));
    }
}
