//! Protocol Messages
//!
//! Wire format for client-server communication over WebSocket.
//! Every frame is a JSON envelope `{"code": <integer>, "data": <object>}`;
//! the `data` member is omitted when a code carries no payload.

use serde::{Deserialize, Serialize};
use serde_json::Value;

// =============================================================================
// MESSAGE CODES
// =============================================================================

/// Integer message codes shared with clients.
///
/// The numeric values are part of the wire contract and must not change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum MessageCode {
    /// A session formed; data carries the match assignment.
    OpponentFound = 0,
    /// A co-participant forfeited; no further relay for that link.
    OpponentLeft = 1,
    /// Forwarded handshake offer/answer.
    SessionDescription = 2,
    /// Forwarded network-candidate descriptor.
    IceCandidate = 3,
    /// The session failed to start; the connection will be closed.
    SessionAborted = 4,
}

impl MessageCode {
    /// Numeric wire value.
    pub fn code(self) -> u8 {
        self as u8
    }

    /// Parse a numeric wire value.
    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            0 => Some(Self::OpponentFound),
            1 => Some(Self::OpponentLeft),
            2 => Some(Self::SessionDescription),
            3 => Some(Self::IceCandidate),
            4 => Some(Self::SessionAborted),
            _ => None,
        }
    }

    /// Whether clients may originate this code (everything else is
    /// server-originated and ignored when received).
    pub fn client_originated(self) -> bool {
        matches!(self, Self::SessionDescription | Self::IceCandidate)
    }
}

// =============================================================================
// ENVELOPE
// =============================================================================

/// The JSON message envelope.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
    /// Numeric message code (see [`MessageCode`]).
    pub code: u8,
    /// Opaque payload; `Null` when the code carries none.
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub data: Value,
}

impl Envelope {
    /// Build an envelope from a code and an already-serialized payload.
    pub fn new(code: MessageCode, data: Value) -> Self {
        Self {
            code: code.code(),
            data,
        }
    }

    /// Session-formed notice for one participant.
    pub fn opponent_found(assignment: &MatchAssignment) -> Self {
        Self::new(
            MessageCode::OpponentFound,
            serde_json::to_value(assignment).unwrap_or(Value::Null),
        )
    }

    /// Forfeiture notice. Carries no payload.
    pub fn opponent_left() -> Self {
        Self::new(MessageCode::OpponentLeft, Value::Null)
    }

    /// Session-start-failure notice.
    pub fn session_aborted(reason: &str) -> Self {
        Self::new(
            MessageCode::SessionAborted,
            serde_json::json!({ "reason": reason }),
        )
    }

    /// The envelope's code, if it is a known one.
    pub fn message_code(&self) -> Option<MessageCode> {
        MessageCode::from_code(self.code)
    }

    /// Serialize to JSON string.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Deserialize from JSON string.
    pub fn from_json(s: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(s)
    }
}

// =============================================================================
// PAYLOADS
// =============================================================================

/// Credential-free projection of an identity, safe to share with peers.
///
/// This is the only identity shape the core ever holds; credential fields
/// live in the external identity store and never reach this process.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublicProfile {
    /// Unique username.
    pub username: String,
    /// Optional display name shown to opponents.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
}

impl PublicProfile {
    /// Profile with no display attributes beyond the username.
    pub fn new(username: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            display_name: None,
        }
    }
}

/// Payload of [`MessageCode::OpponentFound`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MatchAssignment {
    /// Port the match-runner process is bound to.
    pub port: u16,
    /// This participant's slot, 1-based.
    pub player_number: u8,
    /// Public profiles of all co-participants, in slot order.
    pub opponents: Vec<PublicProfile>,
}

/// Payload of [`MessageCode::SessionDescription`]: an offer or answer.
///
/// Typed for clients and tests; the relay itself forwards the payload
/// verbatim without parsing it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionDescription {
    /// `"offer"` or `"answer"`.
    #[serde(rename = "type")]
    pub kind: String,
    /// The session description body.
    pub sdp: String,
}

/// Payload of [`MessageCode::IceCandidate`]. Forwarded verbatim, like
/// [`SessionDescription`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IceCandidate {
    /// Media identifier the candidate belongs to.
    pub media: String,
    /// Media line index.
    pub index: u32,
    /// Candidate name/credentials blob.
    pub name: String,
}
