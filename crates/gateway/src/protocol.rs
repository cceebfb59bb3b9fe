// Presenti WebSocket Protocol
//
// One JSON object per frame: `{type, data}`. The `type` discriminant is
// an enum ordinal on the wire; symbolic names are accepted inbound for
// convenience. Unknown discriminants are distinguished from malformed
// frames so dispatch can drop the former and close on the latter.

use presenti_core::PresenceRecord;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

/// Message discriminant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PayloadType {
    Identify,
    Ping,
    Pong,
    Presence,
    PresenceFirstParty,
    Subscribe,
    Unsubscribe,
    Greetings,
}

impl PayloadType {
    pub const fn ordinal(self) -> u8 {
        match self {
            Self::Identify => 0,
            Self::Ping => 1,
            Self::Pong => 2,
            Self::Presence => 3,
            Self::PresenceFirstParty => 4,
            Self::Subscribe => 5,
            Self::Unsubscribe => 6,
            Self::Greetings => 7,
        }
    }

    pub fn from_ordinal(ordinal: u64) -> Option<Self> {
        match ordinal {
            0 => Some(Self::Identify),
            1 => Some(Self::Ping),
            2 => Some(Self::Pong),
            3 => Some(Self::Presence),
            4 => Some(Self::PresenceFirstParty),
            5 => Some(Self::Subscribe),
            6 => Some(Self::Unsubscribe),
            7 => Some(Self::Greetings),
            _ => None,
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        match name.to_ascii_uppercase().as_str() {
            "IDENTIFY" => Some(Self::Identify),
            "PING" => Some(Self::Ping),
            "PONG" => Some(Self::Pong),
            "PRESENCE" => Some(Self::Presence),
            "PRESENCE_FIRST_PARTY" => Some(Self::PresenceFirstParty),
            "SUBSCRIBE" => Some(Self::Subscribe),
            "UNSUBSCRIBE" => Some(Self::Unsubscribe),
            "GREETINGS" => Some(Self::Greetings),
            _ => None,
        }
    }

    /// Resolve the raw `type` field of an inbound envelope. `None` means
    /// "recognizable envelope, unknown type" and is silently dropped by
    /// dispatch.
    pub fn resolve(value: &JsonValue) -> Option<Self> {
        match value {
            JsonValue::Number(n) => n.as_u64().and_then(Self::from_ordinal),
            JsonValue::String(s) => Self::from_name(s),
            _ => None,
        }
    }
}

/// Inbound envelope with the `type` discriminant kept raw.
#[derive(Debug, Deserialize)]
pub struct RawEnvelope {
    #[serde(rename = "type")]
    pub payload_type: JsonValue,

    #[serde(default)]
    pub data: JsonValue,
}

/// Outbound envelope; the discriminant serializes as its ordinal.
#[derive(Debug, Serialize)]
pub struct Envelope {
    #[serde(rename = "type")]
    pub payload_type: u8,

    #[serde(skip_serializing_if = "JsonValue::is_null")]
    pub data: JsonValue,
}

impl Envelope {
    pub fn new(payload_type: PayloadType, data: JsonValue) -> Self {
        Self {
            payload_type: payload_type.ordinal(),
            data,
        }
    }

    pub fn to_frame(&self) -> String {
        serde_json::to_string(self).expect("envelope serializes")
    }
}

/// IDENTIFY body: token exchange for a scoped, authenticated connection.
#[derive(Debug, Deserialize)]
pub struct IdentifyPayload {
    pub token: String,

    /// Suppress the GREETINGS reply on success.
    #[serde(default)]
    pub suppress_greetings: bool,
}

/// PRESENCE body: replaces the connection's presence for its own scope.
#[derive(Debug, Deserialize)]
pub struct PresencePayload {
    #[serde(default)]
    pub presences: Vec<PresenceRecord>,
}

/// PRESENCE_FIRST_PARTY body: trusted writers name an explicit target
/// scope per message.
#[derive(Debug, Deserialize)]
pub struct FirstPartyPresencePayload {
    pub scope: String,

    #[serde(default)]
    pub presences: Vec<PresenceRecord>,
}

#[derive(Debug, Deserialize)]
pub struct SubscribePayload {
    pub scope: String,
}
