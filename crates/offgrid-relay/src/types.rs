use std::collections::BTreeMap;
use std::fmt;

use base64::engine::general_purpose::STANDARD_NO_PAD;
use base64::Engine as _;
use serde::{Deserialize, Serialize};

use crate::RelayError;

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_string())
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self(s)
            }
        }
    };
}

string_id!(
    /// Fully qualified user id, e.g. `@bob:example.org`.
    UserId
);
string_id!(DeviceId);
string_id!(
    /// Room id, e.g. `!r1:example.org`.
    RoomId
);
string_id!(
    /// Event id, e.g. `$evt1`.
    EventId
);

/// Algorithm tag carried by group-encrypted events.
pub const GROUP_ALGORITHM: &str = "offgrid.group.xchacha20poly1305.v1";

/// A room event, encoded exactly as it travels through the sync pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoomEvent {
    pub event_id: EventId,
    pub room_id: RoomId,
    pub sender: UserId,
    pub origin_server_ts: u64,
    pub content: EventContent,
}

impl RoomEvent {
    pub fn is_encrypted(&self) -> bool {
        matches!(self.content, EventContent::Encrypted(_))
    }

    /// Same event with different content (used after decryption / re-encryption).
    pub fn with_content(&self, content: EventContent) -> Self {
        Self {
            content,
            ..self.clone()
        }
    }
}

/// Closed set of event contents this subsystem understands.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum EventContent {
    #[serde(rename = "m.room.message")]
    Message(MessageContent),
    #[serde(rename = "m.room.encrypted")]
    Encrypted(EncryptedContent),
    #[serde(rename = "m.receipt")]
    Receipt(ReceiptContent),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageContent {
    pub msgtype: String,
    pub body: String,
}

impl MessageContent {
    pub fn text(body: impl Into<String>) -> Self {
        Self {
            msgtype: "m.text".into(),
            body: body.into(),
        }
    }
}

/// Group-encrypted content.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncryptedContent {
    pub algorithm: String,
    /// Identity key of the device that created the group session.
    pub sender_key: String,
    pub session_id: String,
    pub device_id: DeviceId,
    /// Base64 group ciphertext.
    pub ciphertext: String,
}

/// Read receipts: event id -> (user -> timestamp).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReceiptContent {
    pub receipts: BTreeMap<EventId, BTreeMap<UserId, u64>>,
}

impl ReceiptContent {
    pub fn read(mut self, event_id: EventId, user: UserId, ts: u64) -> Self {
        self.receipts.entry(event_id).or_default().insert(user, ts);
        self
    }
}

/// Public identity of one device, exchanged in the clear at handshake start.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DeviceIdentity {
    pub user_id: UserId,
    pub device_id: DeviceId,
    /// Base64 X25519 key; names the device as a group-session creator.
    pub identity_key: String,
    /// Base64 Ed25519 key; authenticates point-to-point envelopes.
    pub signing_key: String,
}

impl DeviceIdentity {
    pub fn signing_key_bytes(&self) -> Result<[u8; 32], RelayError> {
        decode_key(&self.signing_key)
    }
}

impl fmt::Display for DeviceIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.user_id, self.device_id)
    }
}

pub(crate) fn encode_b64(bytes: &[u8]) -> String {
    STANDARD_NO_PAD.encode(bytes)
}

pub(crate) fn decode_b64(s: &str) -> Result<Vec<u8>, RelayError> {
    STANDARD_NO_PAD
        .decode(s)
        .map_err(|e| RelayError::Crypto(format!("invalid base64: {e}")))
}

pub(crate) fn decode_key(s: &str) -> Result<[u8; 32], RelayError> {
    decode_b64(s)?
        .try_into()
        .map_err(|_| RelayError::Crypto("key is not 32 bytes".into()))
}

/// Current wall-clock time in milliseconds since the Unix epoch.
pub fn now_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}
