//! Messages exchanged over a relay stream after the identity frames.

use serde::{Deserialize, Serialize};

use crate::engine::ExportedSession;
use crate::handshake::UndeliverableReason;
use crate::types::{DeviceId, RoomEvent, RoomId, UserId};

/// Opaque point-to-point ciphertext, base64 on the wire.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SealedBody(pub String);

/// One frame after the identity exchange: `{ "type": .., "body": .. }`.
///
/// Every body is sealed point-to-point, so each frame also proves which
/// device key produced it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "body", rename_all = "snake_case")]
pub enum WireMessage {
    /// Sealed [`RelayPayload`].
    EventPayload(SealedBody),
    KeyRequest(SealedBody),
    KeyForward(SealedBody),
    /// Sealed [`RelayResult`], the receiver's last word.
    RelayResult(SealedBody),
}

impl WireMessage {
    pub fn kind(&self) -> &'static str {
        match self {
            WireMessage::EventPayload(_) => "event_payload",
            WireMessage::KeyRequest(_) => "key_request",
            WireMessage::KeyForward(_) => "key_forward",
            WireMessage::RelayResult(_) => "relay_result",
        }
    }
}

/// Plaintext of a [`WireMessage::EventPayload`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelayPayload {
    /// Fresh per handshake; echoed in the [`RelayResult`].
    pub relay_id: String,
    /// The relayed event, serialized exactly as in the sync pipeline.
    pub event: RoomEvent,
}

/// What the receiver did with a relayed event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", content = "reason", rename_all = "snake_case")]
pub enum RelayStatus {
    Stored,
    AlreadyPresent,
    Refused(UndeliverableReason),
}

/// Plaintext of a [`WireMessage::RelayResult`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelayResult {
    pub relay_id: String,
    pub status: RelayStatus,
}

/// Plaintext of a [`WireMessage::KeyRequest`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyRequest {
    pub request_id: String,
    pub room_id: RoomId,
    pub sender_key: String,
    pub session_id: String,
    pub requesting_device: DeviceId,
}

/// Plaintext of a [`WireMessage::KeyForward`].
///
/// Names both ends and the request it answers, so a forward cannot be
/// replayed to another device or into a later handshake.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ForwardedRoomKey {
    pub request_id: String,
    pub sender: UserId,
    pub sender_device: DeviceId,
    pub sender_signing_key: String,
    pub recipient: UserId,
    pub recipient_signing_key: String,
    pub session: ExportedSession,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{EventContent, MessageContent};

    #[test]
    fn envelope_has_type_and_body() {
        let msg = WireMessage::KeyRequest(SealedBody("c2VhbGVk".into()));
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["type"], "key_request");
        assert_eq!(json["body"], "c2VhbGVk");
    }

    #[test]
    fn payload_carries_the_event_unchanged() {
        let event = RoomEvent {
            event_id: "$evt1".into(),
            room_id: "!r1:hs".into(),
            sender: "@alice:hs".into(),
            origin_server_ts: 5,
            content: EventContent::Message(MessageContent::text("hello")),
        };
        let payload = RelayPayload {
            relay_id: "r1".into(),
            event: event.clone(),
        };
        let json = serde_json::to_value(&payload).unwrap();
        assert_eq!(json["relay_id"], "r1");
        assert_eq!(json["event"], serde_json::to_value(&event).unwrap());
    }

    #[test]
    fn refusal_names_its_reason() {
        let result = RelayResult {
            relay_id: "r1".into(),
            status: RelayStatus::Refused(UndeliverableReason::Untrusted),
        };
        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["status"]["status"], "refused");
        assert_eq!(json["status"]["reason"], "untrusted");
        let stored = serde_json::to_value(RelayStatus::Stored).unwrap();
        assert_eq!(stored["status"], "stored");
    }

    #[test]
    fn unknown_type_is_rejected() {
        let err = serde_json::from_str::<WireMessage>(r#"{"type":"shrug","body":1}"#);
        assert!(err.is_err());
    }
}
