//! Crypto engine seam.
//!
//! The relay never touches key material directly: trust decisions, group
//! (room) encryption and point-to-point sealing all go through
//! [`CryptoEngine`].
mod memory;

pub use memory::MemoryCryptoEngine;

use serde::{Deserialize, Serialize};

use crate::types::{DeviceIdentity, EncryptedContent, EventContent, RoomEvent, RoomId, UserId};
use crate::wire::SealedBody;
use crate::RelayError;

/// Exported group session material, as carried inside a key forward.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExportedSession {
    pub algorithm: String,
    pub room_id: RoomId,
    /// Identity key of the device that created the session.
    pub sender_key: String,
    pub session_id: String,
    /// Base64 session key.
    pub session_key: String,
    /// Signing key the creator claimed when the session was first received.
    pub sender_claimed_key: String,
    /// Identity keys of every device this session was forwarded through.
    #[serde(default)]
    pub forwarding_chain: Vec<String>,
}

/// Why a group-encrypted event could not be decrypted.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GroupDecryptError {
    #[error("no group session {session_id} from {sender_key} in {room_id}")]
    MissingSession {
        room_id: RoomId,
        sender_key: String,
        session_id: String,
    },

    #[error("{0}")]
    Other(String),
}

/// Why a group session could not be exported.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum ExportError {
    #[error("session is withheld")]
    Withheld,

    #[error("session not found")]
    NotFound,
}

/// Everything the relay needs from the device's crypto layer.
#[async_trait::async_trait]
pub trait CryptoEngine: Send + Sync {
    /// Identity of the local device, sent at the start of every handshake.
    fn own_identity(&self) -> DeviceIdentity;

    async fn is_trusted(&self, peer: &DeviceIdentity) -> bool;

    async fn encrypt_point_to_point(
        &self,
        peer: &DeviceIdentity,
        plaintext: &[u8],
    ) -> Result<SealedBody, RelayError>;

    /// Open a body sealed by `peer` for this device.
    async fn decrypt_point_to_point(
        &self,
        peer: &DeviceIdentity,
        body: &SealedBody,
    ) -> Result<Vec<u8>, RelayError>;

    /// Encrypt `content` with the room's current outbound group session.
    async fn encrypt_group_message(
        &self,
        room_id: &RoomId,
        sender: &UserId,
        content: &EventContent,
    ) -> Result<EncryptedContent, RelayError>;

    /// Decrypt a group-encrypted event, returning it with plaintext content.
    async fn decrypt_group_message(&self, event: &RoomEvent) -> Result<RoomEvent, GroupDecryptError>;

    async fn export_group_session(
        &self,
        room_id: &RoomId,
        sender_key: &str,
        session_id: &str,
    ) -> Result<ExportedSession, ExportError>;

    async fn import_group_session(&self, session: ExportedSession) -> Result<(), RelayError>;
}

/// Associated data bound into every group ciphertext.
///
/// Altering the room or sender of a relayed event makes it undecryptable.
pub fn group_aad(room_id: &RoomId, sender: &UserId) -> Vec<u8> {
    let mut aad = Vec::with_capacity(room_id.as_str().len() + sender.as_str().len() + 1);
    aad.extend_from_slice(room_id.as_str().as_bytes());
    aad.push(0);
    aad.extend_from_slice(sender.as_str().as_bytes());
    aad
}
