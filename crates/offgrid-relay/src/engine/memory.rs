use std::collections::{HashMap, HashSet};

use tokio::sync::Mutex;

use super::{group_aad, CryptoEngine, ExportError, ExportedSession, GroupDecryptError};
use crate::crypto::{self, GroupKey};
use crate::types::{
    decode_b64, decode_key, encode_b64, DeviceId, DeviceIdentity, EncryptedContent, EventContent,
    RoomEvent, RoomId, UserId, GROUP_ALGORITHM,
};
use crate::wire::SealedBody;
use crate::RelayError;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct SessionKey {
    room_id: RoomId,
    sender_key: String,
    session_id: String,
}

#[derive(Debug, Clone)]
struct InboundSession {
    key: GroupKey,
    sender_claimed_key: String,
    forwarding_chain: Vec<String>,
}

#[derive(Debug, Default)]
struct EngineState {
    trusted: HashSet<DeviceIdentity>,
    outbound: HashMap<RoomId, GroupKey>,
    inbound: HashMap<SessionKey, InboundSession>,
    withheld: HashSet<(RoomId, String)>,
}

/// Complete in-memory [`CryptoEngine`]: one Ed25519 device key, a trust set
/// and group sessions held in process memory.
#[derive(Debug)]
pub struct MemoryCryptoEngine {
    identity: DeviceIdentity,
    seed: [u8; 32],
    state: Mutex<EngineState>,
}

impl MemoryCryptoEngine {
    /// Device with a deterministic key (tests, demos).
    pub fn from_seed(user_id: UserId, device_id: DeviceId, seed: [u8; 32]) -> Result<Self, RelayError> {
        let signing_pk = crypto::signing_public(&seed);
        let identity_pk = crypto::ed25519_to_x25519_public(&signing_pk)?;
        Ok(Self {
            identity: DeviceIdentity {
                user_id,
                device_id,
                identity_key: encode_b64(&identity_pk),
                signing_key: encode_b64(&signing_pk),
            },
            seed,
            state: Mutex::new(EngineState::default()),
        })
    }

    /// Device with a fresh random key.
    pub fn generate(user_id: UserId, device_id: DeviceId) -> Result<Self, RelayError> {
        let seed = *GroupKey::generate().as_bytes();
        Self::from_seed(user_id, device_id, seed)
    }

    /// Mark `peer` (exact keys included) as verified.
    pub async fn trust(&self, peer: DeviceIdentity) {
        tracing::debug!("trusting {peer}");
        self.state.lock().await.trusted.insert(peer);
    }

    /// Refuse to export `session_id` in `room_id` from now on.
    pub async fn withhold(&self, room_id: RoomId, session_id: impl Into<String>) {
        self.state
            .lock()
            .await
            .withheld
            .insert((room_id, session_id.into()));
    }

    /// Session id of the room's current outbound session, if one exists.
    pub async fn outbound_session_id(&self, room_id: &RoomId) -> Option<String> {
        self.state
            .lock()
            .await
            .outbound
            .get(room_id)
            .map(GroupKey::session_id)
    }

    pub async fn has_inbound_session(&self, room_id: &RoomId, sender_key: &str, session_id: &str) -> bool {
        self.state.lock().await.inbound.contains_key(&SessionKey {
            room_id: room_id.clone(),
            sender_key: sender_key.to_string(),
            session_id: session_id.to_string(),
        })
    }

    /// Forwarding chain recorded for an inbound session.
    pub async fn forwarding_chain(
        &self,
        room_id: &RoomId,
        sender_key: &str,
        session_id: &str,
    ) -> Option<Vec<String>> {
        self.state
            .lock()
            .await
            .inbound
            .get(&SessionKey {
                room_id: room_id.clone(),
                sender_key: sender_key.to_string(),
                session_id: session_id.to_string(),
            })
            .map(|s| s.forwarding_chain.clone())
    }
}

#[async_trait::async_trait]
impl CryptoEngine for MemoryCryptoEngine {
    fn own_identity(&self) -> DeviceIdentity {
        self.identity.clone()
    }

    async fn is_trusted(&self, peer: &DeviceIdentity) -> bool {
        self.state.lock().await.trusted.contains(peer)
    }

    async fn encrypt_point_to_point(
        &self,
        peer: &DeviceIdentity,
        plaintext: &[u8],
    ) -> Result<SealedBody, RelayError> {
        let sealed = crypto::seal_for(plaintext, &self.seed, &peer.signing_key_bytes()?)?;
        Ok(SealedBody(encode_b64(&sealed)))
    }

    async fn decrypt_point_to_point(
        &self,
        peer: &DeviceIdentity,
        body: &SealedBody,
    ) -> Result<Vec<u8>, RelayError> {
        let sealed = decode_b64(&body.0)?;
        crypto::open_from(&sealed, &self.seed, &peer.signing_key_bytes()?)
    }

    async fn encrypt_group_message(
        &self,
        room_id: &RoomId,
        sender: &UserId,
        content: &EventContent,
    ) -> Result<EncryptedContent, RelayError> {
        if matches!(content, EventContent::Encrypted(_)) {
            return Err(RelayError::Crypto("content is already encrypted".into()));
        }
        let plaintext = serde_json::to_vec(content)?;

        let mut state = self.state.lock().await;
        let key = match state.outbound.get(room_id) {
            Some(key) => key.clone(),
            None => {
                let key = GroupKey::generate();
                tracing::debug!("new outbound group session {} for {room_id}", key.session_id());
                state.outbound.insert(room_id.clone(), key.clone());
                // Keep an inbound copy so our own history stays readable.
                state.inbound.insert(
                    SessionKey {
                        room_id: room_id.clone(),
                        sender_key: self.identity.identity_key.clone(),
                        session_id: key.session_id(),
                    },
                    InboundSession {
                        key: key.clone(),
                        sender_claimed_key: self.identity.signing_key.clone(),
                        forwarding_chain: Vec::new(),
                    },
                );
                key
            }
        };
        drop(state);

        let ciphertext = key.encrypt(&plaintext, &group_aad(room_id, sender))?;
        Ok(EncryptedContent {
            algorithm: GROUP_ALGORITHM.to_string(),
            sender_key: self.identity.identity_key.clone(),
            session_id: key.session_id(),
            device_id: self.identity.device_id.clone(),
            ciphertext: encode_b64(&ciphertext),
        })
    }

    async fn decrypt_group_message(&self, event: &RoomEvent) -> Result<RoomEvent, GroupDecryptError> {
        let EventContent::Encrypted(content) = &event.content else {
            return Err(GroupDecryptError::Other("event is not encrypted".into()));
        };
        if content.algorithm != GROUP_ALGORITHM {
            return Err(GroupDecryptError::Other(format!(
                "unsupported algorithm {}",
                content.algorithm
            )));
        }

        let lookup = SessionKey {
            room_id: event.room_id.clone(),
            sender_key: content.sender_key.clone(),
            session_id: content.session_id.clone(),
        };
        let key = match self.state.lock().await.inbound.get(&lookup) {
            Some(session) => session.key.clone(),
            None => {
                return Err(GroupDecryptError::MissingSession {
                    room_id: lookup.room_id,
                    sender_key: lookup.sender_key,
                    session_id: lookup.session_id,
                })
            }
        };

        let ciphertext =
            decode_b64(&content.ciphertext).map_err(|e| GroupDecryptError::Other(e.to_string()))?;
        let plaintext = key
            .decrypt(&ciphertext, &group_aad(&event.room_id, &event.sender))
            .map_err(|e| GroupDecryptError::Other(e.to_string()))?;
        let inner: EventContent = serde_json::from_slice(&plaintext)
            .map_err(|e| GroupDecryptError::Other(format!("invalid decrypted content: {e}")))?;
        if matches!(inner, EventContent::Encrypted(_)) {
            return Err(GroupDecryptError::Other("nested encrypted content".into()));
        }

        Ok(event.with_content(inner))
    }

    async fn export_group_session(
        &self,
        room_id: &RoomId,
        sender_key: &str,
        session_id: &str,
    ) -> Result<ExportedSession, ExportError> {
        let state = self.state.lock().await;
        if state
            .withheld
            .contains(&(room_id.clone(), session_id.to_string()))
        {
            return Err(ExportError::Withheld);
        }
        let session = state
            .inbound
            .get(&SessionKey {
                room_id: room_id.clone(),
                sender_key: sender_key.to_string(),
                session_id: session_id.to_string(),
            })
            .ok_or(ExportError::NotFound)?;

        Ok(ExportedSession {
            algorithm: GROUP_ALGORITHM.to_string(),
            room_id: room_id.clone(),
            sender_key: sender_key.to_string(),
            session_id: session_id.to_string(),
            session_key: encode_b64(session.key.as_bytes()),
            sender_claimed_key: session.sender_claimed_key.clone(),
            forwarding_chain: session.forwarding_chain.clone(),
        })
    }

    async fn import_group_session(&self, session: ExportedSession) -> Result<(), RelayError> {
        if session.algorithm != GROUP_ALGORITHM {
            return Err(RelayError::Crypto(format!(
                "unsupported algorithm {}",
                session.algorithm
            )));
        }
        let key = GroupKey::from_bytes(decode_key(&session.session_key)?);
        if key.session_id() != session.session_id {
            return Err(RelayError::Crypto(format!(
                "session id mismatch: claimed {}, key is {}",
                session.session_id,
                key.session_id()
            )));
        }

        let lookup = SessionKey {
            room_id: session.room_id,
            sender_key: session.sender_key,
            session_id: session.session_id,
        };
        let mut state = self.state.lock().await;
        if state.inbound.contains_key(&lookup) {
            tracing::debug!("group session {} already known", lookup.session_id);
            return Ok(());
        }
        tracing::info!(
            "imported group session {} for {} (forwarded {} times)",
            lookup.session_id,
            lookup.room_id,
            session.forwarding_chain.len()
        );
        state.inbound.insert(
            lookup,
            InboundSession {
                key,
                sender_claimed_key: session.sender_claimed_key,
                forwarding_chain: session.forwarding_chain,
            },
        );
        Ok(())
    }
}
