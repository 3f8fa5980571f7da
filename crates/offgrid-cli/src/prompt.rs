use std::io::{BufRead, Write};
use std::sync::Arc;

use offgrid_relay::{
    CryptoEngine, DeviceIdentity, EncryptedContent, EventContent, ExportError, ExportedSession,
    GroupDecryptError, MemoryCryptoEngine, RelayError, RoomEvent, RoomId, SealedBody, UserId,
};
use tokio::sync::Mutex;

/// [`MemoryCryptoEngine`] that asks the operator before trusting an unknown device.
///
/// A "yes" is remembered for the rest of the run.
pub struct PromptingEngine {
    inner: Arc<MemoryCryptoEngine>,
    prompt: Mutex<()>,
}

impl PromptingEngine {
    pub fn new(inner: Arc<MemoryCryptoEngine>) -> Self {
        Self {
            inner,
            prompt: Mutex::new(()),
        }
    }

    async fn ask(&self, peer: &DeviceIdentity) -> bool {
        let question = format!(
            "Trust device {peer} (signing key {})? [y/N] ",
            peer.signing_key
        );
        let answer = tokio::task::spawn_blocking(move || {
            let mut stderr = std::io::stderr();
            let _ = write!(stderr, "{question}");
            let _ = stderr.flush();
            let mut line = String::new();
            std::io::stdin().lock().read_line(&mut line).map(|_| line)
        })
        .await;

        match answer {
            Ok(Ok(line)) => matches!(line.trim().to_ascii_lowercase().as_str(), "y" | "yes"),
            Ok(Err(e)) => {
                tracing::warn!("reading trust answer failed: {e}");
                false
            }
            Err(e) => {
                tracing::warn!("trust prompt task failed: {e}");
                false
            }
        }
    }
}

#[async_trait::async_trait]
impl CryptoEngine for PromptingEngine {
    fn own_identity(&self) -> DeviceIdentity {
        self.inner.own_identity()
    }

    async fn is_trusted(&self, peer: &DeviceIdentity) -> bool {
        if self.inner.is_trusted(peer).await {
            return true;
        }
        // One question at a time; a concurrent handshake may have answered it.
        let _guard = self.prompt.lock().await;
        if self.inner.is_trusted(peer).await {
            return true;
        }
        if self.ask(peer).await {
            self.inner.trust(peer.clone()).await;
            return true;
        }
        false
    }

    async fn encrypt_point_to_point(
        &self,
        peer: &DeviceIdentity,
        plaintext: &[u8],
    ) -> Result<SealedBody, RelayError> {
        self.inner.encrypt_point_to_point(peer, plaintext).await
    }

    async fn decrypt_point_to_point(
        &self,
        peer: &DeviceIdentity,
        body: &SealedBody,
    ) -> Result<Vec<u8>, RelayError> {
        self.inner.decrypt_point_to_point(peer, body).await
    }

    async fn encrypt_group_message(
        &self,
        room_id: &RoomId,
        sender: &UserId,
        content: &EventContent,
    ) -> Result<EncryptedContent, RelayError> {
        self.inner.encrypt_group_message(room_id, sender, content).await
    }

    async fn decrypt_group_message(&self, event: &RoomEvent) -> Result<RoomEvent, GroupDecryptError> {
        self.inner.decrypt_group_message(event).await
    }

    async fn export_group_session(
        &self,
        room_id: &RoomId,
        sender_key: &str,
        session_id: &str,
    ) -> Result<ExportedSession, ExportError> {
        self.inner
            .export_group_session(room_id, sender_key, session_id)
            .await
    }

    async fn import_group_session(&self, session: ExportedSession) -> Result<(), RelayError> {
        self.inner.import_group_session(session).await
    }
}
