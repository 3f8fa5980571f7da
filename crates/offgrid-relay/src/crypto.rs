/// Cryptographic primitives behind the in-memory crypto engine.
///
/// Point-to-point: ephemeral X25519 Diffie-Hellman + HKDF-SHA256 +
/// XChaCha20-Poly1305, with the plaintext signed by the sender's Ed25519 key
/// and bound to the recipient's key before sealing.
///
/// Group: one symmetric XChaCha20-Poly1305 key per session. The session id
/// is derived from the key, so imported material can be checked against the
/// id it claims.
use chacha20poly1305::{
    aead::{Aead, KeyInit, Payload},
    XChaCha20Poly1305, XNonce,
};
use curve25519_dalek::edwards::CompressedEdwardsY;
use ed25519_dalek::Signer;
use hkdf::Hkdf;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256, Sha512};
use x25519_dalek::{PublicKey as X25519PublicKey, StaticSecret as X25519Secret};

use crate::RelayError;

/// HKDF info string for domain separation.
const HKDF_INFO: &[u8] = b"offgrid-relay-p2p-xchacha20poly1305-v1";

/// Prefix of every point-to-point signature.
const SEAL_CONTEXT: &[u8] = b"offgrid-relay-seal-v1";

/// Prefix hashed with group keys to derive their session id.
const SESSION_ID_CONTEXT: &[u8] = b"offgrid-relay-session-id-v1";

/// Encrypted payload with ephemeral key exchange metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EncryptedPayload {
    /// XChaCha20-Poly1305 ciphertext (includes 16-byte auth tag).
    pub ciphertext: Vec<u8>,
    pub nonce: [u8; 24],
    /// Sender's ephemeral X25519 public key.
    pub ephemeral_pk: [u8; 32],
}

impl EncryptedPayload {
    /// Serialize to MessagePack bytes.
    pub fn to_bytes(&self) -> Result<Vec<u8>, RelayError> {
        rmp_serde::to_vec(self).map_err(Into::into)
    }

    /// Deserialize from MessagePack bytes.
    pub fn from_bytes(data: &[u8]) -> Result<Self, RelayError> {
        rmp_serde::from_slice(data).map_err(Into::into)
    }
}

/// Signed plaintext inside a sealed envelope.
#[derive(Debug, Serialize, Deserialize)]
struct SignedPlaintext {
    sender_pk: [u8; 32],
    recipient_pk: [u8; 32],
    plaintext: Vec<u8>,
    signature: Vec<u8>,
}

/// Convert an Ed25519 public key to an X25519 public key.
///
/// Equivalent to libsodium's `crypto_sign_ed25519_pk_to_curve25519`.
pub fn ed25519_to_x25519_public(ed25519_pk: &[u8; 32]) -> Result<[u8; 32], RelayError> {
    let compressed = CompressedEdwardsY(*ed25519_pk);
    let edwards = compressed.decompress().ok_or_else(|| {
        RelayError::Crypto("invalid Ed25519 public key: decompression failed".into())
    })?;
    Ok(edwards.to_montgomery().to_bytes())
}

/// Convert an Ed25519 seed to an X25519 secret: SHA-512(seed), first 32 bytes, clamped.
pub fn ed25519_to_x25519_secret(ed25519_seed: &[u8; 32]) -> [u8; 32] {
    let hash = Sha512::digest(ed25519_seed);
    let mut secret = [0u8; 32];
    secret.copy_from_slice(&hash[..32]);
    secret[0] &= 248;
    secret[31] &= 127;
    secret[31] |= 64;
    secret
}

/// Ed25519 public key for a 32-byte seed.
pub fn signing_public(seed: &[u8; 32]) -> [u8; 32] {
    ed25519_dalek::SigningKey::from_bytes(seed)
        .verifying_key()
        .to_bytes()
}

fn derive_key(shared_secret: &[u8; 32]) -> [u8; 32] {
    let hkdf = Hkdf::<Sha256>::new(None, shared_secret);
    let mut key = [0u8; 32];
    hkdf.expand(HKDF_INFO, &mut key)
        .expect("HKDF-SHA256 expand to 32 bytes always succeeds");
    key
}

fn random_bytes<const N: usize>() -> [u8; N] {
    use chacha20poly1305::aead::rand_core::{OsRng, RngCore};
    let mut out = [0u8; N];
    OsRng.fill_bytes(&mut out);
    out
}

/// Encrypt plaintext for a recipient identified by their Ed25519 public key.
pub fn encrypt(
    plaintext: &[u8],
    recipient_ed25519_pk: &[u8; 32],
) -> Result<EncryptedPayload, RelayError> {
    use chacha20poly1305::aead::rand_core::OsRng;

    let recipient_x25519 = X25519PublicKey::from(ed25519_to_x25519_public(recipient_ed25519_pk)?);

    let ephemeral_secret = X25519Secret::random_from_rng(OsRng);
    let ephemeral_public = X25519PublicKey::from(&ephemeral_secret);

    let shared_secret = ephemeral_secret.diffie_hellman(&recipient_x25519);
    let cipher = XChaCha20Poly1305::new(&derive_key(shared_secret.as_bytes()).into());

    let nonce_bytes = random_bytes::<24>();
    let ciphertext = cipher
        .encrypt(&XNonce::from(nonce_bytes), plaintext)
        .map_err(|e| RelayError::Crypto(format!("encryption failed: {e}")))?;

    Ok(EncryptedPayload {
        ciphertext,
        nonce: nonce_bytes,
        ephemeral_pk: ephemeral_public.to_bytes(),
    })
}

/// Decrypt an [`EncryptedPayload`] with the recipient's Ed25519 seed.
pub fn decrypt(
    payload: &EncryptedPayload,
    recipient_ed25519_seed: &[u8; 32],
) -> Result<Vec<u8>, RelayError> {
    let x25519_secret = X25519Secret::from(ed25519_to_x25519_secret(recipient_ed25519_seed));
    let ephemeral_pk = X25519PublicKey::from(payload.ephemeral_pk);

    let shared_secret = x25519_secret.diffie_hellman(&ephemeral_pk);
    let cipher = XChaCha20Poly1305::new(&derive_key(shared_secret.as_bytes()).into());

    cipher
        .decrypt(&XNonce::from(payload.nonce), payload.ciphertext.as_ref())
        .map_err(|_| RelayError::Crypto("decryption failed: authentication error".into()))
}

fn seal_signing_bytes(sender_pk: &[u8; 32], recipient_pk: &[u8; 32], plaintext: &[u8]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(SEAL_CONTEXT.len() + 64 + plaintext.len());
    buf.extend_from_slice(SEAL_CONTEXT);
    buf.extend_from_slice(sender_pk);
    buf.extend_from_slice(recipient_pk);
    buf.extend_from_slice(plaintext);
    buf
}

/// Sign `plaintext` with `sender_seed`, bind it to `recipient_pk`, then encrypt
/// it so only that recipient can open it.
pub fn seal_for(
    plaintext: &[u8],
    sender_seed: &[u8; 32],
    recipient_pk: &[u8; 32],
) -> Result<Vec<u8>, RelayError> {
    let signing_key = ed25519_dalek::SigningKey::from_bytes(sender_seed);
    let sender_pk = signing_key.verifying_key().to_bytes();
    let signature = signing_key.sign(&seal_signing_bytes(&sender_pk, recipient_pk, plaintext));

    let inner = SignedPlaintext {
        sender_pk,
        recipient_pk: *recipient_pk,
        plaintext: plaintext.to_vec(),
        signature: signature.to_bytes().to_vec(),
    };
    let inner_bytes = rmp_serde::to_vec(&inner)?;
    encrypt(&inner_bytes, recipient_pk)?.to_bytes()
}

/// Open an envelope produced by [`seal_for`].
///
/// Fails unless it was sealed for the key behind `recipient_seed` and signed
/// by `expected_sender_pk`.
pub fn open_from(
    sealed: &[u8],
    recipient_seed: &[u8; 32],
    expected_sender_pk: &[u8; 32],
) -> Result<Vec<u8>, RelayError> {
    let payload = EncryptedPayload::from_bytes(sealed)?;
    let inner: SignedPlaintext = rmp_serde::from_slice(&decrypt(&payload, recipient_seed)?)?;

    if inner.recipient_pk != signing_public(recipient_seed) {
        return Err(RelayError::Crypto("envelope sealed for another recipient".into()));
    }
    if inner.sender_pk != *expected_sender_pk {
        return Err(RelayError::InvalidSignature);
    }

    let verifying_key = ed25519_dalek::VerifyingKey::from_bytes(&inner.sender_pk)
        .map_err(|_| RelayError::InvalidSignature)?;
    let sig_bytes: [u8; 64] = inner
        .signature
        .as_slice()
        .try_into()
        .map_err(|_| RelayError::InvalidSignature)?;
    verifying_key
        .verify_strict(
            &seal_signing_bytes(&inner.sender_pk, &inner.recipient_pk, &inner.plaintext),
            &ed25519_dalek::Signature::from_bytes(&sig_bytes),
        )
        .map_err(|_| RelayError::InvalidSignature)?;

    Ok(inner.plaintext)
}

/// Symmetric key of one group session.
#[derive(Clone, PartialEq, Eq)]
pub struct GroupKey([u8; 32]);

impl std::fmt::Debug for GroupKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "GroupKey({})", self.session_id())
    }
}

impl GroupKey {
    pub fn generate() -> Self {
        Self(random_bytes::<32>())
    }

    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Public session id: first 16 bytes of SHA-256 over the key, base64.
    pub fn session_id(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(SESSION_ID_CONTEXT);
        hasher.update(self.0);
        crate::types::encode_b64(&hasher.finalize()[..16])
    }

    /// Encrypt with `aad` bound as associated data. Output is `nonce || ciphertext`.
    pub fn encrypt(&self, plaintext: &[u8], aad: &[u8]) -> Result<Vec<u8>, RelayError> {
        let cipher = XChaCha20Poly1305::new(&self.0.into());
        let nonce = random_bytes::<24>();
        let ciphertext = cipher
            .encrypt(
                &XNonce::from(nonce),
                Payload {
                    msg: plaintext,
                    aad,
                },
            )
            .map_err(|e| RelayError::Crypto(format!("group encryption failed: {e}")))?;
        let mut out = Vec::with_capacity(24 + ciphertext.len());
        out.extend_from_slice(&nonce);
        out.extend_from_slice(&ciphertext);
        Ok(out)
    }

    pub fn decrypt(&self, data: &[u8], aad: &[u8]) -> Result<Vec<u8>, RelayError> {
        if data.len() < 24 {
            return Err(RelayError::Crypto("group ciphertext truncated".into()));
        }
        let (nonce, ciphertext) = data.split_at(24);
        let cipher = XChaCha20Poly1305::new(&self.0.into());
        cipher
            .decrypt(
                XNonce::from_slice(nonce),
                Payload {
                    msg: ciphertext,
                    aad,
                },
            )
            .map_err(|_| RelayError::Crypto("group decryption failed: authentication error".into()))
    }
}
