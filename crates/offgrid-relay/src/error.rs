use std::time::Duration;

/// Relay-level errors.
///
/// Wraps transport errors and adds the failures one relay attempt can hit
/// (crypto, protocol violations, collaborator stores, timeouts). None of
/// these are fatal to the process; callers log them and move on.
#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    #[error("transport error: {0}")]
    Transport(#[from] offgrid_transport::TransportError),

    #[error("crypto error: {0}")]
    Crypto(String),

    #[error("decryption failed: {0}")]
    Decrypt(String),

    #[error("protocol violation: {reason}")]
    Protocol { reason: String },

    #[error("peer closed the stream while waiting for {stage}")]
    PeerClosed { stage: &'static str },

    #[error("store error: {0}")]
    Store(String),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("deserialization error: {0}")]
    Deserialization(String),

    #[error("signature verification failed")]
    InvalidSignature,

    #[error("handshake timed out after {0:?}")]
    Timeout(Duration),

    #[error("cancelled")]
    Cancelled,

    #[error("relay service is shut down")]
    Shutdown,
}

impl RelayError {
    pub(crate) fn protocol(reason: impl Into<String>) -> Self {
        RelayError::Protocol {
            reason: reason.into(),
        }
    }
}

impl From<rmp_serde::encode::Error> for RelayError {
    fn from(e: rmp_serde::encode::Error) -> Self {
        RelayError::Serialization(e.to_string())
    }
}

impl From<rmp_serde::decode::Error> for RelayError {
    fn from(e: rmp_serde::decode::Error) -> Self {
        RelayError::Deserialization(e.to_string())
    }
}

impl From<serde_json::Error> for RelayError {
    fn from(e: serde_json::Error) -> Self {
        if e.is_data() || e.is_syntax() || e.is_eof() {
            RelayError::Deserialization(e.to_string())
        } else {
            RelayError::Serialization(e.to_string())
        }
    }
}
