use std::net::SocketAddr;
use std::time::Duration;

use tokio_util::codec::LinesCodecError;

/// Errors returned by the offgrid transport layer.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    #[error("connection to {addr} failed: {source}")]
    Connect {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    #[error("connection to {addr} timed out after {timeout:?}")]
    ConnectTimeout { addr: SocketAddr, timeout: Duration },

    #[error("stream i/o failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("frame exceeds the {max} byte limit")]
    FrameTooLarge { max: usize },

    #[error("frame serialization failed: {0}")]
    Serialization(#[source] serde_json::Error),

    #[error("frame deserialization failed: {0}")]
    Deserialization(#[source] serde_json::Error),

    #[error("protocol mismatch: expected {expected:?}, got {got:?}")]
    ProtocolMismatch { expected: String, got: String },

    #[error("stream closed before protocol negotiation")]
    Closed,

    #[error("discovery socket failed: {0}")]
    Discovery(#[source] std::io::Error),

    #[error("transport is shut down")]
    Shutdown,

    #[error("invalid configuration: {0}")]
    Config(String),
}

impl TransportError {
    /// Map a line codec failure, attaching the frame limit the codec enforced.
    pub(crate) fn from_codec(e: LinesCodecError, max: usize) -> Self {
        match e {
            LinesCodecError::MaxLineLengthExceeded => TransportError::FrameTooLarge { max },
            LinesCodecError::Io(io) => TransportError::Io(io),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connect_error_names_the_address() {
        let err = TransportError::Connect {
            addr: "10.0.0.7:9000".parse().unwrap(),
            source: std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "refused"),
        };
        assert_eq!(err.to_string(), "connection to 10.0.0.7:9000 failed: refused");
    }

    #[test]
    fn codec_io_error_maps_to_io() {
        let err = TransportError::from_codec(
            LinesCodecError::Io(std::io::Error::new(std::io::ErrorKind::BrokenPipe, "gone")),
            64,
        );
        assert!(matches!(err, TransportError::Io(_)));
    }

    #[test]
    fn codec_length_error_maps_to_frame_too_large() {
        let err = TransportError::from_codec(LinesCodecError::MaxLineLengthExceeded, 64);
        assert!(matches!(err, TransportError::FrameTooLarge { max: 64 }));
        assert_eq!(err.to_string(), "frame exceeds the 64 byte limit");
    }
}
