//! Line-delimited JSON framing for relay streams.
//!
//! Every logical message is one JSON document terminated by `\n`. The first
//! line of a stream is the protocol id, written by the dialing side and
//! checked by the accepting side.

use futures_util::{SinkExt, StreamExt};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_util::codec::{Framed, LinesCodec};

use crate::{TransportError, PROTOCOL_ID};

/// A framed relay stream. Owned by exactly one task.
pub struct PeerStream<S> {
    framed: Framed<S, LinesCodec>,
    max_frame_size: usize,
}

impl<S> std::fmt::Debug for PeerStream<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PeerStream")
            .field("max_frame_size", &self.max_frame_size)
            .finish()
    }
}

impl<S> PeerStream<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    /// Wrap `io` without any protocol negotiation.
    pub fn new(io: S, max_frame_size: usize) -> Self {
        Self {
            framed: Framed::new(io, LinesCodec::new_with_max_length(max_frame_size)),
            max_frame_size,
        }
    }

    /// Dialing side: announce the relay protocol on a fresh stream.
    pub async fn open(io: S, max_frame_size: usize) -> Result<Self, TransportError> {
        let mut stream = Self::new(io, max_frame_size);
        stream
            .framed
            .send(PROTOCOL_ID)
            .await
            .map_err(|e| TransportError::from_codec(e, max_frame_size))?;
        Ok(stream)
    }

    /// Accepting side: require the relay protocol line before anything else.
    pub async fn accept(io: S, max_frame_size: usize) -> Result<Self, TransportError> {
        let mut stream = Self::new(io, max_frame_size);
        let line = match stream.framed.next().await {
            Some(line) => line.map_err(|e| TransportError::from_codec(e, max_frame_size))?,
            None => return Err(TransportError::Closed),
        };
        if line != PROTOCOL_ID {
            return Err(TransportError::ProtocolMismatch {
                expected: PROTOCOL_ID.to_string(),
                got: line,
            });
        }
        Ok(stream)
    }

    /// Serialize `msg` as one frame and flush it.
    pub async fn send<T: Serialize>(&mut self, msg: &T) -> Result<(), TransportError> {
        let line = serde_json::to_string(msg).map_err(TransportError::Serialization)?;
        if line.len() > self.max_frame_size {
            return Err(TransportError::FrameTooLarge {
                max: self.max_frame_size,
            });
        }
        tracing::trace!(len = line.len(), "sending frame");
        self.framed
            .send(line)
            .await
            .map_err(|e| TransportError::from_codec(e, self.max_frame_size))
    }

    /// Read the next frame. `Ok(None)` means the peer closed its side cleanly.
    pub async fn recv<T: DeserializeOwned>(&mut self) -> Result<Option<T>, TransportError> {
        match self.framed.next().await {
            None => Ok(None),
            Some(line) => {
                let line = line.map_err(|e| TransportError::from_codec(e, self.max_frame_size))?;
                tracing::trace!(len = line.len(), "received frame");
                serde_json::from_str(&line)
                    .map(Some)
                    .map_err(TransportError::Deserialization)
            }
        }
    }

    /// Flush pending writes, then shut down the write side.
    ///
    /// Reading remains possible until the peer closes its side.
    pub async fn finish(&mut self) -> Result<(), TransportError> {
        SinkExt::<String>::close(&mut self.framed)
            .await
            .map_err(|e| TransportError::from_codec(e, self.max_frame_size))
    }

    pub fn into_inner(self) -> S {
        self.framed.into_inner()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Note {
        text: String,
    }

    #[tokio::test]
    async fn frames_survive_embedded_newlines() {
        let (a, b) = tokio::io::duplex(4096);
        let mut tx = PeerStream::open(a, 1024).await.unwrap();
        let mut rx = PeerStream::accept(b, 1024).await.unwrap();

        let note = Note {
            text: "line one\nline two\r\n".into(),
        };
        tx.send(&note).await.unwrap();
        tx.send(&Note { text: "next".into() }).await.unwrap();

        assert_eq!(rx.recv::<Note>().await.unwrap(), Some(note));
        assert_eq!(rx.recv::<Note>().await.unwrap().unwrap().text, "next");
    }

    #[tokio::test]
    async fn finish_yields_clean_eof() {
        let (a, b) = tokio::io::duplex(4096);
        let mut tx = PeerStream::open(a, 1024).await.unwrap();
        let mut rx = PeerStream::accept(b, 1024).await.unwrap();

        tx.send(&Note { text: "last".into() }).await.unwrap();
        tx.finish().await.unwrap();

        assert!(rx.recv::<Note>().await.unwrap().is_some());
        assert!(rx.recv::<Note>().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn wrong_protocol_line_is_rejected() {
        let (mut a, b) = tokio::io::duplex(4096);
        a.write_all(b"/something-else/2.0\n").await.unwrap();

        let err = PeerStream::accept(b, 1024).await.unwrap_err();
        assert!(matches!(err, TransportError::ProtocolMismatch { .. }));
    }

    #[tokio::test]
    async fn accept_on_closed_stream_fails() {
        let (a, b) = tokio::io::duplex(64);
        drop(a);
        let err = PeerStream::accept(b, 1024).await.unwrap_err();
        assert!(matches!(err, TransportError::Closed));
    }

    #[tokio::test]
    async fn oversized_outbound_frame_is_not_written() {
        let (a, mut b) = tokio::io::duplex(4096);
        let mut tx = PeerStream::new(a, 16);

        let err = tx
            .send(&Note {
                text: "x".repeat(64),
            })
            .await
            .unwrap_err();
        assert!(matches!(err, TransportError::FrameTooLarge { max: 16 }));

        drop(tx);
        let mut written = Vec::new();
        b.read_to_end(&mut written).await.unwrap();
        assert!(written.is_empty());
    }

    #[tokio::test]
    async fn oversized_inbound_frame_is_rejected() {
        let (mut a, b) = tokio::io::duplex(4096);
        let mut rx = PeerStream::new(b, 16);
        a.write_all(format!("{{\"text\":\"{}\"}}\n", "y".repeat(64)).as_bytes())
            .await
            .unwrap();

        let err = rx.recv::<Note>().await.unwrap_err();
        assert!(matches!(err, TransportError::FrameTooLarge { max: 16 }));
    }

    #[tokio::test]
    async fn garbage_frame_is_a_deserialization_error() {
        let (mut a, b) = tokio::io::duplex(4096);
        let mut rx = PeerStream::new(b, 1024);
        a.write_all(b"not json\n").await.unwrap();

        let err = rx.recv::<Note>().await.unwrap_err();
        assert!(matches!(err, TransportError::Deserialization(_)));
    }
}
