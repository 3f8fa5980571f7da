//! Relay handshake over one peer stream.
//!
//! ```text
//! sender                              receiver
//!   ── DeviceIdentity ──────────────────▶
//!   ◀────────────────── DeviceIdentity ──
//!   ── EventPayload ────────────────────▶   (trusted + owed only)
//!   ◀──────────────────────── KeyRequest ─   (only if the group session is missing)
//!   ── KeyForward ──────────────────────▶
//!   ◀─────────────────────── RelayResult ─
//!   close                                  close
//! ```
//!
//! One event per stream, strictly request/response. Identity frames are
//! only claims; every later frame is sealed with [`CryptoEngine`]'s
//! point-to-point encryption, which fails unless the peer holds the signing
//! key it claimed. The sender counts a delivery only from a `RelayResult`
//! that echoes the payload's `relay_id`.
mod receiver;
mod sender;

pub use receiver::run_receiver;
pub use sender::run_sender;

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use offgrid_transport::PeerStream;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_util::sync::CancellationToken;

use crate::engine::CryptoEngine;
use crate::store::{HistoryStore, RoomDirectory};
use crate::types::DeviceIdentity;
use crate::wire::SealedBody;
use crate::RelayError;

/// Collaborators shared by every handshake task.
#[derive(Clone)]
pub struct HandshakeContext {
    pub engine: Arc<dyn CryptoEngine>,
    pub history: Arc<dyn HistoryStore>,
    pub directory: Arc<dyn RoomDirectory>,
}

impl HandshakeContext {
    pub fn new(
        engine: Arc<dyn CryptoEngine>,
        history: Arc<dyn HistoryStore>,
        directory: Arc<dyn RoomDirectory>,
    ) -> Self {
        Self {
            engine,
            history,
            directory,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UndeliverableReason {
    /// The other device is not verified.
    Untrusted,
    /// The other user was never missing this event.
    NotOwed,
    /// The event is gone from local history.
    EventMissing,
    SessionWithheld,
    SessionNotFound,
    /// A key request named a session other than the relayed one.
    RequestMismatch,
    /// The sender closed instead of answering a key request.
    NoKeyForward,
    /// A key forward failed authentication or import.
    ForwardRejected,
    /// The receiver closed without confirming what it did with the event.
    Unconfirmed,
}

impl fmt::Display for UndeliverableReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            UndeliverableReason::Untrusted => "peer device is not trusted",
            UndeliverableReason::NotOwed => "peer was not missing the event",
            UndeliverableReason::EventMissing => "event not in local history",
            UndeliverableReason::SessionWithheld => "group session is withheld",
            UndeliverableReason::SessionNotFound => "group session not found",
            UndeliverableReason::RequestMismatch => "key request does not match the relayed event",
            UndeliverableReason::NoKeyForward => "no key forward received",
            UndeliverableReason::ForwardRejected => "key forward rejected",
            UndeliverableReason::Unconfirmed => "receiver did not confirm",
        };
        f.write_str(s)
    }
}

/// How a handshake ended when no transport or protocol fault occurred.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakeOutcome {
    Delivered,
    /// The receiver already had the event. Not an error.
    AlreadyPresent,
    Undeliverable(UndeliverableReason),
}

impl HandshakeOutcome {
    /// Whether the peer now has the event.
    pub fn peer_has_event(&self) -> bool {
        matches!(self, HandshakeOutcome::Delivered | HandshakeOutcome::AlreadyPresent)
    }
}

impl fmt::Display for HandshakeOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HandshakeOutcome::Delivered => f.write_str("delivered"),
            HandshakeOutcome::AlreadyPresent => f.write_str("already present"),
            HandshakeOutcome::Undeliverable(reason) => write!(f, "undeliverable: {reason}"),
        }
    }
}

/// Result of a handshake that got as far as learning the peer's identity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandshakeReport {
    pub peer: DeviceIdentity,
    pub outcome: HandshakeOutcome,
}

impl HandshakeReport {
    fn new(peer: &DeviceIdentity, outcome: HandshakeOutcome) -> Self {
        Self {
            peer: peer.clone(),
            outcome,
        }
    }
}

/// Run `fut` until it finishes, `timeout` elapses or `cancel` fires.
pub async fn with_deadline<T, F>(
    timeout: Duration,
    cancel: &CancellationToken,
    fut: F,
) -> Result<T, RelayError>
where
    F: Future<Output = Result<T, RelayError>>,
{
    tokio::select! {
        _ = cancel.cancelled() => Err(RelayError::Cancelled),
        res = tokio::time::timeout(timeout, fut) => {
            res.unwrap_or(Err(RelayError::Timeout(timeout)))
        }
    }
}

/// Seal `value` as JSON for `peer`.
async fn seal<T: Serialize>(
    ctx: &HandshakeContext,
    peer: &DeviceIdentity,
    value: &T,
) -> Result<SealedBody, RelayError> {
    ctx.engine
        .encrypt_point_to_point(peer, &serde_json::to_vec(value)?)
        .await
}

/// Open a body `peer` sealed for us. Fails if `peer` does not hold the
/// signing key it claimed.
async fn open<T: DeserializeOwned>(
    ctx: &HandshakeContext,
    peer: &DeviceIdentity,
    body: &SealedBody,
) -> Result<T, RelayError> {
    let plaintext = ctx.engine.decrypt_point_to_point(peer, body).await?;
    Ok(serde_json::from_slice(&plaintext)?)
}

/// Flush and close our side; a failure here does not change the outcome.
async fn close<S>(stream: &mut PeerStream<S>)
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    if let Err(e) = stream.finish().await {
        tracing::debug!("closing relay stream failed: {e}");
    }
}
