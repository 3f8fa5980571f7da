use offgrid_transport::PeerStream;
use tokio::io::{AsyncRead, AsyncWrite};

use super::{close, open, seal, HandshakeContext, HandshakeOutcome, HandshakeReport, UndeliverableReason};
use crate::engine::GroupDecryptError;
use crate::types::{DeviceIdentity, EventContent, RoomEvent, RoomId};
use crate::wire::{ForwardedRoomKey, KeyRequest, RelayPayload, RelayResult, RelayStatus, WireMessage};
use crate::RelayError;

use HandshakeOutcome::{AlreadyPresent, Delivered, Undeliverable};

/// Outcome of asking the sender for a missing group session.
enum KeyFetch {
    Imported,
    Failed(UndeliverableReason),
}

/// Receiver role: accept one relayed event from the peer on `stream`.
///
/// Whatever happens to the event, the sender is told with a sealed
/// [`RelayResult`]. Faults (bad seal, forged sender, undecryptable content)
/// end the stream without one.
pub async fn run_receiver<S>(
    ctx: &HandshakeContext,
    stream: &mut PeerStream<S>,
) -> Result<HandshakeReport, RelayError>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    let peer: DeviceIdentity = stream.recv().await?.ok_or(RelayError::PeerClosed {
        stage: "peer identity",
    })?;
    let own = ctx.engine.own_identity();
    stream.send(&own).await?;

    let body = match stream.recv::<WireMessage>().await? {
        Some(WireMessage::EventPayload(body)) => body,
        Some(other) => {
            return Err(RelayError::protocol(format!(
                "expected event payload, got {}",
                other.kind()
            )))
        }
        None => return Err(RelayError::PeerClosed { stage: "event payload" }),
    };
    let RelayPayload { relay_id, event } = open(ctx, &peer, &body).await?;

    let outcome = accept_event(ctx, stream, &own, &peer, event).await?;
    let status = match outcome {
        Delivered => RelayStatus::Stored,
        AlreadyPresent => RelayStatus::AlreadyPresent,
        Undeliverable(reason) => RelayStatus::Refused(reason),
    };
    confirm(ctx, stream, &peer, &RelayResult { relay_id, status }).await;
    close(stream).await;
    Ok(HandshakeReport::new(&peer, outcome))
}

async fn accept_event<S>(
    ctx: &HandshakeContext,
    stream: &mut PeerStream<S>,
    own: &DeviceIdentity,
    peer: &DeviceIdentity,
    event: RoomEvent,
) -> Result<HandshakeOutcome, RelayError>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    if !ctx.engine.is_trusted(peer).await {
        tracing::info!("refusing relay from untrusted device {peer}");
        return Ok(Undeliverable(UndeliverableReason::Untrusted));
    }
    if ctx.history.get(&event.room_id, &event.event_id).await?.is_some() {
        tracing::debug!("{} already in history, ignoring relay from {peer}", event.event_id);
        return Ok(AlreadyPresent);
    }
    if event.sender != peer.user_id {
        return Err(RelayError::protocol(format!(
            "{peer} relayed {} sent by {}",
            event.event_id, event.sender
        )));
    }

    let plain = match event.content {
        EventContent::Receipt(_) => {
            return Err(RelayError::protocol("receipts are never relayed"));
        }
        EventContent::Message(_) => {
            if ctx.directory.is_encrypted(&event.room_id).await? {
                return Err(RelayError::protocol(format!(
                    "plaintext {} relayed for encrypted room {}",
                    event.event_id, event.room_id
                )));
            }
            event
        }
        EventContent::Encrypted(_) => match ctx.engine.decrypt_group_message(&event).await {
            Ok(plain) => plain,
            Err(GroupDecryptError::MissingSession {
                room_id,
                sender_key,
                session_id,
            }) => {
                tracing::debug!("missing group session {session_id} for {}, requesting it", event.event_id);
                match request_session(ctx, stream, own, peer, room_id, sender_key, session_id).await? {
                    KeyFetch::Imported => ctx
                        .engine
                        .decrypt_group_message(&event)
                        .await
                        .map_err(|e| RelayError::Decrypt(e.to_string()))?,
                    KeyFetch::Failed(reason) => {
                        tracing::info!("dropping relayed {} from {peer}: {reason}", event.event_id);
                        return Ok(Undeliverable(reason));
                    }
                }
            }
            Err(GroupDecryptError::Other(e)) => return Err(RelayError::Decrypt(e)),
        },
    };

    if !ctx.history.append(plain.clone()).await? {
        return Ok(AlreadyPresent);
    }
    ctx.history.mark_read(&plain.room_id, &plain.event_id).await?;
    tracing::info!("stored {} relayed by {peer}", plain.event_id);
    Ok(Delivered)
}

/// Tell the sender what became of its event. The sender may already be gone.
async fn confirm<S>(
    ctx: &HandshakeContext,
    stream: &mut PeerStream<S>,
    peer: &DeviceIdentity,
    result: &RelayResult,
) where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    let sent = async {
        let body = seal(ctx, peer, result).await?;
        stream.send(&WireMessage::RelayResult(body)).await?;
        Ok::<_, RelayError>(())
    };
    if let Err(e) = sent.await {
        tracing::debug!("could not confirm relay to {peer}: {e}");
    }
}

async fn request_session<S>(
    ctx: &HandshakeContext,
    stream: &mut PeerStream<S>,
    own: &DeviceIdentity,
    peer: &DeviceIdentity,
    room_id: RoomId,
    sender_key: String,
    session_id: String,
) -> Result<KeyFetch, RelayError>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    let request = KeyRequest {
        request_id: uuid::Uuid::new_v4().to_string(),
        room_id,
        sender_key,
        session_id,
        requesting_device: own.device_id.clone(),
    };
    stream
        .send(&WireMessage::KeyRequest(seal(ctx, peer, &request).await?))
        .await?;

    let body = match stream.recv::<WireMessage>().await? {
        Some(WireMessage::KeyForward(body)) => body,
        Some(other) => {
            return Err(RelayError::protocol(format!(
                "expected key forward, got {}",
                other.kind()
            )))
        }
        None => return Ok(KeyFetch::Failed(UndeliverableReason::NoKeyForward)),
    };

    let forward: ForwardedRoomKey = match open(ctx, peer, &body).await {
        Ok(forward) => forward,
        Err(e) => {
            tracing::warn!("unreadable key forward from {peer}: {e}");
            return Ok(KeyFetch::Failed(UndeliverableReason::ForwardRejected));
        }
    };
    if let Err(problem) = check_forward(&forward, &request, own, peer) {
        tracing::warn!("rejecting key forward from {peer}: {problem}");
        return Ok(KeyFetch::Failed(UndeliverableReason::ForwardRejected));
    }

    let mut session = forward.session;
    session.forwarding_chain.push(peer.identity_key.clone());
    if let Err(e) = ctx.engine.import_group_session(session).await {
        tracing::warn!("importing session forwarded by {peer} failed: {e}");
        return Ok(KeyFetch::Failed(UndeliverableReason::ForwardRejected));
    }
    Ok(KeyFetch::Imported)
}

/// A forward must answer this request, come from the handshake peer, be
/// addressed to us and carry exactly the session we asked for.
fn check_forward(
    forward: &ForwardedRoomKey,
    request: &KeyRequest,
    own: &DeviceIdentity,
    peer: &DeviceIdentity,
) -> Result<(), &'static str> {
    if forward.request_id != request.request_id {
        return Err("forward answers another request");
    }
    if forward.sender != peer.user_id || forward.sender_signing_key != peer.signing_key {
        return Err("sender mismatch");
    }
    if forward.recipient != own.user_id {
        return Err("recipient mismatch");
    }
    if forward.recipient_signing_key != own.signing_key {
        return Err("recipient key mismatch");
    }
    let session = &forward.session;
    if session.room_id != request.room_id
        || session.sender_key != request.sender_key
        || session.session_id != request.session_id
    {
        return Err("forwarded session differs from the request");
    }
    Ok(())
}
