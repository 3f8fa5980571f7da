use offgrid_transport::PeerStream;
use tokio::io::{AsyncRead, AsyncWrite};

use super::{close, open, seal, HandshakeContext, HandshakeOutcome, HandshakeReport, UndeliverableReason};
use crate::engine::ExportError;
use crate::job::RelayJob;
use crate::types::{DeviceIdentity, EventContent, RoomEvent};
use crate::wire::{ForwardedRoomKey, KeyRequest, RelayPayload, RelayResult, RelayStatus, WireMessage};
use crate::RelayError;

use HandshakeOutcome::{AlreadyPresent, Delivered, Undeliverable};

/// Sender role: relay `job`'s event to whoever is on the other end of `stream`.
///
/// Nothing but our identity is written unless the peer is trusted and owed
/// the event. The only session ever forwarded is the one the relayed payload
/// is encrypted with. The outcome is whatever the receiver confirms; a close
/// without confirmation is [`UndeliverableReason::Unconfirmed`].
pub async fn run_sender<S>(
    ctx: &HandshakeContext,
    stream: &mut PeerStream<S>,
    job: &RelayJob,
) -> Result<HandshakeReport, RelayError>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    let own = ctx.engine.own_identity();
    stream.send(&own).await?;
    let peer: DeviceIdentity = stream.recv().await?.ok_or(RelayError::PeerClosed {
        stage: "peer identity",
    })?;

    if !ctx.engine.is_trusted(&peer).await {
        tracing::info!("not relaying {} to untrusted device {peer}", job.event_id());
        close(stream).await;
        return Ok(HandshakeReport::new(&peer, Undeliverable(UndeliverableReason::Untrusted)));
    }
    if !job.is_owed(&peer.user_id) {
        tracing::debug!("{peer} is not missing {}", job.event_id());
        close(stream).await;
        return Ok(HandshakeReport::new(&peer, Undeliverable(UndeliverableReason::NotOwed)));
    }

    let Some(event) = ctx.history.get(job.room_id(), job.event_id()).await? else {
        tracing::warn!("{} vanished from history before relay", job.event_id());
        close(stream).await;
        return Ok(HandshakeReport::new(&peer, Undeliverable(UndeliverableReason::EventMissing)));
    };
    let payload = prepare_payload(ctx, event).await?;
    let relay_id = uuid::Uuid::new_v4().to_string();
    let body = seal(
        ctx,
        &peer,
        &RelayPayload {
            relay_id: relay_id.clone(),
            event: payload.clone(),
        },
    )
    .await?;
    stream.send(&WireMessage::EventPayload(body)).await?;
    tracing::debug!("sent {} to {peer}", job.event_id());

    let mut forwarded = false;
    loop {
        match stream.recv::<WireMessage>().await? {
            None => {
                tracing::info!("{peer} closed without confirming {}", job.event_id());
                close(stream).await;
                return Ok(HandshakeReport::new(&peer, Undeliverable(UndeliverableReason::Unconfirmed)));
            }
            Some(WireMessage::RelayResult(body)) => {
                let result: RelayResult = open(ctx, &peer, &body).await?;
                if result.relay_id != relay_id {
                    return Err(RelayError::protocol(format!(
                        "{peer} answered relay {} instead of {relay_id}",
                        result.relay_id
                    )));
                }
                close(stream).await;
                let outcome = match result.status {
                    RelayStatus::Stored => Delivered,
                    RelayStatus::AlreadyPresent => AlreadyPresent,
                    RelayStatus::Refused(reason) => Undeliverable(reason),
                };
                tracing::info!("relay of {} to {peer}: {outcome}", job.event_id());
                return Ok(HandshakeReport::new(&peer, outcome));
            }
            Some(WireMessage::KeyRequest(body)) if !forwarded => {
                let request: KeyRequest = open(ctx, &peer, &body).await?;
                match forward_session(ctx, stream, &own, &peer, &payload, request).await? {
                    Forward::Sent => forwarded = true,
                    Forward::Declined(reason) => {
                        close(stream).await;
                        return Ok(HandshakeReport::new(&peer, Undeliverable(reason)));
                    }
                }
            }
            Some(other) => {
                return Err(RelayError::protocol(format!(
                    "unexpected {} after event payload",
                    other.kind()
                )))
            }
        }
    }
}

enum Forward {
    Sent,
    Declined(UndeliverableReason),
}

/// Answer a key request, but only for the session `payload` is encrypted with.
async fn forward_session<S>(
    ctx: &HandshakeContext,
    stream: &mut PeerStream<S>,
    own: &DeviceIdentity,
    peer: &DeviceIdentity,
    payload: &RoomEvent,
    request: KeyRequest,
) -> Result<Forward, RelayError>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    if !request_matches(&request, payload, peer) {
        tracing::warn!(
            "{peer} requested session {} which does not belong to {}",
            request.session_id,
            payload.event_id
        );
        return Ok(Forward::Declined(UndeliverableReason::RequestMismatch));
    }

    let session = match ctx
        .engine
        .export_group_session(&request.room_id, &request.sender_key, &request.session_id)
        .await
    {
        Ok(session) => session,
        Err(e) => {
            tracing::info!("cannot forward session {} to {peer}: {e}", request.session_id);
            let reason = match e {
                ExportError::Withheld => UndeliverableReason::SessionWithheld,
                ExportError::NotFound => UndeliverableReason::SessionNotFound,
            };
            return Ok(Forward::Declined(reason));
        }
    };

    let forward = ForwardedRoomKey {
        request_id: request.request_id,
        sender: own.user_id.clone(),
        sender_device: own.device_id.clone(),
        sender_signing_key: own.signing_key.clone(),
        recipient: peer.user_id.clone(),
        recipient_signing_key: peer.signing_key.clone(),
        session,
    };
    stream
        .send(&WireMessage::KeyForward(seal(ctx, peer, &forward).await?))
        .await?;
    tracing::debug!("forwarded group session {} to {peer}", forward.session.session_id);
    Ok(Forward::Sent)
}

/// The event as it goes on the wire: encrypted events as stored, plaintext
/// ones re-encrypted when the room is encrypted.
async fn prepare_payload(ctx: &HandshakeContext, event: RoomEvent) -> Result<RoomEvent, RelayError> {
    match event.content {
        EventContent::Encrypted(_) => Ok(event),
        EventContent::Receipt(_) => Err(RelayError::protocol("receipts are never relayed")),
        EventContent::Message(_) => {
            if !ctx.directory.is_encrypted(&event.room_id).await? {
                return Ok(event);
            }
            let content = ctx
                .engine
                .encrypt_group_message(&event.room_id, &event.sender, &event.content)
                .await?;
            Ok(event.with_content(EventContent::Encrypted(content)))
        }
    }
}

fn request_matches(request: &KeyRequest, payload: &RoomEvent, peer: &DeviceIdentity) -> bool {
    let EventContent::Encrypted(content) = &payload.content else {
        return false;
    };
    request.room_id == payload.room_id
        && request.sender_key == content.sender_key
        && request.session_id == content.session_id
        && request.requesting_device == peer.device_id
}
