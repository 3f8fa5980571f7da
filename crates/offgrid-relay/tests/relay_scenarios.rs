//! End-to-end handshake scenarios: both roles driven over an in-memory pipe.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use offgrid_relay::{
    run_receiver, run_sender, with_deadline, CachedDirectory, CryptoEngine, DeviceIdentity,
    EventContent, ForwardedRoomKey, HandshakeContext, HandshakeOutcome, HandshakeReport,
    HistoryStore, KeyRequest, ManualClock, MemoryCryptoEngine, MemoryHistory, MessageContent,
    RelayError, RelayJob, RelayPayload, RelayResult, RelayStatus, RoomEvent, RoomId,
    RoomStateCache, SealedBody, UndeliverableReason, UserId, WireMessage,
};
use offgrid_transport::PeerStream;
use tokio::io::DuplexStream;
use tokio_util::sync::CancellationToken;

const MAX_FRAME: usize = 1024 * 1024;

struct Node {
    engine: Arc<MemoryCryptoEngine>,
    history: Arc<MemoryHistory>,
    directory: Arc<CachedDirectory>,
    ctx: HandshakeContext,
}

fn node(user: &str, device: &str) -> Node {
    let engine = Arc::new(MemoryCryptoEngine::generate(user.into(), device.into()).unwrap());
    let history = Arc::new(MemoryHistory::new());
    let directory = Arc::new(CachedDirectory::default());
    let ctx = HandshakeContext::new(engine.clone(), history.clone(), directory.clone());
    Node {
        engine,
        history,
        directory,
        ctx,
    }
}

fn room() -> RoomId {
    "!r1:hs".into()
}

fn plaintext_event() -> RoomEvent {
    RoomEvent {
        event_id: "$evt1".into(),
        room_id: room(),
        sender: "@alice:hs".into(),
        origin_server_ts: 1_700_000_000_000,
        content: EventContent::Message(MessageContent::text("meet at the north gate")),
    }
}

fn job_for(missing: &[&str]) -> RelayJob {
    RelayJob::new(
        "$evt1".into(),
        room(),
        "@alice:hs".into(),
        missing.iter().map(|u| (*u).into()).collect(),
    )
}

async fn trust_each_other(a: &Node, b: &Node) {
    a.engine.trust(b.engine.own_identity()).await;
    b.engine.trust(a.engine.own_identity()).await;
}

/// Alice stores `$evt1` already encrypted with her room session.
async fn alice_with_encrypted_event() -> (Node, RoomEvent) {
    let alice = node("@alice:hs", "ALICEDEV");
    let plain = plaintext_event();
    let content = alice
        .engine
        .encrypt_group_message(&room(), &plain.sender, &plain.content)
        .await
        .unwrap();
    let encrypted = plain.with_content(EventContent::Encrypted(content));
    alice.history.append(encrypted.clone()).await.unwrap();
    (alice, encrypted)
}

async fn share_session(from: &Node, to: &Node, encrypted: &RoomEvent) {
    let EventContent::Encrypted(content) = &encrypted.content else {
        panic!("not encrypted");
    };
    let session = from
        .engine
        .export_group_session(&room(), &content.sender_key, &content.session_id)
        .await
        .unwrap();
    to.engine.import_group_session(session).await.unwrap();
}

async fn sender_side(
    ctx: &HandshakeContext,
    io: DuplexStream,
    job: &RelayJob,
) -> Result<HandshakeReport, RelayError> {
    let mut stream = PeerStream::open(io, MAX_FRAME).await?;
    run_sender(ctx, &mut stream, job).await
}

async fn receiver_side(ctx: &HandshakeContext, io: DuplexStream) -> Result<HandshakeReport, RelayError> {
    let mut stream = PeerStream::accept(io, MAX_FRAME).await?;
    run_receiver(ctx, &mut stream).await
}

async fn relay(
    sender: &Node,
    receiver: &Node,
    job: &RelayJob,
) -> (Result<HandshakeReport, RelayError>, Result<HandshakeReport, RelayError>) {
    let (a, b) = tokio::io::duplex(64 * 1024);
    tokio::join!(sender_side(&sender.ctx, a, job), receiver_side(&receiver.ctx, b))
}

/// `value` sealed by `from`'s device for `to`'s device.
async fn sealed<T: serde::Serialize>(from: &MemoryCryptoEngine, to: &DeviceIdentity, value: &T) -> SealedBody {
    from.encrypt_point_to_point(to, &serde_json::to_vec(value).unwrap())
        .await
        .unwrap()
}

async fn opened<T: serde::de::DeserializeOwned>(
    at: &MemoryCryptoEngine,
    from: &DeviceIdentity,
    body: &SealedBody,
) -> T {
    serde_json::from_slice(&at.decrypt_point_to_point(from, body).await.unwrap()).unwrap()
}

async fn payload_frame(from: &MemoryCryptoEngine, to: &DeviceIdentity, event: RoomEvent) -> WireMessage {
    let payload = RelayPayload {
        relay_id: "relay-1".into(),
        event,
    };
    WireMessage::EventPayload(sealed(from, to, &payload).await)
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_env_filter("warn").try_init();
}

#[tokio::test]
async fn shared_session_delivers_decrypted_event() {
    init_tracing();
    let (alice, encrypted) = alice_with_encrypted_event().await;
    let bob = node("@bob:hs", "BOBDEV");
    trust_each_other(&alice, &bob).await;
    share_session(&alice, &bob, &encrypted).await;

    let (sent, received) = relay(&alice, &bob, &job_for(&["@bob:hs"])).await;
    assert_eq!(sent.unwrap().outcome, HandshakeOutcome::Delivered);
    let received = received.unwrap();
    assert_eq!(received.outcome, HandshakeOutcome::Delivered);
    assert_eq!(received.peer, alice.engine.own_identity());

    assert_eq!(bob.history.events(&room()).await, vec![plaintext_event()]);
    assert_eq!(bob.history.read_marker(&room()).await, Some("$evt1".into()));
}

#[tokio::test]
async fn missing_session_is_forwarded_and_imported() {
    init_tracing();
    let (alice, encrypted) = alice_with_encrypted_event().await;
    let bob = node("@bob:hs", "BOBDEV");
    trust_each_other(&alice, &bob).await;

    let (sent, received) = relay(&alice, &bob, &job_for(&["@bob:hs"])).await;
    assert_eq!(sent.unwrap().outcome, HandshakeOutcome::Delivered);
    assert_eq!(received.unwrap().outcome, HandshakeOutcome::Delivered);
    assert_eq!(bob.history.events(&room()).await, vec![plaintext_event()]);

    let EventContent::Encrypted(content) = &encrypted.content else {
        unreachable!()
    };
    let chain = bob
        .engine
        .forwarding_chain(&room(), &content.sender_key, &content.session_id)
        .await
        .expect("session imported");
    assert_eq!(chain, vec![alice.engine.own_identity().identity_key]);
}

#[tokio::test]
async fn plaintext_at_rest_is_encrypted_for_encrypted_room() {
    init_tracing();
    let alice = node("@alice:hs", "ALICEDEV");
    alice.history.append(plaintext_event()).await.unwrap();
    alice.directory.set_encrypted(room(), true).await;
    let bob = node("@bob:hs", "BOBDEV");
    bob.directory.set_encrypted(room(), true).await;
    trust_each_other(&alice, &bob).await;

    let (sent, received) = relay(&alice, &bob, &job_for(&["@bob:hs"])).await;
    assert_eq!(sent.unwrap().outcome, HandshakeOutcome::Delivered);
    assert_eq!(received.unwrap().outcome, HandshakeOutcome::Delivered);
    assert_eq!(bob.history.events(&room()).await, vec![plaintext_event()]);

    let session_id = alice.engine.outbound_session_id(&room()).await.unwrap();
    assert!(
        bob.engine
            .has_inbound_session(&room(), &alice.engine.own_identity().identity_key, &session_id)
            .await
    );
}

#[tokio::test]
async fn untrusted_peer_never_sees_a_payload() {
    init_tracing();
    let (alice, _) = alice_with_encrypted_event().await;
    let bob = node("@bob:hs", "BOBDEV");
    // Bob knows Alice; Alice has not verified Bob.
    bob.engine.trust(alice.engine.own_identity()).await;

    let (a, b) = tokio::io::duplex(64 * 1024);
    let job = job_for(&["@bob:hs"]);
    let bob_side = async {
        let mut stream = PeerStream::accept(b, MAX_FRAME).await.unwrap();
        let peer: DeviceIdentity = stream.recv().await.unwrap().unwrap();
        stream.send(&bob.engine.own_identity()).await.unwrap();
        let rest: Option<serde_json::Value> = stream.recv().await.unwrap();
        (peer, rest)
    };
    let (sent, (peer, rest)) = tokio::join!(sender_side(&alice.ctx, a, &job), bob_side);

    assert_eq!(
        sent.unwrap().outcome,
        HandshakeOutcome::Undeliverable(UndeliverableReason::Untrusted)
    );
    assert_eq!(peer, alice.engine.own_identity());
    assert_eq!(rest, None, "nothing may follow the identity frame");
}

#[tokio::test]
async fn receiver_refuses_untrusted_sender() {
    let (alice, _) = alice_with_encrypted_event().await;
    let bob = node("@bob:hs", "BOBDEV");
    alice.engine.trust(bob.engine.own_identity()).await;

    let (sent, received) = relay(&alice, &bob, &job_for(&["@bob:hs"])).await;
    let refused = HandshakeOutcome::Undeliverable(UndeliverableReason::Untrusted);
    assert_eq!(received.unwrap().outcome, refused);
    assert_eq!(sent.unwrap().outcome, refused);
    assert_eq!(bob.history.len(&room()).await, 0);
}

#[tokio::test]
async fn peer_not_owed_the_event_gets_nothing() {
    let (alice, _) = alice_with_encrypted_event().await;
    let bob = node("@bob:hs", "BOBDEV");
    trust_each_other(&alice, &bob).await;

    let (a, b) = tokio::io::duplex(64 * 1024);
    let job = job_for(&["@carol:hs"]);
    let bob_side = async {
        let mut stream = PeerStream::accept(b, MAX_FRAME).await.unwrap();
        let _: DeviceIdentity = stream.recv().await.unwrap().unwrap();
        stream.send(&bob.engine.own_identity()).await.unwrap();
        stream.recv::<WireMessage>().await.unwrap()
    };
    let (sent, rest) = tokio::join!(sender_side(&alice.ctx, a, &job), bob_side);

    assert_eq!(
        sent.unwrap().outcome,
        HandshakeOutcome::Undeliverable(UndeliverableReason::NotOwed)
    );
    assert_eq!(rest, None);
}

#[tokio::test]
async fn relaying_twice_does_not_duplicate() {
    let (alice, encrypted) = alice_with_encrypted_event().await;
    let bob = node("@bob:hs", "BOBDEV");
    trust_each_other(&alice, &bob).await;
    share_session(&alice, &bob, &encrypted).await;
    let job = job_for(&["@bob:hs"]);

    let (_, first) = relay(&alice, &bob, &job).await;
    assert_eq!(first.unwrap().outcome, HandshakeOutcome::Delivered);

    let (sent, second) = relay(&alice, &bob, &job).await;
    assert_eq!(sent.unwrap().outcome, HandshakeOutcome::AlreadyPresent);
    assert_eq!(second.unwrap().outcome, HandshakeOutcome::AlreadyPresent);
    assert_eq!(bob.history.len(&room()).await, 1);
}

#[tokio::test]
async fn withheld_session_leaves_event_undelivered() {
    let (alice, encrypted) = alice_with_encrypted_event().await;
    let bob = node("@bob:hs", "BOBDEV");
    trust_each_other(&alice, &bob).await;
    let EventContent::Encrypted(content) = &encrypted.content else {
        unreachable!()
    };
    alice.engine.withhold(room(), content.session_id.clone()).await;

    let (sent, received) = relay(&alice, &bob, &job_for(&["@bob:hs"])).await;
    assert_eq!(
        sent.unwrap().outcome,
        HandshakeOutcome::Undeliverable(UndeliverableReason::SessionWithheld)
    );
    assert_eq!(
        received.unwrap().outcome,
        HandshakeOutcome::Undeliverable(UndeliverableReason::NoKeyForward)
    );
    assert_eq!(bob.history.len(&room()).await, 0);
}

#[tokio::test]
async fn relayed_event_must_come_from_its_sender() {
    let alice = node("@alice:hs", "ALICEDEV");
    let bob = node("@bob:hs", "BOBDEV");
    trust_each_other(&alice, &bob).await;

    let (a, b) = tokio::io::duplex(64 * 1024);
    let forged = async {
        let mut stream = PeerStream::open(a, MAX_FRAME).await.unwrap();
        stream.send(&alice.engine.own_identity()).await.unwrap();
        let bob_id: DeviceIdentity = stream.recv().await.unwrap().unwrap();
        let mut event = plaintext_event();
        event.sender = "@mallory:hs".into();
        let frame = payload_frame(&alice.engine, &bob_id, event).await;
        stream.send(&frame).await.unwrap();
        // Keep the stream open until Bob has answered.
        let _ = stream.recv::<WireMessage>().await;
    };
    let (_, received) = tokio::join!(forged, receiver_side(&bob.ctx, b));

    assert!(matches!(received, Err(RelayError::Protocol { .. })));
    assert_eq!(bob.history.len(&room()).await, 0);
}

#[tokio::test]
async fn plaintext_relay_into_encrypted_room_is_refused() {
    let alice = node("@alice:hs", "ALICEDEV");
    let bob = node("@bob:hs", "BOBDEV");
    bob.directory.set_encrypted(room(), true).await;
    trust_each_other(&alice, &bob).await;

    let (a, b) = tokio::io::duplex(64 * 1024);
    let downgrade = async {
        let mut stream = PeerStream::open(a, MAX_FRAME).await.unwrap();
        stream.send(&alice.engine.own_identity()).await.unwrap();
        let bob_id: DeviceIdentity = stream.recv().await.unwrap().unwrap();
        let frame = payload_frame(&alice.engine, &bob_id, plaintext_event()).await;
        stream.send(&frame).await.unwrap();
        let _ = stream.recv::<WireMessage>().await;
    };
    let (_, received) = tokio::join!(downgrade, receiver_side(&bob.ctx, b));

    assert!(matches!(received, Err(RelayError::Protocol { .. })));
    assert_eq!(bob.history.len(&room()).await, 0);
}

#[tokio::test(start_paused = true)]
async fn hung_sender_times_out() {
    let bob = node("@bob:hs", "BOBDEV");
    let (a, b) = tokio::io::duplex(64 * 1024);
    let cancel = CancellationToken::new();

    let res = with_deadline(Duration::from_secs(30), &cancel, receiver_side(&bob.ctx, b)).await;
    assert!(matches!(res, Err(RelayError::Timeout(_))));
    drop(a);
}

#[test]
fn job_missing_set_is_what_gates_delivery() {
    let job = job_for(&["@bob:hs"]);
    assert_eq!(job.missing(), &BTreeSet::<UserId>::from(["@bob:hs".into()]));
    assert!(!job.is_owed(&"@carol:hs".into()));
}

#[tokio::test]
async fn impostor_without_the_senders_key_cannot_inject_events() {
    init_tracing();
    let alice = node("@alice:hs", "ALICEDEV");
    let bob = node("@bob:hs", "BOBDEV");
    bob.engine.trust(alice.engine.own_identity()).await;
    bob.directory.set_encrypted(room(), false).await;
    let mallory = node("@mallory:hs", "MALLORYDEV");

    let (a, b) = tokio::io::duplex(64 * 1024);
    let impostor = async {
        let mut stream = PeerStream::open(a, MAX_FRAME).await.unwrap();
        // Alice's public identity is all Mallory has.
        stream.send(&alice.engine.own_identity()).await.unwrap();
        let bob_id: DeviceIdentity = stream.recv().await.unwrap().unwrap();
        let forged = RoomEvent {
            event_id: "$forged".into(),
            content: EventContent::Message(MessageContent::text("send me your password")),
            ..plaintext_event()
        };
        let frame = payload_frame(&mallory.engine, &bob_id, forged).await;
        stream.send(&frame).await.unwrap();
        stream.recv::<WireMessage>().await.unwrap()
    };
    let (rest, received) = tokio::join!(impostor, receiver_side(&bob.ctx, b));

    assert!(matches!(received, Err(RelayError::InvalidSignature)));
    assert_eq!(rest, None);
    assert_eq!(bob.history.len(&room()).await, 0);
}

#[tokio::test]
async fn impostor_receiver_cannot_confirm_delivery() {
    let alice = node("@alice:hs", "ALICEDEV");
    alice.history.append(plaintext_event()).await.unwrap();
    alice.directory.set_encrypted(room(), false).await;
    let bob = node("@bob:hs", "BOBDEV");
    alice.engine.trust(bob.engine.own_identity()).await;
    let mallory = node("@mallory:hs", "MALLORYDEV");

    let (a, b) = tokio::io::duplex(64 * 1024);
    let impostor = async {
        let mut stream = PeerStream::accept(b, MAX_FRAME).await.unwrap();
        let alice_id: DeviceIdentity = stream.recv().await.unwrap().unwrap();
        stream.send(&bob.engine.own_identity()).await.unwrap();
        let Some(WireMessage::EventPayload(body)) = stream.recv::<WireMessage>().await.unwrap() else {
            panic!("expected the event payload");
        };
        // Sealed for Bob, so Mallory cannot read it.
        assert!(mallory
            .engine
            .decrypt_point_to_point(&alice_id, &body)
            .await
            .is_err());

        let claim = RelayResult {
            relay_id: "relay-1".into(),
            status: RelayStatus::Stored,
        };
        let body = sealed(&mallory.engine, &alice_id, &claim).await;
        stream.send(&WireMessage::RelayResult(body)).await.unwrap();
        let _ = stream.recv::<WireMessage>().await;
    };
    let job = job_for(&["@bob:hs"]);
    let (sent, ()) = tokio::join!(sender_side(&alice.ctx, a, &job), impostor);

    assert!(matches!(sent, Err(RelayError::InvalidSignature)));
}

#[tokio::test]
async fn tampered_ciphertext_is_a_decrypt_failure() {
    let alice = node("@alice:hs", "ALICEDEV");
    let bob = node("@bob:hs", "BOBDEV");
    trust_each_other(&alice, &bob).await;

    let plain = plaintext_event();
    let mut content = alice
        .engine
        .encrypt_group_message(&room(), &plain.sender, &plain.content)
        .await
        .unwrap();
    let intact = plain.with_content(EventContent::Encrypted(content.clone()));
    share_session(&alice, &bob, &intact).await;

    let mut chars: Vec<char> = content.ciphertext.chars().collect();
    chars[40] = if chars[40] == 'A' { 'B' } else { 'A' };
    content.ciphertext = chars.into_iter().collect();
    alice
        .history
        .append(plaintext_event().with_content(EventContent::Encrypted(content)))
        .await
        .unwrap();

    let (sent, received) = relay(&alice, &bob, &job_for(&["@bob:hs"])).await;
    assert!(matches!(received, Err(RelayError::Decrypt(_))));
    assert_eq!(
        sent.unwrap().outcome,
        HandshakeOutcome::Undeliverable(UndeliverableReason::Unconfirmed)
    );
    assert_eq!(bob.history.len(&room()).await, 0);
}

#[derive(Clone, Copy)]
enum BadForward {
    SealedByStranger,
    ForAnotherRecipient,
    ForAnEarlierRequest,
}

/// Alice answers Bob's key request with a forward spoiled as `kind` says.
/// Returns Bob's report and the result he sent back.
async fn answer_with(kind: BadForward) -> (Result<HandshakeReport, RelayError>, RelayResult, usize) {
    let (alice, encrypted) = alice_with_encrypted_event().await;
    let bob = node("@bob:hs", "BOBDEV");
    trust_each_other(&alice, &bob).await;
    let mallory = node("@mallory:hs", "MALLORYDEV");

    let (a, b) = tokio::io::duplex(64 * 1024);
    let scripted = async {
        let mut stream = PeerStream::open(a, MAX_FRAME).await.unwrap();
        stream.send(&alice.engine.own_identity()).await.unwrap();
        let bob_id: DeviceIdentity = stream.recv().await.unwrap().unwrap();
        let frame = payload_frame(&alice.engine, &bob_id, encrypted.clone()).await;
        stream.send(&frame).await.unwrap();

        let Some(WireMessage::KeyRequest(body)) = stream.recv::<WireMessage>().await.unwrap() else {
            panic!("expected a key request");
        };
        let request: KeyRequest = opened(&alice.engine, &bob_id, &body).await;
        let session = alice
            .engine
            .export_group_session(&request.room_id, &request.sender_key, &request.session_id)
            .await
            .unwrap();
        let own = alice.engine.own_identity();
        let mut forward = ForwardedRoomKey {
            request_id: request.request_id,
            sender: own.user_id,
            sender_device: own.device_id,
            sender_signing_key: own.signing_key,
            recipient: bob_id.user_id.clone(),
            recipient_signing_key: bob_id.signing_key.clone(),
            session,
        };
        let sealer: &MemoryCryptoEngine = match kind {
            BadForward::SealedByStranger => &*mallory.engine,
            BadForward::ForAnotherRecipient => {
                forward.recipient = "@carol:hs".into();
                &*alice.engine
            }
            BadForward::ForAnEarlierRequest => {
                forward.request_id = "an-earlier-request".into();
                &*alice.engine
            }
        };
        let body = sealed(sealer, &bob_id, &forward).await;
        stream.send(&WireMessage::KeyForward(body)).await.unwrap();

        let Some(WireMessage::RelayResult(body)) = stream.recv::<WireMessage>().await.unwrap() else {
            panic!("expected a relay result");
        };
        opened::<RelayResult>(&alice.engine, &bob_id, &body).await
    };
    let (result, received) = tokio::join!(scripted, receiver_side(&bob.ctx, b));
    let stored = bob.history.len(&room()).await;
    (received, result, stored)
}

#[tokio::test]
async fn unauthenticated_or_misaddressed_key_forwards_are_rejected() {
    for kind in [
        BadForward::SealedByStranger,
        BadForward::ForAnotherRecipient,
        BadForward::ForAnEarlierRequest,
    ] {
        let (received, result, stored) = answer_with(kind).await;
        assert_eq!(
            received.unwrap().outcome,
            HandshakeOutcome::Undeliverable(UndeliverableReason::ForwardRejected)
        );
        assert_eq!(
            result,
            RelayResult {
                relay_id: "relay-1".into(),
                status: RelayStatus::Refused(UndeliverableReason::ForwardRejected),
            }
        );
        assert_eq!(stored, 0);
    }
}

#[tokio::test]
async fn sender_without_the_session_reports_it_not_found() {
    let alice = node("@alice:hs", "ALICEDEV");
    let bob = node("@bob:hs", "BOBDEV");
    trust_each_other(&alice, &bob).await;

    // Encrypted by another of Alice's devices; this one never held the session.
    let old_device = MemoryCryptoEngine::generate("@alice:hs".into(), "ALICEOLD".into()).unwrap();
    let plain = plaintext_event();
    let content = old_device
        .encrypt_group_message(&room(), &plain.sender, &plain.content)
        .await
        .unwrap();
    alice
        .history
        .append(plain.with_content(EventContent::Encrypted(content)))
        .await
        .unwrap();

    let (sent, received) = relay(&alice, &bob, &job_for(&["@bob:hs"])).await;
    assert_eq!(
        sent.unwrap().outcome,
        HandshakeOutcome::Undeliverable(UndeliverableReason::SessionNotFound)
    );
    assert_eq!(
        received.unwrap().outcome,
        HandshakeOutcome::Undeliverable(UndeliverableReason::NoKeyForward)
    );
    assert_eq!(bob.history.len(&room()).await, 0);
}

#[tokio::test]
async fn evicted_room_state_blocks_plaintext_relay() {
    let alice = node("@alice:hs", "ALICEDEV");
    alice.history.append(plaintext_event()).await.unwrap();
    let bob = node("@bob:hs", "BOBDEV");
    trust_each_other(&alice, &bob).await;

    let clock = ManualClock::new();
    let directory = Arc::new(CachedDirectory::new(RoomStateCache::with_clock(
        1,
        Duration::from_secs(60),
        clock.clone(),
    )));
    directory.set_encrypted(room(), true).await;
    clock.advance(Duration::from_secs(61));
    directory.set_encrypted("!other:hs".into(), false).await;
    let alice_ctx = HandshakeContext::new(alice.engine.clone(), alice.history.clone(), directory);

    // Sender: the plaintext is never sent in the clear.
    let (a, b) = tokio::io::duplex(64 * 1024);
    let job = job_for(&["@bob:hs"]);
    let (sent, received) = tokio::join!(
        sender_side(&alice_ctx, a, &job),
        receiver_side(&bob.ctx, b)
    );
    assert!(matches!(sent, Err(RelayError::Store(_))));
    assert!(matches!(received, Err(RelayError::PeerClosed { .. })));

    // Receiver: Bob knows nothing about the room, so plaintext is refused.
    let (a, b) = tokio::io::duplex(64 * 1024);
    let plaintext = async {
        let mut stream = PeerStream::open(a, MAX_FRAME).await.unwrap();
        stream.send(&alice.engine.own_identity()).await.unwrap();
        let bob_id: DeviceIdentity = stream.recv().await.unwrap().unwrap();
        let frame = payload_frame(&alice.engine, &bob_id, plaintext_event()).await;
        stream.send(&frame).await.unwrap();
        stream.recv::<WireMessage>().await.unwrap()
    };
    let (rest, received) = tokio::join!(plaintext, receiver_side(&bob.ctx, b));
    assert!(matches!(received, Err(RelayError::Store(_))));
    assert_eq!(rest, None);
    assert_eq!(bob.history.len(&room()).await, 0);
}
