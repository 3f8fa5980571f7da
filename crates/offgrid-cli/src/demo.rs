use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use offgrid_relay::{
    now_ms, CachedDirectory, CryptoEngine, EventContent, HistoryStore, Membership,
    MemoryCryptoEngine, MemoryHistory, MessageContent, ReceiptContent, RelayChannels, RelayConfig,
    RelayEvent, RelayService, RoomEvent, RoomId,
};
use offgrid_transport::TransportConfig;

use crate::common::describe;

const ROOM: &str = "!demo:localhost";

struct Device {
    engine: Arc<MemoryCryptoEngine>,
    history: Arc<MemoryHistory>,
    directory: Arc<CachedDirectory>,
}

async fn device(user: &str, device: &str) -> anyhow::Result<Device> {
    let directory = Arc::new(CachedDirectory::default());
    for member in ["@alice:localhost", "@bob:localhost"] {
        directory
            .set_membership(RoomId::from(ROOM), member.into(), Membership::Join)
            .await;
    }
    directory.set_encrypted(ROOM.into(), true).await;
    Ok(Device {
        engine: Arc::new(MemoryCryptoEngine::generate(user.into(), device.into())?),
        history: Arc::new(MemoryHistory::new()),
        directory,
    })
}

async fn start(device: &Device, handshake_timeout: Duration) -> anyhow::Result<RelayChannels> {
    let config = RelayConfig::new()
        .transport(
            TransportConfig::new()
                .bind_ip([127, 0, 0, 1].into())
                .relay_port(0)
                .discovery(false),
        )
        .handshake_timeout(handshake_timeout)
        .seek_window(Duration::from_secs(10));
    Ok(RelayService::spawn(
        config,
        device.engine.clone(),
        device.history.clone(),
        device.directory.clone(),
    )
    .await?)
}

/// Alice wrote a message while the homeserver was down; Bob never got it and
/// holds no group session for the room. Alice's own read receipt triggers the
/// relay, Bob asks for the session and decrypts.
pub async fn run(handshake_timeout: Duration) -> anyhow::Result<()> {
    let alice = device("@alice:localhost", "ALICEPHONE").await?;
    let bob = device("@bob:localhost", "BOBLAPTOP").await?;
    alice.engine.trust(bob.engine.own_identity()).await;
    bob.engine.trust(alice.engine.own_identity()).await;

    let message = RoomEvent {
        event_id: "$demo-1".into(),
        room_id: ROOM.into(),
        sender: "@alice:localhost".into(),
        origin_server_ts: now_ms(),
        content: EventContent::Message(MessageContent::text("Homeserver is down. Meet at the usual place.")),
    };
    alice.history.append(message.clone()).await?;

    let mut alice_rt = start(&alice, handshake_timeout).await?;
    let mut bob_rt = start(&bob, handshake_timeout).await?;
    eprintln!("alice on {}", alice_rt.handle.local_addr());
    eprintln!("bob   on {}", bob_rt.handle.local_addr());

    alice_rt.handle.add_peer(bob_rt.handle.local_addr()).await?;

    let receipt = RoomEvent {
        event_id: "$demo-receipt".into(),
        room_id: ROOM.into(),
        sender: "@alice:localhost".into(),
        origin_server_ts: now_ms(),
        content: EventContent::Receipt(ReceiptContent::default().read(
            message.event_id.clone(),
            "@alice:localhost".into(),
            now_ms(),
        )),
    };
    let outcomes = alice_rt.handle.on_acknowledgment(&receipt).await?;
    eprintln!("acknowledgment produced {} relay job(s)", outcomes.len());

    let wait = async {
        while let Some(event) = alice_rt.events.recv().await {
            eprintln!("  [alice] {}", describe(&event));
            if matches!(event, RelayEvent::JobFinished { .. }) {
                break;
            }
        }
    };
    tokio::time::timeout(Duration::from_secs(30), wait)
        .await
        .context("relay did not finish in time")?;
    while let Ok(event) = bob_rt.events.try_recv() {
        eprintln!("  [bob]   {}", describe(&event));
    }

    let delivered = bob
        .history
        .get(&message.room_id, &message.event_id)
        .await?
        .context("bob never received the message")?;
    match &delivered.content {
        EventContent::Message(content) => println!("bob reads: {}", content.body),
        other => anyhow::bail!("unexpected content {other:?}"),
    }

    alice_rt.handle.shutdown();
    bob_rt.handle.shutdown();
    Ok(())
}
