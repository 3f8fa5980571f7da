use offgrid_relay::RelayEvent;
use tokio_util::sync::CancellationToken;

/// Cancel `token` on Ctrl+C.
pub fn cancel_on_ctrlc(token: CancellationToken) {
    tokio::spawn(async move {
        let _ = tokio::signal::ctrl_c().await;
        eprintln!("\nCtrl+C received, shutting down...");
        token.cancel();
    });
}

/// One-line human summary of a relay event.
pub fn describe(event: &RelayEvent) -> String {
    match event {
        RelayEvent::RelayStarted { event_id, missing } => {
            let users: Vec<&str> = missing.iter().map(|u| u.as_str()).collect();
            format!("relaying {event_id} to {}", users.join(", "))
        }
        RelayEvent::PeerConnectFailed { addr, error } => format!("could not reach {addr}: {error}"),
        RelayEvent::HandshakeFinished {
            event_id,
            addr,
            result,
        } => match result {
            Ok(report) => format!("{event_id} -> {} at {addr}: {}", report.peer, report.outcome),
            Err(e) => format!("{event_id} -> {addr} failed: {e}"),
        },
        RelayEvent::InboundFinished { addr, result } => match result {
            Ok(report) => format!("inbound from {} at {addr}: {}", report.peer, report.outcome),
            Err(e) => format!("inbound from {addr} failed: {e}"),
        },
        RelayEvent::JobFinished { summary } => format!(
            "{} done: {} delivered, {} still owed",
            summary.event_id,
            summary.delivered.len(),
            summary.remaining.len()
        ),
        RelayEvent::JobDropped { event_id } => format!("relay busy, dropped job for {event_id}"),
    }
}
