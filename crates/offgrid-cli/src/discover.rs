use std::collections::HashMap;
use std::net::SocketAddr;
use std::time::{Duration, Instant};

use offgrid_transport::{LanDiscovery, TransportConfig};
use tokio_util::sync::CancellationToken;

use crate::common::cancel_on_ctrlc;

pub async fn run(config: TransportConfig, duration: Duration) -> anyhow::Result<()> {
    let cancel = CancellationToken::new();
    cancel_on_ctrlc(cancel.clone());
    let port = config.relay_addr().port();
    let mut feed = LanDiscovery::spawn(&config, port, cancel.clone())?;

    eprintln!("Watching for {} beacons for {}s...", config.service(), duration.as_secs());
    let start = Instant::now();
    let deadline = tokio::time::sleep(duration);
    tokio::pin!(deadline);

    let mut seen: HashMap<SocketAddr, u32> = HashMap::new();
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = &mut deadline => break,
            peer = feed.next_peer() => {
                let Some(addr) = peer else { break };
                let count = seen.entry(addr).or_insert(0);
                *count += 1;
                if *count == 1 {
                    println!("{addr}");
                    eprintln!("  found {addr} after {:.1}s", start.elapsed().as_secs_f64());
                }
            }
        }
    }
    cancel.cancel();

    eprintln!("\n{} peer(s) seen.", seen.len());
    Ok(())
}
