use std::sync::Arc;

use offgrid_relay::{
    CachedDirectory, CryptoEngine, MemoryCryptoEngine, MemoryHistory, RelayConfig, RelayService,
};
use tokio_util::sync::CancellationToken;

use crate::common::{cancel_on_ctrlc, describe};
use crate::prompt::PromptingEngine;

pub async fn run(user: &str, device: &str, config: RelayConfig, trust_prompt: bool) -> anyhow::Result<()> {
    let keys = Arc::new(MemoryCryptoEngine::generate(user.into(), device.into())?);
    let engine: Arc<dyn CryptoEngine> = if trust_prompt {
        Arc::new(PromptingEngine::new(keys))
    } else {
        keys
    };
    let identity = engine.own_identity();

    let mut rt = RelayService::spawn(
        config,
        engine,
        Arc::new(MemoryHistory::new()),
        Arc::new(CachedDirectory::default()),
    )
    .await?;

    eprintln!("Listening as {identity} on {}", rt.handle.local_addr());
    eprintln!("Signing key: {}", identity.signing_key);
    if !trust_prompt {
        eprintln!("No device is trusted; pass --trust-prompt to accept relays.");
    }
    eprintln!("Press Ctrl+C to stop.\n");

    let stop = CancellationToken::new();
    cancel_on_ctrlc(stop.clone());
    loop {
        tokio::select! {
            _ = stop.cancelled() => break,
            event = rt.events.recv() => match event {
                Some(event) => eprintln!("  {}", describe(&event)),
                None => break,
            },
        }
    }

    rt.handle.shutdown();
    Ok(())
}
