mod common;
mod demo;
mod discover;
mod listen;
mod prompt;

use std::net::SocketAddr;
use std::time::Duration;

use clap::{Parser, Subcommand};
use offgrid_relay::RelayConfig;
use offgrid_transport::TransportConfig;

#[derive(Parser)]
#[command(name = "offgrid", about = "Relay missed room events between devices on the local network")]
struct Cli {
    /// User id of this device.
    #[arg(long, default_value = "@me:localhost")]
    user: String,

    /// Device id of this device.
    #[arg(long, default_value = "OFFGRID")]
    device: String,

    /// Relay TCP port (0 picks a free one). Defaults to OFFGRID_RELAY_PORT or 9000.
    #[arg(long)]
    port: Option<u16>,

    /// Peers to offer on every beacon tick (comma-separated ip:port).
    #[arg(long, value_delimiter = ',')]
    peers: Vec<SocketAddr>,

    /// Disable multicast discovery (static peers only).
    #[arg(long)]
    no_discovery: bool,

    /// Per-handshake timeout in seconds.
    #[arg(long, default_value = "30")]
    handshake_timeout: u64,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run a relay node and print every relay outcome.
    Listen {
        /// Ask on stdin before trusting an unknown device.
        #[arg(long)]
        trust_prompt: bool,
    },

    /// Print relay nodes announced on the LAN.
    Discover {
        /// Stop after this many seconds.
        #[arg(long, default_value = "30")]
        seconds: u64,
    },

    /// Relay one encrypted event between two in-process nodes on loopback.
    Demo,
}

impl Cli {
    fn transport_config(&self) -> TransportConfig {
        let mut config = TransportConfig::new().discovery(!self.no_discovery);
        if let Some(port) = self.port {
            config = config.relay_port(port);
        }
        for peer in &self.peers {
            config = config.static_peer(*peer);
        }
        config
    }

    fn relay_config(&self) -> RelayConfig {
        RelayConfig::new()
            .transport(self.transport_config())
            .handshake_timeout(Duration::from_secs(self.handshake_timeout))
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "warn".into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    eprintln!("offgrid v{}", env!("CARGO_PKG_VERSION"));

    match &cli.command {
        Command::Listen { trust_prompt } => {
            listen::run(&cli.user, &cli.device, cli.relay_config(), *trust_prompt).await?;
        }
        Command::Discover { seconds } => {
            discover::run(cli.transport_config(), Duration::from_secs(*seconds)).await?;
        }
        Command::Demo => {
            demo::run(Duration::from_secs(cli.handshake_timeout)).await?;
        }
    }

    Ok(())
}
