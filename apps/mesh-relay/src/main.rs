use anyhow::{Context, Result};
use clap::Parser;
use peer_mesh::telemetry::logging::{self, LoggingArgs};
use tracing::info;

use mesh_relay::{RelayConfig, RelayState};

#[derive(Parser, Debug)]
#[command(name = "mesh-relay")]
#[command(about = "Signaling relay for peer mesh participants")]
struct Cli {
    /// Address to bind (overrides MESH_RELAY_HOST)
    #[arg(long)]
    host: Option<String>,

    /// Port to listen on (overrides MESH_RELAY_PORT)
    #[arg(short, long)]
    port: Option<u16>,

    #[command(flatten)]
    logging: LoggingArgs,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    logging::init(&cli.logging)?;

    let mut config = RelayConfig::from_env();
    if let Some(host) = cli.host {
        config.host = host;
    }
    if let Some(port) = cli.port {
        config.port = port;
    }

    let addr = config
        .bind_addr()
        .with_context(|| format!("invalid bind address {}:{}", config.host, config.port))?;
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    info!(%addr, "mesh relay listening");
    eprintln!("mesh-relay listening on ws://{addr}/");

    mesh_relay::serve(listener, RelayState::new())
        .await
        .context("relay server failed")
}
