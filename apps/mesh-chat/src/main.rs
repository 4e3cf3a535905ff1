mod cli;

use anyhow::{Context, Result};
use clap::Parser;
use peer_mesh::telemetry::logging;
use peer_mesh::MeshEngine;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::debug;

use crate::cli::Cli;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    logging::init(&cli.logging)?;

    let engine = MeshEngine::new();
    engine.register_ready_change_handler(|ready| {
        if ready {
            println!("* connected to the mesh");
        } else {
            println!("* no peers reachable");
        }
    });
    engine.register_message_handler(|peer, text| println!("[{peer}] {text}"));

    engine
        .initialize(&cli.relay, cli.link_config())
        .context("invalid relay configuration")?;
    engine
        .start()
        .await
        .with_context(|| format!("failed to join relay at {}", cli.relay))?;
    eprintln!("* joined {}; type to chat, /quit to leave", cli.relay);

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        let line = tokio::select! {
            line = lines.next_line() => line.context("failed to read stdin")?,
            _ = tokio::signal::ctrl_c() => None,
        };
        let Some(line) = line else {
            break;
        };
        let text = line.trim();
        match text {
            "" => continue,
            "/quit" => break,
            "/id" => {
                match engine.self_id() {
                    Some(id) => println!("* you are {id}"),
                    None => println!("* not welcomed by the relay yet"),
                }
                continue;
            }
            _ => {}
        }
        if !engine.is_ready() {
            println!("* not connected to any peer yet; message not sent");
            continue;
        }
        let delivered = engine.send(text).await;
        debug!(delivered, "message sent");
        if delivered == 0 {
            println!("* message not delivered");
        }
    }

    engine.stop().await;
    Ok(())
}
