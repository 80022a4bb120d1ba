//! Terminal client for the duel server.
//!
//! Interactive mode bridges stdin and the server socket; bot mode simulates
//! a fleet of players that open packs, queue for a match and play the first
//! card of their hand, useful for exercising a multi-instance deployment.

use anyhow::{Context, Result};
use clap::Parser;
use futures::{SinkExt, StreamExt};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::time::{sleep, Duration};
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{error, info};

#[derive(Parser, Debug)]
#[command(author, version, about = "Card-duel terminal client", long_about = None)]
struct Args {
    /// Server host (IP or name)
    host: String,

    /// Player name (interactive mode)
    name: Option<String>,

    /// Server WebSocket port
    #[arg(short, long, default_value = "8080")]
    port: u16,

    /// Run automated players instead of an interactive session
    #[arg(long)]
    bot: bool,

    /// Number of bots to run in parallel
    #[arg(long, default_value = "1")]
    count: u32,

    /// Name prefix for the bots
    #[arg(long, default_value = "Jogador")]
    prefix: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt().with_target(false).init();
    let args = Args::parse();
    let url = format!("ws://{}:{}", args.host, args.port);

    if args.bot {
        run_bots(&url, args.count, &args.prefix).await;
        return Ok(());
    }

    let name = args
        .name
        .context("interactive mode needs a player name: duel_client <host> <name>")?;
    run_interactive(&url, &name).await
}

/// One human at a keyboard: stdin lines go to the server, frames to stdout.
async fn run_interactive(url: &str, name: &str) -> Result<()> {
    let (ws, _) = connect_async(url)
        .await
        .with_context(|| format!("failed to connect to {url}"))?;
    let (mut sink, mut stream) = ws.split();

    sink.send(Message::Text(name.to_string())).await?;
    info!(player = name, "connected, commands: FIND_MATCH, OPEN_PACK, VIEW_DECK, TRADE_CARD <n>, 1, 2");

    let reader = tokio::spawn(async move {
        while let Some(frame) = stream.next().await {
            match frame {
                Ok(Message::Text(text)) => print!("{}\n", text.trim_end()),
                Ok(Message::Close(_)) | Err(_) => break,
                Ok(_) => {}
            }
        }
    });

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        let command = line.trim();
        if command.is_empty() {
            continue;
        }
        if command.eq_ignore_ascii_case("quit") {
            break;
        }
        if sink.send(Message::Text(command.to_string())).await.is_err() {
            error!("connection lost");
            break;
        }
    }

    let _ = sink.close().await;
    reader.abort();
    Ok(())
}

async fn run_bots(url: &str, count: u32, prefix: &str) {
    let mut handles = Vec::new();
    for n in 1..=count {
        let url = url.to_string();
        let name = format!("{prefix}{n}");
        sleep(Duration::from_millis(10)).await;
        handles.push(tokio::spawn(async move {
            if let Err(err) = run_bot(&url, &name).await {
                error!(bot = %name, %err, "bot finished with an error");
            }
        }));
    }
    for handle in handles {
        let _ = handle.await;
    }
    info!(count, "all bots finished");
}

/// Automated player: welcome pack, two extra packs, one match, one move.
async fn run_bot(url: &str, name: &str) -> Result<()> {
    let (ws, _) = connect_async(url).await?;
    let (mut sink, mut stream) = ws.split();

    sink.send(Message::Text(name.to_string())).await?;

    // Welcome pack.
    let welcome = stream.next().await.context("server closed early")??;
    info!(bot = name, msg = %welcome.to_text().unwrap_or_default().trim_end(), "welcome");

    for _ in 0..2 {
        sink.send(Message::Text("OPEN_PACK".to_string())).await?;
        let reply = stream.next().await.context("server closed early")??;
        info!(bot = name, msg = %reply.to_text().unwrap_or_default().trim_end(), "pack opened");
    }

    sink.send(Message::Text("FIND_MATCH".to_string())).await?;

    while let Some(frame) = stream.next().await {
        let frame = frame?;
        let Ok(text) = frame.to_text() else { continue };
        let message = text.trim();

        if message.starts_with("MATCH_START|") {
            info!(bot = name, %message, "match started, playing card 1");
            sink.send(Message::Text("1".to_string())).await?;
        } else if message.starts_with("RESULT|") {
            info!(bot = name, %message, "match finished");
            break;
        } else if message == "NO_MATCH_FOUND" {
            info!(bot = name, "no opponent found");
            break;
        }
    }

    let _ = sink.close().await;
    Ok(())
}
