// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Demonstration target: writes a deterministic byte pattern to every
//! connection in small chunks, then closes. Exists to exercise a tunnel
//! manually, not to assert anything about the multiplexer itself.

use anyhow::{Context, Result};
use clap::Parser;
use tokio::{io::AsyncWriteExt, net::TcpListener};
use tracing::{info, warn};

const PATTERN_LEN: usize = 10240;
const CHUNK_LEN: usize = 500;

#[derive(Parser, Debug)]
#[command(name = "echo-server", about = "Deterministic-pattern demo target")]
struct Args {
    #[arg(long, default_value = "127.0.0.1:7000")]
    listen: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt::init();
    let args = Args::parse();

    let pattern: Vec<u8> = (0..PATTERN_LEN).map(|i| (i % 255) as u8).collect();

    let listener = TcpListener::bind(&args.listen)
        .await
        .with_context(|| format!("failed to bind {}", args.listen))?;
    info!(addr = %args.listen, "echo-server: listening");

    loop {
        let (mut socket, peer) = listener.accept().await?;
        let pattern = pattern.clone();
        tokio::spawn(async move {
            info!(%peer, "echo-server: serving pattern");
            let mut sent = 0usize;
            while sent < pattern.len() {
                let end = (sent + CHUNK_LEN).min(pattern.len());
                if let Err(e) = socket.write_all(&pattern[sent..end]).await {
                    warn!(%peer, error = %e, "echo-server: write failed");
                    return;
                }
                sent = end;
            }
            let _ = socket.shutdown().await;
            info!(%peer, sent, "echo-server: done");
        });
    }
}
