// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Demonstration consumer: connects through a tunnel, reads the
//! deterministic byte pattern `echo_server` produces, and validates it
//! byte-for-byte.

use anyhow::{bail, Context, Result};
use clap::Parser;
use tokio::{io::AsyncReadExt, net::TcpStream};
use tracing::info;

const READ_CHUNK: usize = 1000;

#[derive(Parser, Debug)]
#[command(name = "echo-client", about = "Deterministic-pattern demo consumer")]
struct Args {
    #[arg(long, default_value = "127.0.0.1:9000")]
    connect: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt::init();
    let args = Args::parse();

    let mut socket = TcpStream::connect(&args.connect)
        .await
        .with_context(|| format!("failed to connect to {}", args.connect))?;
    info!(addr = %args.connect, "echo-client: connected");

    let mut buf = vec![0u8; READ_CHUNK];
    let mut total = 0usize;
    loop {
        let n = socket.read(&mut buf).await.context("read failed")?;
        if n == 0 {
            break;
        }
        for (i, &b) in buf[..n].iter().enumerate() {
            let want = ((total + i) % 255) as u8;
            if b != want {
                bail!(
                    "pattern mismatch at offset {}: got {}, want {}",
                    total + i,
                    b,
                    want
                );
            }
        }
        total += n;
    }

    info!(total, "echo-client: pattern verified");
    Ok(())
}
