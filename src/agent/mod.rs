// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Agent glue: the local and remote roles that dial the broker, perform the
//! rendezvous handshake, and build a [`crate::backbone::Backbone`] over the
//! resulting socket.

pub mod local;
pub mod remote;

use std::time::Duration;

use anyhow::{Context, Result, bail};
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::TcpStream,
    time::timeout,
};
use tracing::info;

/// Performs the `<cmd>:<tag>` rendezvous handshake against the broker and
/// returns the paired socket once the broker replies `OK`. Shared by both
/// agent roles (`cmd` is `"create"` for the local agent, `"attach"` for the
/// remote agent).
pub async fn rendezvous(
    broker_addr: &str,
    cmd: &str,
    tag: &str,
    reply_deadline: Duration,
) -> Result<TcpStream> {
    let mut socket = TcpStream::connect(broker_addr)
        .await
        .with_context(|| format!("failed to connect to broker at {broker_addr}"))?;
    let _ = socket.set_nodelay(true);

    let line = format!("{cmd}:{tag}");
    socket
        .write_all(line.as_bytes())
        .await
        .context("failed to send rendezvous request")?;

    let mut buf = vec![0u8; 256];
    let n = timeout(reply_deadline, socket.read(&mut buf))
        .await
        .context("timed out waiting for broker reply")?
        .context("failed to read broker reply")?;
    let reply = String::from_utf8_lossy(&buf[..n]);

    if reply.trim() != "OK" {
        bail!("broker rejected rendezvous ({cmd}:{tag}): {}", reply.trim());
    }

    info!(cmd, tag, "agent: rendezvous paired");
    Ok(socket)
}
