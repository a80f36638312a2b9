// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::time::Duration;

use anyhow::{Context, Result};
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::TcpStream,
};

use super::support::spawn_broker;

async fn send_control_line(addr: &str, line: &str) -> Result<(TcpStream, String)> {
    let mut socket = TcpStream::connect(addr)
        .await
        .with_context(|| format!("failed to connect to broker at {addr}"))?;
    socket.write_all(line.as_bytes()).await?;

    let mut buf = vec![0u8; 256];
    let n = tokio::time::timeout(Duration::from_secs(2), socket.read(&mut buf))
        .await
        .context("timed out waiting for broker reply")??;
    Ok((socket, String::from_utf8_lossy(&buf[..n]).trim().to_string()))
}

/// A second `create` for an already-pending tag is rejected with
/// `ERROR: Already Exists`; the first connection's pending slot is
/// untouched.
#[tokio::test]
async fn second_create_for_same_tag_is_rejected() -> Result<()> {
    let broker_addr = spawn_broker().await;

    // The first `create` blocks waiting for a pairing `attach`, so we never
    // read its reply; just send the request and let it sit in the pending
    // table for the rest of the test.
    let mut first_socket = TcpStream::connect(&broker_addr).await?;
    first_socket.write_all(b"create:dup-tag").await?;

    // Give the broker a moment to register the pending slot before the
    // second `create` races it.
    tokio::time::sleep(Duration::from_millis(20)).await;

    let (_second_socket, second_reply) = send_control_line(&broker_addr, "create:dup-tag").await?;
    assert_eq!(second_reply, "ERROR: Already Exists");

    Ok(())
}
