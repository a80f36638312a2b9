// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::time::Duration;

use anyhow::{Context, Result};
use bytes::BytesMut;
use ribtunnel::{
    broker::BrokerService,
    cfg::config::{BackboneRuntime, BrokerConfig, LocalAgentConfig, RemoteAgentConfig},
    wire::{Packet, decode_frame},
};
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::{TcpListener, TcpStream},
    sync::mpsc,
};

/// Reserves an ephemeral TCP port on loopback and hands back its address as
/// a string, for handing to a config struct that binds its own listener.
pub fn reserve_ephemeral_addr() -> String {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").expect("bind ephemeral port");
    listener.local_addr().expect("local_addr").to_string()
}

pub fn test_runtime() -> BackboneRuntime {
    BackboneRuntime {
        queue_capacity: 32,
        write_timeout: Duration::from_secs(5),
        user_write_timeout: Duration::from_secs(5),
        ingress_flush_deadline_ms: 5,
    }
}

/// Starts a broker on a fresh ephemeral port and returns its address once
/// the listener is confirmed accepting connections.
pub async fn spawn_broker() -> String {
    let addr = reserve_ephemeral_addr();
    let cfg = BrokerConfig {
        listen_address: addr.clone(),
        pairing_timeout: Duration::from_secs(5),
        control_read_timeout: Duration::from_secs(5),
    };
    let svc = BrokerService::new(cfg);
    tokio::spawn(async move {
        let _ = svc.run().await;
    });
    wait_until_connectable(&addr).await;
    addr
}

async fn wait_until_connectable(addr: &str) {
    for _ in 0..200 {
        if TcpStream::connect(addr).await.is_ok() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("address {addr} never became connectable");
}

/// Starts a local agent against `broker_addr`/`tag` and returns the address
/// of its user-facing listener. The listener only opens once the broker has
/// paired this tag with a remote agent's `attach`, so callers must spawn the
/// matching remote agent and then await [`wait_for_listener`] before using
/// the returned address.
pub fn spawn_local_agent(broker_addr: &str, tag: &str) -> String {
    let listen_address = reserve_ephemeral_addr();
    let cfg = LocalAgentConfig {
        broker_address: broker_addr.to_string(),
        tag: tag.to_string(),
        listen_address: listen_address.clone(),
        runtime: test_runtime(),
    };
    tokio::spawn(async move {
        let _ = ribtunnel::agent::local::run(cfg).await;
    });
    listen_address
}

/// Polls `addr` until a connection succeeds or the overall budget (1s) is
/// exhausted, for addresses that are only reserved (not yet bound) when the
/// caller learns them.
pub async fn wait_for_listener(addr: &str) {
    wait_until_connectable(addr).await;
}

/// Starts a remote agent against `broker_addr`/`tag` dialing `target_addr`
/// for every attach command.
pub fn spawn_remote_agent(broker_addr: &str, tag: &str, target_addr: &str) {
    let cfg = RemoteAgentConfig {
        broker_address: broker_addr.to_string(),
        tag: tag.to_string(),
        target_address: target_addr.to_string(),
        runtime: test_runtime(),
    };
    tokio::spawn(async move {
        let _ = ribtunnel::agent::remote::run(cfg).await;
    });
}

/// Starts a capturing target: every accepted connection is read to EOF and
/// its full byte sequence is pushed onto the returned channel. Stands in
/// for the "user server reached by the remote agent's dial target" of the
/// end-to-end scenarios, without depending on any external process.
pub async fn spawn_capture_target() -> Result<(String, mpsc::UnboundedReceiver<Vec<u8>>)> {
    let addr = reserve_ephemeral_addr();
    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind capture target {addr}"))?;
    let (tx, rx) = mpsc::unbounded_channel();

    tokio::spawn(async move {
        loop {
            let Ok((mut socket, _)) = listener.accept().await else {
                return;
            };
            let tx = tx.clone();
            tokio::spawn(async move {
                let mut buf = Vec::new();
                let _ = socket.read_to_end(&mut buf).await;
                let _ = tx.send(buf);
            });
        }
    });

    Ok((addr, rx))
}

/// Connects to `addr`, writes `payload`, then half-closes the write side so
/// the peer observes EOF promptly.
pub async fn send_and_half_close(addr: &str, payload: &[u8]) -> Result<()> {
    let mut socket = TcpStream::connect(addr)
        .await
        .with_context(|| format!("failed to connect to {addr}"))?;
    socket.write_all(payload).await.context("write failed")?;
    socket.shutdown().await.context("shutdown failed")?;
    Ok(())
}

pub async fn recv_with_timeout(rx: &mut mpsc::UnboundedReceiver<Vec<u8>>) -> Vec<u8> {
    tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("capture target timed out")
        .expect("capture target channel closed")
}

pub fn deterministic_payload(len: usize, seed: u8) -> Vec<u8> {
    (0..len).map(|i| seed.wrapping_add(i as u8)).collect()
}

/// Builds a connected loopback `TcpStream` pair, for fixtures that drive a
/// [`ribtunnel::backbone::Backbone`] directly without a broker in the loop.
pub async fn loopback_pair() -> Result<(TcpStream, TcpStream)> {
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    let connect = TcpStream::connect(addr);
    let (accept_res, connect_res) = tokio::join!(listener.accept(), connect);
    Ok((accept_res?.0, connect_res?))
}

/// Reads from `socket` into `buf` until a complete frame can be decoded off
/// its front, for test drivers that speak the backbone wire format raw.
pub async fn read_one_frame(socket: &mut TcpStream, buf: &mut BytesMut) -> Result<Packet> {
    loop {
        if let Some(pkt) = decode_frame(buf).context("bad frame from backbone under test")? {
            return Ok(pkt);
        }
        let mut scratch = [0u8; 4096];
        let n = tokio::time::timeout(Duration::from_millis(500), socket.read(&mut scratch))
            .await
            .context("timed out waiting for a frame")?
            .context("read failed")?;
        anyhow::ensure!(n > 0, "backbone under test closed the connection");
        buf.extend_from_slice(&scratch[..n]);
    }
}
