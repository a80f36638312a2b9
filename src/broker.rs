// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Rendezvous broker: pairs a `create:<tag>` connection with a matching
//! `attach:<tag>` connection, then pumps bytes blindly between them so the
//! two agents can carry the backbone protocol end to end.
//!
//! The tag table is owned by an `Arc<BrokerService>` handed to every accept
//! task rather than living behind a process-global map.

use std::{sync::Arc, time::Duration};

use anyhow::{Context, Result};
use dashmap::DashMap;
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt, copy_bidirectional},
    net::{TcpListener, TcpStream},
    sync::oneshot,
    time::timeout,
};
use tracing::{info, warn};

use crate::cfg::config::BrokerConfig;

/// State of a rendezvous tag. `Pending` holds the channel the waiting
/// `create` task will receive the attaching socket on; `Paired` is a
/// tombstone kept while the tunnel is live so a third connection with the
/// same tag is rejected rather than silently treated as a new `create`.
enum Slot {
    Pending(oneshot::Sender<TcpStream>),
    Paired,
}

/// Owns the tag -> slot table. Passed by `Arc` to every accept task; no
/// process-global state.
pub struct BrokerService {
    cfg: BrokerConfig,
    pending: DashMap<String, Slot>,
}

impl BrokerService {
    pub fn new(cfg: BrokerConfig) -> Arc<Self> {
        Arc::new(Self {
            cfg,
            pending: DashMap::new(),
        })
    }

    /// Binds the configured listen address and accepts connections until an
    /// unrecoverable listener error occurs.
    pub async fn run(self: Arc<Self>) -> Result<()> {
        let listener = TcpListener::bind(&self.cfg.listen_address)
            .await
            .with_context(|| format!("failed to bind {}", self.cfg.listen_address))?;
        info!(addr = %self.cfg.listen_address, "broker: listening");

        loop {
            let (socket, peer) = listener.accept().await?;
            let svc = Arc::clone(&self);
            tokio::spawn(async move {
                if let Err(e) = svc.handle_connection(socket).await {
                    warn!(%peer, error = %e, "broker: connection ended with error");
                }
            });
        }
    }

    async fn handle_connection(self: &Arc<Self>, mut socket: TcpStream) -> Result<()> {
        let line = read_control_line(&mut socket, self.cfg.control_read_timeout).await?;
        let Some((cmd, tag)) = line.split_once(':') else {
            write_error(&mut socket, "Malformed Request").await;
            return Ok(());
        };

        match cmd.trim().to_ascii_lowercase().as_str() {
            "create" => self.handle_create(socket, tag.trim().to_string()).await,
            "attach" => self.handle_attach(socket, tag.trim().to_string()).await,
            _ => {
                write_error(&mut socket, "Unknown Command").await;
                Ok(())
            },
        }
    }

    async fn handle_create(self: &Arc<Self>, mut socket: TcpStream, tag: String) -> Result<()> {
        let (tx, rx) = oneshot::channel();
        match self.pending.entry(tag.clone()) {
            dashmap::mapref::entry::Entry::Occupied(_) => {
                write_error(&mut socket, "Already Exists").await;
                return Ok(());
            },
            dashmap::mapref::entry::Entry::Vacant(v) => {
                v.insert(Slot::Pending(tx));
            },
        }
        info!(tag, "broker: create slot registered");

        match timeout(self.cfg.pairing_timeout, rx).await {
            Ok(Ok(attach_socket)) => {
                write_ok(&mut socket).await;
                pump(socket, attach_socket).await;
                self.pending.remove(&tag);
            },
            Ok(Err(_)) => {
                // Sender dropped without pairing, shouldn't happen since
                // handle_attach always sends once it takes the slot.
                self.pending.remove(&tag);
            },
            Err(_elapsed) => {
                warn!(tag, "broker: create slot timed out waiting for attach");
                write_error(&mut socket, "Timed Out").await;
                self.pending.remove(&tag);
            },
        }

        Ok(())
    }

    async fn handle_attach(self: &Arc<Self>, mut socket: TcpStream, tag: String) -> Result<()> {
        let taken = self
            .pending
            .remove_if(&tag, |_, slot| matches!(slot, Slot::Pending(_)));

        let Some((_, Slot::Pending(tx))) = taken else {
            if self.pending.contains_key(&tag) {
                write_error(&mut socket, "Already Attached").await;
            } else {
                write_error(&mut socket, "Not Found").await;
            }
            return Ok(());
        };

        self.pending.insert(tag.clone(), Slot::Paired);
        write_ok(&mut socket).await;

        if tx.send(socket).is_err() {
            warn!(tag, "broker: create side gave up before attach arrived");
            self.pending.remove(&tag);
        }
        Ok(())
    }
}

async fn read_control_line(
    socket: &mut TcpStream,
    deadline: Duration,
) -> Result<String> {
    let mut buf = vec![0u8; 256];
    let n = timeout(deadline, socket.read(&mut buf))
        .await
        .context("timed out waiting for rendezvous control line")??;
    Ok(String::from_utf8_lossy(&buf[..n]).trim().to_string())
}

async fn write_ok(socket: &mut TcpStream) {
    let _ = socket.write_all(b"OK").await;
}

async fn write_error(socket: &mut TcpStream, msg: &str) {
    let _ = socket.write_all(format!("ERROR: {msg}").as_bytes()).await;
}

/// Blind byte pump between the two paired sockets. Read deadlines must
/// already be cleared (both sides only ever used a one-shot control read
/// before this point, so `TcpStream::read` here blocks indefinitely, as
/// required by §6.1).
async fn pump(mut a: TcpStream, mut b: TcpStream) {
    let _ = a.set_linger(None);
    let _ = b.set_linger(None);
    match copy_bidirectional(&mut a, &mut b).await {
        Ok((a_to_b, b_to_a)) => info!(a_to_b, b_to_a, "broker: pump finished"),
        Err(e) => warn!(error = %e, "broker: pump ended with error"),
    }
}
