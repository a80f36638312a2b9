// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! The backbone multiplexer: the struct owning the peer socket, the session
//! table, the send queue, and the control-channel callback, plus the glue
//! that spawns its three always-on tasks (egress writer, backbone receiver)
//! and its per-session ingress readers.
//!
//! Same split-socket-behind-mutexes shape and `CancellationToken`-driven
//! shutdown as a single connection's bookkeeping, generalized to the
//! multiplexer's many concurrent sessions.

pub mod control;
pub mod egress;
pub mod ingress;
pub mod receiver;
pub mod session_table;

use std::sync::{
    Arc,
    atomic::{AtomicBool, AtomicU32, Ordering},
};

use anyhow::{Result, bail};
use thiserror::Error;
use tokio::{
    io::AsyncWriteExt,
    net::{
        TcpStream,
        tcp::{OwnedReadHalf, OwnedWriteHalf},
    },
    sync::{Mutex, mpsc},
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

pub use self::control::{Callback, CallbackFuture};
use self::session_table::{RibConn, SessionTable};
use crate::{
    cfg::config::BackboneRuntime,
    wire::SendRequest,
};

/// Failure mode of [`Backbone::mint_session_id`]: the wire's 16-bit session
/// id field cannot express an id past `u16::MAX`.
#[derive(Debug, Error)]
#[error("session id space exhausted: no ids left below u16::MAX")]
pub struct SessionIdSpaceExhausted;

/// The backbone: a single peer TCP connection multiplexing many sessions.
pub struct Backbone {
    reader: Mutex<OwnedReadHalf>,
    writer: Mutex<OwnedWriteHalf>,
    table: SessionTable,
    queue_tx: mpsc::Sender<SendRequest>,
    callback: Callback,
    last_session_id: AtomicU32,
    cancel: CancellationToken,
    shut_down: AtomicBool,
    runtime: BackboneRuntime,
}

impl Backbone {
    /// Builds a backbone over an already-connected peer socket and spawns
    /// its egress writer and receiver tasks. The caller is the local or
    /// remote agent, which goes on to attach sessions as user connections
    /// arrive (local) or `attach` commands are received (remote).
    pub fn spawn(stream: TcpStream, callback: Callback, runtime: BackboneRuntime) -> Arc<Self> {
        let _ = stream.set_nodelay(true);
        let (r, w) = stream.into_split();
        let (queue_tx, queue_rx) = mpsc::channel(runtime.queue_capacity);

        let backbone = Arc::new(Self {
            reader: Mutex::new(r),
            writer: Mutex::new(w),
            table: SessionTable::new(),
            queue_tx,
            callback,
            last_session_id: AtomicU32::new(0),
            cancel: CancellationToken::new(),
            shut_down: AtomicBool::new(false),
            runtime,
        });

        tokio::spawn(egress::run_egress_writer(Arc::clone(&backbone), queue_rx));
        tokio::spawn(receiver::run_backbone_receiver(Arc::clone(&backbone)));

        backbone
    }

    pub fn runtime(&self) -> &BackboneRuntime {
        &self.runtime
    }

    pub fn session_count(&self) -> usize {
        self.table.len()
    }

    /// Mints a fresh session id by pre-incrementing the counter (first id
    /// is `1`). Only the side that originates a session — the local agent
    /// accepting a user connection — calls this; the remote agent reuses
    /// whatever id it was told.
    pub fn mint_session_id(&self) -> Result<u16, SessionIdSpaceExhausted> {
        let next = self.last_session_id.fetch_add(1, Ordering::SeqCst) + 1;
        u16::try_from(next).map_err(|_| SessionIdSpaceExhausted)
    }

    /// Enqueues outbound work. Best-effort: once the backbone is shutting
    /// down the queue is closed and enqueues are silently dropped, matching
    /// the invariant that closing the queue happens exactly once.
    pub async fn enqueue(&self, req: SendRequest) {
        if self.queue_tx.send(req).await.is_err() {
            debug!("backbone: enqueue after queue closed, dropping");
        }
    }

    async fn enqueue_control(&self, line: String) {
        self.enqueue(SendRequest {
            session_id: 0,
            is_last: true,
            bytes: line.into_bytes().into(),
        })
        .await;
    }

    /// Registers a freshly accepted or dialed user socket under
    /// `session_id` and spawns its ingress reader. No-ops silently if
    /// `session_id == 0` or the backbone has already been shut down (see
    /// DESIGN.md's open-question decisions).
    pub async fn attach(self: &Arc<Self>, session_id: u16, socket: TcpStream, notify: bool) {
        if session_id == 0 || self.shut_down.load(Ordering::SeqCst) {
            warn!(session_id, "backbone: attach no-op (zero id or shut down)");
            return;
        }
        let _ = socket.set_nodelay(true);
        let (read_half, write_half) = socket.into_split();
        let conn = Arc::new(RibConn::new(session_id, write_half));
        self.table.insert(Arc::clone(&conn));

        // Shutdown's table.drain() may have already snapshotted the table
        // before this insert landed, in which case this entry would never
        // be cancelled or closed and its reader would never spawn against
        // an already-closed queue. Re-check and unwind if that happened.
        if self.shut_down.load(Ordering::SeqCst) {
            if self.table.remove(session_id).is_some() {
                conn.cancel.cancel();
                let mut w = conn.socket.lock().await;
                let _ = w.shutdown().await;
            }
            warn!(session_id, "backbone: attach raced with shutdown, unwound");
            return;
        }

        if notify {
            self.enqueue_control(control::format_attach(session_id)).await;
        }

        tokio::spawn(ingress::run_ingress_reader(
            Arc::clone(self),
            conn,
            read_half,
        ));
        info!(session_id, "backbone: session attached");
    }

    /// Removes `session_id` if present, closes its socket, and optionally
    /// notifies the peer. Idempotent: a repeat call for an already-removed
    /// id is a no-op and never re-notifies.
    pub async fn detach(&self, session_id: u16, notify: bool) {
        let Some(conn) = self.table.remove(session_id) else {
            return;
        };
        conn.cancel.cancel();
        {
            let mut w = conn.socket.lock().await;
            let _ = w.shutdown().await;
        }
        if notify {
            self.enqueue_control(control::format_detach(session_id)).await;
        }
        debug!(session_id, "backbone: session detached");
    }

    /// Idempotent shutdown: cancels every task waiting on this backbone's
    /// token, detaches (without notify — the peer is going down with us)
    /// every live session, and closes the backbone socket.
    pub async fn shutdown(&self) {
        if self.shut_down.swap(true, Ordering::SeqCst) {
            return;
        }
        info!("backbone: shutting down");
        self.cancel.cancel();

        for conn in self.table.drain() {
            conn.cancel.cancel();
            let mut w = conn.socket.lock().await;
            let _ = w.shutdown().await;
        }

        let mut w = self.writer.lock().await;
        let _ = w.shutdown().await;
    }

    pub fn is_shut_down(&self) -> bool {
        self.shut_down.load(Ordering::SeqCst)
    }

    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.cancel
    }
}

/// Waits until the backbone has fully shut down, for callers (agent main
/// loops) that need to block until the tunnel goes away.
pub async fn wait_for_shutdown(backbone: &Arc<Backbone>) -> Result<()> {
    backbone.cancellation_token().cancelled().await;
    if !backbone.is_shut_down() {
        bail!("cancellation observed before shutdown state settled");
    }
    Ok(())
}
