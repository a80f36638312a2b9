// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Session table: `session_id -> RibConn` backed by a sharded concurrent
//! map so lookups never block behind an unrelated attach or detach.

use std::sync::Mutex as StdMutex;

use bytes::BytesMut;
use dashmap::DashMap;
use tokio::{net::tcp::OwnedWriteHalf, sync::Mutex as AsyncMutex};
use tokio_util::sync::CancellationToken;

/// Per-session record. `socket` is the write half of the user-facing TCP
/// connection — the receiver flushes reassembled peer payload into it and
/// `detach` shuts it down. The read half is moved into the session's
/// ingress reader task and is never stored here.
pub struct RibConn {
    pub session_id: u16,
    pub socket: AsyncMutex<OwnedWriteHalf>,
    pub reassembly: StdMutex<BytesMut>,
    /// Cancelled when this session is detached, waking the ingress reader's
    /// `select!` without requiring the user socket to actually error out.
    pub cancel: CancellationToken,
}

impl RibConn {
    pub fn new(session_id: u16, socket: OwnedWriteHalf) -> Self {
        Self {
            session_id,
            socket: AsyncMutex::new(socket),
            reassembly: StdMutex::new(BytesMut::new()),
            cancel: CancellationToken::new(),
        }
    }
}

/// Concurrent `session_id -> RibConn` map. A sharded concurrent map rather
/// than a single mutex so the receiver's per-packet lookup never blocks
/// behind an attach/detach happening for an unrelated session.
#[derive(Default)]
pub struct SessionTable {
    entries: DashMap<u16, std::sync::Arc<RibConn>>,
}

impl SessionTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, conn: std::sync::Arc<RibConn>) {
        self.entries.insert(conn.session_id, conn);
    }

    pub fn get(&self, session_id: u16) -> Option<std::sync::Arc<RibConn>> {
        self.entries.get(&session_id).map(|e| e.value().clone())
    }

    pub fn remove(&self, session_id: u16) -> Option<std::sync::Arc<RibConn>> {
        self.entries.remove(&session_id).map(|(_, v)| v)
    }

    /// Removes and returns every entry. Used by backbone shutdown.
    pub fn drain(&self) -> Vec<std::sync::Arc<RibConn>> {
        let ids: Vec<u16> = self.entries.iter().map(|e| *e.key()).collect();
        ids.into_iter().filter_map(|id| self.remove(id)).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
