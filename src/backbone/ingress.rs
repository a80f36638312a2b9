// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Per-session ingress reader: reads from a user socket and turns each read
//! into a queued [`SendRequest`]. One task per attached session, spawned by
//! [`crate::backbone::Backbone::attach`].

use std::{sync::Arc, time::Duration};

use bytes::Bytes;
use tokio::{io::AsyncReadExt, net::tcp::OwnedReadHalf, select, time::timeout};
use tracing::debug;

use crate::{
    backbone::{Backbone, session_table::RibConn},
    wire::{MAX_PACKET_LENGTH, SendRequest},
};

enum ReadOutcome {
    Data(usize),
    Eof,
    TimedOut,
    Err(std::io::Error),
}

async fn timed_read(
    read_half: &mut OwnedReadHalf,
    buf: &mut [u8],
    deadline: Option<Duration>,
) -> ReadOutcome {
    match deadline {
        Some(d) => match timeout(d, read_half.read(buf)).await {
            Ok(Ok(0)) => ReadOutcome::Eof,
            Ok(Ok(n)) => ReadOutcome::Data(n),
            Ok(Err(e)) => ReadOutcome::Err(e),
            Err(_elapsed) => ReadOutcome::TimedOut,
        },
        None => match read_half.read(buf).await {
            Ok(0) => ReadOutcome::Eof,
            Ok(n) => ReadOutcome::Data(n),
            Err(e) => ReadOutcome::Err(e),
        },
    }
}

/// Emits the empty `is_last` delimiter if the most recent data frame left
/// one pending (`deadline.is_some()`, i.e. the last read exactly filled the
/// buffer and we were waiting out the flush deadline for more). Without
/// this, a stream whose length is an exact multiple of `MaxPacketLength`
/// followed immediately by EOF would leave its final bytes stranded
/// unflushed in the peer's reassembly buffer.
async fn flush_pending_tail(backbone: &Arc<Backbone>, session_id: u16, deadline: Option<Duration>) {
    if deadline.is_none() {
        return;
    }
    backbone
        .enqueue(SendRequest {
            session_id,
            is_last: true,
            bytes: Bytes::new(),
        })
        .await;
}

/// Runs until the session is detached (locally, by the peer, or by read
/// failure). On any non-timeout read error (including EOF) this is the only
/// place that notifies the peer of the session's own termination.
pub async fn run_ingress_reader(
    backbone: Arc<Backbone>,
    conn: Arc<RibConn>,
    mut read_half: OwnedReadHalf,
) {
    let session_id = conn.session_id;
    let flush_deadline = backbone.runtime.ingress_flush_deadline();
    let mut buf = vec![0u8; MAX_PACKET_LENGTH];
    let mut deadline: Option<Duration> = None;

    loop {
        let outcome = select! {
            _ = conn.cancel.cancelled() => return,
            o = timed_read(&mut read_half, &mut buf, deadline) => o,
        };

        match outcome {
            ReadOutcome::TimedOut => {
                deadline = None;
                debug!(session_id, "ingress flush: emitting empty is_last delimiter");
                backbone
                    .enqueue(SendRequest {
                        session_id,
                        is_last: true,
                        bytes: Bytes::new(),
                    })
                    .await;
            },
            ReadOutcome::Eof => {
                debug!(session_id, "ingress reader: EOF, detaching");
                flush_pending_tail(&backbone, session_id, deadline).await;
                backbone.detach(session_id, true).await;
                return;
            },
            ReadOutcome::Err(e) => {
                debug!(session_id, error = %e, "ingress reader: read error, detaching");
                flush_pending_tail(&backbone, session_id, deadline).await;
                backbone.detach(session_id, true).await;
                return;
            },
            ReadOutcome::Data(n) => {
                let is_last = n < MAX_PACKET_LENGTH;
                let bytes = Bytes::copy_from_slice(&buf[..n]);
                backbone
                    .enqueue(SendRequest {
                        session_id,
                        is_last,
                        bytes,
                    })
                    .await;
                deadline = if n == MAX_PACKET_LENGTH {
                    Some(flush_deadline)
                } else {
                    None
                };
            },
        }
    }
}
