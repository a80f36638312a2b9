// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Single egress writer: drains the send queue and serializes framed
//! packets onto the backbone socket. Exactly one task ever writes to the
//! backbone socket.

use std::sync::Arc;

use tokio::{io::AsyncWriteExt, select, sync::mpsc, time::timeout};
use tracing::warn;

use crate::{
    backbone::Backbone,
    wire::{SendRequest, fragment_into_frames},
};

/// Runs until the backbone is shut down or the queue is closed. A per-write
/// timeout abandons the remaining fragments of the *current* request but
/// keeps the writer alive for subsequent requests; any other write error is
/// fatal and triggers backbone shutdown.
pub async fn run_egress_writer(backbone: Arc<Backbone>, mut queue: mpsc::Receiver<SendRequest>) {
    loop {
        let req = select! {
            _ = backbone.cancel.cancelled() => return,
            req = queue.recv() => match req {
                Some(req) => req,
                None => return,
            },
        };

        for frame in fragment_into_frames(req.session_id, req.is_last, &req.bytes) {
            let write = async {
                let mut w = backbone.writer.lock().await;
                w.write_all(&frame).await
            };
            match timeout(backbone.runtime.write_timeout, write).await {
                Ok(Ok(())) => continue,
                Ok(Err(e)) => {
                    warn!(error = %e, "egress writer: hard write error, shutting down backbone");
                    backbone.shutdown().await;
                    return;
                },
                Err(_elapsed) => {
                    warn!(
                        session_id = req.session_id,
                        "egress writer: write timeout, abandoning remainder of request"
                    );
                    break;
                },
            }
        }
    }
}
