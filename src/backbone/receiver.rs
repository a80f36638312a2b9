// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Backbone receiver: the single task that reads the backbone socket,
//! reassembles frames into a parse buffer, and dispatches complete packets
//! to either a session's reassembly buffer or the control-channel callback.

use std::sync::Arc;

use bytes::{Bytes, BytesMut};
use tokio::{io::AsyncReadExt, io::AsyncWriteExt, select, time::timeout};
use tracing::{debug, error, warn};

use crate::{
    backbone::{Backbone, control::parse_control},
    wire::{FramingError, HEADER_LEN, MAX_PACKET_LENGTH, Packet, decode_frame},
};

const SCRATCH_CAP: usize = 2 * (MAX_PACKET_LENGTH + HEADER_LEN);
const REASSEMBLY_CAP: usize = 2 * SCRATCH_CAP;

/// Runs until the backbone socket errs, hits EOF, or a framing violation is
/// observed. Any of those is fatal to the backbone: the receiver tears it
/// down via [`Backbone::shutdown`] after giving the callback a chance to
/// observe a synthesized `shutdown` command.
pub async fn run_backbone_receiver(backbone: Arc<Backbone>) {
    let mut scratch = vec![0u8; SCRATCH_CAP];
    let mut buf = BytesMut::with_capacity(REASSEMBLY_CAP);

    loop {
        let read = {
            let mut r = backbone.reader.lock().await;
            select! {
                _ = backbone.cancel.cancelled() => return,
                res = r.read(&mut scratch) => res,
            }
        };

        let n = match read {
            Ok(0) => {
                debug!("backbone receiver: EOF");
                teardown(&backbone).await;
                return;
            },
            Ok(n) => n,
            Err(e) => {
                warn!(error = %e, "backbone receiver: read error");
                teardown(&backbone).await;
                return;
            },
        };

        if buf.len() + n > REASSEMBLY_CAP {
            error!(
                unconsumed = buf.len(),
                incoming = n,
                "backbone receiver: reassembly buffer would overflow, peer desync"
            );
            teardown(&backbone).await;
            return;
        }
        buf.extend_from_slice(&scratch[..n]);

        loop {
            match decode_frame(&mut buf) {
                Ok(Some(pkt)) => dispatch(&backbone, pkt).await,
                Ok(None) => break,
                Err(FramingError::BadMagic { found }) => {
                    error!(found, "backbone receiver: bad magic, peer desync");
                    teardown(&backbone).await;
                    return;
                },
                Err(FramingError::PayloadTooLarge(len)) => {
                    error!(len, "backbone receiver: oversize payload, peer desync");
                    teardown(&backbone).await;
                    return;
                },
            }
        }
    }
}

async fn dispatch(backbone: &Arc<Backbone>, pkt: Packet) {
    if pkt.session_id == 0 {
        let (command, arg) = parse_control(&pkt.payload);
        let handled = (backbone.callback)(&command, arg).await;
        if !handled && command == "detach" {
            backbone.detach(arg, false).await;
        }
        return;
    }

    let Some(conn) = backbone.table.get(pkt.session_id) else {
        debug!(
            session_id = pkt.session_id,
            "backbone receiver: payload for unknown session, dropping"
        );
        return;
    };

    let flushed: Option<Bytes> = {
        let mut reassembly = conn.reassembly.lock().expect("reassembly mutex poisoned");
        reassembly.extend_from_slice(&pkt.payload);
        if pkt.is_last {
            Some(reassembly.split().freeze())
        } else {
            None
        }
    };

    let Some(data) = flushed else { return };

    let write = async {
        let mut w = conn.socket.lock().await;
        w.write_all(&data).await
    };
    if let Err(e) = timeout(backbone.runtime.user_write_timeout, write)
        .await
        .unwrap_or_else(|_| Err(std::io::Error::other("user-socket write timeout")))
    {
        debug!(
            session_id = pkt.session_id,
            error = %e,
            "backbone receiver: user-socket write failed, detaching"
        );
        backbone.detach(pkt.session_id, true).await;
    }
}

async fn teardown(backbone: &Arc<Backbone>) {
    let _ = (backbone.callback)("shutdown", 0).await;
    backbone.shutdown().await;
}
