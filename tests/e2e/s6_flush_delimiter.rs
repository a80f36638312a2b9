// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::sync::Arc;

use anyhow::{Context, Result};
use bytes::BytesMut;
use ribtunnel::{
    backbone::{Backbone, CallbackFuture},
    wire::MAX_PACKET_LENGTH,
};
use tokio::io::AsyncWriteExt;

use super::support::{loopback_pair, read_one_frame, test_runtime};

/// A user read that exactly fills the ingress buffer is followed, within
/// the configured flush deadline, by an empty `is_last` delimiter frame —
/// without it, the peer would have no signal to flush its reassembly
/// buffer for a message that happens to land exactly on a frame boundary.
#[tokio::test]
async fn exact_fill_read_is_followed_by_empty_flush_frame() -> Result<()> {
    let (backbone_socket, mut driver_socket) = loopback_pair().await?;
    let (mut user_side, agent_side) = loopback_pair().await?;

    let callback = Arc::new(|_cmd: &str, _arg: u16| -> CallbackFuture { Box::pin(async { false }) });
    let backbone = Backbone::spawn(backbone_socket, callback, test_runtime());
    backbone.attach(9, agent_side, false).await;

    user_side
        .write_all(&vec![0xABu8; MAX_PACKET_LENGTH])
        .await
        .context("failed to write exact-fill payload")?;

    let mut buf = BytesMut::new();
    let first = read_one_frame(&mut driver_socket, &mut buf).await?;
    assert_eq!(first.session_id, 9);
    assert_eq!(first.payload.len(), MAX_PACKET_LENGTH);
    assert!(!first.is_last);

    let second = read_one_frame(&mut driver_socket, &mut buf).await?;
    assert_eq!(second.session_id, 9);
    assert!(second.payload.is_empty());
    assert!(second.is_last);

    Ok(())
}

/// Same exact-fill boundary, but the user socket closes immediately instead
/// of pausing: EOF must still emit the empty `is_last` delimiter before the
/// session detaches, or the final chunk would be stranded unflushed in the
/// peer's reassembly buffer.
#[tokio::test]
async fn exact_fill_read_followed_by_eof_still_flushes() -> Result<()> {
    let (backbone_socket, mut driver_socket) = loopback_pair().await?;
    let (mut user_side, agent_side) = loopback_pair().await?;

    let callback = Arc::new(|_cmd: &str, _arg: u16| -> CallbackFuture { Box::pin(async { false }) });
    let backbone = Backbone::spawn(backbone_socket, callback, test_runtime());
    backbone.attach(9, agent_side, false).await;

    user_side
        .write_all(&vec![0xCDu8; MAX_PACKET_LENGTH])
        .await
        .context("failed to write exact-fill payload")?;
    user_side.shutdown().await.context("failed to half-close user socket")?;

    let mut buf = BytesMut::new();
    let first = read_one_frame(&mut driver_socket, &mut buf).await?;
    assert_eq!(first.session_id, 9);
    assert_eq!(first.payload.len(), MAX_PACKET_LENGTH);
    assert!(!first.is_last);

    let second = read_one_frame(&mut driver_socket, &mut buf).await?;
    assert_eq!(second.session_id, 9);
    assert!(second.payload.is_empty());
    assert!(second.is_last);

    Ok(())
}
