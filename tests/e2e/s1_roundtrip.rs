// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use anyhow::Result;

use super::support::{
    deterministic_payload, recv_with_timeout, send_and_half_close, spawn_broker,
    spawn_capture_target, spawn_local_agent, spawn_remote_agent, wait_for_listener,
};

/// A user client talking to the local agent's listener has its bytes
/// delivered unchanged to the server reached by the remote agent's dial
/// target, once both agents have rendezvoused through the broker.
#[tokio::test]
async fn delivers_payload_unchanged_end_to_end() -> Result<()> {
    let broker_addr = spawn_broker().await;
    let (target_addr, mut received) = spawn_capture_target().await?;

    // The local agent issues `create` and waits to be paired; the remote
    // agent then issues `attach` against the same tag. Order the spawns so
    // the create slot exists before the attach arrives.
    let local_listen = spawn_local_agent(&broker_addr, "tag-s1");
    spawn_remote_agent(&broker_addr, "tag-s1", &target_addr);
    wait_for_listener(&local_listen).await;

    let payload = deterministic_payload(500, 7);
    send_and_half_close(&local_listen, &payload).await?;

    let got = recv_with_timeout(&mut received).await;
    assert_eq!(got, payload);

    Ok(())
}
