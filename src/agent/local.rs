// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Local agent: accepts user traffic on a TCP port and attaches each
//! accepted connection as a new backbone session.

use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::net::TcpListener;
use tracing::{info, warn};

use crate::{
    agent::rendezvous,
    backbone::{Backbone, control::CallbackFuture, wait_for_shutdown},
    cfg::config::LocalAgentConfig,
};

/// Runs the local agent to completion: rendezvous with the broker, build
/// the backbone, then accept user connections until the backbone shuts
/// down.
pub async fn run(cfg: LocalAgentConfig) -> Result<()> {
    let backbone_socket = rendezvous(
        &cfg.broker_address,
        "create",
        &cfg.tag,
        cfg.runtime.write_timeout,
    )
    .await
    .context("local agent: broker rendezvous failed")?;

    // The local agent's own sessions are always created by accepting a
    // user connection, never by a peer-initiated `attach`; the callback
    // has nothing to do.
    let callback = Arc::new(|_command: &str, _arg: u16| -> CallbackFuture { Box::pin(async { false }) });
    let backbone = Backbone::spawn(backbone_socket, callback, cfg.runtime.clone());

    let listener = TcpListener::bind(&cfg.listen_address)
        .await
        .with_context(|| format!("failed to bind user listener {}", cfg.listen_address))?;
    info!(addr = %cfg.listen_address, "local agent: listening for user connections");

    let accept_backbone = Arc::clone(&backbone);
    let accept_loop = async move {
        loop {
            let (socket, peer) = match listener.accept().await {
                Ok(pair) => pair,
                Err(e) => {
                    warn!(error = %e, "local agent: accept failed");
                    continue;
                },
            };

            let session_id = match accept_backbone.mint_session_id() {
                Ok(id) => id,
                Err(e) => {
                    warn!(error = %e, "local agent: cannot mint session id, dropping connection");
                    continue;
                },
            };

            info!(%peer, session_id, "local agent: accepted user connection");
            accept_backbone.attach(session_id, socket, true).await;
        }
    };

    tokio::select! {
        _ = accept_loop => {},
        res = wait_for_shutdown(&backbone) => { res?; },
    }

    Ok(())
}
