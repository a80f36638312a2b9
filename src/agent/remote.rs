// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Remote agent: dials the configured target on receipt of an `attach`
//! control command and attaches the resulting socket under the supplied
//! session id.

use std::sync::{Arc, Weak};

use anyhow::{Context, Result};
use once_cell::sync::OnceCell;
use tokio::net::TcpStream;
use tracing::warn;

use crate::{
    agent::rendezvous,
    backbone::{Backbone, control::CallbackFuture},
    cfg::config::RemoteAgentConfig,
};

/// Runs the remote agent to completion: rendezvous with the broker, build
/// the backbone with a callback that dials `target_address` for every
/// `attach` command, then block until the backbone shuts down.
pub async fn run(cfg: RemoteAgentConfig) -> Result<()> {
    let backbone_socket = rendezvous(
        &cfg.broker_address,
        "attach",
        &cfg.tag,
        cfg.runtime.write_timeout,
    )
    .await
    .context("remote agent: broker rendezvous failed")?;

    // The callback needs `Backbone::attach`, but the callback closure has
    // to exist before `Backbone::spawn` returns the `Arc<Backbone>` it
    // closes over. Break the cycle with a `OnceCell<Weak<_>>` set right
    // after construction.
    let backbone_ref: Arc<OnceCell<Weak<Backbone>>> = Arc::new(OnceCell::new());
    let target_address = cfg.target_address.clone();
    let callback_ref = Arc::clone(&backbone_ref);
    // Dials and attaches inline inside the returned future rather than
    // spawning it off: the receiver awaits this to completion before
    // parsing the next already-buffered frame, so a session is registered
    // in the table before any frame addressed to it can arrive.
    let callback = Arc::new(move |command: &str, arg: u16| -> CallbackFuture {
        if command != "attach" {
            return Box::pin(async { false });
        }
        let callback_ref = Arc::clone(&callback_ref);
        let target_address = target_address.clone();
        Box::pin(async move {
            let Some(weak) = callback_ref.get() else {
                return false;
            };
            let Some(backbone) = weak.upgrade() else {
                return false;
            };
            match TcpStream::connect(&target_address).await {
                Ok(socket) => backbone.attach(arg, socket, false).await,
                Err(e) => {
                    warn!(session_id = arg, error = %e, "remote agent: failed to dial target");
                },
            }
            true
        })
    });

    let backbone = Backbone::spawn(backbone_socket, callback, cfg.runtime.clone());
    let _ = backbone_ref.set(Arc::downgrade(&backbone));

    crate::backbone::wait_for_shutdown(&backbone).await
}
