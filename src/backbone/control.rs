// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Control-channel (session id 0) command encoding and parsing.
//!
//! Frames on session id 0 carry an ASCII `"<command>:<arg>"` line. The
//! callback that receives dispatched commands is a small boxed closure
//! rather than a trait object hierarchy.

use std::{future::Future, pin::Pin, sync::Arc};

/// The future a [`Callback`] returns. Boxed because a `Fn` trait object
/// can't return an opaque `impl Future` directly.
pub type CallbackFuture = Pin<Box<dyn Future<Output = bool> + Send>>;

/// Dispatched on every control-channel packet the receiver does not handle
/// itself, and awaited to completion before the receiver parses the next
/// frame already buffered from the same read. This lets a callback (the
/// remote agent's target dial on `attach`) register a session in the table
/// before any frame addressed to it can be processed, instead of racing a
/// spawned task against the next frame in the same read.
///
/// Returns `true` if the callback fully handled the command, suppressing
/// the receiver's own default handling (currently only the `detach`
/// fallback).
pub type Callback = Arc<dyn Fn(&str, u16) -> CallbackFuture + Send + Sync>;

/// Parse a control payload into `(command, arg)`.
///
/// The command is trimmed and lowercased; the argument is parsed as a u16,
/// defaulting to `0` on any parse failure (missing separator, non-numeric
/// arg, or non-UTF8 payload): a malformed control frame is still
/// dispatched, just with `arg = 0`.
pub fn parse_control(payload: &[u8]) -> (String, u16) {
    let text = String::from_utf8_lossy(payload);
    let text = text.trim();
    match text.split_once(':') {
        Some((cmd, arg)) => {
            let cmd = cmd.trim().to_ascii_lowercase();
            let arg = arg.trim().parse::<u16>().unwrap_or(0);
            (cmd, arg)
        },
        None => (text.to_ascii_lowercase(), 0),
    }
}

/// Format the `attach:<id>` notification sent to the peer.
pub fn format_attach(session_id: u16) -> String {
    format!("attach:{session_id}")
}

/// Format the `detach:<id>` notification sent to the peer.
pub fn format_detach(session_id: u16) -> String {
    format!("detach:{session_id}")
}
