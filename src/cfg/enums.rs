// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use core::fmt;

use serde::{Deserialize, Serialize};

/// Which role a process plays. Purely informational (log context); each
/// binary already knows its own role from which config section it reads.
#[derive(Deserialize, Serialize, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    #[serde(rename = "broker", alias = "Broker", alias = "BROKER")]
    Broker,
    #[serde(rename = "local", alias = "Local", alias = "LOCAL")]
    Local,
    #[serde(rename = "remote", alias = "Remote", alias = "REMOTE")]
    Remote,
}
impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Role::Broker => "broker",
            Role::Local => "local",
            Role::Remote => "remote",
        })
    }
}
