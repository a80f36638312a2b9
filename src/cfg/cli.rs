// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::Parser;

pub fn resolve_config_path(rel: &str) -> Result<PathBuf> {
    let p = Path::new(rel);

    let abs = if p.is_absolute() {
        p.to_path_buf()
    } else {
        std::env::current_dir()
            .context("cannot get current working dir")?
            .join(p)
    };

    let canon = abs
        .canonicalize()
        .with_context(|| format!("failed to canonicalize path {abs:?}"))?;

    Ok(canon)
}

/// Broker CLI flags. `--listen` overrides `ListenAddress` from the config
/// file when present.
#[derive(Parser, Debug)]
#[command(name = "broker", about = "Rendezvous broker for ribtunnel agents")]
pub struct BrokerArgs {
    #[arg(long, default_value = "config/broker.yaml")]
    pub config: String,

    #[arg(long)]
    pub listen: Option<String>,
}

/// Local agent CLI flags.
#[derive(Parser, Debug)]
#[command(name = "local-agent", about = "User-facing ribtunnel agent")]
pub struct LocalAgentArgs {
    #[arg(long, default_value = "config/local_agent.yaml")]
    pub config: String,

    #[arg(long)]
    pub broker: Option<String>,

    #[arg(long)]
    pub tag: Option<String>,

    #[arg(long)]
    pub listen: Option<String>,
}

/// Remote agent CLI flags.
#[derive(Parser, Debug)]
#[command(name = "remote-agent", about = "Target-dialing ribtunnel agent")]
pub struct RemoteAgentArgs {
    #[arg(long, default_value = "config/remote_agent.yaml")]
    pub config: String,

    #[arg(long)]
    pub broker: Option<String>,

    #[arg(long)]
    pub tag: Option<String>,

    #[arg(long)]
    pub target: Option<String>,
}
