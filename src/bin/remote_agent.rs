// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use anyhow::{Context, Result};
use clap::Parser;
use ribtunnel::{
    agent::remote,
    cfg::{
        cli::{RemoteAgentArgs, resolve_config_path},
        config::RemoteAgentConfig,
        enums::Role,
        logger::init_logger,
    },
};
use tracing::info;

#[tokio::main]
async fn main() -> Result<()> {
    let args = RemoteAgentArgs::parse();
    let _logger_guard = init_logger("config/logger.yaml")?;
    info!(role = %Role::Remote, "starting");

    let config_path = resolve_config_path(&args.config)?;
    let mut cfg = RemoteAgentConfig::load_from_file(&config_path)
        .with_context(|| format!("failed to load remote agent config from {config_path:?}"))?;

    if let Some(broker) = args.broker {
        cfg.broker_address = broker;
    }
    if let Some(tag) = args.tag {
        cfg.tag = tag;
    }
    if let Some(target) = args.target {
        cfg.target_address = target;
    }

    remote::run(cfg).await
}
