// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use anyhow::{Context, Result};
use clap::Parser;
use ribtunnel::{
    agent::local,
    cfg::{
        cli::{LocalAgentArgs, resolve_config_path},
        config::LocalAgentConfig,
        enums::Role,
        logger::init_logger,
    },
};
use tracing::info;

#[tokio::main]
async fn main() -> Result<()> {
    let args = LocalAgentArgs::parse();
    let _logger_guard = init_logger("config/logger.yaml")?;
    info!(role = %Role::Local, "starting");

    let config_path = resolve_config_path(&args.config)?;
    let mut cfg = LocalAgentConfig::load_from_file(&config_path)
        .with_context(|| format!("failed to load local agent config from {config_path:?}"))?;

    if let Some(broker) = args.broker {
        cfg.broker_address = broker;
    }
    if let Some(tag) = args.tag {
        cfg.tag = tag;
    }
    if let Some(listen) = args.listen {
        cfg.listen_address = listen;
    }

    local::run(cfg).await
}
