// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use anyhow::{Context, Result};
use clap::Parser;
use ribtunnel::{
    broker::BrokerService,
    cfg::{
        cli::{BrokerArgs, resolve_config_path},
        config::BrokerConfig,
        enums::Role,
        logger::init_logger,
    },
};
use tracing::info;

#[tokio::main]
async fn main() -> Result<()> {
    let args = BrokerArgs::parse();
    let _logger_guard = init_logger("config/logger.yaml")?;
    info!(role = %Role::Broker, "starting");

    let config_path = resolve_config_path(&args.config)?;
    let mut cfg = BrokerConfig::load_from_file(&config_path)
        .with_context(|| format!("failed to load broker config from {config_path:?}"))?;

    if let Some(listen) = args.listen {
        cfg.listen_address = listen;
    }

    BrokerService::new(cfg).run().await
}
