// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::{fs, path::Path, time::Duration};

use anyhow::{Context, Result, ensure};
use serde::{Deserialize, Serialize};

/// Multiplexer-wide tunables shared by both agent roles. Defaults mirror the
/// fixed constants of the wire protocol; a config file only needs to list
/// the ones it wants to override.
#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct BackboneRuntime {
    #[serde(rename = "QueueCapacity", default = "default_queue_capacity")]
    /// Bounded send-queue capacity; the egress writer is the sole consumer.
    pub queue_capacity: usize,

    #[serde(
        rename = "WriteTimeout",
        with = "serde_secs",
        default = "default_write_timeout"
    )]
    /// Per-write deadline on the backbone socket.
    pub write_timeout: Duration,

    #[serde(
        rename = "UserWriteTimeout",
        with = "serde_secs",
        default = "default_user_write_timeout"
    )]
    /// Per-write deadline when flushing reassembled payload to a user socket.
    pub user_write_timeout: Duration,

    #[serde(
        rename = "IngressFlushDeadlineMs",
        default = "default_ingress_flush_deadline_ms"
    )]
    /// Read deadline (milliseconds) used to flush a full-buffer ingress read.
    pub ingress_flush_deadline_ms: u64,
}

impl Default for BackboneRuntime {
    fn default() -> Self {
        Self {
            queue_capacity: default_queue_capacity(),
            write_timeout: default_write_timeout(),
            user_write_timeout: default_user_write_timeout(),
            ingress_flush_deadline_ms: default_ingress_flush_deadline_ms(),
        }
    }
}

impl BackboneRuntime {
    pub fn ingress_flush_deadline(&self) -> Duration {
        Duration::from_millis(self.ingress_flush_deadline_ms)
    }

    fn validate(&self) -> Result<()> {
        ensure!(self.queue_capacity >= 32, "QueueCapacity must be >= 32");
        Ok(())
    }
}

fn default_queue_capacity() -> usize {
    32
}
fn default_write_timeout() -> Duration {
    Duration::from_secs(10)
}
fn default_user_write_timeout() -> Duration {
    Duration::from_secs(2)
}
fn default_ingress_flush_deadline_ms() -> u64 {
    1
}

/// Broker process configuration: the TCP port it listens on for rendezvous
/// handshakes, and how long it keeps an unpaired `create` slot alive.
#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct BrokerConfig {
    #[serde(rename = "ListenAddress")]
    /// Address the broker binds for incoming agent connections.
    pub listen_address: String,

    #[serde(
        rename = "PairingTimeout",
        with = "serde_secs",
        default = "default_pairing_timeout"
    )]
    /// How long a `create` slot waits for a matching `attach` before the
    /// broker gives up and frees it.
    pub pairing_timeout: Duration,

    #[serde(
        rename = "ControlReadTimeout",
        with = "serde_secs",
        default = "default_control_read_timeout"
    )]
    /// Deadline for reading the single rendezvous control line.
    pub control_read_timeout: Duration,
}

fn default_pairing_timeout() -> Duration {
    Duration::from_secs(60)
}
fn default_control_read_timeout() -> Duration {
    Duration::from_secs(60)
}

impl BrokerConfig {
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let cfg: Self = load_yaml(path)?;
        ensure!(
            !cfg.listen_address.is_empty(),
            "ListenAddress must not be empty"
        );
        Ok(cfg)
    }
}

/// Local agent configuration: the user-facing listener and how it reaches
/// the broker.
#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct LocalAgentConfig {
    #[serde(rename = "BrokerAddress")]
    /// Address of the rendezvous broker.
    pub broker_address: String,

    #[serde(rename = "Tag")]
    /// Opaque rendezvous tag shared with the remote agent.
    pub tag: String,

    #[serde(rename = "ListenAddress")]
    /// Address the local agent binds to accept user connections.
    pub listen_address: String,

    #[serde(rename = "Runtime", default)]
    /// Backbone tunables.
    pub runtime: BackboneRuntime,
}

impl LocalAgentConfig {
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let cfg: Self = load_yaml(path)?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn validate(&self) -> Result<()> {
        ensure!(
            !self.broker_address.is_empty(),
            "BrokerAddress must not be empty"
        );
        ensure!(!self.tag.is_empty(), "Tag must not be empty");
        ensure!(
            !self.listen_address.is_empty(),
            "ListenAddress must not be empty"
        );
        self.runtime.validate()
    }
}

/// Remote agent configuration: the target it dials on behalf of attached
/// sessions and how it reaches the broker.
#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct RemoteAgentConfig {
    #[serde(rename = "BrokerAddress")]
    /// Address of the rendezvous broker.
    pub broker_address: String,

    #[serde(rename = "Tag")]
    /// Opaque rendezvous tag shared with the local agent.
    pub tag: String,

    #[serde(rename = "TargetAddress")]
    /// Address the remote agent dials for each attached session.
    pub target_address: String,

    #[serde(rename = "Runtime", default)]
    /// Backbone tunables.
    pub runtime: BackboneRuntime,
}

impl RemoteAgentConfig {
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let cfg: Self = load_yaml(path)?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn validate(&self) -> Result<()> {
        ensure!(
            !self.broker_address.is_empty(),
            "BrokerAddress must not be empty"
        );
        ensure!(!self.tag.is_empty(), "Tag must not be empty");
        ensure!(
            !self.target_address.is_empty(),
            "TargetAddress must not be empty"
        );
        self.runtime.validate()
    }
}

fn load_yaml<T: serde::de::DeserializeOwned, P: AsRef<Path>>(path: P) -> Result<T> {
    let s = fs::read_to_string(&path)
        .with_context(|| format!("failed to read config file {:?}", path.as_ref()))?;
    serde_yaml::from_str(&s).context("failed to parse config YAML")
}

/// Serde helper for representing `Duration` as a whole number of seconds.
mod serde_secs {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        let secs = u64::deserialize(d)?;
        Ok(Duration::from_secs(secs))
    }
}
