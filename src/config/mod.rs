//! Configuration Module
//!
//! Typed model of the YAML configuration consumed by the master. Every field outside
//! `service.master` and `service.nodes.{min,max}_count` has a default, so the minimal
//! file only names ports and pool bounds.

use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

pub const DEFAULT_CONFIG_PATH: &str = "config/config.yaml";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Deserialize)]
pub struct CacheConfig {
    pub service: ServiceConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServiceConfig {
    pub master: MasterConfig,
    pub nodes: NodesConfig,
    #[serde(default)]
    pub logs: LogsConfig,
    #[serde(default)]
    pub timings: TimingsConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MasterConfig {
    pub port: u16,
    pub node_port_initial: u16,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NodesConfig {
    pub min_count: usize,
    pub max_count: usize,
    /// Path to the `cache-node` executable. Defaults to a sibling of the running binary.
    #[serde(default)]
    pub binary: Option<PathBuf>,
    #[serde(default = "default_recovery_scan_ports")]
    pub recovery_scan_ports: u16,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct LogsConfig {
    #[serde(default)]
    pub dir: Option<PathBuf>,
}

/// Grace periods used while nodes boot. The settle and spawn values are upper bounds:
/// the master stops waiting as soon as the node answers `/health`.
#[derive(Debug, Clone, Deserialize)]
pub struct TimingsConfig {
    #[serde(default = "default_activation_delay_ms")]
    pub activation_delay_ms: u64,
    #[serde(default = "default_settle_ms")]
    pub settle_ms: u64,
    #[serde(default = "default_spawn_grace_ms")]
    pub spawn_grace_ms: u64,
    #[serde(default = "default_health_poll_ms")]
    pub health_poll_ms: u64,
    #[serde(default)]
    pub request_timeout_ms: Option<u64>,
}

impl Default for TimingsConfig {
    fn default() -> Self {
        Self {
            activation_delay_ms: default_activation_delay_ms(),
            settle_ms: default_settle_ms(),
            spawn_grace_ms: default_spawn_grace_ms(),
            health_poll_ms: default_health_poll_ms(),
            request_timeout_ms: None,
        }
    }
}

impl TimingsConfig {
    pub fn activation_delay(&self) -> Duration {
        Duration::from_millis(self.activation_delay_ms)
    }

    pub fn settle(&self) -> Duration {
        Duration::from_millis(self.settle_ms)
    }

    pub fn spawn_grace(&self) -> Duration {
        Duration::from_millis(self.spawn_grace_ms)
    }

    pub fn health_poll(&self) -> Duration {
        Duration::from_millis(self.health_poll_ms.max(1))
    }

    pub fn request_timeout(&self) -> Option<Duration> {
        self.request_timeout_ms.map(Duration::from_millis)
    }
}

fn default_recovery_scan_ports() -> u16 {
    20
}

fn default_activation_delay_ms() -> u64 {
    2000
}

fn default_settle_ms() -> u64 {
    3000
}

fn default_spawn_grace_ms() -> u64 {
    3000
}

fn default_health_poll_ms() -> u64 {
    100
}

impl CacheConfig {
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_yaml(&content)
    }

    pub fn from_yaml(content: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_yaml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let master = &self.service.master;
        let nodes = &self.service.nodes;

        if master.port == 0 || master.node_port_initial == 0 {
            return Err(ConfigError::Invalid("ports must be non-zero".to_string()));
        }
        if nodes.max_count == 0 {
            return Err(ConfigError::Invalid("max_count must be at least 1".to_string()));
        }
        if nodes.min_count > nodes.max_count {
            return Err(ConfigError::Invalid(format!(
                "min_count ({}) exceeds max_count ({})",
                nodes.min_count, nodes.max_count
            )));
        }
        if master
            .node_port_initial
            .checked_add(nodes.recovery_scan_ports)
            .is_none()
        {
            return Err(ConfigError::Invalid(format!(
                "recovery scan of {} ports from {} overflows the port range",
                nodes.recovery_scan_ports, master.node_port_initial
            )));
        }
        Ok(())
    }
}
