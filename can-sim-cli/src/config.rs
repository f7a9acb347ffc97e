//! Configuration loading and validation
//!
//! A simulation is described by one file, JSON or TOML (picked by file
//! extension, JSON otherwise):
//!
//! ```json
//! {
//!   "canif": { "name": "vcan0" },
//!   "nodes": [
//!     { "name": "ECU1", "enabled": true, "path": "ecu1.toml" },
//!     { "name": "ECU2", "enabled": false, "path": "ecu2.toml" }
//!   ]
//! }
//! ```

use anyhow::{ensure, Context, Result};
use can_sim_core::{SocketOptions, DEFAULT_POLL_TIMEOUT};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Configuration file used when none is given on the command line
pub const DEFAULT_CONFIG: &str = "default.json";

/// Main application configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SimConfig {
    pub canif: CanIfConfig,
    pub nodes: Vec<NodeConfig>,
}

/// CAN interface settings
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CanIfConfig {
    pub name: String,
    #[serde(default = "default_true")]
    pub fd_frames: bool,
    #[serde(default = "default_true")]
    pub recv_own_msgs: bool,
    #[serde(default = "default_true")]
    pub error_frames: bool,
    #[serde(default = "default_true")]
    pub timestamps: bool,
    #[serde(default = "default_poll_timeout_ms")]
    pub poll_timeout_ms: u64,
}

/// One simulated node, in dispatch order
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct NodeConfig {
    pub name: String,
    /// Enable the node at startup
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Node script; relative paths are resolved against the config file
    pub path: PathBuf,
}

fn default_true() -> bool {
    true
}

fn default_poll_timeout_ms() -> u64 {
    DEFAULT_POLL_TIMEOUT.as_millis() as u64
}

impl CanIfConfig {
    pub fn socket_options(&self) -> SocketOptions {
        SocketOptions {
            fd_frames: self.fd_frames,
            recv_own_msgs: self.recv_own_msgs,
            error_frames: self.error_frames,
            timestamps: self.timestamps,
        }
    }

    pub fn poll_timeout(&self) -> Duration {
        Duration::from_millis(self.poll_timeout_ms)
    }
}

impl SimConfig {
    /// Check the invariants serde cannot express
    pub fn validate(&self) -> Result<()> {
        ensure!(
            !self.canif.name.trim().is_empty(),
            "canif.name must not be empty"
        );
        ensure!(!self.nodes.is_empty(), "at least one node is required");
        for (index, node) in self.nodes.iter().enumerate() {
            ensure!(
                !node.name.trim().is_empty(),
                "nodes[{}].name must not be empty",
                index
            );
            ensure!(
                !node.path.as_os_str().is_empty(),
                "nodes[{}] ({}) has no script path",
                index,
                node.name
            );
        }
        Ok(())
    }

    /// Make relative script paths relative to `base`
    pub fn resolve_paths(&mut self, base: &Path) {
        for node in &mut self.nodes {
            if node.path.is_relative() {
                node.path = base.join(&node.path);
            }
        }
    }
}

/// Parse configuration text as TOML or JSON
pub fn parse_config(content: &str, is_toml: bool) -> Result<SimConfig> {
    let config: SimConfig = if is_toml {
        toml::from_str(content)?
    } else {
        serde_json::from_str(content)?
    };
    Ok(config)
}

/// Load, validate and resolve a configuration file
pub fn load_config(path: &Path) -> Result<SimConfig> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {:?}", path))?;

    let is_toml = path
        .extension()
        .map_or(false, |ext| ext.eq_ignore_ascii_case("toml"));
    let mut config = parse_config(&content, is_toml)
        .with_context(|| format!("Failed to parse config file: {:?}", path))?;

    config
        .validate()
        .with_context(|| format!("Invalid config file: {:?}", path))?;

    if let Some(base) = path.parent() {
        config.resolve_paths(base);
    }

    Ok(config)
}
