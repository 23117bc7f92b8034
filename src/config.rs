//! Config fields definitions for the simulator server.

use serde::Deserialize;

use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, PartialEq)]
#[serde(default)]
pub struct ServerConfig {
    pub bind_address: String,
    /// Directory where captured snapshots are persisted.
    pub snapshots_dir: PathBuf,
    /// Snapshot file loaded as the immutable baseline on boot. Without it
    /// the server starts on an empty snapshot.
    pub baseline_path: Option<PathBuf>,
    /// Optional JSON price file applied over the compiled-in price table.
    pub prices_path: Option<PathBuf>,
    /// Region passed to the price oracle on refreshes.
    pub region: Option<String>,
    /// kubectl context used for live captures.
    pub kube_context: Option<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:8080".to_string(),
            snapshots_dir: PathBuf::from("snapshots"),
            baseline_path: None,
            prices_path: None,
            region: None,
            kube_context: None,
        }
    }
}

impl ServerConfig {
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        Ok(serde_yaml::from_str(&raw)?)
    }
}
