//! `cadence.toml` loading.
//!
//! The file holds the coordinator sections (`[quality]`, `[policy]`,
//! `[monitoring]`, `[sprint]`) plus a top-level `data_dir`. Every key is
//! optional.

use cadence_orchestrator::CoordinatorConfig;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use tracing::info;

/// Full CLI configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct CadenceConfig {
    /// Root for agent working directories and the audit trail.
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
    /// Coordinator sections, read from the top level of the file.
    #[serde(flatten)]
    pub coordinator: CoordinatorConfig,
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("./cadence-data")
}

impl Default for CadenceConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            coordinator: CoordinatorConfig::default(),
        }
    }
}

/// Read and validate `path`. A missing file yields the defaults.
pub fn load_config(path: &Path) -> anyhow::Result<CadenceConfig> {
    if !path.exists() {
        info!(path = %path.display(), "Config file not found, using defaults");
        return Ok(CadenceConfig::default());
    }

    let content = std::fs::read_to_string(path).map_err(|e| {
        anyhow::anyhow!("Failed to read config '{}': {}", path.display(), e)
    })?;
    let config: CadenceConfig = toml::from_str(&content).map_err(|e| {
        anyhow::anyhow!("Failed to parse config '{}': {}", path.display(), e)
    })?;
    config.coordinator.validate()?;

    info!(path = %path.display(), "Config loaded");
    Ok(config)
}
