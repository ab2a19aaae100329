//! Service endpoint configuration

use anyhow::{Context, Result};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;

/// Base URLs of the platform services. Defaults match a local compose
/// deployment; override via `config.toml` in the config directory.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Endpoints {
    pub auth_url: String,
    pub catalog_url: String,
    pub booking_url: String,
    pub payment_url: String,
}

impl Default for Endpoints {
    fn default() -> Self {
        Self {
            auth_url: "http://localhost:8001".to_string(),
            catalog_url: "http://localhost:8002".to_string(),
            booking_url: "http://localhost:8003".to_string(),
            payment_url: "http://localhost:8004".to_string(),
        }
    }
}

impl Endpoints {
    fn config_path() -> Result<PathBuf> {
        let proj_dirs = ProjectDirs::from("com", "eventbook-cli", "eventbook-cli")
            .context("Could not determine config directory")?;
        Ok(proj_dirs.config_dir().join("config.toml"))
    }

    /// Load endpoint overrides from disk, falling back to defaults when no
    /// config file exists.
    pub fn load() -> Result<Self> {
        let path = Self::config_path()?;

        if !path.exists() {
            return Ok(Self::default());
        }

        let content = fs::read_to_string(&path).context("Failed to read config file")?;
        toml::from_str(&content).context("Failed to parse config file")
    }
}
