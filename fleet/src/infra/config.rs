//! Fleet configuration files on disk.

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};

use crate::domain::config::FleetConfig;

/// Environment variable that overrides the default config location.
pub const CONFIG_ENV: &str = "FLEET_CONFIG";

/// Read, parse and validate a JSON fleet configuration.
///
/// # Errors
///
/// Returns an error if the file cannot be read, is not valid JSON, or fails
/// validation.
pub fn load_config(path: &Path) -> Result<FleetConfig> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("cannot read {}", path.display()))?;
    FleetConfig::from_json(&content).with_context(|| format!("cannot load {}", path.display()))
}

/// `$FLEET_CONFIG` if set, otherwise `~/.remote-fleet/config.json`.
///
/// # Errors
///
/// Returns an error if the variable is unset and the home directory is unknown.
pub fn default_config_path() -> Result<PathBuf> {
    if let Ok(val) = std::env::var(CONFIG_ENV) {
        return Ok(PathBuf::from(val));
    }
    let home =
        dirs::home_dir().ok_or_else(|| anyhow::anyhow!("cannot determine home directory"))?;
    Ok(home.join(".remote-fleet").join("config.json"))
}
