//! Production wiring: configuration file plus SSH transport.

use std::path::Path;
use std::sync::Arc;

use anyhow::Result;

use crate::application::services::fleet::Fleet;
use crate::infra::config::load_config;
use crate::infra::ssh::SshConnector;

/// A fleet connected over SSH.
pub type SshFleet = Fleet<SshConnector>;

/// Load the configuration at `path` and connect every node over SSH.
///
/// # Errors
///
/// Returns an error if the configuration cannot be loaded, or if a node whose
/// class is not tolerated fails to connect.
pub async fn open_fleet(path: &Path) -> Result<SshFleet> {
    let config = load_config(path)?;
    Fleet::load(&config, Arc::new(SshConnector::default())).await
}
