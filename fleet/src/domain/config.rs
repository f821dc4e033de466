//! Domain types and validators for the fleet configuration document.
//!
//! Pure functions only: no I/O, no async, no filesystem access.

use std::collections::BTreeMap;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::domain::command::ExecPolicy;
use crate::domain::error::ConfigError;
use crate::domain::node::NodeClass;

// ── Constants ────────────────────────────────────────────────────────────────

/// Port used when a credential does not name one.
pub const DEFAULT_SSH_PORT: u16 = 22;

/// Attempts made by the bounded executor unless configured otherwise.
pub const DEFAULT_NUM_RETRIES: u32 = 5;

// ── Credentials ──────────────────────────────────────────────────────────────

/// Where a credential's secret material comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CredentialKind {
    /// `val` names a process environment variable holding a password.
    #[serde(rename = "env")]
    EnvVar,
    /// `val` is a path to a private key file on the local machine.
    #[serde(rename = "file")]
    KeyFile,
}

/// Declarative credential, as written under `creds` in the config document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CredentialDescriptor {
    pub user: String,
    #[serde(rename = "type")]
    pub kind: CredentialKind,
    #[serde(rename = "val")]
    pub value: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
}

impl CredentialDescriptor {
    /// SSH port for this credential, defaulting to 22.
    #[must_use]
    pub fn port(&self) -> u16 {
        self.port.unwrap_or(DEFAULT_SSH_PORT)
    }
}

// ── Mounts ───────────────────────────────────────────────────────────────────

/// A requirement that `device_name` (or one of its partitions) be mounted at
/// `mountpoint` with at least `min_size_gb` GiB of capacity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MountSpec {
    pub mountpoint: String,
    #[serde(rename = "device")]
    pub device_name: String,
    #[serde(rename = "size_gb")]
    pub min_size_gb: u64,
}

// ── Nodes ────────────────────────────────────────────────────────────────────

/// One entry under `nodes`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeEntry {
    pub host: String,
    pub cred: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mount: Option<String>,
}

// ── Options ──────────────────────────────────────────────────────────────────

/// Fleet-wide behaviour, optionally embedded under `options`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FleetOptions {
    /// Record (rather than raise) connection failures of compute nodes.
    pub tolerate_unresponsive_compute: bool,
    /// Record (rather than raise) connection failures of data nodes.
    pub tolerate_unresponsive_data: bool,
    /// Per-attempt deadline for remote commands. `None` waits indefinitely.
    pub command_timeout_secs: Option<u64>,
    /// Attempts per remote command before giving up on a hang.
    pub num_retries: u32,
}

impl Default for FleetOptions {
    fn default() -> Self {
        Self {
            tolerate_unresponsive_compute: true,
            tolerate_unresponsive_data: true,
            command_timeout_secs: None,
            num_retries: DEFAULT_NUM_RETRIES,
        }
    }
}

impl FleetOptions {
    /// Whether a connection failure of a node in `class` is recorded instead of raised.
    #[must_use]
    pub fn tolerates(&self, class: NodeClass) -> bool {
        match class {
            NodeClass::Compute => self.tolerate_unresponsive_compute,
            NodeClass::Data => self.tolerate_unresponsive_data,
            NodeClass::Unclassified => true,
        }
    }

    /// Default execution policy applied to node commands.
    #[must_use]
    pub fn exec_policy(&self) -> ExecPolicy {
        ExecPolicy {
            timeout: self.command_timeout_secs.map(Duration::from_secs),
            retries: self.num_retries,
        }
    }
}

// ── Config schema ────────────────────────────────────────────────────────────

/// The whole configuration document.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FleetConfig {
    #[serde(default)]
    pub creds: BTreeMap<String, CredentialDescriptor>,
    #[serde(default)]
    pub nodes: BTreeMap<String, NodeEntry>,
    #[serde(default)]
    pub mounts: BTreeMap<String, Vec<MountSpec>>,
    /// Names of nodes in the compute class.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub compute: Vec<String>,
    /// Names of nodes in the data class.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub data: Vec<String>,
    #[serde(default)]
    pub options: FleetOptions,
}

impl FleetConfig {
    /// Parses and validates a JSON configuration document.
    ///
    /// # Errors
    ///
    /// Returns an error if the JSON is malformed or fails [`FleetConfig::validate`].
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json).context("parsing fleet configuration")?;
        config.validate()?;
        Ok(config)
    }

    /// Checks that every reference in the document resolves.
    ///
    /// # Errors
    ///
    /// Returns a [`ConfigError`] for the first dangling credential, mount
    /// group, or class-list reference.
    pub fn validate(&self) -> Result<()> {
        for (name, entry) in &self.nodes {
            if !self.creds.contains_key(&entry.cred) {
                return Err(ConfigError::UnknownCredential {
                    node: name.clone(),
                    cred: entry.cred.clone(),
                }
                .into());
            }
            if let Some(mount) = entry.mount.as_ref().filter(|m| !self.mounts.contains_key(*m)) {
                return Err(ConfigError::UnknownMountGroup {
                    node: name.clone(),
                    mount: mount.clone(),
                }
                .into());
            }
        }
        for (class, members) in [("compute", &self.compute), ("data", &self.data)] {
            if let Some(node) = members.iter().find(|n| !self.nodes.contains_key(*n)) {
                return Err(ConfigError::UnknownClassMember {
                    class: class.to_string(),
                    node: node.clone(),
                }
                .into());
            }
        }
        if let Some(node) = self.compute.iter().find(|n| self.data.contains(n)) {
            return Err(ConfigError::ConflictingClass { node: node.clone() }.into());
        }
        Ok(())
    }

    /// Class of the node named `name`.
    #[must_use]
    pub fn class_of(&self, name: &str) -> NodeClass {
        if self.compute.iter().any(|n| n == name) {
            NodeClass::Compute
        } else if self.data.iter().any(|n| n == name) {
            NodeClass::Data
        } else {
            NodeClass::Unclassified
        }
    }

    /// Mount requirements for `entry`, in declaration order. Empty when the
    /// node names no mount group.
    #[must_use]
    pub fn mounts_for(&self, entry: &NodeEntry) -> Vec<MountSpec> {
        entry
            .mount
            .as_ref()
            .and_then(|group| self.mounts.get(group))
            .cloned()
            .unwrap_or_default()
    }
}

// ── Unit tests ───────────────────────────────────────────────────────────────
