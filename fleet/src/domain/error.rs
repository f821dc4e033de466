//! Typed domain error enums.
//!
//! This module has zero imports from `crate::infra`, `crate::application`,
//! `tokio`, `std::fs`, `std::process`, or `std::net`.
//! All error types implement `thiserror::Error` and convert to `anyhow::Error`
//! via the `?` operator. Callers branch on a specific failure with
//! `err.downcast_ref::<ExecError>()` and friends.

use thiserror::Error;

use crate::domain::block_device::BlockDevice;
use crate::domain::config::MountSpec;

// ── Config errors ─────────────────────────────────────────────────────────────

/// Errors raised while validating a fleet configuration document.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Node '{node}' references unknown credential '{cred}'.")]
    UnknownCredential { node: String, cred: String },

    #[error("Node '{node}' references unknown mount group '{mount}'.")]
    UnknownMountGroup { node: String, mount: String },

    #[error("Class list '{class}' names unknown node '{node}'.")]
    UnknownClassMember { class: String, node: String },

    #[error("Node '{node}' is listed as both compute and data.")]
    ConflictingClass { node: String },
}

// ── Credential errors ─────────────────────────────────────────────────────────

/// Unusable secret material. Only ever surfaced wrapped in a [`ConnectionError`].
#[derive(Debug, Error)]
pub enum CredentialError {
    #[error("cannot expand '{path}': local home directory is unknown")]
    HomeDirUnavailable { path: String },

    #[error("invalid key file path '{path}': {reason}")]
    InvalidKeyPath { path: String, reason: String },
}

// ── Connection errors ─────────────────────────────────────────────────────────

/// Session establishment with a node failed.
#[derive(Debug, Error)]
#[error("could not connect to {host}:{port}: {reason}")]
pub struct ConnectionError {
    pub host: String,
    pub port: u16,
    pub reason: String,
}

// ── Command execution errors ──────────────────────────────────────────────────

/// Failures of a single remote command.
#[derive(Debug, Error)]
pub enum ExecError {
    /// Every attempt hung past its deadline.
    #[error(
        "command '{command}' on {host} timed out in all {attempts} attempt(s)\nstdout:\n{stdout}\nstderr:\n{stderr}"
    )]
    Timeout {
        command: String,
        host: String,
        attempts: u32,
        stdout: String,
        stderr: String,
    },

    /// The command ran to completion but exited non-zero.
    #[error(
        "command '{command}' failed on {host} with exit code {exit_code}\nstdout:\n{stdout}\nstderr:\n{stderr}"
    )]
    NonZeroExit {
        command: String,
        host: String,
        exit_code: i32,
        stdout: String,
        stderr: String,
    },
}

// ── Provisioning errors ───────────────────────────────────────────────────────

/// A mount requirement could not be satisfied on a node.
#[derive(Debug, Error)]
pub enum ProvisionError {
    #[error(
        "block device '{device}' not found on {host}. The host has these block devices: {}",
        available.join(", ")
    )]
    BlockDeviceNotFound {
        host: String,
        device: String,
        available: Vec<String>,
    },

    #[error("no valid partition found for {mount:?} in block device {snapshot:?} on {host}")]
    NoValidPartitionFound {
        host: String,
        mount: MountSpec,
        snapshot: BlockDevice,
    },
}

// ── Node errors ───────────────────────────────────────────────────────────────

/// Misuse of a node's lifecycle or unexpected remote output.
#[derive(Debug, Error)]
pub enum NodeError {
    #[error("Node {host} has no open session.")]
    NotConnected { host: String },

    #[error("Node {host} already has a session (state: {state}). Disconnect first.")]
    AlreadyConnected { host: String, state: String },

    #[error("Node {host} is unresponsive. Use reconnect to try again.")]
    NeedsReconnect { host: String },

    #[error("No block device is mounted at {mountpoint} on {host}.")]
    MountpointNotFound { host: String, mountpoint: String },

    #[error("Unexpected output from '{command}' on {host}: {output:?}")]
    UnexpectedOutput {
        host: String,
        command: String,
        output: String,
    },
}

// ── Fleet errors ──────────────────────────────────────────────────────────────

/// Fleet-level lookups.
#[derive(Debug, Error)]
pub enum FleetError {
    #[error("No node with host '{0}' in the fleet.")]
    NotFound(String),

    #[error("No node named '{0}' in the fleet.")]
    NameNotFound(String),
}
