//! Port trait definitions for the Application layer.
//!
//! Ports are the interfaces (contracts) that infrastructure must fulfill.
//! This file imports only from `crate::domain`, never from `crate::infra`.

use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use anyhow::Result;

use crate::domain::block_device::BlockDevice;
use crate::domain::command::CommandResult;

// ── Value Types ───────────────────────────────────────────────────────────────

/// Resolved secret material for authenticating a session.
#[derive(Clone, PartialEq, Eq)]
pub enum Secret {
    Password(String),
    /// Absolute path to a private key file on the local machine.
    KeyFile(PathBuf),
}

impl std::fmt::Debug for Secret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Password(_) => f.write_str("Password(***)"),
            Self::KeyFile(path) => f.debug_tuple("KeyFile").field(path).finish(),
        }
    }
}

/// Everything a connector needs to open an authenticated session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionTarget {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub secret: Secret,
}

/// Output collected by a running command.
///
/// The session appends as bytes arrive; the executor reads a snapshot when an
/// attempt is abandoned, so partial output survives a timeout.
#[derive(Debug, Default)]
pub struct OutputCapture {
    stdout: Mutex<Vec<u8>>,
    stderr: Mutex<Vec<u8>>,
}

impl OutputCapture {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_stdout(&self, bytes: &[u8]) {
        self.stdout
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .extend_from_slice(bytes);
    }

    pub fn push_stderr(&self, bytes: &[u8]) {
        self.stderr
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .extend_from_slice(bytes);
    }

    /// Lossy UTF-8 copies of `(stdout, stderr)` collected so far.
    #[must_use]
    pub fn snapshot(&self) -> (String, String) {
        let out = self.stdout.lock().unwrap_or_else(PoisonError::into_inner);
        let err = self.stderr.lock().unwrap_or_else(PoisonError::into_inner);
        (
            String::from_utf8_lossy(&out).into_owned(),
            String::from_utf8_lossy(&err).into_owned(),
        )
    }
}

// ── Session Ports ─────────────────────────────────────────────────────────────

/// An open, authenticated session with one remote host.
#[allow(async_fn_in_trait)]
pub trait RemoteSession {
    /// Run `command` through the remote shell and wait for it to finish.
    ///
    /// Output is appended to `capture` as it arrives. Dropping the returned
    /// future abandons the command and frees the session for the next one.
    ///
    /// # Errors
    ///
    /// Returns an error only for transport failures. A non-zero exit is a
    /// normal [`CommandResult`].
    async fn exec(&self, command: &str, capture: &OutputCapture) -> Result<CommandResult>;

    /// Launch `command` without waiting for it or collecting its output.
    async fn exec_detached(&self, command: &str) -> Result<()>;

    /// Copy a local file to `remote`. Returns the number of bytes written.
    async fn upload(&self, local: &Path, remote: &str) -> Result<u64>;

    /// Copy `remote` to a local file. Returns the number of bytes written.
    async fn download(&self, remote: &str, local: &Path) -> Result<u64>;

    /// Whether the transport is still usable. Never fails.
    fn is_active(&self) -> bool;

    /// Tear the transport down. Safe to call more than once.
    ///
    /// # Errors
    ///
    /// Returns an error if the disconnect message could not be sent.
    fn close(&self) -> Result<()>;
}

/// Opens sessions. One connector is shared by every node in a fleet.
#[allow(async_fn_in_trait)]
pub trait SessionConnector {
    type Session: RemoteSession;

    /// Connect and authenticate.
    ///
    /// # Errors
    ///
    /// Returns an error if the host is unreachable or rejects the credentials.
    async fn connect(&self, target: &SessionTarget) -> Result<Self::Session>;
}

// ── Storage Port ──────────────────────────────────────────────────────────────

/// The remote operations mount provisioning needs from a host.
#[allow(async_fn_in_trait)]
pub trait StorageHost {
    /// Host name, for diagnostics.
    fn host(&self) -> &str;
    /// Login user, which ends up owning provisioned mountpoints.
    fn user(&self) -> &str;
    /// Expands a leading `~` against the remote home directory.
    fn resolve_path(&self, path: &str) -> String;
    /// Current block device tree.
    async fn list_block_devices(&self) -> Result<Vec<BlockDevice>>;
    /// `mkdir -p` on the remote host.
    async fn make_directory(&self, path: &str) -> Result<()>;
    /// Hand `path` to the login user.
    async fn change_owner(&self, path: &str) -> Result<()>;
    /// Create a fresh ext4 filesystem on `device` (a `/dev/...` path).
    async fn make_filesystem(&self, device: &str) -> Result<()>;
    /// Mount `device` at `mountpoint`.
    async fn mount(&self, device: &str, mountpoint: &str) -> Result<()>;
}
