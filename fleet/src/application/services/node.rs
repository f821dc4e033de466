//! Connection manager for a single remote node.
//!
//! A [`Node`] owns at most one session. Every remote operation goes through
//! the bounded executor while holding the node's command lock, so commands
//! from concurrent callers are serialized.

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::application::ports::{RemoteSession, SessionConnector, SessionTarget, StorageHost};
use crate::application::services::credentials;
use crate::application::services::executor::run_bounded;
use crate::application::services::storage::{self, MountOutcome};
use crate::domain::block_device::{self, BlockDevice, LSBLK_ARGV, parse_lsblk};
use crate::domain::command::{CommandResult, ExecPolicy, detached, join_argv};
use crate::domain::config::{CredentialDescriptor, MountSpec};
use crate::domain::error::{ConnectionError, ExecError, NodeError};
use crate::domain::node::{ConnectionState, NodeClass, expand_home, machine_name};

/// How [`Node::create_file`] fills a new file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileFill {
    /// Random bytes via a detached `dd if=/dev/urandom`; returns before the write finishes.
    Random,
    /// A sparse file of the requested length via `truncate`.
    Sparse,
}

/// One remote machine and its session.
pub struct Node<C: SessionConnector> {
    name: String,
    host: String,
    class: NodeClass,
    credential: CredentialDescriptor,
    mounts: Vec<MountSpec>,
    tolerant: bool,
    policy: ExecPolicy,
    connector: Arc<C>,
    session: Option<C::Session>,
    home: Option<String>,
    state: ConnectionState,
    last_error: Option<String>,
    mount_outcomes: Vec<MountOutcome>,
    command_lock: Mutex<()>,
}

impl<C: SessionConnector> Node<C> {
    /// A disconnected node with no mount requirements, tolerant of connection
    /// failures and using the default execution policy.
    pub fn new(
        name: impl Into<String>,
        host: impl Into<String>,
        credential: CredentialDescriptor,
        connector: Arc<C>,
    ) -> Self {
        Self {
            name: name.into(),
            host: host.into(),
            class: NodeClass::Unclassified,
            credential,
            mounts: Vec::new(),
            tolerant: true,
            policy: ExecPolicy::default(),
            connector,
            session: None,
            home: None,
            state: ConnectionState::Disconnected,
            last_error: None,
            mount_outcomes: Vec::new(),
            command_lock: Mutex::new(()),
        }
    }

    #[must_use]
    pub fn with_mounts(mut self, mounts: Vec<MountSpec>) -> Self {
        self.mounts = mounts;
        self
    }

    #[must_use]
    pub fn with_class(mut self, class: NodeClass) -> Self {
        self.class = class;
        self
    }

    /// Whether connection and provisioning failures are recorded instead of raised.
    #[must_use]
    pub fn tolerant(mut self, tolerant: bool) -> Self {
        self.tolerant = tolerant;
        self
    }

    /// Policy used by the convenience operations. [`Node::exec_command`]
    /// takes its own.
    #[must_use]
    pub fn with_exec_policy(mut self, policy: ExecPolicy) -> Self {
        self.policy = policy;
        self
    }

    // ── Accessors ─────────────────────────────────────────────────────────────

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn user(&self) -> &str {
        &self.credential.user
    }

    pub fn class(&self) -> NodeClass {
        self.class
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Remote `$HOME`, once connected.
    pub fn home(&self) -> Option<&str> {
        self.home.as_deref()
    }

    /// The most recent recorded connection or provisioning failure.
    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    /// Results of the last provisioning pass.
    pub fn mount_outcomes(&self) -> &[MountOutcome] {
        &self.mount_outcomes
    }

    pub fn mounts(&self) -> &[MountSpec] {
        &self.mounts
    }

    /// Machine type prefix of the host name.
    pub fn machine_name(&self) -> &str {
        machine_name(&self.host)
    }

    /// Whether the node is usable and its transport reports itself active.
    pub fn is_live(&self) -> bool {
        self.state.is_usable() && self.session.as_ref().is_some_and(RemoteSession::is_active)
    }

    /// Expands a leading `~` against the remote home directory.
    pub fn resolve_path(&self, path: &str) -> String {
        expand_home(path, self.home.as_deref())
    }

    // ── Lifecycle ─────────────────────────────────────────────────────────────

    /// Open a session, resolve the remote home directory, then provision storage.
    ///
    /// A failure before the session is usable leaves the node `Unresponsive`;
    /// a provisioning failure leaves it `Connected` but not `Ready`. Both are
    /// recorded in [`Node::last_error`].
    ///
    /// # Errors
    ///
    /// Returns [`NodeError::AlreadyConnected`] or [`NodeError::NeedsReconnect`]
    /// when called from any state but `Disconnected`. Connection and
    /// provisioning failures are returned only when the node is not tolerant.
    pub async fn connect(&mut self) -> Result<()> {
        match self.state {
            ConnectionState::Disconnected => {}
            ConnectionState::Unresponsive => {
                return Err(NodeError::NeedsReconnect {
                    host: self.host.clone(),
                }
                .into());
            }
            state => {
                return Err(NodeError::AlreadyConnected {
                    host: self.host.clone(),
                    state: state.to_string(),
                }
                .into());
            }
        }

        self.state = ConnectionState::Connecting;
        self.last_error = None;
        self.mount_outcomes.clear();

        if let Err(reason) = self.establish().await {
            let err = ConnectionError {
                host: self.host.clone(),
                port: self.credential.port(),
                reason: format!("{reason:#}"),
            };
            warn!(host = %self.host, error = %err, "node unresponsive");
            self.state = ConnectionState::Unresponsive;
            return self.record(err.into());
        }
        self.state = ConnectionState::Connected;
        info!(host = %self.host, home = self.home.as_deref().unwrap_or_default(), "connected");

        self.state = ConnectionState::Provisioning;
        let mounts = self.mounts.clone();
        let provisioned = storage::provision(&*self, &mounts).await;
        match provisioned {
            Ok(outcomes) => {
                self.mount_outcomes = outcomes;
                self.state = ConnectionState::Ready;
                debug!(host = %self.host, mounts = self.mount_outcomes.len(), "ready");
                Ok(())
            }
            Err(e) => {
                warn!(host = %self.host, error = %format!("{e:#}"), "provisioning failed");
                self.state = ConnectionState::Connected;
                self.record(e)
            }
        }
    }

    /// Close any session and connect again. The only way out of `Unresponsive`.
    ///
    /// # Errors
    ///
    /// As [`Node::connect`].
    pub async fn reconnect(&mut self) -> Result<()> {
        self.disconnect();
        self.connect().await
    }

    /// Close the session. Safe to call in any state, any number of times.
    pub fn disconnect(&mut self) {
        if let Some(session) = self.session.take() {
            if let Err(e) = session.close() {
                debug!(host = %self.host, error = %e, "error closing session");
            }
            info!(host = %self.host, "disconnected");
        }
        self.home = None;
        self.state = ConnectionState::Disconnected;
    }

    async fn establish(&mut self) -> Result<()> {
        let secret = credentials::resolve(&self.credential).context("resolving credential")?;
        let target = SessionTarget {
            host: self.host.clone(),
            port: self.credential.port(),
            user: self.credential.user.clone(),
            secret,
        };
        let session = self.connector.connect(&target).await?;

        let home = match self.fetch_home(&session).await {
            Ok(home) => home,
            Err(e) => {
                if let Err(close_err) = session.close() {
                    debug!(host = %self.host, error = %close_err, "error closing session");
                }
                return Err(e);
            }
        };
        self.session = Some(session);
        self.home = Some(home);
        Ok(())
    }

    async fn fetch_home(&self, session: &C::Session) -> Result<String> {
        let command = "echo $HOME";
        let result = run_bounded(session, &self.host, command, &self.policy)
            .await?
            .check(command, &self.host)?;
        let home = result.stdout.trim();
        if home.is_empty() {
            return Err(NodeError::UnexpectedOutput {
                host: self.host.clone(),
                command: command.to_string(),
                output: result.stdout,
            }
            .into());
        }
        Ok(home.to_string())
    }

    fn record(&mut self, err: anyhow::Error) -> Result<()> {
        self.last_error = Some(format!("{err:#}"));
        if self.tolerant { Ok(()) } else { Err(err) }
    }

    fn session(&self) -> Result<&C::Session> {
        self.session.as_ref().ok_or_else(|| {
            NodeError::NotConnected {
                host: self.host.clone(),
            }
            .into()
        })
    }

    // ── Commands ──────────────────────────────────────────────────────────────

    /// Run `argv` (joined with single spaces) under `policy`.
    ///
    /// A non-zero exit is returned as a normal result.
    ///
    /// # Errors
    ///
    /// Returns [`NodeError::NotConnected`] without a session, or the
    /// executor's timeout and transport errors.
    pub async fn exec_command(&self, argv: &[&str], policy: &ExecPolicy) -> Result<CommandResult> {
        self.run(&join_argv(argv), policy).await
    }

    /// Launch `argv` in the background and return immediately.
    ///
    /// # Errors
    ///
    /// Returns an error if there is no session or the command could not be sent.
    pub async fn non_blocking_exec(&self, argv: &[&str]) -> Result<()> {
        let command = detached(&join_argv(argv));
        let _guard = self.command_lock.lock().await;
        debug!(host = %self.host, %command, "exec detached");
        self.session()?.exec_detached(&command).await
    }

    async fn run(&self, command: &str, policy: &ExecPolicy) -> Result<CommandResult> {
        let _guard = self.command_lock.lock().await;
        run_bounded(self.session()?, &self.host, command, policy).await
    }

    /// Run under the node's policy and fail on a non-zero exit.
    async fn run_checked(&self, argv: &[&str]) -> Result<CommandResult> {
        let command = join_argv(argv);
        let result = self.run(&command, &self.policy).await?;
        Ok(result.check(&command, &self.host)?)
    }

    /// Exit 0 is true, exit 1 is false; anything else is a failure.
    async fn probe(&self, argv: &[&str]) -> Result<bool> {
        let command = join_argv(argv);
        let result = self.run(&command, &self.policy).await?;
        match result.exit_code {
            0 => Ok(true),
            1 => Ok(false),
            exit_code => Err(ExecError::NonZeroExit {
                command,
                host: self.host.clone(),
                exit_code,
                stdout: result.stdout,
                stderr: result.stderr,
            }
            .into()),
        }
    }

    // ── Files ─────────────────────────────────────────────────────────────────

    /// # Errors
    ///
    /// Returns an error if `test -f` fails for a reason other than absence.
    pub async fn file_exists(&self, path: &str) -> Result<bool> {
        let path = self.resolve_path(path);
        self.probe(&["test", "-f", &path]).await
    }

    /// # Errors
    ///
    /// Returns an error if `test -d` fails for a reason other than absence.
    pub async fn dir_exists(&self, path: &str) -> Result<bool> {
        let path = self.resolve_path(path);
        self.probe(&["test", "-d", &path]).await
    }

    /// Size of a remote file in bytes; 0 when it does not exist.
    ///
    /// # Errors
    ///
    /// Returns an error if `stat` fails or prints something other than a number.
    pub async fn get_file_size(&self, path: &str) -> Result<u64> {
        if !self.file_exists(path).await? {
            return Ok(0);
        }
        let path = self.resolve_path(path);
        let argv = ["stat", "-c", "%s", path.as_str()];
        let result = self.run_checked(&argv).await?;
        result.stdout.trim().parse::<u64>().map_err(|_| {
            NodeError::UnexpectedOutput {
                host: self.host.clone(),
                command: join_argv(&argv),
                output: result.stdout.clone(),
            }
            .into()
        })
    }

    /// Contents of a remote file with trailing whitespace removed.
    ///
    /// # Errors
    ///
    /// Returns an error if `cat` fails.
    pub async fn read_file(&self, path: &str) -> Result<String> {
        let path = self.resolve_path(path);
        let result = self.run_checked(&["cat", &path]).await?;
        Ok(result.stdout.trim_end().to_string())
    }

    /// Copy a local file to the node. Returns once every byte has been written.
    ///
    /// # Errors
    ///
    /// Returns an error if the local file cannot be read or the transfer fails.
    pub async fn upload(&self, local: &Path, remote: &str) -> Result<u64> {
        let remote = self.resolve_path(remote);
        let _guard = self.command_lock.lock().await;
        let bytes = self
            .session()?
            .upload(local, &remote)
            .await
            .with_context(|| format!("uploading {} to {}:{remote}", local.display(), self.host))?;
        debug!(host = %self.host, %remote, bytes, "uploaded");
        Ok(bytes)
    }

    /// Copy a remote file to the local machine. Returns once every byte has been written.
    ///
    /// # Errors
    ///
    /// Returns an error if the remote file cannot be read or the transfer fails.
    pub async fn download(&self, remote: &str, local: &Path) -> Result<u64> {
        let remote = self.resolve_path(remote);
        let _guard = self.command_lock.lock().await;
        let bytes = self
            .session()?
            .download(&remote, local)
            .await
            .with_context(|| format!("downloading {}:{remote} to {}", self.host, local.display()))?;
        debug!(host = %self.host, %remote, bytes, "downloaded");
        Ok(bytes)
    }

    /// `sudo rm -rf` on the remote path.
    ///
    /// # Errors
    ///
    /// Returns an error if the command fails.
    pub async fn remove(&self, path: &str) -> Result<()> {
        let path = self.resolve_path(path);
        self.run_checked(&["sudo", "rm", "-rf", &path]).await?;
        Ok(())
    }

    /// # Errors
    ///
    /// Returns an error if `touch` fails.
    pub async fn touch_file(&self, path: &str) -> Result<()> {
        let path = self.resolve_path(path);
        self.run_checked(&["touch", &path]).await?;
        Ok(())
    }

    /// `mkdir -p`: creates missing parents, succeeds if the directory exists.
    ///
    /// # Errors
    ///
    /// Returns an error if the command fails.
    pub async fn make_directory(&self, path: &str) -> Result<()> {
        let path = self.resolve_path(path);
        self.run_checked(&["mkdir", "-p", &path]).await?;
        Ok(())
    }

    /// Hand `path` to the node's login user.
    ///
    /// # Errors
    ///
    /// Returns an error if `sudo chown` fails.
    pub async fn change_owner(&self, path: &str) -> Result<()> {
        let path = self.resolve_path(path);
        self.run_checked(&["sudo", "chown", &self.credential.user, &path]).await?;
        Ok(())
    }

    /// Create a file of `size_mb` MiB.
    ///
    /// # Errors
    ///
    /// Returns an error if the command could not be started or, for a sparse
    /// file, if `truncate` fails.
    pub async fn create_file(&self, path: &str, size_mb: u64, fill: FileFill) -> Result<()> {
        let path = self.resolve_path(path);
        match fill {
            FileFill::Random => {
                let of = format!("of={path}");
                let count = format!("count={size_mb}");
                self.non_blocking_exec(&["dd", "if=/dev/urandom", &of, "bs=1M", &count, "oflag=direct"])
                    .await
            }
            FileFill::Sparse => {
                let size = format!("{size_mb}M");
                self.run_checked(&["truncate", "-s", &size, &path]).await?;
                Ok(())
            }
        }
    }

    /// Every regular file under `dir`, as reported by `find`.
    ///
    /// # Errors
    ///
    /// Returns an error if `find` fails.
    pub async fn list_files(&self, dir: &str) -> Result<Vec<String>> {
        let dir = self.resolve_path(dir);
        let result = self.run_checked(&["find", &dir, "-type", "f"]).await?;
        Ok(result
            .stdout
            .lines()
            .filter(|l| !l.is_empty())
            .map(str::to_string)
            .collect())
    }

    // ── Processes ─────────────────────────────────────────────────────────────

    /// `ps a` for the login user, trailing whitespace removed.
    ///
    /// # Errors
    ///
    /// Returns an error if `ps` fails.
    pub async fn processes(&self) -> Result<String> {
        let result = self.run_checked(&["ps", "a", "-u", &self.credential.user]).await?;
        Ok(result.stdout.trim_end().to_string())
    }

    /// # Errors
    ///
    /// Returns an error if `sudo kill -9` fails.
    pub async fn kill(&self, pid: u32) -> Result<()> {
        let pid = pid.to_string();
        self.run_checked(&["sudo", "kill", "-9", &pid]).await?;
        Ok(())
    }

    /// Kill every process of the login user whose `ps` line contains `pattern`.
    /// Returns the killed pids.
    ///
    /// # Errors
    ///
    /// Returns an error if listing or killing fails.
    pub async fn match_kill(&self, pattern: &str) -> Result<Vec<u32>> {
        let listing = self.processes().await?;
        let pids: Vec<u32> = listing
            .lines()
            .filter(|line| line.contains(pattern))
            .filter_map(|line| line.split_whitespace().next()?.parse().ok())
            .collect();
        for pid in &pids {
            self.kill(*pid).await?;
        }
        Ok(pids)
    }

    /// `git clone url dir` on the node.
    ///
    /// # Errors
    ///
    /// Returns an error if the clone fails.
    pub async fn clone_git_repo(&self, url: &str, dir: &str) -> Result<()> {
        let dir = self.resolve_path(dir);
        self.run_checked(&["git", "clone", url, &dir]).await?;
        Ok(())
    }

    // ── Storage ───────────────────────────────────────────────────────────────

    /// The node's block device tree.
    ///
    /// # Errors
    ///
    /// Returns an error if `lsblk` fails or its output cannot be parsed.
    pub async fn list_block_devices(&self) -> Result<Vec<BlockDevice>> {
        let result = self.run_checked(LSBLK_ARGV).await?;
        parse_lsblk(&result.stdout).with_context(|| format!("block devices of {}", self.host))
    }

    /// The device or partition mounted at `mountpoint`.
    ///
    /// # Errors
    ///
    /// Returns [`NodeError::MountpointNotFound`] when nothing is mounted there.
    pub async fn get_mountpoint_info(&self, mountpoint: &str) -> Result<BlockDevice> {
        let mountpoint = self.resolve_path(mountpoint);
        let devices = self.list_block_devices().await?;
        block_device::find_mountpoint(&devices, &mountpoint)
            .cloned()
            .ok_or_else(|| {
                NodeError::MountpointNotFound {
                    host: self.host.clone(),
                    mountpoint,
                }
                .into()
            })
    }

    /// Whole GiB of the device mounted at `mountpoint`.
    ///
    /// # Errors
    ///
    /// As [`Node::get_mountpoint_info`].
    pub async fn get_mountpoint_size_gb(&self, mountpoint: &str) -> Result<u64> {
        Ok(self.get_mountpoint_info(mountpoint).await?.size_gb())
    }
}

impl<C: SessionConnector> StorageHost for Node<C> {
    fn host(&self) -> &str {
        &self.host
    }

    fn user(&self) -> &str {
        &self.credential.user
    }

    fn resolve_path(&self, path: &str) -> String {
        Node::resolve_path(self, path)
    }

    async fn list_block_devices(&self) -> Result<Vec<BlockDevice>> {
        Node::list_block_devices(self).await
    }

    async fn make_directory(&self, path: &str) -> Result<()> {
        Node::make_directory(self, path).await
    }

    async fn change_owner(&self, path: &str) -> Result<()> {
        Node::change_owner(self, path).await
    }

    async fn make_filesystem(&self, device: &str) -> Result<()> {
        self.run_checked(&["yes", "|", "sudo", "mkfs", "-t", "ext4", device]).await?;
        Ok(())
    }

    async fn mount(&self, device: &str, mountpoint: &str) -> Result<()> {
        self.run_checked(&["sudo", "mount", device, mountpoint]).await?;
        Ok(())
    }
}

impl<C: SessionConnector> Drop for Node<C> {
    fn drop(&mut self) {
        self.disconnect();
    }
}

impl<C: SessionConnector> std::fmt::Debug for Node<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Node")
            .field("name", &self.name)
            .field("host", &self.host)
            .field("class", &self.class)
            .field("state", &self.state)
            .field("home", &self.home)
            .field("last_error", &self.last_error)
            .finish_non_exhaustive()
    }
}
