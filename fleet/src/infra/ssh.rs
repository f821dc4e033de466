//! `ssh2`-backed implementation of the session ports.
//!
//! libssh2 is blocking, so every call runs on a `spawn_blocking` worker. A
//! per-session lock is taken inside the worker: a command abandoned by the
//! executor keeps the lock until its worker has closed the channel, so the
//! next attempt can never overlap with it.
//!
//! Command output is streamed back to the async side over a channel. When
//! the caller drops the future the receiver goes away, which the worker
//! notices between non-blocking reads and treats as cancellation.

use std::fs::File;
use std::io::{self, Read, Write};
use std::net::{TcpStream, ToSocketAddrs};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError, TryLockError};
use std::time::Duration;

use anyhow::{Context, Result};
use ssh2::{Channel, ErrorCode, Session};
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender, unbounded_channel};
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::application::ports::{
    OutputCapture, RemoteSession, Secret, SessionConnector, SessionTarget,
};
use crate::domain::command::CommandResult;

/// Default deadline for TCP connect, handshake and authentication.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Seconds between keepalive messages on an idle session.
const KEEPALIVE_INTERVAL_SECS: u32 = 30;

/// How long a non-blocking worker sleeps when libssh2 has nothing for it.
const POLL_INTERVAL: Duration = Duration::from_millis(10);

/// `LIBSSH2_ERROR_EAGAIN`.
const EAGAIN: i32 = -37;

const TRANSFER_CHUNK: usize = 64 * 1024;

// ── Connector ─────────────────────────────────────────────────────────────────

/// Opens password or public-key authenticated SSH sessions.
#[derive(Debug, Clone)]
pub struct SshConnector {
    connect_timeout: Duration,
}

impl Default for SshConnector {
    fn default() -> Self {
        Self::new(DEFAULT_CONNECT_TIMEOUT)
    }
}

impl SshConnector {
    #[must_use]
    pub fn new(connect_timeout: Duration) -> Self {
        Self { connect_timeout }
    }
}

impl SessionConnector for SshConnector {
    type Session = SshSession;

    async fn connect(&self, target: &SessionTarget) -> Result<SshSession> {
        let target = target.clone();
        let timeout = self.connect_timeout;
        let host = target.host.clone();
        let session = tokio::task::spawn_blocking(move || open_session(&target, timeout))
            .await
            .context("ssh connect worker panicked")??;
        info!(%host, "ssh session established");
        Ok(SshSession {
            host,
            session,
            lock: Arc::new(Mutex::new(())),
            closed: AtomicBool::new(false),
        })
    }
}

fn open_session(target: &SessionTarget, timeout: Duration) -> Result<Session> {
    let addr = (target.host.as_str(), target.port)
        .to_socket_addrs()
        .with_context(|| format!("cannot resolve {}", target.host))?
        .next()
        .with_context(|| format!("{} resolved to no addresses", target.host))?;
    let tcp = TcpStream::connect_timeout(&addr, timeout)
        .with_context(|| format!("TCP connection to {addr} failed"))?;

    let mut session = Session::new().context("failed to create SSH session")?;
    session.set_tcp_stream(tcp);
    session.set_timeout(u32::try_from(timeout.as_millis()).unwrap_or(u32::MAX));
    session.handshake().context("SSH handshake failed")?;

    match &target.secret {
        Secret::Password(password) => session
            .userauth_password(&target.user, password)
            .with_context(|| format!("password authentication failed for {}", target.user))?,
        Secret::KeyFile(key) => session
            .userauth_pubkey_file(&target.user, None, key, None)
            .with_context(|| {
                format!(
                    "key authentication failed for {} with {}",
                    target.user,
                    key.display()
                )
            })?,
    }
    anyhow::ensure!(
        session.authenticated(),
        "not authenticated as {} after userauth",
        target.user
    );

    // Commands are bounded by the executor, not by libssh2.
    session.set_timeout(0);
    session.set_keepalive(true, KEEPALIVE_INTERVAL_SECS);
    Ok(session)
}

// ── Session ───────────────────────────────────────────────────────────────────

/// One authenticated SSH session.
pub struct SshSession {
    host: String,
    session: Session,
    lock: Arc<Mutex<()>>,
    closed: AtomicBool,
}

impl std::fmt::Debug for SshSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SshSession")
            .field("host", &self.host)
            .field("closed", &self.closed.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

#[derive(Debug, PartialEq, Eq)]
enum Chunk {
    Stdout(Vec<u8>),
    Stderr(Vec<u8>),
}

impl SshSession {
    /// Run `f` on a blocking worker while holding the session lock.
    async fn blocking<T, F>(&self, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&Session) -> Result<T> + Send + 'static,
    {
        let session = self.session.clone();
        let lock = Arc::clone(&self.lock);
        tokio::task::spawn_blocking(move || {
            let _guard = lock.lock().unwrap_or_else(PoisonError::into_inner);
            f(&session)
        })
        .await
        .context("ssh worker panicked")?
    }
}

impl RemoteSession for SshSession {
    async fn exec(&self, command: &str, capture: &OutputCapture) -> Result<CommandResult> {
        let session = self.session.clone();
        let owned = command.to_string();
        let (worker, rx) = spawn_streaming(Arc::clone(&self.lock), move |tx| {
            let _blocking = NonBlocking::enter(&session);
            Worker { session: &session, tx }.run(&owned)
        });
        collect(worker, rx, capture).await
    }

    async fn exec_detached(&self, command: &str) -> Result<()> {
        let command = command.to_string();
        self.blocking(move |session| {
            let mut channel = session.channel_session().context("failed to open channel")?;
            channel
                .exec(&command)
                .with_context(|| format!("failed to launch '{command}'"))?;
            channel.close().context("failed to close channel")?;
            Ok(())
        })
        .await
    }

    async fn upload(&self, local: &Path, remote: &str) -> Result<u64> {
        let local = local.to_path_buf();
        let remote = PathBuf::from(remote);
        self.blocking(move |session| scp_upload(session, &local, &remote))
            .await
    }

    async fn download(&self, remote: &str, local: &Path) -> Result<u64> {
        let local = local.to_path_buf();
        let remote = PathBuf::from(remote);
        self.blocking(move |session| scp_download(session, &remote, &local))
            .await
    }

    fn is_active(&self) -> bool {
        if self.closed.load(Ordering::Acquire) {
            return false;
        }
        match self.lock.try_lock() {
            // A worker holds the session, so the transport is in use.
            Err(TryLockError::WouldBlock) => true,
            Err(TryLockError::Poisoned(_)) => false,
            Ok(_guard) => self.session.authenticated() && self.session.keepalive_send().is_ok(),
        }
    }

    fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        debug!(host = %self.host, "closing ssh session");
        self.session
            .disconnect(None, "closing", None)
            .with_context(|| format!("disconnecting from {}", self.host))
    }
}

// ── Command worker ────────────────────────────────────────────────────────────

/// Run `job` on a blocking worker that holds `lock` for its whole lifetime.
/// Output chunks arrive on the returned receiver; dropping it cancels the job.
fn spawn_streaming<F>(
    lock: Arc<Mutex<()>>,
    job: F,
) -> (JoinHandle<Result<i32>>, UnboundedReceiver<Chunk>)
where
    F: FnOnce(&UnboundedSender<Chunk>) -> Result<i32> + Send + 'static,
{
    let (tx, rx) = unbounded_channel();
    let worker = tokio::task::spawn_blocking(move || {
        let _guard = lock.lock().unwrap_or_else(PoisonError::into_inner);
        job(&tx)
    });
    (worker, rx)
}

async fn collect(
    worker: JoinHandle<Result<i32>>,
    mut rx: UnboundedReceiver<Chunk>,
    capture: &OutputCapture,
) -> Result<CommandResult> {
    while let Some(chunk) = rx.recv().await {
        match chunk {
            Chunk::Stdout(bytes) => capture.push_stdout(&bytes),
            Chunk::Stderr(bytes) => capture.push_stderr(&bytes),
        }
    }
    let exit_code = worker.await.context("ssh worker panicked")??;
    let (stdout, stderr) = capture.snapshot();
    Ok(CommandResult::new(stdout, stderr, exit_code))
}

/// Puts the session in non-blocking mode until dropped.
struct NonBlocking<'a>(&'a Session);

impl<'a> NonBlocking<'a> {
    fn enter(session: &'a Session) -> Self {
        session.set_blocking(false);
        Self(session)
    }
}

impl Drop for NonBlocking<'_> {
    fn drop(&mut self) {
        self.0.set_blocking(true);
    }
}

struct Worker<'a> {
    session: &'a Session,
    tx: &'a UnboundedSender<Chunk>,
}

impl Worker<'_> {
    fn cancelled(&self) -> bool {
        self.tx.is_closed()
    }

    /// Repeat `op` until it stops reporting EAGAIN. `None` when cancelled first.
    fn retry<T>(&self, mut op: impl FnMut() -> Result<T, ssh2::Error>) -> Result<Option<T>> {
        loop {
            match op() {
                Ok(value) => return Ok(Some(value)),
                Err(e) if matches!(e.code(), ErrorCode::Session(EAGAIN)) => {
                    if self.cancelled() {
                        return Ok(None);
                    }
                    std::thread::sleep(POLL_INTERVAL);
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    /// Exit status of `command`, or `-1` if the caller went away first.
    fn run(&self, command: &str) -> Result<i32> {
        let Some(mut channel) = self.retry(|| self.session.channel_session())? else {
            return Ok(-1);
        };
        if self.retry(|| channel.exec(command))?.is_none() {
            abandon(&mut channel);
            return Ok(-1);
        }

        let mut stderr = channel.stderr();
        let mut buf = vec![0u8; TRANSFER_CHUNK];
        if !pump(&mut channel, &mut stderr, self.tx, &mut buf)? {
            debug!(command, "abandoning command");
            abandon(&mut channel);
            return Ok(-1);
        }

        if self.retry(|| channel.wait_close())?.is_none() {
            abandon(&mut channel);
            return Ok(-1);
        }
        Ok(channel.exit_status()?)
    }
}

/// Forward `stdout` and `stderr` to `tx` until both reach EOF.
/// Returns `false` as soon as the receiver has gone away.
fn pump(
    stdout: &mut impl Read,
    stderr: &mut impl Read,
    tx: &UnboundedSender<Chunk>,
    buf: &mut [u8],
) -> Result<bool> {
    let mut stdout_open = true;
    let mut stderr_open = true;
    while stdout_open || stderr_open {
        if tx.is_closed() {
            return Ok(false);
        }
        let mut progressed = false;
        if stdout_open {
            match poll_read(stdout, buf)? {
                Some(0) => stdout_open = false,
                Some(n) => {
                    progressed = true;
                    let _ = tx.send(Chunk::Stdout(buf[..n].to_vec()));
                }
                None => {}
            }
        }
        if stderr_open {
            match poll_read(stderr, buf)? {
                Some(0) => stderr_open = false,
                Some(n) => {
                    progressed = true;
                    let _ = tx.send(Chunk::Stderr(buf[..n].to_vec()));
                }
                None => {}
            }
        }
        if !progressed {
            std::thread::sleep(POLL_INTERVAL);
        }
    }
    Ok(true)
}

/// `Some(n)` bytes read (0 at EOF), `None` when nothing is available yet.
fn poll_read(reader: &mut impl Read, buf: &mut [u8]) -> Result<Option<usize>> {
    match reader.read(buf) {
        Ok(n) => Ok(Some(n)),
        Err(e) if e.kind() == io::ErrorKind::WouldBlock => Ok(None),
        Err(e) => Err(e.into()),
    }
}

fn abandon(channel: &mut Channel) {
    let _ = channel.close();
}

// ── File transfer ─────────────────────────────────────────────────────────────

fn scp_upload(session: &Session, local: &Path, remote: &Path) -> Result<u64> {
    let mut file =
        File::open(local).with_context(|| format!("cannot open {}", local.display()))?;
    let size = file
        .metadata()
        .with_context(|| format!("cannot stat {}", local.display()))?
        .len();
    let mut channel = session
        .scp_send(remote, 0o644, size, None)
        .with_context(|| format!("SCP failed to open {}", remote.display()))?;

    let mut buf = vec![0u8; TRANSFER_CHUNK];
    let mut transferred = 0u64;
    loop {
        let n = file
            .read(&mut buf)
            .with_context(|| format!("cannot read {}", local.display()))?;
        if n == 0 {
            break;
        }
        channel
            .write_all(&buf[..n])
            .with_context(|| format!("SCP write to {} failed", remote.display()))?;
        transferred += n as u64;
    }

    channel.send_eof().context("SCP send_eof failed")?;
    channel.wait_eof().context("SCP wait_eof failed")?;
    channel.close().context("SCP close failed")?;
    channel.wait_close().context("SCP wait_close failed")?;

    anyhow::ensure!(
        transferred == size,
        "short upload to {}: {transferred} of {size} bytes",
        remote.display()
    );
    Ok(transferred)
}

fn scp_download(session: &Session, remote: &Path, local: &Path) -> Result<u64> {
    let (mut channel, stat) = session
        .scp_recv(remote)
        .with_context(|| format!("SCP failed to open {}", remote.display()))?;
    let size = stat.size();
    let mut file =
        File::create(local).with_context(|| format!("cannot create {}", local.display()))?;

    let mut buf = vec![0u8; TRANSFER_CHUNK];
    let mut transferred = 0u64;
    while transferred < size {
        let n = channel
            .read(&mut buf)
            .with_context(|| format!("SCP read from {} failed", remote.display()))?;
        if n == 0 {
            break;
        }
        // scp may append a trailing status byte after the payload.
        let remaining = usize::try_from(size - transferred).unwrap_or(usize::MAX);
        let take = n.min(remaining);
        file.write_all(&buf[..take])
            .with_context(|| format!("cannot write {}", local.display()))?;
        transferred += take as u64;
    }
    file.flush()
        .with_context(|| format!("cannot flush {}", local.display()))?;

    channel.send_eof().context("SCP send_eof failed")?;
    channel.wait_eof().context("SCP wait_eof failed")?;
    channel.close().context("SCP close failed")?;
    channel.wait_close().context("SCP wait_close failed")?;

    anyhow::ensure!(
        transferred == size,
        "short download of {}: {transferred} of {size} bytes",
        remote.display()
    );
    Ok(transferred)
}
