//! Shared fake transport for unit tests.
//!
//! [`FakeConnector`] hands out [`FakeSession`]s backed by a scripted
//! [`HostState`] per host. Sessions interpret the handful of shell commands
//! the crate issues (`lsblk`, `mount`, `test -f`, ...) against that state and
//! record every command, so tests can assert on exactly what was sent.

#![allow(clippy::expect_used, clippy::unwrap_used, dead_code)]

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use anyhow::Result;
use serde_json::{Value, json};

use remote_fleet::application::ports::{
    OutputCapture, RemoteSession, SessionConnector, SessionTarget,
};
use remote_fleet::domain::block_device::BlockDevice;
use remote_fleet::domain::command::CommandResult;

pub const GIB: u64 = 1 << 30;

// ── Host state ────────────────────────────────────────────────────────────────

/// Everything a fake remote host knows and remembers.
#[derive(Debug, Default)]
pub struct HostState {
    pub home: String,
    pub devices: Vec<BlockDevice>,
    pub files: BTreeMap<String, Vec<u8>>,
    pub dirs: BTreeSet<String>,
    pub ps_output: String,
    /// Exact command → canned result, checked before anything else.
    pub responses: HashMap<String, CommandResult>,
    /// Commands containing this never finish (after writing partial output).
    pub hang_on: Option<String>,
    /// Commands containing this fail at the transport level.
    pub broken_on: Option<String>,
    pub unreachable: bool,
    /// When set, sessions report themselves inactive.
    pub dead: bool,
    /// When set, closing a session reports an error (after counting it).
    pub close_fails: bool,
    pub commands: Vec<String>,
    pub detached: Vec<String>,
    pub connects: usize,
    pub closes: usize,
    pub last_target: Option<SessionTarget>,
}

impl HostState {
    pub fn new(home: &str) -> Self {
        Self {
            home: home.to_string(),
            ..Self::default()
        }
    }

    pub fn with_devices(mut self, devices: Vec<BlockDevice>) -> Self {
        self.devices = devices;
        self
    }

    pub fn unreachable(mut self) -> Self {
        self.unreachable = true;
        self
    }

    /// Recorded commands that contain `needle`.
    pub fn commands_matching(&self, needle: &str) -> Vec<String> {
        self.commands
            .iter()
            .filter(|c| c.contains(needle))
            .cloned()
            .collect()
    }
}

pub type SharedHost = Arc<Mutex<HostState>>;

// ── Block device builders ─────────────────────────────────────────────────────

pub fn disk(name: &str, gb: u64, children: Vec<BlockDevice>) -> BlockDevice {
    BlockDevice {
        name: name.to_string(),
        size_bytes: gb * GIB,
        mountpoint: None,
        kind: Some("disk".to_string()),
        children,
    }
}

pub fn part(name: &str, gb: u64, mountpoint: Option<&str>) -> BlockDevice {
    BlockDevice {
        name: name.to_string(),
        size_bytes: gb * GIB,
        mountpoint: mountpoint.map(str::to_string),
        kind: Some("part".to_string()),
        children: Vec::new(),
    }
}

fn lsblk_value(device: &BlockDevice) -> Value {
    let mut value = json!({
        "name": device.name,
        "size": device.size_bytes,
        "mountpoint": device.mountpoint,
        "type": device.kind,
    });
    if device.has_children() {
        value["children"] = device.children.iter().map(lsblk_value).collect();
    }
    value
}

fn lsblk_json(devices: &[BlockDevice]) -> String {
    json!({ "blockdevices": devices.iter().map(lsblk_value).collect::<Vec<_>>() }).to_string()
}

fn set_mountpoint(devices: &mut [BlockDevice], name: &str, mountpoint: &str) -> bool {
    for device in devices {
        if device.name == name {
            device.mountpoint = Some(mountpoint.to_string());
            return true;
        }
        if set_mountpoint(&mut device.children, name, mountpoint) {
            return true;
        }
    }
    false
}

/// Find a device by name at any depth.
pub fn find_any<'a>(devices: &'a [BlockDevice], name: &str) -> Option<&'a BlockDevice> {
    devices.iter().find_map(|d| {
        if d.name == name {
            Some(d)
        } else {
            find_any(&d.children, name)
        }
    })
}

// ── Connector ─────────────────────────────────────────────────────────────────

/// Connects to scripted hosts; any host it does not know refuses the connection.
#[derive(Default)]
pub struct FakeConnector {
    hosts: Mutex<HashMap<String, SharedHost>>,
}

impl FakeConnector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_host(self, host: &str, state: HostState) -> Self {
        self.add_host(host, state);
        self
    }

    pub fn add_host(&self, host: &str, state: HostState) -> SharedHost {
        let shared = Arc::new(Mutex::new(state));
        self.hosts
            .lock()
            .unwrap()
            .insert(host.to_string(), Arc::clone(&shared));
        shared
    }

    pub fn host(&self, host: &str) -> SharedHost {
        Arc::clone(&self.hosts.lock().unwrap()[host])
    }
}

impl SessionConnector for FakeConnector {
    type Session = FakeSession;

    async fn connect(&self, target: &SessionTarget) -> Result<FakeSession> {
        let Some(state) = self.hosts.lock().unwrap().get(&target.host).cloned() else {
            anyhow::bail!("connection refused by {}:{}", target.host, target.port);
        };
        {
            let mut host = state.lock().unwrap();
            host.last_target = Some(target.clone());
            if host.unreachable {
                anyhow::bail!("no route to {}", target.host);
            }
            host.connects += 1;
        }
        Ok(FakeSession::new(state))
    }
}

// ── Session ───────────────────────────────────────────────────────────────────

pub struct FakeSession {
    state: SharedHost,
    closed: AtomicBool,
}

impl FakeSession {
    pub fn new(state: SharedHost) -> Self {
        Self {
            state,
            closed: AtomicBool::new(false),
        }
    }

    fn interpret(host: &mut HostState, command: &str) -> CommandResult {
        if let Some(canned) = host.responses.get(command) {
            return canned.clone();
        }
        let argv: Vec<&str> = command.split_whitespace().collect();
        match argv.as_slice() {
            ["echo", "$HOME"] => CommandResult::new(format!("{}\n", host.home), "", 0),
            ["lsblk", ..] => CommandResult::new(lsblk_json(&host.devices), "", 0),
            ["mkdir", "-p", path] => {
                host.dirs.insert((*path).to_string());
                CommandResult::default()
            }
            ["sudo", "mount", device, mountpoint] => {
                let name = device.trim_start_matches("/dev/");
                if set_mountpoint(&mut host.devices, name, mountpoint) {
                    CommandResult::default()
                } else {
                    CommandResult::new("", format!("mount: {device}: special device does not exist"), 32)
                }
            }
            ["test", "-f", path] => exit_bool(host.files.contains_key(*path)),
            ["test", "-d", path] => exit_bool(host.dirs.contains(*path)),
            ["stat", "-c", "%s", path] => match host.files.get(*path) {
                Some(bytes) => CommandResult::new(format!("{}\n", bytes.len()), "", 0),
                None => CommandResult::new("", "stat: cannot stat", 1),
            },
            ["cat", path] => match host.files.get(*path) {
                Some(bytes) => CommandResult::new(String::from_utf8_lossy(bytes), "", 0),
                None => CommandResult::new("", format!("cat: {path}: No such file or directory"), 1),
            },
            ["sudo", "rm", "-rf", path] => {
                host.files.remove(*path);
                host.dirs.remove(*path);
                CommandResult::default()
            }
            ["touch", path] => {
                host.files.entry((*path).to_string()).or_default();
                CommandResult::default()
            }
            ["truncate", "-s", size, path] => {
                let mb: usize = size.trim_end_matches('M').parse().unwrap();
                host.files.insert((*path).to_string(), vec![0; mb << 20]);
                CommandResult::default()
            }
            ["find", dir, "-type", "f"] => {
                let prefix = format!("{}/", dir.trim_end_matches('/'));
                let listing: Vec<&str> = host
                    .files
                    .keys()
                    .filter(|p| p.starts_with(&prefix))
                    .map(String::as_str)
                    .collect();
                CommandResult::new(listing.join("\n"), "", 0)
            }
            ["ps", "a", "-u", _user] => CommandResult::new(host.ps_output.clone(), "", 0),
            _ => CommandResult::default(),
        }
    }
}

fn exit_bool(found: bool) -> CommandResult {
    CommandResult::new("", "", i32::from(!found))
}

impl RemoteSession for FakeSession {
    async fn exec(&self, command: &str, capture: &OutputCapture) -> Result<CommandResult> {
        let (hang, result) = {
            let mut host = self.state.lock().unwrap();
            host.commands.push(command.to_string());
            if host
                .broken_on
                .as_deref()
                .is_some_and(|needle| command.contains(needle))
            {
                anyhow::bail!("channel broken while running '{command}'");
            }
            let hang = host
                .hang_on
                .as_deref()
                .is_some_and(|needle| command.contains(needle));
            let result = Self::interpret(&mut host, command);
            (hang, result)
        };
        if hang {
            capture.push_stdout(b"partial");
            std::future::pending::<()>().await;
        }
        capture.push_stdout(result.stdout.as_bytes());
        capture.push_stderr(result.stderr.as_bytes());
        Ok(result)
    }

    async fn exec_detached(&self, command: &str) -> Result<()> {
        self.state.lock().unwrap().detached.push(command.to_string());
        Ok(())
    }

    async fn upload(&self, local: &Path, remote: &str) -> Result<u64> {
        let bytes = std::fs::read(local)?;
        let len = bytes.len() as u64;
        self.state
            .lock()
            .unwrap()
            .files
            .insert(remote.to_string(), bytes);
        Ok(len)
    }

    async fn download(&self, remote: &str, local: &Path) -> Result<u64> {
        let bytes = self
            .state
            .lock()
            .unwrap()
            .files
            .get(remote)
            .cloned()
            .ok_or_else(|| anyhow::anyhow!("scp: {remote}: No such file or directory"))?;
        std::fs::write(local, &bytes)?;
        Ok(bytes.len() as u64)
    }

    fn is_active(&self) -> bool {
        !self.closed.load(Ordering::Acquire) && !self.state.lock().unwrap().dead
    }

    fn close(&self) -> Result<()> {
        if !self.closed.swap(true, Ordering::AcqRel) {
            let mut host = self.state.lock().unwrap();
            host.closes += 1;
            if host.close_fails {
                anyhow::bail!("disconnect: broken pipe");
            }
        }
        Ok(())
    }
}
