//! Shared test helpers: credentials, node construction, and policies.

#![allow(dead_code, clippy::expect_used)]

use std::sync::Arc;
use std::time::Duration;

use remote_fleet::application::services::node::Node;
use remote_fleet::domain::command::ExecPolicy;
use remote_fleet::domain::config::{CredentialDescriptor, CredentialKind, MountSpec};

use crate::mocks::{FakeConnector, HostState, SharedHost};

pub const USER: &str = "tester";
pub const HOME: &str = "/users/tester";

/// Password credential read from a variable no test sets, so it resolves to
/// an empty password without touching the process environment.
pub fn env_cred() -> CredentialDescriptor {
    CredentialDescriptor {
        user: USER.to_string(),
        kind: CredentialKind::EnvVar,
        value: "REMOTE_FLEET_TEST_PASSWORD_UNSET".to_string(),
        port: None,
    }
}

pub fn mount(mountpoint: &str, device: &str, min_size_gb: u64) -> MountSpec {
    MountSpec {
        mountpoint: mountpoint.to_string(),
        device_name: device.to_string(),
        min_size_gb,
    }
}

/// Short deadline and a small retry budget, so hang tests finish quickly.
pub fn fast_policy(retries: u32) -> ExecPolicy {
    ExecPolicy::new(Some(Duration::from_millis(50)), retries)
}

/// A node for `host` on a connector that knows only that host.
pub fn node_on(
    host: &str,
    state: HostState,
    mounts: Vec<MountSpec>,
) -> (Node<FakeConnector>, SharedHost) {
    let connector = FakeConnector::new();
    let shared = connector.add_host(host, state);
    let node = Node::new("n0", host, env_cred(), Arc::new(connector)).with_mounts(mounts);
    (node, shared)
}

/// A connected node with no mount requirements.
pub async fn connected(host: &str, state: HostState) -> (Node<FakeConnector>, SharedHost) {
    let (mut node, shared) = node_on(host, state, Vec::new());
    node.connect().await.expect("fake connect succeeds");
    (node, shared)
}
