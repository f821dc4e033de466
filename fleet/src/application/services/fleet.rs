//! Fleet coordinator: builds nodes from configuration and answers fleet-wide queries.

use std::collections::BTreeMap;
use std::sync::Arc;

use anyhow::Result;
use futures_util::future::join_all;
use tracing::{info, warn};

use crate::application::ports::SessionConnector;
use crate::application::services::node::Node;
use crate::domain::config::FleetConfig;
use crate::domain::error::{ConfigError, FleetError};

/// A named collection of nodes, ordered by node name.
pub struct Fleet<C: SessionConnector> {
    nodes: Vec<Node<C>>,
}

impl<C: SessionConnector> Fleet<C> {
    /// Build every node in `config` and connect them concurrently.
    ///
    /// Each node receives its credential, its mount group, its class, and the
    /// tolerance flag for that class.
    ///
    /// # Errors
    ///
    /// Returns a `ConfigError` if the document does not validate, or the first
    /// connection failure of a node whose class is not tolerated.
    pub async fn load(config: &FleetConfig, connector: Arc<C>) -> Result<Self> {
        config.validate()?;
        let policy = config.options.exec_policy();

        let mut nodes = Vec::with_capacity(config.nodes.len());
        for (name, entry) in &config.nodes {
            let credential = config.creds.get(&entry.cred).ok_or_else(|| {
                ConfigError::UnknownCredential {
                    node: name.clone(),
                    cred: entry.cred.clone(),
                }
            })?;
            let class = config.class_of(name);
            nodes.push(
                Node::new(name, &entry.host, credential.clone(), Arc::clone(&connector))
                    .with_mounts(config.mounts_for(entry))
                    .with_class(class)
                    .tolerant(config.options.tolerates(class))
                    .with_exec_policy(policy),
            );
        }

        let results = join_all(nodes.iter_mut().map(|n| n.connect())).await;
        let mut fleet = Self { nodes };
        if let Some(err) = results.into_iter().find_map(Result::err) {
            fleet.shutdown();
            return Err(err);
        }

        let live = fleet.live_hosts().len();
        info!(nodes = fleet.nodes.len(), live, "fleet loaded");
        for (host, error) in fleet.unresponsive() {
            warn!(%host, %error, "node left out of fleet");
        }
        Ok(fleet)
    }

    /// Wrap already-built nodes without connecting them.
    #[must_use]
    pub fn from_nodes(nodes: Vec<Node<C>>) -> Self {
        Self { nodes }
    }

    /// True when the fleet is non-empty and every node is live.
    pub fn all_live(&self) -> bool {
        !self.nodes.is_empty() && self.nodes.iter().all(Node::is_live)
    }

    /// # Errors
    ///
    /// Returns [`FleetError::NotFound`] for an unknown host.
    pub fn get_node(&self, host: &str) -> Result<&Node<C>, FleetError> {
        self.nodes
            .iter()
            .find(|n| n.host() == host)
            .ok_or_else(|| FleetError::NotFound(host.to_string()))
    }

    /// # Errors
    ///
    /// Returns [`FleetError::NotFound`] for an unknown host.
    pub fn get_node_mut(&mut self, host: &str) -> Result<&mut Node<C>, FleetError> {
        self.nodes
            .iter_mut()
            .find(|n| n.host() == host)
            .ok_or_else(|| FleetError::NotFound(host.to_string()))
    }

    /// Lookup by the node's name in the configuration document.
    ///
    /// # Errors
    ///
    /// Returns [`FleetError::NameNotFound`] for an unknown name.
    pub fn get_node_by_name(&self, name: &str) -> Result<&Node<C>, FleetError> {
        self.nodes
            .iter()
            .find(|n| n.name() == name)
            .ok_or_else(|| FleetError::NameNotFound(name.to_string()))
    }

    pub fn nodes(&self) -> impl Iterator<Item = &Node<C>> {
        self.nodes.iter()
    }

    pub fn live_hosts(&self) -> Vec<String> {
        self.nodes
            .iter()
            .filter(|n| n.is_live())
            .map(|n| n.host().to_string())
            .collect()
    }

    pub fn all_hosts(&self) -> Vec<String> {
        self.nodes.iter().map(|n| n.host().to_string()).collect()
    }

    /// Liveness of every node, keyed by host.
    pub fn node_status(&self) -> BTreeMap<String, bool> {
        self.nodes
            .iter()
            .map(|n| (n.host().to_string(), n.is_live()))
            .collect()
    }

    /// Recorded failure of every node that has one, keyed by host.
    pub fn unresponsive(&self) -> BTreeMap<String, String> {
        self.nodes
            .iter()
            .filter_map(|n| Some((n.host().to_string(), n.last_error()?.to_string())))
            .collect()
    }

    /// Reconnect every node that is not live. Returns the hosts that are live afterwards.
    ///
    /// # Errors
    ///
    /// Returns the first failure of a node whose class is not tolerated.
    pub async fn reconnect_unresponsive(&mut self) -> Result<Vec<String>> {
        let stale = self.nodes.iter_mut().filter(|n| !n.is_live());
        let results = join_all(stale.map(|n| n.reconnect())).await;
        if let Some(err) = results.into_iter().find_map(Result::err) {
            return Err(err);
        }
        Ok(self.live_hosts())
    }

    /// Close every session. Calling it again is a no-op.
    pub fn shutdown(&mut self) {
        for node in &mut self.nodes {
            node.disconnect();
        }
    }
}

impl<C: SessionConnector> Drop for Fleet<C> {
    fn drop(&mut self) {
        self.shutdown();
    }
}
