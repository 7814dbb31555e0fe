//! Node Registry
//!
//! Sole owner of node client handles, keyed by `host:port`.

use crate::config::{ClientOptions, NodeConfig, resolve_addresses};
use crate::error::{ClusterError, Result};
use crate::node::{NodeAddress, NodeClient, NodeConnector};
use parking_lot::RwLock;
use rand::seq::SliceRandom;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info};

#[derive(Default)]
struct NodeTable {
    clients: HashMap<String, Arc<dyn NodeClient>>,
    /// Insertion order, for stable listing
    order: Vec<NodeAddress>,
}

/// Registry of node clients
pub struct NodeRegistry {
    nodes: RwLock<NodeTable>,
    options: ClientOptions,
    connector: Arc<dyn NodeConnector>,
}

impl NodeRegistry {
    /// Create an empty registry
    pub fn new(options: ClientOptions, connector: Arc<dyn NodeConnector>) -> Self {
        Self {
            nodes: RwLock::new(NodeTable::default()),
            options,
            connector,
        }
    }

    /// Build a registry from node descriptors
    ///
    /// Descriptors resolving to the same address share one handle.
    pub fn build_from(
        configs: &[NodeConfig],
        options: &ClientOptions,
        connector: Arc<dyn NodeConnector>,
    ) -> Result<Self> {
        let addresses = resolve_addresses(configs)?;
        Self::from_addresses(&addresses, options.clone(), connector)
    }

    /// Build a registry with one fresh handle per address
    pub fn from_addresses(
        addresses: &[NodeAddress],
        options: ClientOptions,
        connector: Arc<dyn NodeConnector>,
    ) -> Result<Self> {
        let registry = Self::new(options, connector);
        for address in addresses {
            registry.get_or_connect(address)?;
        }
        info!("Node registry built with {} nodes", registry.len());
        Ok(registry)
    }

    /// Get the handle for a known address
    pub fn lookup(&self, address: &NodeAddress) -> Result<Arc<dyn NodeClient>> {
        self.nodes
            .read()
            .clients
            .get(&address.to_string())
            .cloned()
            .ok_or_else(|| ClusterError::UnknownNode(address.to_string()))
    }

    /// Get the handle for an address, creating it on first sight
    pub fn get_or_connect(&self, address: &NodeAddress) -> Result<Arc<dyn NodeClient>> {
        let key = address.to_string();
        if let Some(client) = self.nodes.read().clients.get(&key) {
            return Ok(Arc::clone(client));
        }

        let mut table = self.nodes.write();
        if let Some(client) = table.clients.get(&key) {
            return Ok(Arc::clone(client));
        }

        let client = self.connector.connect(address, &self.options)?;
        debug!(address = %address, "Registered node client");
        table.clients.insert(key, Arc::clone(&client));
        table.order.push(address.clone());
        Ok(client)
    }

    /// Uniformly random node handle
    pub fn random_live(&self) -> Result<Arc<dyn NodeClient>> {
        let table = self.nodes.read();
        table
            .order
            .choose(&mut rand::thread_rng())
            .and_then(|address| table.clients.get(&address.to_string()))
            .cloned()
            .ok_or(ClusterError::NoNodesAvailable)
    }

    /// Uniformly random node address
    pub fn random_address(&self) -> Result<NodeAddress> {
        self.nodes
            .read()
            .order
            .choose(&mut rand::thread_rng())
            .cloned()
            .ok_or(ClusterError::NoNodesAvailable)
    }

    /// Registered addresses in insertion order
    pub fn addresses(&self) -> Vec<NodeAddress> {
        self.nodes.read().order.clone()
    }

    pub fn contains(&self, address: &NodeAddress) -> bool {
        self.nodes.read().clients.contains_key(&address.to_string())
    }

    pub fn len(&self) -> usize {
        self.nodes.read().order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Options handed to every node client
    pub fn options(&self) -> &ClientOptions {
        &self.options
    }
}
