//! Topology discovery
//!
//! Asks bootstrap nodes for `CLUSTER SLOTS`, in order, until one answers.

use crate::config::ClientOptions;
use crate::error::{ClusterError, Result};
use crate::node::{NodeAddress, NodeClient};
use crate::parsers::{SlotInfo, parse_slots};
use crate::registry::NodeRegistry;
use crate::resp::Reply;
use crate::slot::SlotId;
use std::ops::RangeInclusive;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// Slot ownership as reported by one node
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Topology {
    /// Slot ranges in reply order
    pub slots: Vec<SlotInfo>,
    /// Distinct master addresses in first-seen order
    pub masters: Vec<NodeAddress>,
    /// Node that answered
    pub source: NodeAddress,
}

impl Topology {
    /// Fold a slots reply into ranges and the master set
    ///
    /// Nodes announcing an empty ip are reachable on the host that was
    /// queried.
    pub fn from_slots(mut slots: Vec<SlotInfo>, queried: &NodeAddress) -> Self {
        let mut masters = Vec::new();
        for info in &mut slots {
            for endpoint in std::iter::once(&mut info.master).chain(info.replicas.iter_mut()) {
                if endpoint.ip.is_empty() {
                    endpoint.ip = queried.host.clone();
                }
            }
            let master = info.master.address();
            if !masters.contains(&master) {
                masters.push(master);
            }
        }

        Self {
            slots,
            masters,
            source: queried.clone(),
        }
    }

    /// `(range, master)` pairs for the slot map
    pub fn assignments(&self) -> Vec<(RangeInclusive<SlotId>, NodeAddress)> {
        self.slots
            .iter()
            .map(|info| (info.range(), info.master.address()))
            .collect()
    }

    /// Number of slots covered
    pub fn slot_count(&self) -> usize {
        self.slots.iter().map(SlotInfo::count).sum()
    }
}

/// Bootstrap topology discoverer
#[derive(Debug, Clone)]
pub struct TopologyDiscoverer {
    attempts: u32,
    backoff: Duration,
}

impl TopologyDiscoverer {
    pub fn new(options: &ClientOptions) -> Self {
        Self {
            attempts: options.discovery_attempts.max(1),
            backoff: options.retry_backoff,
        }
    }

    /// Query the bootstrap nodes in order; the first good answer wins
    pub async fn discover(&self, bootstrap: &NodeRegistry) -> Result<Topology> {
        let addresses = bootstrap.addresses();
        if addresses.is_empty() {
            return Err(ClusterError::CannotConnect(
                "no bootstrap nodes configured".to_string(),
            ));
        }

        for address in &addresses {
            let client = bootstrap.lookup(address)?;
            let slots = match self.query(client).await.and_then(|reply| parse_slots(&reply)) {
                Ok(slots) => slots,
                Err(e) => {
                    warn!(address = %address, error = %e, "Bootstrap node failed topology query");
                    continue;
                }
            };
            if slots.is_empty() {
                warn!(address = %address, "Bootstrap node reported no slot ranges");
                continue;
            }

            let topology = Topology::from_slots(slots, address);
            info!(
                "Discovered {} slot ranges on {} masters via {}",
                topology.slots.len(),
                topology.masters.len(),
                address
            );
            return Ok(topology);
        }

        let tried: Vec<String> = addresses.iter().map(ToString::to_string).collect();
        Err(ClusterError::CannotConnect(tried.join(", ")))
    }

    async fn query(&self, client: Arc<dyn NodeClient>) -> Result<Reply> {
        let args = ["SLOTS".to_string()];
        let mut attempt = 1;
        loop {
            match client.send("CLUSTER", &args).await {
                Ok(reply) => return Ok(reply),
                Err(e) if e.is_connection_error() && attempt < self.attempts => {
                    warn!(
                        address = %client.address(),
                        attempt,
                        error = %e,
                        "Topology query failed, retrying"
                    );
                    attempt += 1;
                    tokio::time::sleep(self.backoff).await;
                }
                Err(e) => return Err(e),
            }
        }
    }
}
