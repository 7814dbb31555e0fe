//! Common test utilities: an in-memory simulated cluster

use async_trait::async_trait;
use parking_lot::Mutex;
use slotroute::{
    ClientOptions, ClusterClient, ClusterError, NodeAddress, NodeClient, NodeConfig,
    NodeConnector, Reply, Result, key_slot,
};
use std::collections::{HashMap, HashSet};
use std::ops::RangeInclusive;
use std::sync::Arc;
use std::time::Duration;

/// Route test logs through the test harness
#[allow(dead_code)]
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("slotroute=debug")
        .with_test_writer()
        .try_init();
}

pub fn addr(port: u16) -> NodeAddress {
    NodeAddress::new("127.0.0.1", port)
}

#[allow(dead_code)]
pub fn url(port: u16) -> NodeConfig {
    NodeConfig::url(format!("redis://127.0.0.1:{}", port))
}

#[allow(dead_code)]
pub fn strings(list: &[&str]) -> Vec<String> {
    list.iter().map(|s| s.to_string()).collect()
}

/// Options with a short backoff so retry tests stay fast
#[allow(dead_code)]
pub fn fast_options() -> ClientOptions {
    ClientOptions::default().with_retry_backoff(Duration::from_millis(1))
}

#[derive(Default)]
struct SimState {
    /// Ownership announced by `CLUSTER SLOTS`
    ranges: Vec<(RangeInclusive<u16>, NodeAddress)>,
    /// Slots resharded after discovery
    moved: HashMap<u16, NodeAddress>,
    /// Slots being migrated: slot -> importing node
    migrating: HashMap<u16, NodeAddress>,
    dead: HashSet<NodeAddress>,
    flaky: HashMap<NodeAddress, usize>,
    slots_disabled: HashSet<NodeAddress>,
    asking: HashSet<NodeAddress>,
    data: HashMap<String, String>,
    calls: Vec<(NodeAddress, String)>,
    connects: HashMap<NodeAddress, usize>,
    /// AUTH password each node client was created with
    passwords: Vec<(NodeAddress, Option<String>)>,
}

impl SimState {
    fn owner(&self, slot: u16) -> Option<NodeAddress> {
        if let Some(address) = self.moved.get(&slot) {
            return Some(address.clone());
        }
        self.ranges
            .iter()
            .find(|(range, _)| range.contains(&slot))
            .map(|(_, address)| address.clone())
    }

    fn slots_reply(&self) -> Reply {
        Reply::Array(Some(
            self.ranges
                .iter()
                .map(|(range, address)| {
                    Reply::Array(Some(vec![
                        Reply::Integer(i64::from(*range.start())),
                        Reply::Integer(i64::from(*range.end())),
                        Reply::Array(Some(vec![
                            Reply::bulk(address.host.clone()),
                            Reply::Integer(i64::from(address.port)),
                            Reply::bulk(format!("node-{}", address.port)),
                        ])),
                    ]))
                })
                .collect(),
        ))
    }

    fn nodes_text(&self) -> String {
        let mut text = String::new();
        for (range, address) in &self.ranges {
            text.push_str(&format!(
                "node-{port} {address}@{bus} master - 0 1426238316232 1 connected {start}-{end}\n",
                port = address.port,
                address = address,
                bus = u32::from(address.port) + 10000,
                start = range.start(),
                end = range.end(),
            ));
        }
        text
    }

    fn handle(&mut self, node: &NodeAddress, tokens: &[String]) -> Result<Reply> {
        self.calls.push((node.clone(), tokens.join(" ")));

        if self.dead.contains(node) {
            return Err(ClusterError::Connection(format!(
                "connect to {}: connection refused",
                node
            )));
        }
        if let Some(left) = self.flaky.get_mut(node) {
            if *left > 0 {
                *left -= 1;
                return Err(ClusterError::Connection("connection reset by peer".into()));
            }
        }

        let command = tokens.first().map(|c| c.to_ascii_uppercase()).unwrap_or_default();
        if command == "ASKING" {
            self.asking.insert(node.clone());
            return Ok(Reply::Status("OK".into()));
        }
        let asking = self.asking.remove(node);

        match command.as_str() {
            "PING" => Ok(Reply::Status("PONG".into())),
            "INFO" => Ok(Reply::bulk(format!(
                "# Server\r\nredis_version:7.2.0\r\ntcp_port:{}\r\n",
                node.port
            ))),
            "CLUSTER" => self.cluster(node, tokens),
            "GET" | "SET" | "DEL" | "EXISTS" | "INCR" | "TYPE" => {
                let key = tokens
                    .get(1)
                    .ok_or_else(|| ClusterError::Command("ERR wrong number of arguments".into()))?;
                let slot = key_slot(key);

                if let Some(importing) = self.migrating.get(&slot) {
                    if importing == node {
                        if !asking {
                            let owner = self.owner(slot).unwrap_or_else(|| node.clone());
                            return Err(ClusterError::Command(format!("MOVED {} {}", slot, owner)));
                        }
                    } else {
                        return Err(ClusterError::Command(format!("ASK {} {}", slot, importing)));
                    }
                } else {
                    match self.owner(slot) {
                        Some(owner) if owner != *node => {
                            return Err(ClusterError::Command(format!("MOVED {} {}", slot, owner)));
                        }
                        None => {
                            return Err(ClusterError::Command(
                                "CLUSTERDOWN Hash slot not served".into(),
                            ));
                        }
                        _ => {}
                    }
                }
                self.serve(&command, key, tokens)
            }
            other => Err(ClusterError::Command(format!(
                "ERR unknown command '{}'",
                other
            ))),
        }
    }

    fn cluster(&self, node: &NodeAddress, tokens: &[String]) -> Result<Reply> {
        let sub = tokens.get(1).map(|s| s.to_ascii_uppercase()).unwrap_or_default();
        match sub.as_str() {
            "SLOTS" if self.slots_disabled.contains(node) => Err(ClusterError::Command(
                "ERR This instance has cluster support disabled".into(),
            )),
            "SLOTS" => Ok(self.slots_reply()),
            "NODES" => Ok(Reply::bulk(self.nodes_text())),
            "INFO" => Ok(Reply::bulk(format!(
                "cluster_state:ok\r\ncluster_slots_assigned:16384\r\ncluster_known_nodes:{}\r\n",
                self.ranges.len()
            ))),
            "KEYSLOT" => {
                let key = tokens.get(2).cloned().unwrap_or_default();
                Ok(Reply::Integer(i64::from(key_slot(&key))))
            }
            _ => Err(ClusterError::Command(format!(
                "ERR Unknown subcommand or wrong number of arguments for '{}'",
                sub
            ))),
        }
    }

    fn serve(&mut self, command: &str, key: &str, tokens: &[String]) -> Result<Reply> {
        match command {
            "GET" => Ok(match self.data.get(key) {
                Some(value) => Reply::bulk(value.clone()),
                None => Reply::Bulk(None),
            }),
            "SET" => {
                let value = tokens
                    .get(2)
                    .ok_or_else(|| ClusterError::Command("ERR wrong number of arguments".into()))?;
                self.data.insert(key.to_string(), value.clone());
                Ok(Reply::Status("OK".into()))
            }
            "DEL" => Ok(Reply::Integer(i64::from(self.data.remove(key).is_some()))),
            "EXISTS" => Ok(Reply::Integer(i64::from(self.data.contains_key(key)))),
            "INCR" => {
                let current = match self.data.get(key) {
                    Some(value) => value.parse::<i64>().map_err(|_| {
                        ClusterError::Command(
                            "ERR value is not an integer or out of range".into(),
                        )
                    })?,
                    None => 0,
                };
                self.data.insert(key.to_string(), (current + 1).to_string());
                Ok(Reply::Integer(current + 1))
            }
            _ => Ok(Reply::Status(
                if self.data.contains_key(key) { "string" } else { "none" }.into(),
            )),
        }
    }
}

/// A cluster simulated in memory, shared by every node client it hands out
#[derive(Clone)]
pub struct SimCluster {
    state: Arc<Mutex<SimState>>,
}

#[allow(dead_code)]
impl SimCluster {
    /// Masters on the given ports, slots split evenly
    pub fn with_masters(ports: &[u16]) -> Self {
        let count = ports.len() as u32;
        let mut state = SimState::default();
        for (i, port) in ports.iter().enumerate() {
            let i = i as u32;
            let start = (16384 * i / count) as u16;
            let end = (16384 * (i + 1) / count - 1) as u16;
            state.ranges.push((start..=end, addr(*port)));
        }
        Self {
            state: Arc::new(Mutex::new(state)),
        }
    }

    /// 7000: 0-5460, 7001: 5461-10921, 7002: 10922-16383
    pub fn three_masters() -> Self {
        Self::with_masters(&[7000, 7001, 7002])
    }

    pub fn connector(&self) -> Arc<dyn NodeConnector> {
        Arc::new(FakeConnector {
            state: self.state.clone(),
        })
    }

    /// Connect a client bootstrapping from the given ports
    pub async fn client(&self, ports: &[u16], options: ClientOptions) -> Result<ClusterClient> {
        let configs: Vec<NodeConfig> = ports.iter().map(|p| url(*p)).collect();
        ClusterClient::connect_with(&configs, options, self.connector()).await
    }

    pub fn owner(&self, slot: u16) -> Option<NodeAddress> {
        self.state.lock().owner(slot)
    }

    pub fn kill(&self, port: u16) {
        self.state.lock().dead.insert(addr(port));
    }

    pub fn revive(&self, port: u16) {
        self.state.lock().dead.remove(&addr(port));
    }

    /// Fail the next `count` requests to a node with a connection error
    pub fn flaky(&self, port: u16, count: usize) {
        self.state.lock().flaky.insert(addr(port), count);
    }

    /// Reject `CLUSTER SLOTS` on a node
    pub fn disable_slots(&self, port: u16) {
        self.state.lock().slots_disabled.insert(addr(port));
    }

    /// Reshard one slot to another node
    pub fn move_slot(&self, slot: u16, port: u16) {
        self.state.lock().moved.insert(slot, addr(port));
    }

    /// Start migrating one slot to another node
    pub fn migrate(&self, slot: u16, port: u16) {
        self.state.lock().migrating.insert(slot, addr(port));
    }

    pub fn value(&self, key: &str) -> Option<String> {
        self.state.lock().data.get(key).cloned()
    }

    /// Requests received by a node, as space separated tokens
    pub fn calls_to(&self, port: u16) -> Vec<String> {
        self.state
            .lock()
            .calls
            .iter()
            .filter(|(node, _)| *node == addr(port))
            .map(|(_, call)| call.clone())
            .collect()
    }

    pub fn total_calls(&self) -> usize {
        self.state.lock().calls.len()
    }

    pub fn clear_calls(&self) {
        self.state.lock().calls.clear();
    }

    /// Number of node clients created for an address
    /// Passwords handed to node clients, in creation order
    pub fn passwords(&self) -> Vec<Option<String>> {
        self.state
            .lock()
            .passwords
            .iter()
            .map(|(_, password)| password.clone())
            .collect()
    }

    pub fn connects(&self, port: u16) -> usize {
        self.state
            .lock()
            .connects
            .get(&addr(port))
            .copied()
            .unwrap_or(0)
    }
}

struct FakeConnector {
    state: Arc<Mutex<SimState>>,
}

impl NodeConnector for FakeConnector {
    fn connect(
        &self,
        address: &NodeAddress,
        options: &ClientOptions,
    ) -> Result<Arc<dyn NodeClient>> {
        let mut state = self.state.lock();
        *state.connects.entry(address.clone()).or_insert(0) += 1;
        state
            .passwords
            .push((address.clone(), options.password.clone()));
        drop(state);
        Ok(Arc::new(FakeNode {
            address: address.clone(),
            state: self.state.clone(),
        }))
    }
}

struct FakeNode {
    address: NodeAddress,
    state: Arc<Mutex<SimState>>,
}

#[async_trait]
impl NodeClient for FakeNode {
    fn address(&self) -> &NodeAddress {
        &self.address
    }

    async fn send(&self, command: &str, args: &[String]) -> Result<Reply> {
        let mut tokens = vec![command.to_string()];
        tokens.extend(args.iter().cloned());
        self.send_raw(&tokens).await
    }

    async fn send_raw(&self, tokens: &[String]) -> Result<Reply> {
        self.state.lock().handle(&self.address, tokens)
    }
}
