//! Cluster client facade

use crate::config::{ClientOptions, ClusterConfig, NodeConfig};
use crate::connection::TcpConnector;
use crate::discovery::TopologyDiscoverer;
use crate::dispatch::Dispatcher;
use crate::error::{ClusterError, Result};
use crate::node::NodeConnector;
use crate::parsers::{NodeRecord, SlotInfo, parse_info, parse_nodes, parse_slaves, parse_slots};
use crate::registry::NodeRegistry;
use crate::resp::Reply;
use crate::router::Router;
use crate::slot_map::SlotMap;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::info;

/// Parsed reply of a `CLUSTER` sub-command
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", content = "data", rename_all = "snake_case")]
pub enum ClusterReply {
    Slots(Vec<SlotInfo>),
    Nodes(Vec<NodeRecord>),
    Slaves(Vec<NodeRecord>),
    Info(HashMap<String, String>),
    /// Sub-commands without a dedicated parser
    #[serde(skip)]
    Raw(Reply),
}

struct ClientInner {
    slot_map: Arc<SlotMap>,
    registry: Arc<NodeRegistry>,
    router: Router,
    dispatcher: Dispatcher,
    options: ClientOptions,
}

/// Cluster-aware client
///
/// Cheap to clone; clones share the slot map and node connections.
#[derive(Clone)]
pub struct ClusterClient {
    inner: Arc<ClientInner>,
}

impl ClusterClient {
    /// Discover the cluster through the given bootstrap nodes over TCP
    pub async fn connect(configs: &[NodeConfig], options: ClientOptions) -> Result<Self> {
        Self::connect_with(configs, options, Arc::new(TcpConnector)).await
    }

    /// Discover the cluster using a custom node connector
    pub async fn connect_with(
        configs: &[NodeConfig],
        mut options: ClientOptions,
        connector: Arc<dyn NodeConnector>,
    ) -> Result<Self> {
        options.apply_descriptors(configs)?;

        let bootstrap = NodeRegistry::build_from(configs, &options, connector.clone())?;
        let topology = TopologyDiscoverer::new(&options)
            .discover(&bootstrap)
            .await?;
        drop(bootstrap);

        let registry = Arc::new(NodeRegistry::from_addresses(
            &topology.masters,
            options.clone(),
            connector,
        )?);
        let slot_map = Arc::new(SlotMap::from_ranges(topology.assignments()));

        info!(
            "Cluster client ready: {} masters, {:.1}% slot coverage",
            registry.len(),
            slot_map.slot_coverage()
        );

        let router = Router::new(slot_map.clone(), registry.clone());
        let dispatcher = Dispatcher::new(
            slot_map.clone(),
            registry.clone(),
            options.retry_budget,
            options.retry_backoff,
        );

        Ok(Self {
            inner: Arc::new(ClientInner {
                slot_map,
                registry,
                router,
                dispatcher,
                options,
            }),
        })
    }

    /// Connect using a loaded configuration
    pub async fn from_config(config: &ClusterConfig) -> Result<Self> {
        let configs = config.node_configs()?;
        Self::connect(&configs, config.client_options()).await
    }

    /// Send any command to the node owning its key
    pub async fn invoke(&self, command: &str, args: &[String]) -> Result<Reply> {
        validate_command(command)?;
        if command.eq_ignore_ascii_case("ASKING") {
            return Ok(Reply::Status(self.asking().to_string()));
        }

        match self.inner.options.deadline {
            Some(deadline) => tokio::time::timeout(deadline, self.dispatch(command, args))
                .await
                .map_err(|_| {
                    ClusterError::Timeout(format!(
                        "{} did not complete within {:?}",
                        command, deadline
                    ))
                })?,
            None => self.dispatch(command, args).await,
        }
    }

    async fn dispatch(&self, command: &str, args: &[String]) -> Result<Reply> {
        let address = self.inner.router.target(command, args)?;
        self.inner.dispatcher.execute(address, command, args).await
    }

    /// Run a `CLUSTER` sub-command and parse the reply
    ///
    /// `SLOTS`, `NODES`, `SLAVES` (or `REPLICAS`) and `INFO` are parsed;
    /// anything else is returned raw.
    pub async fn cluster(&self, subcommand: &str, args: &[String]) -> Result<ClusterReply> {
        let mut full = Vec::with_capacity(args.len() + 1);
        full.push(subcommand.to_string());
        full.extend(args.iter().cloned());
        let reply = self.invoke("CLUSTER", &full).await?;

        match subcommand.to_ascii_lowercase().as_str() {
            "slots" => Ok(ClusterReply::Slots(parse_slots(&reply)?)),
            "nodes" => Ok(ClusterReply::Nodes(parse_nodes(text_of(&reply)?)?)),
            "slaves" | "replicas" => Ok(ClusterReply::Slaves(parse_slaves(&reply)?)),
            "info" => Ok(ClusterReply::Info(parse_info(text_of(&reply)?))),
            _ => Ok(ClusterReply::Raw(reply)),
        }
    }

    /// Acknowledge `ASKING`; the redirect engine sends the real directive
    pub fn asking(&self) -> &'static str {
        "OK"
    }

    /// Get value
    pub async fn get(&self, key: &str) -> Result<Option<String>> {
        match self.invoke("GET", &[key.to_string()]).await? {
            Reply::Bulk(None) => Ok(None),
            reply => Ok(Some(expect_text(reply)?)),
        }
    }

    /// Set value
    pub async fn set(&self, key: &str, value: &str) -> Result<()> {
        self.invoke("SET", &[key.to_string(), value.to_string()])
            .await?;
        Ok(())
    }

    /// Delete a key, returning whether it existed
    pub async fn del(&self, key: &str) -> Result<bool> {
        let reply = self.invoke("DEL", &[key.to_string()]).await?;
        Ok(expect_int(&reply)? > 0)
    }

    /// Check if key exists
    pub async fn exists(&self, key: &str) -> Result<bool> {
        let reply = self.invoke("EXISTS", &[key.to_string()]).await?;
        Ok(expect_int(&reply)? > 0)
    }

    /// Increment value
    pub async fn incr(&self, key: &str) -> Result<i64> {
        let reply = self.invoke("INCR", &[key.to_string()]).await?;
        expect_int(&reply)
    }

    /// Type of the value stored at key
    pub async fn key_type(&self, key: &str) -> Result<String> {
        expect_text(self.invoke("TYPE", &[key.to_string()]).await?)
    }

    /// Ping a random node
    pub async fn ping(&self) -> Result<String> {
        expect_text(self.invoke("PING", &[]).await?)
    }

    /// `INFO` of a random node
    pub async fn info(&self, section: Option<&str>) -> Result<HashMap<String, String>> {
        let args: Vec<String> = section.map(str::to_string).into_iter().collect();
        let reply = self.invoke("INFO", &args).await?;
        Ok(parse_info(text_of(&reply)?))
    }

    /// Shared slot map
    pub fn slot_map(&self) -> &Arc<SlotMap> {
        &self.inner.slot_map
    }

    /// Shared node registry
    pub fn registry(&self) -> &Arc<NodeRegistry> {
        &self.inner.registry
    }

    pub fn options(&self) -> &ClientOptions {
        &self.inner.options
    }
}

fn validate_command(command: &str) -> Result<()> {
    if command.is_empty() || command.chars().any(|c| c.is_whitespace() || c.is_control()) {
        return Err(ClusterError::UnknownCommand(format!("'{}'", command)));
    }
    Ok(())
}

fn text_of(reply: &Reply) -> Result<&str> {
    reply
        .as_str()
        .ok_or_else(|| ClusterError::Protocol(format!("expected text reply, got {:?}", reply)))
}

fn expect_text(reply: Reply) -> Result<String> {
    match reply {
        Reply::Status(s) => Ok(s),
        Reply::Bulk(Some(_)) => reply
            .into_string()
            .ok_or_else(|| ClusterError::Protocol("invalid bulk reply".to_string())),
        other => Err(ClusterError::Protocol(format!(
            "expected text reply, got {:?}",
            other
        ))),
    }
}

fn expect_int(reply: &Reply) -> Result<i64> {
    match reply {
        Reply::Integer(n) => Ok(*n),
        other => Err(ClusterError::Protocol(format!(
            "expected integer reply, got {:?}",
            other
        ))),
    }
}
