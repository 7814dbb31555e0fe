//! Node descriptors, client options and file/env configuration

use crate::error::{ClusterError, Result};
use crate::node::NodeAddress;
use percent_encoding::percent_decode_str;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fs;
use std::path::Path;
use std::time::Duration;
use url::Url;

/// Retry budget of a single command
pub const DEFAULT_RETRY_BUDGET: u32 = 16;

/// Pause before retrying after a connection failure
pub const DEFAULT_RETRY_BACKOFF: Duration = Duration::from_millis(100);

/// Port used when a node URL does not carry one
pub const DEFAULT_PORT: u16 = 6379;

/// AUTH credentials carried in a node URL's userinfo
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credentials {
    pub username: Option<String>,
    pub password: String,
}

/// A single node descriptor
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeConfig {
    /// `redis://host:port[/extra]` or `rediss://host:port[/extra]`
    Url(String),
    /// Explicit host and port
    HostPort { host: String, port: u16 },
}

impl NodeConfig {
    pub fn url(url: impl Into<String>) -> Self {
        Self::Url(url.into())
    }

    pub fn host_port(host: impl Into<String>, port: u16) -> Self {
        Self::HostPort {
            host: host.into(),
            port,
        }
    }

    /// Decode a list of descriptors from dynamic input
    ///
    /// The input must be an array whose entries are URL strings or objects
    /// with `host` and `port` (string or number).
    pub fn list_from_value(value: &Value) -> Result<Vec<Self>> {
        let entries = value.as_array().ok_or_else(|| {
            ClusterError::InvalidConfig("cluster node config must be an array".to_string())
        })?;
        entries.iter().map(Self::from_value).collect()
    }

    /// Decode one descriptor from dynamic input
    pub fn from_value(value: &Value) -> Result<Self> {
        match value {
            Value::String(url) => Ok(Self::Url(url.clone())),
            Value::Object(map) => {
                let host = match map.get("host") {
                    Some(Value::String(host)) => host.clone(),
                    Some(other) => {
                        return Err(ClusterError::InvalidConfig(format!(
                            "node host must be a string, got {}",
                            other
                        )));
                    }
                    None => return Err(ClusterError::MissingField("host".to_string())),
                };
                let port = match map.get("port") {
                    Some(port) => port_from_value(port)?,
                    None => return Err(ClusterError::MissingField("port".to_string())),
                };
                Ok(Self::HostPort { host, port })
            }
            other => Err(ClusterError::InvalidConfig(format!(
                "cluster node config must be a string or an object, got {}",
                other
            ))),
        }
    }

    /// Resolve the node address, validating the URL scheme
    pub fn to_address(&self) -> Result<NodeAddress> {
        match self {
            Self::Url(raw) => {
                let url = parse_node_url(raw)?;
                let host = url
                    .host_str()
                    .filter(|h| !h.is_empty())
                    .ok_or_else(|| {
                        ClusterError::InvalidConfig(format!("missing host in '{}'", raw))
                    })?
                    .trim_start_matches('[')
                    .trim_end_matches(']');
                Ok(NodeAddress::new(host, url.port().unwrap_or(DEFAULT_PORT)))
            }
            Self::HostPort { host, port } => {
                if host.is_empty() {
                    return Err(ClusterError::InvalidConfig("empty node host".to_string()));
                }
                Ok(NodeAddress::new(host.clone(), *port))
            }
        }
    }

    /// Whether the descriptor asks for a TLS transport
    pub fn tls(&self) -> bool {
        matches!(self, Self::Url(raw) if url_scheme(raw) == "rediss")
    }

    /// Percent-decoded `user:password` from a URL descriptor
    ///
    /// `None` when the descriptor carries no password.
    pub fn credentials(&self) -> Result<Option<Credentials>> {
        let Self::Url(raw) = self else {
            return Ok(None);
        };
        let url = parse_node_url(raw)?;
        let Some(password) = url.password() else {
            return Ok(None);
        };
        let username = decode_userinfo(url.username())?;
        Ok(Some(Credentials {
            username: Some(username).filter(|u| !u.is_empty()),
            password: decode_userinfo(password)?,
        }))
    }
}

fn parse_node_url(raw: &str) -> Result<Url> {
    let scheme = url_scheme(raw);
    if scheme != "redis" && scheme != "rediss" {
        return Err(ClusterError::InvalidConfig(format!(
            "invalid uri scheme '{}'",
            scheme
        )));
    }
    Url::parse(raw)
        .map_err(|e| ClusterError::InvalidConfig(format!("invalid node url '{}': {}", raw, e)))
}

fn decode_userinfo(encoded: &str) -> Result<String> {
    percent_decode_str(encoded)
        .decode_utf8()
        .map(|decoded| decoded.into_owned())
        .map_err(|e| ClusterError::InvalidConfig(format!("invalid url credentials: {}", e)))
}

fn url_scheme(raw: &str) -> &str {
    raw.split_once("://").map(|(scheme, _)| scheme).unwrap_or("")
}

fn port_from_value(value: &Value) -> Result<u16> {
    let port = match value {
        Value::Number(n) => n.as_u64().and_then(|p| u16::try_from(p).ok()),
        Value::String(s) => s.trim().parse::<u16>().ok(),
        _ => None,
    };
    port.ok_or_else(|| ClusterError::InvalidConfig(format!("invalid node port {}", value)))
}

/// Resolve descriptors into distinct addresses, keeping first-seen order
pub fn resolve_addresses(configs: &[NodeConfig]) -> Result<Vec<NodeAddress>> {
    let mut addresses: Vec<NodeAddress> = Vec::with_capacity(configs.len());
    for config in configs {
        let address = config.to_address()?;
        if !addresses.contains(&address) {
            addresses.push(address);
        }
    }
    Ok(addresses)
}

/// Options shared by every node connection
#[derive(Debug, Clone)]
pub struct ClientOptions {
    /// TCP connect timeout
    pub connect_timeout: Duration,
    /// Per-reply read timeout
    pub read_timeout: Duration,
    /// ACL user name sent with AUTH
    pub username: Option<String>,
    /// Password sent with AUTH on connect
    pub password: Option<String>,
    /// Use TLS for every node connection
    pub tls: bool,
    /// Retries and redirections allowed per command
    pub retry_budget: u32,
    /// Sleep between retries after a connection failure
    pub retry_backoff: Duration,
    /// Topology query attempts per bootstrap node
    pub discovery_attempts: u32,
    /// Optional wall-clock bound on a single command, retries included
    pub deadline: Option<Duration>,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(1),
            read_timeout: Duration::from_secs(5),
            username: None,
            password: None,
            tls: false,
            retry_budget: DEFAULT_RETRY_BUDGET,
            retry_backoff: DEFAULT_RETRY_BACKOFF,
            discovery_attempts: 2,
            deadline: None,
        }
    }
}

impl ClientOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the connect timeout
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Set the read timeout
    pub fn with_read_timeout(mut self, timeout: Duration) -> Self {
        self.read_timeout = timeout;
        self
    }

    /// Set the password (and optional ACL user)
    pub fn with_auth(mut self, username: Option<String>, password: impl Into<String>) -> Self {
        self.username = username;
        self.password = Some(password.into());
        self
    }

    /// Enable TLS
    pub fn with_tls(mut self, tls: bool) -> Self {
        self.tls = tls;
        self
    }

    /// Set the retry budget
    pub fn with_retry_budget(mut self, budget: u32) -> Self {
        self.retry_budget = budget;
        self
    }

    /// Set the retry backoff
    pub fn with_retry_backoff(mut self, backoff: Duration) -> Self {
        self.retry_backoff = backoff;
        self
    }

    /// Set the topology query attempts per bootstrap node
    pub fn with_discovery_attempts(mut self, attempts: u32) -> Self {
        self.discovery_attempts = attempts.max(1);
        self
    }

    /// Bound each command by a wall-clock deadline
    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = Some(deadline);
        self
    }

    /// Fold settings carried by node descriptors into the options
    ///
    /// Any `rediss://` descriptor enables TLS. URL credentials become the
    /// AUTH credentials of every node; they must agree with each other and
    /// with an explicitly configured password.
    pub fn apply_descriptors(&mut self, configs: &[NodeConfig]) -> Result<()> {
        if configs.iter().any(NodeConfig::tls) {
            self.tls = true;
        }

        let mut current = self.password.clone().map(|password| Credentials {
            username: self.username.clone(),
            password,
        });
        for config in configs {
            let Some(found) = config.credentials()? else {
                continue;
            };
            match &current {
                Some(existing) if *existing != found => {
                    return Err(ClusterError::InvalidConfig(
                        "conflicting credentials across node descriptors".to_string(),
                    ));
                }
                Some(_) => {}
                None => current = Some(found),
            }
        }

        if let Some(credentials) = current {
            self.username = credentials.username;
            self.password = Some(credentials.password);
        }
        Ok(())
    }
}

/// Cluster client configuration file
///
/// ```yaml
/// nodes:
///   - redis://127.0.0.1:7000
///   - host: 127.0.0.1
///     port: 7001
/// options:
///   connect_timeout_ms: 500
/// logging:
///   level: debug
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterConfig {
    /// Bootstrap node descriptors, validated by [`ClusterConfig::node_configs`]
    pub nodes: Value,
    #[serde(default)]
    pub options: OptionsConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OptionsConfig {
    pub connect_timeout_ms: u64,
    pub read_timeout_ms: u64,
    pub username: Option<String>,
    pub password: Option<String>,
    pub tls: bool,
    pub retry_budget: u32,
    pub retry_backoff_ms: u64,
    pub discovery_attempts: u32,
    pub deadline_ms: Option<u64>,
}

impl Default for OptionsConfig {
    fn default() -> Self {
        Self {
            connect_timeout_ms: 1000,
            read_timeout_ms: 5000,
            username: None,
            password: None,
            tls: false,
            retry_budget: DEFAULT_RETRY_BUDGET,
            retry_backoff_ms: DEFAULT_RETRY_BACKOFF.as_millis() as u64,
            discovery_attempts: 2,
            deadline_ms: None,
        }
    }
}

impl OptionsConfig {
    /// Convert to runtime options
    pub fn to_client_options(&self) -> ClientOptions {
        ClientOptions {
            connect_timeout: Duration::from_millis(self.connect_timeout_ms),
            read_timeout: Duration::from_millis(self.read_timeout_ms),
            username: self.username.clone(),
            password: self.password.clone(),
            tls: self.tls,
            retry_budget: self.retry_budget,
            retry_backoff: Duration::from_millis(self.retry_backoff_ms),
            discovery_attempts: self.discovery_attempts.max(1),
            deadline: self.deadline_ms.map(Duration::from_millis),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    /// `text` or `json`
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "text".to_string(),
        }
    }
}

impl ClusterConfig {
    /// Configuration with the given node URLs and default options
    pub fn with_nodes<I, S>(urls: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            nodes: Value::Array(urls.into_iter().map(|u| Value::String(u.into())).collect()),
            options: OptionsConfig::default(),
            logging: LoggingConfig::default(),
        }
    }

    /// Load configuration from YAML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        Self::from_yaml_str(&content)
    }

    /// Parse configuration from YAML text
    pub fn from_yaml_str(content: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(content)?)
    }

    /// Read `SLOTROUTE_NODES` (comma separated URLs) and
    /// `SLOTROUTE_PASSWORD` from the process environment
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let nodes = lookup("SLOTROUTE_NODES")
            .ok_or_else(|| ClusterError::InvalidConfig("SLOTROUTE_NODES is not set".to_string()))?;
        let mut config = Self::with_nodes(
            nodes
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string),
        );
        config.options.password = lookup("SLOTROUTE_PASSWORD");
        Ok(config)
    }

    /// Validated node descriptors
    pub fn node_configs(&self) -> Result<Vec<NodeConfig>> {
        NodeConfig::list_from_value(&self.nodes)
    }

    /// Runtime client options
    pub fn client_options(&self) -> ClientOptions {
        self.options.to_client_options()
    }
}
