//! Node addresses and the node client capability
//!
//! The routing core only talks to nodes through [`NodeClient`] and creates
//! them through a [`NodeConnector`], so the wire protocol stays swappable.

use crate::config::ClientOptions;
use crate::error::{ClusterError, Result};
use crate::resp::Reply;
use async_trait::async_trait;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

/// Network address of a cluster node
///
/// The `host:port` form produced by `Display` is the node's identity key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeAddress {
    pub host: String,
    pub port: u16,
}

impl NodeAddress {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }
}

impl fmt::Display for NodeAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.host.contains(':') {
            write!(f, "[{}]:{}", self.host, self.port)
        } else {
            write!(f, "{}:{}", self.host, self.port)
        }
    }
}

impl FromStr for NodeAddress {
    type Err = ClusterError;

    /// Parse `host:port`, `[v6]:port` or a bare `v6:port`
    fn from_str(s: &str) -> Result<Self> {
        let (host, port) = s
            .rsplit_once(':')
            .ok_or_else(|| ClusterError::InvalidConfig(format!("missing port in '{}'", s)))?;
        let host = host.trim_start_matches('[').trim_end_matches(']');
        if host.is_empty() {
            return Err(ClusterError::InvalidConfig(format!(
                "missing host in '{}'",
                s
            )));
        }
        let port = port
            .parse::<u16>()
            .map_err(|e| ClusterError::InvalidConfig(format!("invalid port in '{}': {}", s, e)))?;
        Ok(Self::new(host, port))
    }
}

/// Connection capability of a single node
///
/// Implementations serialize access to their own connection. Error replies
/// must surface as [`ClusterError::Command`] with the server message intact,
/// transport failures as [`ClusterError::Connection`] or
/// [`ClusterError::Timeout`].
#[async_trait]
pub trait NodeClient: Send + Sync {
    /// Address this client talks to
    fn address(&self) -> &NodeAddress;

    /// Send `command` followed by `args`
    async fn send(&self, command: &str, args: &[String]) -> Result<Reply>;

    /// Send a raw token list
    async fn send_raw(&self, tokens: &[String]) -> Result<Reply>;

    /// Send `ASKING` and then the command, back to back
    ///
    /// A failed `ASKING` is reported as a connection error.
    async fn send_asking(&self, command: &str, args: &[String]) -> Result<Reply> {
        match self.send_raw(&["ASKING".to_string()]).await {
            Ok(_) => {}
            Err(ClusterError::Command(msg)) => {
                return Err(ClusterError::Connection(format!(
                    "ASKING rejected by {}: {}",
                    self.address(),
                    msg
                )));
            }
            Err(e) => return Err(e),
        }
        self.send(command, args).await
    }
}

/// Factory for node clients
pub trait NodeConnector: Send + Sync {
    /// Create a client for `address`. Connecting may be deferred to the
    /// first request.
    fn connect(&self, address: &NodeAddress, options: &ClientOptions)
    -> Result<Arc<dyn NodeClient>>;
}
