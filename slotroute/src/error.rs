//! Error types for slotroute

use thiserror::Error;

/// Result type alias for cluster client operations
pub type Result<T> = std::result::Result<T, ClusterError>;

/// Cluster client error types
#[derive(Error, Debug)]
pub enum ClusterError {
    /// Malformed node descriptor or options
    #[error("Invalid config: {0}")]
    InvalidConfig(String),

    /// Structured node descriptor without a required field
    #[error("Missing field in node config: {0}")]
    MissingField(String),

    /// No bootstrap node answered the topology query
    #[error("Cannot connect to any bootstrap node: {0}")]
    CannotConnect(String),

    /// The node registry is empty
    #[error("No nodes available")]
    NoNodesAvailable,

    /// Address is not present in the node registry
    #[error("Unknown node: {0}")]
    UnknownNode(String),

    /// Command name no node can recognize
    #[error("Unknown command: {0}")]
    UnknownCommand(String),

    /// Connection refused, reset or closed
    #[error("Connection error: {0}")]
    Connection(String),

    /// Connect or read timed out
    #[error("Timeout: {0}")]
    Timeout(String),

    /// Error reply sent by the server, message kept verbatim
    #[error("{0}")]
    Command(String),

    /// Reply could not be decoded or had an unexpected shape
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// I/O error outside of a node connection (config files)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// YAML configuration error
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

impl ClusterError {
    /// Connection-level failures are retried by the dispatcher
    pub fn is_connection_error(&self) -> bool {
        matches!(self, Self::Connection(_) | Self::Timeout(_))
    }

    /// True for `MOVED` and `ASK` error replies
    pub fn is_redirect(&self) -> bool {
        match self {
            Self::Command(msg) => msg.starts_with("MOVED") || msg.starts_with("ASK"),
            _ => false,
        }
    }

    /// Server message for command errors
    pub fn command_message(&self) -> Option<&str> {
        match self {
            Self::Command(msg) => Some(msg),
            _ => None,
        }
    }
}
