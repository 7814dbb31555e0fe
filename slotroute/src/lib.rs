//! # slotroute
//!
//! Cluster-aware routing client for Redis-Cluster-compatible stores.
//!
//! ## Features
//!
//! - 🧭 **Slot Routing**: CRC16 hash slots with `{hash tag}` support
//! - 🔎 **Topology Discovery**: bootstraps from any reachable node via `CLUSTER SLOTS`
//! - ↪️ **Redirections**: `MOVED` corrects the slot map, `ASK` follows migrations
//! - 🔁 **Bounded Retries**: connection failures retried within a fixed budget
//! - 🔄 **Async/Await**: Built on Tokio, safe to share across tasks
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use slotroute::{ClientOptions, ClusterClient, NodeConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let nodes = vec![
//!         NodeConfig::url("redis://127.0.0.1:7000"),
//!         NodeConfig::host_port("127.0.0.1", 7001),
//!     ];
//!     let client = ClusterClient::connect(&nodes, ClientOptions::default()).await?;
//!
//!     client.set("{user1000}.name", "John Doe").await?;
//!     let value = client.get("{user1000}.name").await?;
//!     println!("Value: {:?}", value);
//!
//!     Ok(())
//! }
//! ```

pub mod client;
pub mod config;
pub mod connection;
pub mod discovery;
pub mod dispatch;
pub mod error;
pub mod node;
pub mod parsers;
pub mod registry;
pub mod resp;
pub mod router;
pub mod slot;
pub mod slot_map;

pub use client::{ClusterClient, ClusterReply};
pub use config::{ClientOptions, ClusterConfig, Credentials, NodeConfig};
pub use connection::{TcpConnector, TcpNodeClient};
pub use discovery::{Topology, TopologyDiscoverer};
pub use dispatch::{Dispatcher, Outcome, Redirect, RedirectKind, classify, parse_redirect};
pub use error::{ClusterError, Result};
pub use node::{NodeAddress, NodeClient, NodeConnector};
pub use parsers::{NodeEndpoint, NodeRecord, SlotInfo};
pub use registry::NodeRegistry;
pub use resp::Reply;
pub use router::Router;
pub use slot::{SlotId, TOTAL_SLOTS, extract_hash_tag, key_slot};
pub use slot_map::SlotMap;
