//! Key/Command Router
//!
//! Maps a command to the slot of its key and the slot to a node address.

use crate::error::Result;
use crate::node::NodeAddress;
use crate::registry::NodeRegistry;
use crate::slot::{SlotId, key_slot};
use crate::slot_map::SlotMap;
use std::sync::Arc;

/// Commands that carry no routable key; they go to any live node
pub const KEYLESS_COMMANDS: &[&str] = &[
    "asking",
    "auth",
    "bgrewriteaof",
    "bgsave",
    "client",
    "cluster",
    "command",
    "config",
    "dbsize",
    "debug",
    "discard",
    "echo",
    "exec",
    "flushall",
    "flushdb",
    "hello",
    "info",
    "lastsave",
    "monitor",
    "multi",
    "ping",
    "quit",
    "randomkey",
    "readonly",
    "readwrite",
    "replicaof",
    "role",
    "save",
    "script",
    "select",
    "shutdown",
    "slaveof",
    "slowlog",
    "time",
    "wait",
];

/// Whether `command` is routed without a key (case-insensitive)
pub fn is_keyless(command: &str) -> bool {
    KEYLESS_COMMANDS
        .iter()
        .any(|name| name.eq_ignore_ascii_case(command))
}

/// Routes commands to node addresses
#[derive(Clone)]
pub struct Router {
    slot_map: Arc<SlotMap>,
    registry: Arc<NodeRegistry>,
}

impl Router {
    pub fn new(slot_map: Arc<SlotMap>, registry: Arc<NodeRegistry>) -> Self {
        Self { slot_map, registry }
    }

    /// Slot of the command's key, `None` for keyless commands
    ///
    /// ```
    /// use slotroute::router::Router;
    ///
    /// assert_eq!(Router::route("GET", &["foo".to_string()]), Some(12182));
    /// assert_eq!(Router::route("INFO", &["cluster".to_string()]), None);
    /// ```
    pub fn route(command: &str, args: &[String]) -> Option<SlotId> {
        if is_keyless(command) {
            return None;
        }
        args.first().map(|key| key_slot(key))
    }

    /// Owner of `slot`, or a random live node when unknown
    pub fn node_for(&self, slot: Option<SlotId>) -> Result<NodeAddress> {
        match slot.and_then(|slot| self.slot_map.owner(slot)) {
            Some(address) => Ok(address),
            None => self.registry.random_address(),
        }
    }

    /// Target node for a command
    pub fn target(&self, command: &str, args: &[String]) -> Result<NodeAddress> {
        self.node_for(Self::route(command, args))
    }
}
