//! Dispatch & redirection engine
//!
//! Sends a command to a node and recovers from `MOVED`, `ASK` and
//! connection failures, bounded by a per-call retry budget.

use crate::error::{ClusterError, Result};
use crate::node::NodeAddress;
use crate::registry::NodeRegistry;
use crate::resp::Reply;
use crate::slot::{SlotId, TOTAL_SLOTS};
use crate::slot_map::SlotMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Type of redirect received from the cluster
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RedirectKind {
    /// Permanent slot reassignment; the slot map is corrected
    Moved,
    /// One-shot redirect during slot migration; needs `ASKING` first
    Ask,
}

/// A parsed `MOVED`/`ASK` reply
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Redirect {
    pub kind: RedirectKind,
    pub slot: SlotId,
    /// Target node. The host is empty when the server omitted it, meaning
    /// "same host as the node that replied".
    pub address: NodeAddress,
}

/// Parse `MOVED <slot> <host:port>` or `ASK <slot> <host:port>`
///
/// Returns `None` for other messages and for malformed redirects.
///
/// ```
/// use slotroute::dispatch::{parse_redirect, RedirectKind};
///
/// let redirect = parse_redirect("MOVED 3999 127.0.0.1:6381").unwrap();
/// assert_eq!(redirect.kind, RedirectKind::Moved);
/// assert_eq!(redirect.slot, 3999);
/// assert_eq!(redirect.address.to_string(), "127.0.0.1:6381");
/// ```
pub fn parse_redirect(msg: &str) -> Option<Redirect> {
    let mut parts = msg.split_whitespace();
    let kind = match parts.next()? {
        "MOVED" => RedirectKind::Moved,
        "ASK" => RedirectKind::Ask,
        _ => return None,
    };
    let slot: SlotId = parts.next()?.parse().ok().filter(|s| *s < TOTAL_SLOTS)?;
    let (host, port) = parts.next()?.rsplit_once(':')?;
    if parts.next().is_some() {
        return None;
    }
    let host = host.trim_start_matches('[').trim_end_matches(']');
    let port: u16 = port.parse().ok()?;

    Some(Redirect {
        kind,
        slot,
        address: NodeAddress::new(host, port),
    })
}

/// Classified result of one send
#[derive(Debug)]
pub enum Outcome {
    Success(Reply),
    /// Redirect plus the error reply that carried it
    Redirect(Redirect, ClusterError),
    /// Connection-level failure, retryable
    Transient(ClusterError),
    /// Anything else, returned to the caller unchanged
    Fatal(ClusterError),
}

/// Classify a node reply
pub fn classify(result: Result<Reply>) -> Outcome {
    match result {
        Ok(reply) => Outcome::Success(reply),
        Err(e) if e.is_connection_error() => Outcome::Transient(e),
        Err(e) => {
            let redirect = e.command_message().and_then(parse_redirect);
            match redirect {
                Some(redirect) => Outcome::Redirect(redirect, e),
                None => Outcome::Fatal(e),
            }
        }
    }
}

/// Executes commands against the cluster
pub struct Dispatcher {
    slot_map: Arc<SlotMap>,
    registry: Arc<NodeRegistry>,
    retry_budget: u32,
    backoff: Duration,
}

impl Dispatcher {
    pub fn new(
        slot_map: Arc<SlotMap>,
        registry: Arc<NodeRegistry>,
        retry_budget: u32,
        backoff: Duration,
    ) -> Self {
        Self {
            slot_map,
            registry,
            retry_budget,
            backoff,
        }
    }

    /// Send `command` to `address`, following redirects and retrying
    /// connection failures until the budget runs out
    pub async fn execute(
        &self,
        address: NodeAddress,
        command: &str,
        args: &[String],
    ) -> Result<Reply> {
        let mut address = address;
        let mut ttl = self.retry_budget;
        let mut asking = false;

        loop {
            let result = match self.registry.get_or_connect(&address) {
                Ok(node) if asking => node.send_asking(command, args).await,
                Ok(node) => node.send(command, args).await,
                Err(e) => Err(e),
            };
            asking = false;

            match classify(result) {
                Outcome::Success(reply) => return Ok(reply),
                Outcome::Fatal(e) => return Err(e),
                Outcome::Transient(e) => {
                    if ttl == 0 {
                        warn!(address = %address, error = %e, "Retry budget exhausted");
                        return Err(e);
                    }
                    ttl -= 1;
                    warn!(address = %address, ttl, error = %e, "Node unreachable, retrying");
                    tokio::time::sleep(self.backoff).await;
                    address = self.registry.random_address().unwrap_or(address);
                }
                Outcome::Redirect(mut redirect, e) => {
                    if redirect.address.host.is_empty() {
                        redirect.address.host = address.host.clone();
                    }
                    if redirect.kind == RedirectKind::Moved {
                        self.slot_map
                            .update(redirect.slot, redirect.address.clone());
                    }
                    if ttl == 0 {
                        warn!(slot = redirect.slot, "Retry budget exhausted while redirected");
                        return Err(e);
                    }
                    ttl -= 1;
                    debug!(
                        kind = ?redirect.kind,
                        slot = redirect.slot,
                        from = %address,
                        to = %redirect.address,
                        ttl,
                        "Following redirect"
                    );
                    asking = redirect.kind == RedirectKind::Ask;
                    address = redirect.address;
                }
            }
        }
    }
}
