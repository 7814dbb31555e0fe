//! Topology reply parsers
//!
//! Pure decoders for `CLUSTER SLOTS`, `CLUSTER NODES`, `CLUSTER SLAVES` and
//! `CLUSTER INFO` replies.

use crate::error::{ClusterError, Result};
use crate::node::NodeAddress;
use crate::resp::Reply;
use crate::slot::{SlotId, TOTAL_SLOTS};
use serde::Serialize;
use std::collections::HashMap;
use std::ops::RangeInclusive;

/// A node as listed in a `CLUSTER SLOTS` entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NodeEndpoint {
    pub ip: String,
    pub port: u16,
    pub id: Option<String>,
}

impl NodeEndpoint {
    pub fn address(&self) -> NodeAddress {
        NodeAddress::new(self.ip.clone(), self.port)
    }
}

/// One slot range of a `CLUSTER SLOTS` reply
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SlotInfo {
    pub start: SlotId,
    pub end: SlotId,
    pub master: NodeEndpoint,
    pub replicas: Vec<NodeEndpoint>,
}

impl SlotInfo {
    pub fn range(&self) -> RangeInclusive<SlotId> {
        self.start..=self.end
    }

    /// Number of slots in range
    pub fn count(&self) -> usize {
        (self.end - self.start) as usize + 1
    }
}

/// One line of `CLUSTER NODES` (or `CLUSTER SLAVES`)
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NodeRecord {
    pub node_id: String,
    /// Raw `ip:port@cport[,hostname]` field
    pub address: String,
    pub flags: Vec<String>,
    /// `None` for masters (`-`)
    pub master_node_id: Option<String>,
    pub ping_sent: u64,
    pub pong_recv: u64,
    pub config_epoch: u64,
    pub link_state: String,
    /// First owned range, if any
    pub slot_range: Option<RangeInclusive<SlotId>>,
    /// Every owned range
    pub slot_ranges: Vec<RangeInclusive<SlotId>>,
}

impl NodeRecord {
    /// Client address without the bus port and hostname suffixes
    pub fn node_address(&self) -> Result<NodeAddress> {
        let addr = self.address.split(',').next().unwrap_or_default();
        let addr = addr.split('@').next().unwrap_or_default();
        addr.parse()
            .map_err(|_| ClusterError::Protocol(format!("invalid node address '{}'", self.address)))
    }

    pub fn is_master(&self) -> bool {
        self.flags.iter().any(|f| f == "master")
    }

    pub fn has_flag(&self, flag: &str) -> bool {
        self.flags.iter().any(|f| f == flag)
    }
}

/// Decode a `CLUSTER SLOTS` reply, keeping reply order
pub fn parse_slots(reply: &Reply) -> Result<Vec<SlotInfo>> {
    let entries = reply.as_array().ok_or_else(|| {
        ClusterError::Protocol(format!("CLUSTER SLOTS: expected array, got {:?}", reply))
    })?;

    entries.iter().map(parse_slot_entry).collect()
}

fn parse_slot_entry(entry: &Reply) -> Result<SlotInfo> {
    let fields = entry
        .as_array()
        .ok_or_else(|| ClusterError::Protocol("CLUSTER SLOTS: entry is not an array".into()))?;
    if fields.len() < 3 {
        return Err(ClusterError::Protocol(
            "CLUSTER SLOTS: entry too short".into(),
        ));
    }

    let start = slot_number(&fields[0])?;
    let end = slot_number(&fields[1])?;
    if start > end {
        return Err(ClusterError::Protocol(format!(
            "CLUSTER SLOTS: invalid range {}-{}",
            start, end
        )));
    }

    let master = parse_endpoint(&fields[2])?;
    let replicas = fields[3..]
        .iter()
        .map(parse_endpoint)
        .collect::<Result<Vec<_>>>()?;

    Ok(SlotInfo {
        start,
        end,
        master,
        replicas,
    })
}

fn slot_number(value: &Reply) -> Result<SlotId> {
    value
        .as_int()
        .and_then(|n| SlotId::try_from(n).ok())
        .filter(|n| *n < TOTAL_SLOTS)
        .ok_or_else(|| ClusterError::Protocol(format!("CLUSTER SLOTS: invalid slot {:?}", value)))
}

fn parse_endpoint(value: &Reply) -> Result<NodeEndpoint> {
    let fields = value
        .as_array()
        .filter(|f| f.len() >= 2)
        .ok_or_else(|| ClusterError::Protocol("CLUSTER SLOTS: invalid node entry".into()))?;

    let ip = fields[0]
        .as_str()
        .ok_or_else(|| ClusterError::Protocol("CLUSTER SLOTS: invalid node ip".into()))?
        .to_string();
    let port = fields[1]
        .as_int()
        .and_then(|p| u16::try_from(p).ok())
        .ok_or_else(|| ClusterError::Protocol("CLUSTER SLOTS: invalid node port".into()))?;
    let id = fields.get(2).and_then(Reply::as_str).map(str::to_string);

    Ok(NodeEndpoint { ip, port, id })
}

/// Decode the text of a `CLUSTER NODES` reply, one record per line
pub fn parse_nodes(text: &str) -> Result<Vec<NodeRecord>> {
    text.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(parse_node_line)
        .collect()
}

/// Decode a `CLUSTER SLAVES` reply: an array of node lines
pub fn parse_slaves(reply: &Reply) -> Result<Vec<NodeRecord>> {
    let lines = reply.as_array().ok_or_else(|| {
        ClusterError::Protocol(format!("CLUSTER SLAVES: expected array, got {:?}", reply))
    })?;

    lines
        .iter()
        .map(|line| {
            line.as_str()
                .ok_or_else(|| ClusterError::Protocol("CLUSTER SLAVES: expected string".into()))
                .and_then(|line| parse_node_line(line.trim()))
        })
        .collect()
}

fn parse_node_line(line: &str) -> Result<NodeRecord> {
    let fields: Vec<&str> = line.split_whitespace().collect();
    if fields.len() < 8 {
        return Err(ClusterError::Protocol(format!(
            "CLUSTER NODES: expected at least 8 fields in '{}'",
            line
        )));
    }

    let slot_ranges = fields[8..]
        .iter()
        .filter(|token| !token.starts_with('['))
        .map(|token| parse_slot_token(token))
        .collect::<Result<Vec<_>>>()?;

    Ok(NodeRecord {
        node_id: fields[0].to_string(),
        address: fields[1].to_string(),
        flags: fields[2].split(',').map(str::to_string).collect(),
        master_node_id: match fields[3] {
            "-" => None,
            id => Some(id.to_string()),
        },
        ping_sent: counter(fields[4], "ping_sent")?,
        pong_recv: counter(fields[5], "pong_recv")?,
        config_epoch: counter(fields[6], "config_epoch")?,
        link_state: fields[7].to_string(),
        slot_range: slot_ranges.first().cloned(),
        slot_ranges,
    })
}

fn counter(token: &str, name: &str) -> Result<u64> {
    token
        .parse()
        .map_err(|_| ClusterError::Protocol(format!("CLUSTER NODES: invalid {} '{}'", name, token)))
}

/// `start-end` or a single slot
fn parse_slot_token(token: &str) -> Result<RangeInclusive<SlotId>> {
    let invalid =
        || ClusterError::Protocol(format!("CLUSTER NODES: invalid slot range '{}'", token));
    let (start, end) = match token.split_once('-') {
        Some((start, end)) => (start, end),
        None => (token, token),
    };
    let start: SlotId = start.parse().map_err(|_| invalid())?;
    let end: SlotId = end.parse().map_err(|_| invalid())?;
    if start > end || end >= TOTAL_SLOTS {
        return Err(invalid());
    }
    Ok(start..=end)
}

/// Decode `key:value` lines, skipping blanks and `#` section headers
pub fn parse_info(text: &str) -> HashMap<String, String> {
    text.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .filter_map(|line| line.split_once(':'))
        .map(|(key, value)| (key.to_string(), value.to_string()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node(ip: &str, port: i64, id: &str) -> Reply {
        Reply::Array(Some(vec![
            Reply::bulk(ip),
            Reply::Integer(port),
            Reply::bulk(id),
        ]))
    }

    fn slots_reply() -> Reply {
        Reply::Array(Some(vec![
            Reply::Array(Some(vec![
                Reply::Integer(0),
                Reply::Integer(5460),
                node("127.0.0.1", 30001, "09dbe9720cda62f7865eabc5fd8857c5d2678366"),
                node("127.0.0.1", 30004, "821d8ca00d7ccf931ed3ffc7e3db0599d2271abf"),
            ])),
            Reply::Array(Some(vec![
                Reply::Integer(5461),
                Reply::Integer(16383),
                node("127.0.0.1", 30002, "c9d93d9f2c0c524ff34cc11838c2003d8c29e013"),
            ])),
        ]))
    }

    #[test]
    fn test_parse_slots() {
        let slots = parse_slots(&slots_reply()).unwrap();
        assert_eq!(slots.len(), 2);

        assert_eq!(slots[0].range(), 0..=5460);
        assert_eq!(slots[0].master.address(), NodeAddress::new("127.0.0.1", 30001));
        assert_eq!(
            slots[0].master.id.as_deref(),
            Some("09dbe9720cda62f7865eabc5fd8857c5d2678366")
        );
        assert_eq!(slots[0].replicas.len(), 1);
        assert_eq!(slots[0].replicas[0].port, 30004);

        assert_eq!(slots[1].start, 5461);
        assert!(slots[1].replicas.is_empty());
        assert_eq!(slots.iter().map(SlotInfo::count).sum::<usize>(), 16384);
    }

    #[test]
    fn test_parse_slots_without_node_ids() {
        let reply = Reply::Array(Some(vec![Reply::Array(Some(vec![
            Reply::Integer(0),
            Reply::Integer(16383),
            Reply::Array(Some(vec![Reply::bulk("10.0.0.1"), Reply::Integer(7000)])),
        ]))]));
        let slots = parse_slots(&reply).unwrap();
        assert_eq!(slots[0].master.id, None);
    }

    #[test]
    fn test_parse_slots_rejects_bad_ranges() {
        let reversed = Reply::Array(Some(vec![Reply::Array(Some(vec![
            Reply::Integer(10),
            Reply::Integer(5),
            node("127.0.0.1", 7000, "a"),
        ]))]));
        assert!(parse_slots(&reversed).is_err());

        let overflow = Reply::Array(Some(vec![Reply::Array(Some(vec![
            Reply::Integer(0),
            Reply::Integer(16384),
            node("127.0.0.1", 7000, "a"),
        ]))]));
        assert!(parse_slots(&overflow).is_err());

        assert!(parse_slots(&Reply::Status("OK".into())).is_err());
    }

    const NODES: &str = "\
07c37dfeb235213a872192d90877d0cd55635b91 127.0.0.1:30004@31004 slave e7d1eecce10fd6bb5eb35b9f99a514335d9ba9ca 0 1426238317239 4 connected
67ed2db8d677e59ec4a4cefb06858cf2a1a89fa1 127.0.0.1:30002@31002 master - 0 1426238316232 2 connected 5461-10922
292f8b365bb7edb5e285caf0b7e6ddc7265d2f4f 127.0.0.1:30003@31003 master - 0 1426238318243 3 connected 10923-16383
e7d1eecce10fd6bb5eb35b9f99a514335d9ba9ca 127.0.0.1:30001@31001,node-1.example myself,master - 0 0 1 connected 0-5460 [5461->-67ed2db8d677e59ec4a4cefb06858cf2a1a89fa1]
";

    #[test]
    fn test_parse_nodes() {
        let nodes = parse_nodes(NODES).unwrap();
        assert_eq!(nodes.len(), 4);

        let replica = &nodes[0];
        assert_eq!(replica.flags, vec!["slave"]);
        assert_eq!(
            replica.master_node_id.as_deref(),
            Some("e7d1eecce10fd6bb5eb35b9f99a514335d9ba9ca")
        );
        assert_eq!(replica.pong_recv, 1426238317239);
        assert_eq!(replica.config_epoch, 4);
        assert_eq!(replica.slot_range, None);
        assert!(!replica.is_master());

        let master = &nodes[1];
        assert!(master.is_master());
        assert_eq!(master.master_node_id, None);
        assert_eq!(master.link_state, "connected");
        assert_eq!(master.slot_range, Some(5461..=10922));
        assert_eq!(
            master.node_address().unwrap(),
            NodeAddress::new("127.0.0.1", 30002)
        );

        let myself = &nodes[3];
        assert!(myself.has_flag("myself"));
        assert_eq!(myself.slot_ranges, vec![0..=5460]);
        assert_eq!(
            myself.node_address().unwrap(),
            NodeAddress::new("127.0.0.1", 30001)
        );
    }

    #[test]
    fn test_parse_nodes_single_slot_and_many_ranges() {
        let line = "abc 10.0.0.1:7000@17000 master - 0 0 7 connected 0-10 42 100-200";
        let nodes = parse_nodes(line).unwrap();
        assert_eq!(nodes[0].slot_ranges, vec![0..=10, 42..=42, 100..=200]);
        assert_eq!(nodes[0].slot_range, Some(0..=10));
    }

    #[test]
    fn test_parse_nodes_rejects_short_lines() {
        assert!(parse_nodes("abc 10.0.0.1:7000 master -").is_err());
        assert!(parse_nodes("abc 10.0.0.1:7000 master - x 0 1 connected").is_err());
        assert!(parse_nodes("").unwrap().is_empty());
    }

    #[test]
    fn test_parse_slaves() {
        let reply = Reply::Array(Some(vec![Reply::bulk(
            "07c37dfeb235213a872192d90877d0cd55635b91 127.0.0.1:30004@31004 slave e7d1eecce10fd6bb5eb35b9f99a514335d9ba9ca 0 1426238317239 4 connected",
        )]));
        let slaves = parse_slaves(&reply).unwrap();
        assert_eq!(slaves.len(), 1);
        assert!(slaves[0].has_flag("slave"));
        assert_eq!(slaves[0].node_address().unwrap().port, 30004);

        assert!(parse_slaves(&Reply::Integer(1)).is_err());
    }

    #[test]
    fn test_parse_info() {
        let info = parse_info(
            "cluster_state:ok\r\ncluster_slots_assigned:16384\r\n\r\n# Stats\r\nmaster_host:fe80::1\r\n",
        );
        assert_eq!(info.get("cluster_state").map(String::as_str), Some("ok"));
        assert_eq!(
            info.get("cluster_slots_assigned").map(String::as_str),
            Some("16384")
        );
        assert_eq!(info.get("master_host").map(String::as_str), Some("fe80::1"));
        assert_eq!(info.len(), 3);
    }
}
