//! Observed cluster topology, parsed from the cluster's own replies.

use std::collections::BTreeMap;

use super::TopologyError;
use super::distribution::SlotRange;
use super::verify::TopologyMismatch;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeRole {
    Master,
    Replica,
}

/// One member of the cluster as seen by a single node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClusterNode {
    pub id: String,
    pub addr: String,
    pub role: NodeRole,
    /// For replicas, the id of the master they follow
    pub master_id: Option<String>,
    pub slots: Vec<SlotRange>,
}

/// A node listed in one `CLUSTER SLOTS` entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlotNode {
    pub host: String,
    pub port: u16,
    pub id: Option<String>,
}

impl SlotNode {
    fn key(&self) -> String {
        self.id
            .clone()
            .unwrap_or_else(|| format!("{}:{}", self.host, self.port))
    }
}

/// One `CLUSTER SLOTS` entry: a range, its master, then its replicas.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlotEntry {
    pub range: SlotRange,
    pub master: SlotNode,
    pub replicas: Vec<SlotNode>,
}

/// Snapshot of the cluster's membership and slot ownership
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClusterTopology {
    pub nodes: Vec<ClusterNode>,
    /// `cluster_known_nodes` from `CLUSTER INFO`, when collected
    pub known_nodes: Option<u32>,
}

impl ClusterTopology {
    /// Build from `CLUSTER SLOTS` entries.
    ///
    /// Nodes that serve no slots (and replicas of such masters) do not appear
    /// in this reply.
    pub fn from_slots(entries: &[SlotEntry]) -> Self {
        let mut by_key: BTreeMap<String, ClusterNode> = BTreeMap::new();

        for entry in entries {
            let master_key = entry.master.key();
            by_key
                .entry(master_key.clone())
                .or_insert_with(|| ClusterNode {
                    id: master_key.clone(),
                    addr: format!("{}:{}", entry.master.host, entry.master.port),
                    role: NodeRole::Master,
                    master_id: None,
                    slots: Vec::new(),
                })
                .slots
                .push(entry.range);

            for replica in &entry.replicas {
                let key = replica.key();
                by_key.entry(key.clone()).or_insert_with(|| ClusterNode {
                    id: key,
                    addr: format!("{}:{}", replica.host, replica.port),
                    role: NodeRole::Replica,
                    master_id: Some(master_key.clone()),
                    slots: Vec::new(),
                });
            }
        }

        Self {
            nodes: by_key.into_values().collect(),
            known_nodes: None,
        }
    }

    /// Build from the `CLUSTER NODES` table.
    ///
    /// Each line reads
    /// `<id> <ip:port@cport> <flags> <master> <ping> <pong> <epoch> <link> <slot>...`.
    /// Nodes still in handshake are skipped, as are migrating/importing
    /// markers (`[slot->-id]`).
    pub fn from_nodes(table: &str) -> Result<Self, TopologyError> {
        let mut nodes = Vec::new();

        for line in table.lines().map(str::trim).filter(|l| !l.is_empty()) {
            let fields: Vec<&str> = line.split_whitespace().collect();
            if fields.len() < 8 {
                return Err(TopologyError::Parse(format!("short CLUSTER NODES line: {:?}", line)));
            }

            let flags: Vec<&str> = fields[2].split(',').collect();
            if flags.iter().any(|f| *f == "handshake" || *f == "noaddr") {
                continue;
            }
            let role = if flags.contains(&"master") {
                NodeRole::Master
            } else if flags.iter().any(|f| *f == "slave" || *f == "replica") {
                NodeRole::Replica
            } else {
                return Err(TopologyError::Parse(format!("node without role: {:?}", line)));
            };

            let addr = fields[1]
                .split(['@', ','])
                .next()
                .unwrap_or_default()
                .to_string();
            let master_id = match fields[3] {
                "-" => None,
                id => Some(id.to_string()),
            };
            let slots = fields[8..]
                .iter()
                .filter(|s| !s.starts_with('['))
                .map(|s| s.parse::<SlotRange>())
                .collect::<Result<Vec<_>, _>>()?;

            nodes.push(ClusterNode {
                id: fields[0].to_string(),
                addr,
                role,
                master_id,
                slots,
            });
        }

        Ok(Self {
            nodes,
            known_nodes: None,
        })
    }

    pub fn with_known_nodes(mut self, known: Option<u32>) -> Self {
        self.known_nodes = known;
        self
    }

    pub fn masters(&self) -> impl Iterator<Item = &ClusterNode> {
        self.nodes.iter().filter(|n| n.role == NodeRole::Master)
    }

    pub fn replicas(&self) -> impl Iterator<Item = &ClusterNode> {
        self.nodes.iter().filter(|n| n.role == NodeRole::Replica)
    }

    /// Replicas following the master with `master_id`.
    pub fn replicas_of<'a>(&'a self, master_id: &'a str) -> impl Iterator<Item = &'a ClusterNode> {
        self.replicas()
            .filter(move |n| n.master_id.as_deref() == Some(master_id))
    }

    /// All ranges served by masters, sorted.
    pub fn master_ranges(&self) -> Vec<SlotRange> {
        let mut ranges: Vec<SlotRange> = self
            .masters()
            .flat_map(|m| m.slots.iter().copied())
            .collect();
        ranges.sort();
        ranges
    }

    /// Address of the master serving each range.
    pub fn range_owners(&self) -> BTreeMap<SlotRange, &str> {
        self.masters()
            .flat_map(|m| m.slots.iter().map(move |range| (*range, m.addr.as_str())))
            .collect()
    }

    /// Check that a `CLUSTER SLOTS` reply assigns every range to the same
    /// master as this snapshot.
    ///
    /// The two replies are separate round trips, so a failover or slot move
    /// between them shows up here.
    pub fn check_slots_view(&self, entries: &[SlotEntry]) -> Result<(), TopologyMismatch> {
        let from_slots = ClusterTopology::from_slots(entries);
        let ours = self.range_owners();
        let theirs = from_slots.range_owners();

        let differing = ours
            .keys()
            .chain(theirs.keys())
            .find(|range| ours.get(*range) != theirs.get(*range));
        match differing {
            Some(range) => Err(TopologyMismatch::ViewsDisagree { range: *range }),
            None => Ok(()),
        }
    }

    /// Node count: the `CLUSTER INFO` figure when known, else the nodes listed.
    pub fn node_count(&self) -> u32 {
        self.known_nodes.unwrap_or(self.nodes.len() as u32)
    }
}

/// Extract `cluster_known_nodes` from a `CLUSTER INFO` reply.
pub fn known_nodes(info: &str) -> Option<u32> {
    info.lines()
        .filter_map(|line| line.trim().split_once(':'))
        .find(|(key, _)| *key == "cluster_known_nodes")
        .and_then(|(_, value)| value.trim().parse().ok())
}
