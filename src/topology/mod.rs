//! Hash-slot topology: expected partitioning and convergence checks.
//!
//! This module is pure apart from [`probe`], which polls an external
//! [`TopologyProbe`] and never talks to the cluster itself.
//!
//! ## Module Structure
//!
//! - [`distribution`]: slot ranges and the expected partition for `M` masters
//! - [`observed`]: topology snapshots parsed from `CLUSTER SLOTS` / `CLUSTER NODES`
//! - [`verify`]: comparison of expected and observed topology
//! - [`probe`]: bounded polling until the cluster converges

pub mod distribution;
pub mod observed;
pub mod probe;
pub mod verify;

pub use distribution::{SlotRange, TOTAL_SLOTS, check_coverage, expected_partition, slot_owner};
pub use observed::{ClusterNode, ClusterTopology, NodeRole, SlotEntry, SlotNode, known_nodes};
pub use probe::{PollConfig, ProbeTarget, TopologyProbe, wait_for_topology};
pub use verify::{ExpectedTopology, TopologyMismatch, verify};

use std::time::Duration;

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TopologyError {
    #[error("invalid master count {0}: must be between 1 and {TOTAL_SLOTS}")]
    InvalidMasterCount(u32),

    #[error("topology mismatch: {0}")]
    Mismatch(#[from] TopologyMismatch),

    #[error("failed to parse cluster reply: {0}")]
    Parse(String),

    #[error("failed to observe cluster: {0}")]
    Probe(String),

    #[error("cluster did not converge within {waited:?}; last observation: {last}")]
    Timeout { waited: Duration, last: String },
}
