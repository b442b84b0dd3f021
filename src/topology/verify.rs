//! Comparison of the declared topology with what the cluster reports.

use std::collections::BTreeSet;

use thiserror::Error;

use super::TopologyError;
use super::distribution::{SlotRange, check_coverage, expected_partition};
use super::observed::ClusterTopology;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TopologyMismatch {
    #[error("slot {slot} is not served by any master")]
    Gap { slot: u16 },

    #[error("slot {slot} is served by more than one master")]
    Overlap { slot: u16 },

    #[error("master ranges {observed:?} differ from expected {expected:?}")]
    RangesDiffer {
        expected: Vec<SlotRange>,
        observed: Vec<SlotRange>,
    },

    #[error("range {range} has {found} replicas, expected {expected}")]
    ReplicaCount {
        range: SlotRange,
        expected: u32,
        found: u32,
    },

    #[error("replica {node} owns slots")]
    ReplicaOwnsSlots { node: String },

    #[error("cluster knows {found} nodes, expected {expected}")]
    NodeCount { expected: u32, found: u32 },

    #[error("CLUSTER SLOTS and CLUSTER NODES disagree on the master of {range}")]
    ViewsDisagree { range: SlotRange },
}

/// Topology the cluster should converge to
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExpectedTopology {
    pub masters: u32,
    pub replicas_per_master: u32,
    pub ranges: Vec<SlotRange>,
}

impl ExpectedTopology {
    pub fn new(masters: u32, replicas_per_master: u32) -> Result<Self, TopologyError> {
        Ok(Self {
            masters,
            replicas_per_master,
            ranges: expected_partition(masters)?,
        })
    }

    /// Every master plus its replicas.
    pub fn total_nodes(&self) -> u32 {
        self.masters * (self.replicas_per_master + 1)
    }
}

/// Check that `observed` has converged to `expected`.
///
/// Master ranges compare as a set of `(start, end)` pairs. Every master range
/// must be followed by exactly `replicas_per_master` replicas, and replicas
/// never own slots.
pub fn verify(
    expected: &ExpectedTopology,
    observed: &ClusterTopology,
) -> Result<(), TopologyMismatch> {
    let observed_ranges = observed.master_ranges();
    let expected_set: BTreeSet<SlotRange> = expected.ranges.iter().copied().collect();
    let observed_set: BTreeSet<SlotRange> = observed_ranges.iter().copied().collect();

    if expected_set != observed_set {
        check_coverage(&observed_ranges)?;
        return Err(TopologyMismatch::RangesDiffer {
            expected: expected_set.into_iter().collect(),
            observed: observed_set.into_iter().collect(),
        });
    }

    if let Some(replica) = observed.replicas().find(|r| !r.slots.is_empty()) {
        return Err(TopologyMismatch::ReplicaOwnsSlots {
            node: replica.id.clone(),
        });
    }

    for master in observed.masters() {
        let Some(range) = master.slots.first() else {
            continue;
        };
        let found = observed.replicas_of(&master.id).count() as u32;
        if found != expected.replicas_per_master {
            return Err(TopologyMismatch::ReplicaCount {
                range: *range,
                expected: expected.replicas_per_master,
                found,
            });
        }
    }

    let found = observed.node_count();
    if found != expected.total_nodes() {
        return Err(TopologyMismatch::NodeCount {
            expected: expected.total_nodes(),
            found,
        });
    }

    Ok(())
}
