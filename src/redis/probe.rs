use std::time::Duration;

use futures::FutureExt;
use futures::future::BoxFuture;
use k8s_openapi::api::core::v1::Secret;

use super::client::{RedisClientResult, RedisConnection, TlsMode, fetch_tls_material};
use crate::store::ResourceStore;
use crate::topology::{
    ClusterTopology, ProbeTarget, SlotEntry, TopologyError, TopologyProbe, known_nodes,
};

/// Raw replies gathered from one member
struct Snapshot {
    info: String,
    nodes: String,
    slots: Vec<SlotEntry>,
}

/// Observes a live cluster with `CLUSTER INFO`, `CLUSTER NODES` and
/// `CLUSTER SLOTS`.
///
/// Membership and roles come from `CLUSTER NODES`; the range owners it
/// reports must match `CLUSTER SLOTS` or the observation is rejected.
pub struct RespTopologyProbe {
    secrets: ResourceStore<Secret>,
    connect_timeout: Duration,
}

impl RespTopologyProbe {
    pub fn new(secrets: ResourceStore<Secret>, connect_timeout: Duration) -> Self {
        Self {
            secrets,
            connect_timeout,
        }
    }

    async fn snapshot(&self, target: &ProbeTarget) -> RedisClientResult<Snapshot> {
        let tls = if target.tls {
            fetch_tls_material(&self.secrets, &target.namespace, &target.database).await?
        } else {
            TlsMode::Disabled
        };

        let mut conn =
            RedisConnection::connect(&target.host, target.port, &tls, self.connect_timeout).await?;
        let info = conn.cluster_info().await?;
        let nodes = conn.cluster_nodes().await?;
        let slots = conn.cluster_slots().await?;
        Ok(Snapshot { info, nodes, slots })
    }
}

/// Build the topology from one member's replies.
fn topology_from(snapshot: &Snapshot) -> Result<ClusterTopology, TopologyError> {
    let topology = ClusterTopology::from_nodes(&snapshot.nodes)?;
    topology.check_slots_view(&snapshot.slots)?;
    Ok(topology.with_known_nodes(known_nodes(&snapshot.info)))
}

impl TopologyProbe for RespTopologyProbe {
    fn observe<'a>(
        &'a self,
        target: &'a ProbeTarget,
    ) -> BoxFuture<'a, Result<ClusterTopology, TopologyError>> {
        async move {
            let snapshot = self
                .snapshot(target)
                .await
                .map_err(|e| TopologyError::Probe(e.to_string()))?;
            topology_from(&snapshot)
        }
        .boxed()
    }
}
