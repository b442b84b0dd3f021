//! Bounded polling for topology convergence.

use std::time::Duration;

use futures::future::BoxFuture;
use tokio::time::Instant;
use tracing::debug;

use super::TopologyError;
use super::observed::ClusterTopology;
use super::verify::{ExpectedTopology, verify};

/// Where and how to reach one cluster member.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeTarget {
    pub namespace: String,
    /// Name of the owning database object
    pub database: String,
    pub host: String,
    pub port: u16,
    pub tls: bool,
}

/// Source of topology snapshots.
pub trait TopologyProbe: Send + Sync {
    fn observe<'a>(
        &'a self,
        target: &'a ProbeTarget,
    ) -> BoxFuture<'a, Result<ClusterTopology, TopologyError>>;
}

#[derive(Debug, Clone)]
pub struct PollConfig {
    pub interval: Duration,
    pub timeout: Duration,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(2),
            timeout: Duration::from_secs(180),
        }
    }
}

/// Poll `probe` until the observed topology verifies against `expected`.
///
/// Probe failures and mismatches are both retried at `poll.interval`; after
/// `poll.timeout` the last reason is returned in `TopologyError::Timeout`.
pub async fn wait_for_topology(
    probe: &dyn TopologyProbe,
    target: &ProbeTarget,
    expected: &ExpectedTopology,
    poll: &PollConfig,
) -> Result<ClusterTopology, TopologyError> {
    let started = Instant::now();

    loop {
        let last = match probe.observe(target).await {
            Ok(observed) => match verify(expected, &observed) {
                Ok(()) => {
                    debug!(
                        database = %target.database,
                        elapsed = ?started.elapsed(),
                        "Cluster topology converged"
                    );
                    return Ok(observed);
                }
                Err(mismatch) => mismatch.to_string(),
            },
            Err(err) => err.to_string(),
        };

        let waited = started.elapsed();
        if waited + poll.interval > poll.timeout {
            return Err(TopologyError::Timeout { waited, last });
        }

        debug!(database = %target.database, reason = %last, "Topology not converged yet");
        tokio::time::sleep(poll.interval).await;
    }
}
