//! Unit tests for slot partitioning, topology verification and polling

use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

use futures::FutureExt;
use futures::future::BoxFuture;

use redis_operator::topology::{
    ClusterTopology, ExpectedTopology, PollConfig, ProbeTarget, SlotRange, TOTAL_SLOTS,
    TopologyError, TopologyMismatch, TopologyProbe, check_coverage, expected_partition, verify,
    wait_for_topology,
};

use crate::common::{FakeProbe, converged_topology};

fn target() -> ProbeTarget {
    ProbeTarget {
        namespace: "default".to_string(),
        database: "cache".to_string(),
        host: "cache-shard0-0.kubedb.default.svc".to_string(),
        port: 6379,
        tls: false,
    }
}

mod partition_tests {
    use super::*;

    #[test]
    fn test_three_masters_match_cluster_create() {
        let ranges: Vec<String> = expected_partition(3)
            .unwrap()
            .iter()
            .map(ToString::to_string)
            .collect();
        assert_eq!(ranges, vec!["0-5460", "5461-10922", "10923-16383"]);
    }

    #[test]
    fn test_sizes_differ_by_at_most_one() {
        for masters in [5, 6, 7, 10, 100, 1000] {
            let ranges = expected_partition(masters).unwrap();
            let sizes: Vec<u32> = ranges.iter().map(SlotRange::len).collect();
            let min = sizes.iter().min().unwrap();
            let max = sizes.iter().max().unwrap();
            assert!(max - min <= 1, "masters={} sizes {}..{}", masters, min, max);
            assert_eq!(sizes.iter().sum::<u32>(), TOTAL_SLOTS);
            assert!(check_coverage(&ranges).is_ok());
        }
    }

    #[test]
    fn test_ranges_are_contiguous_and_ordered() {
        let ranges = expected_partition(7).unwrap();
        assert_eq!(ranges[0].start, 0);
        assert_eq!(ranges.last().unwrap().end, 16383);
        for pair in ranges.windows(2) {
            assert_eq!(pair[0].end + 1, pair[1].start);
        }
    }
}

mod verify_tests {
    use super::*;

    const NODES: &str = "\
e7d1eecce10fd6bb5eb35b9f99a514335d9ba9ca 10.0.0.1:6379@16379 myself,master - 0 0 1 connected 0-5460
67ed2db8d677e59ec4a4cefb06858cf2a1a89fa1 10.0.0.2:6379@16379 master - 0 1426238316232 2 connected 5461-10922
292f8b365bb7edb5e285caf0b7e6ddc7265d2f4f 10.0.0.3:6379@16379 master - 0 1426238318243 3 connected 10923-16383
6ec23923021cf3ffec47632106199cb7f496ce01 10.0.0.4:6379@16379 slave e7d1eecce10fd6bb5eb35b9f99a514335d9ba9ca 0 1426238316232 1 connected
824fe116063bc5fcf9f4ffd895bc17aee7731ac3 10.0.0.5:6379@16379 slave 67ed2db8d677e59ec4a4cefb06858cf2a1a89fa1 0 1426238317741 2 connected
33760ac9ef21b5a3f8e5f1e4bf0c8d9be7c5a9e2 10.0.0.6:6379@16379 slave 292f8b365bb7edb5e285caf0b7e6ddc7265d2f4f 0 1426238317741 3 connected
";

    #[test]
    fn test_parsed_cluster_verifies() {
        let observed = ClusterTopology::from_nodes(NODES).unwrap();
        let expected = ExpectedTopology::new(3, 1).unwrap();
        assert_eq!(verify(&expected, &observed), Ok(()));
    }

    #[test]
    fn test_missing_replicas_are_reported() {
        let observed = ClusterTopology::from_nodes(NODES).unwrap();
        let expected = ExpectedTopology::new(3, 2).unwrap();
        assert!(matches!(
            verify(&expected, &observed),
            Err(TopologyMismatch::ReplicaCount { expected: 2, found: 1, .. })
        ));
    }

    #[test]
    fn test_scaled_out_cluster_before_resharding() {
        let expected = ExpectedTopology::new(4, 1).unwrap();
        assert!(matches!(
            verify(&expected, &converged_topology(3, 1)),
            Err(TopologyMismatch::RangesDiffer { .. })
        ));
    }

    #[test]
    fn test_extra_known_nodes_are_reported() {
        let expected = ExpectedTopology::new(3, 1).unwrap();
        let observed = converged_topology(3, 1).with_known_nodes(Some(7));
        assert_eq!(
            verify(&expected, &observed),
            Err(TopologyMismatch::NodeCount { expected: 6, found: 7 })
        );
    }
}

mod polling_tests {
    use super::*;

    /// Probe replaying a fixed sequence of observations, repeating the last.
    struct ScriptedProbe {
        script: Mutex<VecDeque<Result<ClusterTopology, TopologyError>>>,
    }

    impl ScriptedProbe {
        fn new(script: Vec<Result<ClusterTopology, TopologyError>>) -> Self {
            Self {
                script: Mutex::new(script.into()),
            }
        }
    }

    impl TopologyProbe for ScriptedProbe {
        fn observe<'a>(
            &'a self,
            _target: &'a ProbeTarget,
        ) -> BoxFuture<'a, Result<ClusterTopology, TopologyError>> {
            let mut script = self.script.lock().unwrap();
            let next = if script.len() > 1 {
                script.pop_front().unwrap()
            } else {
                script.front().cloned().unwrap()
            };
            futures::future::ready(next).boxed()
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_waits_until_converged() {
        let probe = ScriptedProbe::new(vec![
            Err(TopologyError::Probe("connection refused".to_string())),
            Ok(converged_topology(3, 0)),
            Ok(converged_topology(3, 1)),
        ]);
        let expected = ExpectedTopology::new(3, 1).unwrap();

        let observed = wait_for_topology(&probe, &target(), &expected, &PollConfig::default())
            .await
            .unwrap();
        assert_eq!(observed.node_count(), 6);
    }

    #[tokio::test(start_paused = true)]
    async fn test_times_out_with_last_reason() {
        let probe = FakeProbe::new();
        probe.set(Some(converged_topology(3, 0)));
        let expected = ExpectedTopology::new(3, 1).unwrap();
        let poll = PollConfig {
            interval: Duration::from_secs(2),
            timeout: Duration::from_secs(20),
        };

        let err = wait_for_topology(&probe, &target(), &expected, &poll).await.unwrap_err();
        match err {
            TopologyError::Timeout { waited, last } => {
                assert!(waited <= poll.timeout);
                assert!(last.contains("replicas"), "{}", last);
            }
            other => panic!("unexpected error: {other:?}"),
        }
        // Probed at 0s, 2s, ..., 20s
        assert_eq!(probe.calls(), 11);
    }

    #[tokio::test(start_paused = true)]
    async fn test_immediate_convergence_probes_once() {
        let probe = FakeProbe::new();
        probe.set(Some(converged_topology(5, 2)));
        let expected = ExpectedTopology::new(5, 2).unwrap();

        wait_for_topology(&probe, &target(), &expected, &PollConfig::default())
            .await
            .unwrap();
        assert_eq!(probe.calls(), 1);
    }
}
