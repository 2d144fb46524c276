//! Liveness scenarios: timeout-driven view changes, crashed leaders, and
//! recovery from total stalls.

use std::time::Duration;
use tracing_test::traced_test;
use triad_bft::BftConfig;
use triad_simulation::{NodeIndex, SimulationConfig, SimulationRunner};
use triad_types::{StateVersion, Transaction, View};

fn secs(s: u64) -> Duration {
    Duration::from_secs(s)
}

fn seed_mempools(runner: &mut SimulationRunner, nodes: &[NodeIndex]) {
    for &node in nodes {
        for k in 0..3u8 {
            runner.submit_transaction(node, Transaction::new(vec![node as u8, k]));
        }
    }
}

#[traced_test]
#[test]
fn test_no_timeouts_under_good_network() {
    // Message delay (150ms ± jitter) is far below the 1s base timeout and
    // there are no faults: not a single timeout vote may be emitted.
    let mut runner = SimulationRunner::new(SimulationConfig::default(), 23);
    seed_mempools(&mut runner, &[0, 1, 2, 3]);
    runner.start();
    runner.run_until(secs(10));

    assert_eq!(
        runner.stats().sent_of_type("TimeoutVote"),
        0,
        "timeout votes under a good network"
    );
    assert_eq!(runner.stats().sent_of_type("TimeoutCertificate"), 0);
    for node in 0..4 {
        assert!(runner.committed_version(node) > StateVersion(0));
    }
}

#[traced_test]
#[test]
fn test_crashed_leader_recovers_via_timeout_certificate() {
    // Node 2 is silent from the start: every view it leads must time out,
    // form a TC from the other three validators, and hand the next view an
    // honest leader.
    let mut runner = SimulationRunner::new(SimulationConfig::default(), 29);
    seed_mempools(&mut runner, &[0, 1, 3]);
    runner.network_mut().isolate_node(2);
    runner.start();
    runner.run_until(secs(15));

    assert!(
        runner.stats().sent_of_type("TimeoutVote") > 0,
        "the crashed leader's views must produce timeout votes"
    );
    assert!(
        runner.stats().sent_of_type("TimeoutCertificate") > 0,
        "a quorum of timeout votes must assemble into a TC"
    );

    // Liveness resumed after each stall: the live nodes kept committing.
    for node in [0, 1, 3] {
        assert!(
            runner.committed_version(node) >= StateVersion(9),
            "node {} only reached {}",
            node,
            runner.committed_version(node)
        );
        assert!(runner.node(node).current_view() > View(8));
    }
    // The isolated node saw nothing.
    assert_eq!(runner.committed_version(2), StateVersion(0));

    // Safety held throughout the view changes.
    let reference = runner.committed_transactions(0);
    for node in [1, 3] {
        let log = runner.committed_transactions(node);
        let min = reference.len().min(log.len());
        assert_eq!(&reference[..min], &log[..min]);
    }
}

#[traced_test]
#[test]
fn test_backoff_grows_under_stall_and_recovery_follows_heal() {
    // Cut every link: views cannot advance, so each node's pacemaker backs
    // off exponentially up to the cap. Healing lets the retained timeout
    // votes rebroadcast, form a TC, and restart progress.
    let config = SimulationConfig {
        bft: BftConfig {
            pacemaker_base_timeout: Duration::from_millis(200),
            pacemaker_max_exponent: 4,
            ..BftConfig::default()
        },
        ..SimulationConfig::default()
    };
    let mut runner = SimulationRunner::new(config, 31);
    seed_mempools(&mut runner, &[0, 1, 2, 3]);
    for node in 0..4 {
        runner.network_mut().isolate_node(node);
    }
    runner.start();
    runner.run_until(secs(10));

    for node in 0..4 {
        let status = runner.node(node).pacemaker_status();
        assert_eq!(status.current_view, 1, "no TC can form in silence");
        assert!(
            status.consecutive_timeouts >= 4,
            "node {} backed off only {} times",
            node,
            status.consecutive_timeouts
        );
        // Capped at base × 2^4.
        assert_eq!(status.timeout_ms, 3_200);
        assert_eq!(runner.committed_version(node), StateVersion(0));
    }

    runner.network_mut().heal_all();
    runner.run_until(secs(40));

    assert!(
        runner.stats().sent_of_type("TimeoutCertificate") > 0,
        "rebroadcast timeout votes must assemble into a TC after healing"
    );
    for node in 0..4 {
        assert!(
            runner.committed_version(node) > StateVersion(0),
            "node {} never recovered",
            node
        );
    }
}

#[traced_test]
#[test]
fn test_vertex_request_rate_stays_bounded() {
    // Even with a lossy network generating missing-ancestor triggers, the
    // emitted vertex-request count respects the token bucket.
    let mut config = SimulationConfig::default();
    config.network.packet_loss_rate = 0.15;
    config.bft.vertex_request_rate = triad_bft::RateLimitConfig {
        permits_per_second: 2,
        burst: 4,
    };
    let mut runner = SimulationRunner::new(config, 37);
    seed_mempools(&mut runner, &[0, 1, 2, 3]);
    runner.start();
    runner.run_until(secs(20));

    let window_bound: u64 = 2 * 20 + 4;
    for node in 0..4 {
        let sent = runner.node(node).consensus().vertex_requests_sent();
        assert!(
            sent <= window_bound,
            "node {} sent {} vertex requests, bound {}",
            node,
            sent,
            window_bound
        );
    }
}
