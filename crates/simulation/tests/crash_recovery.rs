//! Restart and catch-up scenarios: durable safety state, sync-driven
//! recovery, and the persist-before-send contract.

use std::time::Duration;
use tracing_test::traced_test;
use triad_core::SafetyStore;
use triad_simulation::{NodeIndex, SimulationConfig, SimulationRunner};
use triad_sync::LedgerSyncConfig;
use triad_types::{StateVersion, Transaction};

fn secs(s: u64) -> Duration {
    Duration::from_secs(s)
}

fn seed_mempools(runner: &mut SimulationRunner, count: u8) {
    for node in 0..runner.num_nodes() as NodeIndex {
        for k in 0..count {
            runner.submit_transaction(node, Transaction::new(vec![node as u8, k]));
        }
    }
}

fn assert_updates_ascend(runner: &SimulationRunner, node: NodeIndex) {
    let mut version = 0u64;
    for update in runner.ledger_updates(node) {
        let next = update.version().0;
        assert!(next > version, "node {} replayed a commit", node);
        assert_eq!(
            next,
            version + update.batch.len() as u64,
            "node {} left a version gap",
            node
        );
        version = next;
    }
}

#[traced_test]
#[test]
fn test_restart_resumes_without_replaying_commits() {
    let mut runner = SimulationRunner::new(SimulationConfig::default(), 41);
    seed_mempools(&mut runner, 4);
    runner.start();
    runner.run_until(secs(6));

    let before = runner.committed_version(0);
    assert!(before > StateVersion(0), "no commits before the restart");

    // Crash and recover node 0 from its durable state: the committed
    // ledger and the persisted safety record.
    runner.restart_node(0);
    runner.run_until(secs(20));

    assert!(
        runner.committed_version(0) > before,
        "restarted node never resumed committing"
    );
    // No commit was emitted twice across the restart.
    assert_updates_ascend(&runner, 0);

    let reference = runner.committed_transactions(1);
    let log = runner.committed_transactions(0);
    let min = reference.len().min(log.len());
    assert_eq!(&reference[..min], &log[..min], "restart broke agreement");
}

#[traced_test]
#[test]
fn test_restart_keeps_safety_record() {
    let mut runner = SimulationRunner::new(SimulationConfig::default(), 43);
    seed_mempools(&mut runner, 2);
    runner.start();
    runner.run_until(secs(5));

    let persisted = runner
        .safety_store(0)
        .load()
        .expect("a voting node has persisted safety state");
    assert!(persisted.last_voted_view > triad_types::View::GENESIS);

    runner.restart_node(0);
    // The recovered record survives the restart and keeps advancing.
    runner.run_until(secs(12));
    let after = runner.safety_store(0).load().expect("still persisting");
    assert!(after.last_voted_view >= persisted.last_voted_view);
}

#[traced_test]
#[test]
fn test_persist_failure_halts_voting_but_not_the_network() {
    let mut runner = SimulationRunner::new(SimulationConfig::default(), 47);
    seed_mempools(&mut runner, 3);
    // Node 0's disk is broken from the start: the runner drops every action
    // batch at the failed persist, so no vote or timeout vote ever leaves
    // the node.
    runner.safety_store(0).set_fail_persist(true);
    runner.start();
    runner.run_until(secs(12));

    assert!(
        runner.safety_store(0).load().is_none(),
        "nothing may be recorded through a failing store"
    );
    // The other three validators are a quorum; consensus continues, and
    // node 0 still observes commits through the certificates it receives.
    for node in 0..4 {
        assert!(
            runner.committed_version(node) > StateVersion(0),
            "node {} saw no commits",
            node
        );
    }
}

#[traced_test]
#[test]
fn test_stale_node_catches_up_through_ledger_sync() {
    // A faster sync cadence so catch-up converges within the run.
    let config = SimulationConfig {
        ledger_sync: LedgerSyncConfig {
            check_interval: Duration::from_millis(500),
            status_window: Duration::from_millis(200),
            request_timeout: Duration::from_secs(1),
            ..LedgerSyncConfig::default()
        },
        ..SimulationConfig::default()
    };
    let mut runner = SimulationRunner::new(config, 53);
    seed_mempools(&mut runner, 6);
    runner.start();
    runner.run_until(secs(1));

    // Node 0 drops off while the network keeps committing.
    runner.network_mut().isolate_node(0);
    runner.run_until(secs(20));
    let network_at_heal = runner.committed_version(1);
    let stale = runner.committed_version(0);
    assert!(
        network_at_heal > stale,
        "the network should have outrun the isolated node"
    );

    // Rejoin. Ledger sync pulls the committed gap, the vertex store
    // re-anchors at the synced head, and vertex sync bridges back into
    // live consensus.
    runner.network_mut().heal_all();
    runner.run_until(secs(45));

    assert!(
        runner.committed_version(0) >= network_at_heal,
        "node 0 reached {} but the network was already at {} at heal time",
        runner.committed_version(0),
        network_at_heal
    );
    // Catch-up replayed nothing and left no gaps.
    assert_updates_ascend(&runner, 0);

    let reference = runner.committed_transactions(1);
    let log = runner.committed_transactions(0);
    let min = reference.len().min(log.len());
    assert_eq!(&reference[..min], &log[..min], "catch-up broke agreement");
}
