//! Determinism and safety under adverse network conditions.

use std::time::Duration;
use tracing_test::traced_test;
use triad_simulation::{NodeIndex, SimulationConfig, SimulationRunner};
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

fn assert_equal_committed_prefixes(runner: &SimulationRunner) {
    let logs: Vec<_> = (0..runner.num_nodes() as NodeIndex)
        .map(|i| runner.committed_transactions(i))
        .collect();
    for (node, log) in logs.iter().enumerate().skip(1) {
        let min = logs[0].len().min(log.len());
        assert_eq!(
            &logs[0][..min],
            &log[..min],
            "node {} diverged from node 0",
            node
        );
    }
}

#[traced_test]
#[test]
fn test_same_seed_reproduces_the_run() {
    let run = |seed: u64| {
        let mut config = SimulationConfig::default();
        config.network.packet_loss_rate = 0.05;
        let mut runner = SimulationRunner::new(config, seed);
        seed_mempools(&mut runner, 4);
        runner.start();
        runner.run_until(secs(10));
        runner
    };

    let a = run(1234);
    let b = run(1234);

    assert_eq!(a.stats().events_processed, b.stats().events_processed);
    assert_eq!(a.stats().messages_sent, b.stats().messages_sent);
    assert_eq!(
        a.stats().messages_dropped_loss,
        b.stats().messages_dropped_loss
    );
    for node in 0..4 {
        assert_eq!(
            a.committed_transactions(node),
            b.committed_transactions(node),
            "node {} committed different logs across identical runs",
            node
        );
        assert_eq!(
            a.ledger_updates(node).len(),
            b.ledger_updates(node).len()
        );
    }
}

#[traced_test]
#[test]
fn test_safety_under_packet_loss() {
    let mut config = SimulationConfig::default();
    config.network.packet_loss_rate = 0.10;
    let mut runner = SimulationRunner::new(config, 59);
    seed_mempools(&mut runner, 4);
    runner.start();
    runner.run_until(secs(30));

    // Loss slows consensus down but never forks it.
    assert_equal_committed_prefixes(&runner);
    let progressed = (0..4)
        .filter(|&n| runner.committed_version(n) > StateVersion(0))
        .count();
    assert!(
        progressed >= 3,
        "an honest quorum must keep committing under 10% loss"
    );
}

#[traced_test]
#[test]
fn test_safety_across_partition_and_heal() {
    let mut runner = SimulationRunner::new(SimulationConfig::default(), 61);
    seed_mempools(&mut runner, 4);
    runner.start();
    runner.run_until(secs(2));

    // Split 2-2: neither side holds a quorum, so neither side may commit,
    // not even with fresh transactions waiting.
    runner.network_mut().partition_groups(&[0, 1], &[2, 3]);
    for node in 0..4u8 {
        runner.submit_transaction(node as NodeIndex, Transaction::new(vec![node, 100]));
    }
    runner.run_until(secs(3));
    let frozen: Vec<StateVersion> = (0..4).map(|n| runner.committed_version(n)).collect();
    runner.run_until(secs(6));
    for node in 0..4u32 {
        assert_eq!(
            runner.committed_version(node),
            frozen[node as usize],
            "node {} committed inside a quorumless partition",
            node
        );
    }

    // Heal: the retained timeout votes re-form quorums and progress
    // resumes without contradicting anything committed before the split.
    runner.network_mut().heal_all();
    runner.run_until(secs(40));

    for node in 0..4 {
        assert!(
            runner.committed_version(node) > frozen[node as usize],
            "node {} never resumed after the heal",
            node
        );
    }
    assert_equal_committed_prefixes(&runner);
}
