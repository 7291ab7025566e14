//! End-to-end trial scenarios against the simulated swarm.
//!
//! Every test runs on a paused tokio clock, so simulated gossip and signal
//! delays cost no wall time.

use std::time::Duration;

use chatload_core::{
    ActiveSet, AgentGroup, AgentProvisioner, BenchConfig, BenchError, MockPlatform, MockSettings,
    Outcome, Platform, TrialKind, TrialRunner, WorkerEndpoint, WorkerPool,
};

fn config(kind: TrialKind, nodes: usize, active: usize, messages: usize) -> BenchConfig {
    let mut config = BenchConfig::default();
    config.pool.nodes = nodes;
    config.trial.kind = kind;
    config.trial.active_agents = active;
    config.trial.messages = messages;
    config
}

fn endpoints(count: usize) -> Vec<WorkerEndpoint> {
    (1..=count)
        .map(|i| WorkerEndpoint::new(format!("worker-{}", i)))
        .collect()
}

// ============================================================================
// Signal trials
// ============================================================================

/// Five active agents, twenty messages, generous deadline: all 80 receipts
/// arrive and the trial reports a finite duration.
#[tokio::test(start_paused = true)]
async fn signal_trial_collects_every_receipt() {
    let platform = MockPlatform::new();
    let mut config = config(TrialKind::Signal, 10, 5, 20);
    config.trial.period_ms = 60_000;

    let result = TrialRunner::new(&platform, &config)
        .run(TrialKind::Signal)
        .await
        .unwrap();

    assert_eq!(result.active_agents, 5);
    let elapsed = result.elapsed().expect("signal trial should converge");
    assert!(elapsed < Duration::from_secs(60));
    assert_eq!(platform.messages_created(), 20);
    assert_eq!(platform.live_nodes(), 0);
}

/// Three active agents, ten messages, deadline shorter than delivery: no
/// result, fewer than 20 receipts reported.
#[tokio::test(start_paused = true)]
async fn signal_trial_misses_short_deadline() {
    let platform = MockPlatform::with_settings(MockSettings {
        signal_delay: Duration::from_secs(10),
        ..MockSettings::default()
    });
    let mut config = config(TrialKind::Signal, 3, 3, 10);
    config.trial.period_ms = 2_000;

    let result = TrialRunner::new(&platform, &config)
        .run(TrialKind::Signal)
        .await
        .unwrap();

    match result.outcome {
        Outcome::NotConverged(report) => {
            assert_eq!(report.expected, 20);
            assert!(report.received < 20);
        }
        other => panic!("expected no result, got {:?}", other),
    }
    assert_eq!(platform.live_nodes(), 0);
}

/// Jittered delivery arrives out of order across recipients and still
/// completes exactly at the last receipt.
#[tokio::test(start_paused = true)]
async fn signal_trial_tolerates_out_of_order_delivery() {
    let platform = MockPlatform::with_settings(MockSettings {
        signal_delay: Duration::from_millis(100),
        jitter: Duration::from_millis(400),
        ..MockSettings::default()
    });
    let config = config(TrialKind::Signal, 6, 6, 12);

    let result = TrialRunner::new(&platform, &config)
        .run(TrialKind::Signal)
        .await
        .unwrap();

    let elapsed = result.elapsed().expect("signal trial should converge");
    assert!(elapsed >= Duration::from_millis(100));
    assert!(elapsed < Duration::from_millis(600));
}

// ============================================================================
// Gossip trials
// ============================================================================

/// The receiving replica eventually holds every message; latency is measured
/// from the start of sending and covers the gossip delay.
#[tokio::test(start_paused = true)]
async fn gossip_trial_converges_after_replication() {
    let platform = MockPlatform::with_settings(MockSettings {
        gossip_delay: Duration::from_secs(2),
        ..MockSettings::default()
    });
    let config = config(TrialKind::Gossip, 5, 5, 20);

    let result = TrialRunner::new(&platform, &config)
        .run(TrialKind::Gossip)
        .await
        .unwrap();

    let elapsed = result.elapsed().expect("gossip trial should converge");
    assert!(elapsed >= Duration::from_secs(2));
    assert!(elapsed < Duration::from_secs(3));
}

/// With a poll bound, a partitioned receiver yields no result instead of
/// polling forever.
#[tokio::test(start_paused = true)]
async fn gossip_trial_bounded_by_max_wait() {
    let platform = MockPlatform::with_settings(MockSettings {
        gossip_delay: Duration::from_secs(3_600),
        ..MockSettings::default()
    });
    let mut config = config(TrialKind::Gossip, 4, 4, 8);
    config.trial.max_poll_wait_ms = Some(5_000);

    let result = TrialRunner::new(&platform, &config)
        .run(TrialKind::Gossip)
        .await
        .unwrap();

    match result.outcome {
        Outcome::NotConverged(report) => {
            assert_eq!(report.expected, 8);
            assert_eq!(report.received, 2);
        }
        other => panic!("expected no result, got {:?}", other),
    }
}

// ============================================================================
// Pool acquisition
// ============================================================================

/// Two of ten endpoints unreachable, remaining capacity sufficient: the
/// trial runs, and only those two were skipped.
#[tokio::test(start_paused = true)]
async fn unreachable_endpoints_are_skipped() {
    let platform = MockPlatform::new();
    platform.mark_unreachable("worker-2");
    platform.mark_unreachable("worker-5");
    let mut config = config(TrialKind::Signal, 8, 4, 8);
    config.pool.endpoints = endpoints(10);

    let result = TrialRunner::new(&platform, &config)
        .run(TrialKind::Signal)
        .await
        .unwrap();
    assert!(result.outcome.is_converged());

    let attempted: Vec<String> = platform
        .attempted_endpoints()
        .into_iter()
        .flatten()
        .map(|e| e.to_string())
        .collect();
    assert_eq!(attempted, endpoints(10).iter().map(|e| e.to_string()).collect::<Vec<_>>());
    assert_eq!(platform.nodes_started(), 8);
}

/// Every endpoint failing aborts before any load is generated.
#[tokio::test]
async fn all_endpoints_failing_is_capacity_error() {
    let platform = MockPlatform::new();
    for endpoint in endpoints(3) {
        platform.mark_unreachable(endpoint.as_str());
    }
    let mut config = config(TrialKind::Gossip, 2, 2, 5);
    config.pool.endpoints = endpoints(3);

    let err = TrialRunner::new(&platform, &config)
        .run(TrialKind::Gossip)
        .await
        .unwrap_err();

    assert!(matches!(err, BenchError::Capacity { acquired: 0, required: 2 }));
    assert_eq!(platform.messages_created(), 0);
    assert_eq!(platform.chatter_count(), 0);
}

/// Acquisition never starts more than nodes × conductors.
#[tokio::test]
async fn acquisition_respects_target_size() {
    let platform = MockPlatform::new();
    let mut config = config(TrialKind::Gossip, 3, 2, 5);
    config.pool.conductors = 2;
    config.pool.endpoints = endpoints(6);

    let pool = WorkerPool::acquire(&platform, &config.pool, &config.network)
        .await
        .unwrap();
    assert_eq!(pool.len(), 6);
    assert_eq!(platform.nodes_started(), 6);
    assert_eq!(platform.attempted_endpoints().len(), 3);
    pool.teardown(&platform).await;
}

// ============================================================================
// Active-set selection
// ============================================================================

async fn provisioned(platform: &MockPlatform, nodes: usize, instances: usize) -> Vec<AgentGroup> {
    let mut config = BenchConfig::default();
    config.pool.nodes = nodes;
    let pool = WorkerPool::acquire(platform, &config.pool, &config.network)
        .await
        .unwrap();
    AgentProvisioner::new(&config.app.source, instances)
        .provision(platform, pool.nodes())
        .await
        .unwrap()
}

/// Selection takes node order then agent order, and is repeatable.
#[tokio::test]
async fn active_set_is_deterministic_over_provisioned_agents() {
    let platform = MockPlatform::new();
    let groups = provisioned(&platform, 3, 2).await;

    let first = ActiveSet::select(&groups, 3);
    let second = ActiveSet::select(&groups, 3);
    assert_eq!(first, second);

    let expected: Vec<_> = vec![
        &groups[0].agents[0],
        &groups[0].agents[1],
        &groups[1].agents[0],
    ];
    assert_eq!(first.agents().iter().collect::<Vec<_>>(), expected);

    let everything = ActiveSet::select(&groups, 10);
    assert_eq!(everything.len(), 6);
    assert!(everything.is_short());
}

/// A short active set still runs a trial with the agents that exist.
#[tokio::test(start_paused = true)]
async fn short_active_set_is_not_fatal() {
    let platform = MockPlatform::new();
    let config = config(TrialKind::Signal, 3, 5, 6);

    let result = TrialRunner::new(&platform, &config)
        .run(TrialKind::Signal)
        .await
        .unwrap();
    assert_eq!(result.active_agents, 3);
    assert!(result.outcome.is_converged());
}

// ============================================================================
// Teardown
// ============================================================================

/// A readiness timeout aborts the trial but every node is still shut down.
#[tokio::test(start_paused = true)]
async fn readiness_timeout_tears_down() {
    let platform = MockPlatform::with_settings(MockSettings {
        discovery_delay: Duration::from_secs(600),
        ..MockSettings::default()
    });
    let mut config = config(TrialKind::Gossip, 3, 3, 5);
    config.network.mode = chatload_core::NetworkMode::Networked;
    config.readiness.max_wait_ms = Some(10_000);

    let err = TrialRunner::new(&platform, &config)
        .run(TrialKind::Gossip)
        .await
        .unwrap_err();
    assert!(matches!(err, BenchError::ReadinessTimeout { observed: 1, expected: 3, .. }));
    assert_eq!(platform.live_nodes(), 0);
    assert_eq!(platform.shutdown_nodes().len(), 3);
}

/// Nodes shut down by teardown reject further calls.
#[tokio::test(start_paused = true)]
async fn nodes_are_gone_after_trial() {
    let platform = MockPlatform::new();
    let config = config(TrialKind::Gossip, 2, 2, 4);

    TrialRunner::new(&platform, &config)
        .run(TrialKind::Gossip)
        .await
        .unwrap();

    for node in platform.shutdown_nodes() {
        let handle = chatload_core::NodeHandle {
            id: node,
            endpoint: None,
        };
        let app = config.app.source.clone();
        assert!(platform.install_app(&handle, &app, 1).await.is_err());
    }
}

/// Sequential trials on one platform start from a clean swarm: the second
/// trial's readiness barrier sees only its own chatters.
#[tokio::test(start_paused = true)]
async fn sequential_trials_share_a_platform() {
    let platform = MockPlatform::new();
    let mut config = config(TrialKind::Gossip, 10, 5, 10);
    config.readiness.max_wait_ms = Some(30_000);

    let runner = TrialRunner::new(&platform, &config);
    let first = runner.run(TrialKind::Gossip).await.unwrap();
    let second = runner.run(TrialKind::Gossip).await.unwrap();
    let third = runner.run(TrialKind::Signal).await.unwrap();

    assert!(first.outcome.is_converged());
    assert!(second.outcome.is_converged());
    assert!(third.outcome.is_converged());
    assert_eq!(platform.nodes_started(), 30);
    assert_eq!(platform.live_nodes(), 0);
    assert_eq!(platform.chatter_count(), 0);
}
