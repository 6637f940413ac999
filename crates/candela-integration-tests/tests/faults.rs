//! Rounds on a lossy bus: arbitration losses are retried, a node alone on
//! the bus backs off instead of stalling.

use std::time::Duration;

use candela_bus::sim::{FaultConfig, SimNetwork};
use candela_integration_tests::{
    init_logging, run_event_loops, LightWorld, PrefixParser, WorldController, WorldSensor,
};
use candela_node::{LuminaireNode, NodeConfig, Phase};
use candela_proto::NodeId;

/// With one in five transactions losing arbitration, bounded retries must
/// still carry a full round to completion.
#[test]
fn round_completes_despite_arbitration_losses() {
    init_logging();
    let coupling = vec![
        vec![300.0, 80.0, 60.0],
        vec![70.0, 320.0, 90.0],
        vec![50.0, 100.0, 280.0],
    ];
    let ambient = 20.0;
    let world = LightWorld::new(coupling.clone(), ambient);

    let net = SimNetwork::with_faults(FaultConfig {
        busy_rate: 0.2,
        timeout_rate: 0.0,
        seed: 7,
    })
    .with_latency(Duration::from_millis(2));

    let config = NodeConfig::fast()
        .with_steady_state(Duration::from_millis(60))
        .with_settle_slack(Duration::from_millis(30))
        .with_reference_duties(0.2, 0.8);

    let mut nodes = Vec::new();
    for index in 0..3 {
        nodes.push(
            LuminaireNode::join(
                net.port(),
                WorldController::new(&world, index),
                WorldSensor::new(&world, index),
                PrefixParser,
                config.clone(),
            )
            .unwrap(),
        );
    }

    let nodes = run_event_loops(nodes, Duration::from_millis(1500));

    for node in &nodes {
        assert!(!node.in_run(), "{} still mid-run", node.id());
        let observer = node.id().value() as usize;
        for emitter in 0..3 {
            let gain = node
                .gain(NodeId(emitter as u8))
                .unwrap_or_else(|| panic!("{} has no gain for node{emitter}", node.id()));
            assert!((gain - coupling[observer][emitter]).abs() < 1.0);
        }
    }
}

/// A node with no peers cannot complete the election broadcast; it must
/// roll back to idle rather than wait forever for responses.
#[test]
fn lone_node_backs_off_instead_of_stalling() {
    init_logging();
    let world = LightWorld::new(vec![vec![300.0]], 10.0);
    let net = SimNetwork::new();

    let mut node = LuminaireNode::join(
        net.port(),
        WorldController::new(&world, 0),
        WorldSensor::new(&world, 0),
        PrefixParser,
        NodeConfig::fast().with_join_quiet(Duration::from_secs(3600)),
    )
    .unwrap();

    node.request_calibration().unwrap();
    node.tick();

    assert!(!node.in_run());
    assert_eq!(node.phase(), Phase::Idle);
    // The failure was soft: a later attempt is accepted again.
    node.request_calibration().unwrap();
}
