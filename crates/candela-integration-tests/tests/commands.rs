//! Command forwarding, reply relay, and receive-path robustness.

use std::time::Duration;

use candela_bus::{send_frame, sim::SimNetwork, TxStatus};
use candela_integration_tests::{LastDutyController, PrefixParser, ScriptedSensor};
use candela_node::{allocator, LuminaireNode, NodeConfig};
use candela_proto::NodeId;

fn quiet_config() -> NodeConfig {
    NodeConfig::fast()
        .with_join_quiet(Duration::from_secs(3600))
        .with_steady_state(Duration::ZERO)
        .with_settle_slack(Duration::ZERO)
}

fn join_node(
    net: &SimNetwork,
) -> LuminaireNode<candela_bus::sim::SimPort, LastDutyController, ScriptedSensor, PrefixParser> {
    LuminaireNode::join(
        net.port(),
        LastDutyController::default(),
        ScriptedSensor::new([]),
        PrefixParser,
        quiet_config(),
    )
    .unwrap()
}

/// The single-slot inbox keeps only the newest command: a target that
/// cannot keep up executes the latest request, not a backlog.
#[test]
fn rapid_commands_keep_only_the_newest() {
    let net = SimNetwork::new();
    let mut a = join_node(&net);
    let mut b = join_node(&net);

    assert_eq!(a.process_command("1 one").unwrap(), None);
    assert_eq!(a.process_command("1 two").unwrap(), None);

    b.tick();
    a.tick();
    assert_eq!(a.drain_output(), vec!["ok: 1 two".to_string()]);

    // The first command is gone, not queued.
    b.tick();
    a.tick();
    assert!(a.drain_output().is_empty());
}

/// Oversized and undecodable frames are dropped on the receive path as
/// soft errors; the node keeps serving afterwards.
#[test]
fn garbage_frames_do_not_disturb_the_node() {
    let net = SimNetwork::new();
    let mut a = join_node(&net);
    let mut b = join_node(&net);
    let addr = allocator::bus_addr(b.id());

    let mut raw = net.port();
    let oversized = vec![2u8; 65];
    assert_eq!(send_frame(&mut raw, addr, &oversized), TxStatus::Ok);
    b.tick();

    assert_eq!(send_frame(&mut raw, addr, &[0x09]), TxStatus::Ok);
    b.tick();

    // Still fully operational.
    assert_eq!(a.process_command("1 ping").unwrap(), None);
    b.tick();
    a.tick();
    assert_eq!(a.drain_output(), vec!["ok: 1 ping".to_string()]);
    assert_eq!(b.id(), NodeId(1));
}

/// A reply comes back as a broadcast, so every node on the bus relays it,
/// not only the one that forwarded the command.
#[test]
fn replies_are_relayed_by_every_listener() {
    let net = SimNetwork::new();
    let mut a = join_node(&net);
    let mut b = join_node(&net);
    let mut c = join_node(&net);

    assert_eq!(a.process_command("1 status").unwrap(), None);
    b.tick();
    a.tick();
    c.tick();

    assert_eq!(a.drain_output(), vec!["ok: 1 status".to_string()]);
    assert_eq!(c.drain_output(), vec!["ok: 1 status".to_string()]);
    assert!(b.drain_output().is_empty());
}
