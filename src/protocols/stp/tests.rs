use super::*;
use crate::{
    link::{PortId, DEFAULT_LINK_COST},
    process::{Mode, ProcessKind},
    DeviceId, Internet,
};
use std::time::Duration;

fn stp(internet: &Internet, switch: DeviceId) -> Option<&SpanningTreeProcess> {
    let device = internet.device(switch);
    let pid = device
        .find(ProcessKind::SpanningTree, Some(Mode::Kernel))
        .first()?
        .pid;
    device.get_as::<SpanningTreeProcess>(pid, Mode::Kernel)
}

fn roots_agree(internet: &Internet, switches: &[DeviceId], root: BridgeId) -> bool {
    switches
        .iter()
        .all(|switch| stp(internet, *switch).is_some_and(|stp| stp.root_bid() == root))
}

fn blocked_ports(internet: &Internet, switch: DeviceId) -> Vec<PortId> {
    let ports = internet.device(switch).ports();
    ports
        .ids()
        .filter(|port| ports.interface(*port).is_ok_and(|interface| interface.is_blocked()))
        .collect()
}

fn quick() -> StpConfig {
    StpConfig {
        send_interval: Duration::from_millis(500),
        stable_send_interval: Duration::from_millis(1500),
        port_timeout: Duration::from_secs(3),
        stabilization: Duration::from_secs(2),
        max_age: Duration::from_secs(3),
        ..Default::default()
    }
}

/// Three switches wired in a loop. The last one has the lowest priority.
///
/// ```text
///  s0 eth0 ---- eth0 s1
///  eth1            eth1
///     \            /
///     eth1  s2  eth0
/// ```
fn triangle(config: StpConfig) -> (Internet, [DeviceId; 3]) {
    let mut internet = Internet::new();
    let switches = [
        internet.add_switch("s0"),
        internet.add_switch("s1"),
        internet.add_switch("s2"),
    ];
    internet.link(switches[0], switches[1]);
    internet.link(switches[1], switches[2]);
    internet.link(switches[2], switches[0]);
    for (switch, priority) in switches.into_iter().zip([32768, 32768, 4096]) {
        internet
            .device_mut(switch)
            .start_spanning_tree(config.clone().priority(priority));
    }
    (internet, switches)
}

#[test]
fn triangle_elects_the_lowest_bridge() {
    let (mut internet, switches) = triangle(StpConfig::default());
    let root = internet.device(switches[2]).bridge_id(4096);

    for _ in 0..1500 {
        internet.tick();
        for switch in switches {
            let stp = stp(&internet, switch).expect("spanning tree is running");
            let root_ports = stp
                .ports()
                .values()
                .filter(|record| record.state == PortState::Root)
                .count();
            assert!(root_ports <= 1, "{switch} has {root_ports} root ports");
        }
    }

    assert!(roots_agree(&internet, &switches, root));
    let s2 = stp(&internet, switches[2]).expect("spanning tree is running");
    assert!(s2.is_root());
    assert_eq!(s2.root_port(), None);
    assert_eq!(s2.distance_to_root(), 0);
    for switch in &switches[..2] {
        let stp = stp(&internet, *switch).expect("spanning tree is running");
        assert!(!stp.is_root());
        assert_eq!(stp.root_port(), Some(PortId(1)));
        assert_eq!(stp.distance_to_root(), DEFAULT_LINK_COST);
    }
    for switch in switches {
        assert!(stp(&internet, switch).is_some_and(SpanningTreeProcess::is_stable));
    }
}

#[test]
fn loop_is_broken_on_the_higher_bridge() {
    let (mut internet, switches) = triangle(StpConfig::default());
    internet.run_ticks(1000);

    // s0 and s1 are equally far from the root, so the segment between them
    // goes to s0, which has the lower address
    let s0 = stp(&internet, switches[0]).expect("spanning tree is running");
    let s1 = stp(&internet, switches[1]).expect("spanning tree is running");
    assert_eq!(s0.port(PortId(0)).map(|record| record.state), Some(PortState::Designated));
    assert_eq!(s1.port(PortId(0)).map(|record| record.state), Some(PortState::Blocked));
    assert_eq!(
        s1.port(PortId(0)).map(|record| record.neighbor),
        Some(s0.my_bid())
    );

    assert!(blocked_ports(&internet, switches[0]).is_empty());
    assert_eq!(blocked_ports(&internet, switches[1]), vec![PortId(0)]);
    assert!(blocked_ports(&internet, switches[2]).is_empty());
}

#[test]
fn parallel_links_keep_only_the_lowest_port() {
    let mut internet = Internet::new();
    let a = internet.add_switch("a");
    let b = internet.add_switch("b");
    internet.link(a, b);
    internet.link(a, b);
    for switch in [a, b] {
        internet.device_mut(switch).start_spanning_tree(quick());
    }
    internet.run_ticks(300);

    let root = internet.device(a).bridge_id(BridgeId::DEFAULT_PRIORITY);
    assert!(roots_agree(&internet, &[a, b], root));
    let b_stp = stp(&internet, b).expect("spanning tree is running");
    assert_eq!(b_stp.root_port(), Some(PortId(0)));
    assert_eq!(
        b_stp.port(PortId(1)).map(|record| record.state),
        Some(PortState::Blocked)
    );
    assert!(blocked_ports(&internet, a).is_empty());
    assert_eq!(blocked_ports(&internet, b), vec![PortId(1)]);
}

#[test]
fn chain_blocks_nothing() {
    let mut internet = Internet::new();
    let switches: Vec<_> = (0..4).map(|i| internet.add_switch(format!("s{i}"))).collect();
    for pair in switches.windows(2) {
        internet.link(pair[0], pair[1]);
    }
    for switch in &switches {
        internet.device_mut(*switch).start_spanning_tree(quick());
    }
    internet.run_ticks(500);

    let root = internet.device(switches[0]).bridge_id(BridgeId::DEFAULT_PRIORITY);
    assert!(roots_agree(&internet, &switches, root));
    for (hops, switch) in switches.iter().enumerate() {
        assert!(blocked_ports(&internet, *switch).is_empty());
        let stp = stp(&internet, *switch).expect("spanning tree is running");
        assert_eq!(stp.distance_to_root(), hops as u32 * DEFAULT_LINK_COST);
    }
}

#[test]
fn root_failure_triggers_reelection() {
    let (mut internet, switches) = triangle(quick());
    let old_root = internet.device(switches[2]).bridge_id(4096);
    assert!(internet.run_until(|internet| roots_agree(internet, &switches, old_root), 1000));
    internet.run_ticks(300);
    assert_eq!(blocked_ports(&internet, switches[1]), vec![PortId(0)]);

    internet.device_mut(switches[2]).power_off();
    let survivors = &switches[..2];
    let new_root = internet.device(switches[0]).bridge_id(BridgeId::DEFAULT_PRIORITY);
    assert!(internet.run_until(|internet| roots_agree(internet, survivors, new_root), 2000));
    internet.run_ticks(500);
    assert!(roots_agree(&internet, survivors, new_root));

    // With the root gone the former blocked port is the only path left
    let s1 = stp(&internet, switches[1]).expect("spanning tree is running");
    assert_eq!(s1.root_port(), Some(PortId(0)));
    assert_eq!(s1.port(PortId(1)), None);
    assert!(blocked_ports(&internet, switches[0]).is_empty());
    assert!(blocked_ports(&internet, switches[1]).is_empty());

    internet.device_mut(switches[2]).power_on();
    assert!(internet.run_until(|internet| roots_agree(internet, &switches, old_root), 2000));
    internet.run_ticks(300);
    assert_eq!(blocked_ports(&internet, switches[1]), vec![PortId(0)]);
}

#[test]
fn rebooting_bridge_does_not_unseat_the_root() {
    let mut internet = Internet::new();
    let a = internet.add_switch("a");
    let c = internet.add_switch("c");
    let b = internet.add_switch("b");
    internet.link(a, c);
    internet.link(c, b);
    internet
        .device_mut(a)
        .start_spanning_tree(StpConfig::default().priority(4096));
    for switch in [c, b] {
        internet
            .device_mut(switch)
            .start_spanning_tree(StpConfig::default());
    }
    let root = internet.device(a).bridge_id(4096);
    internet.run_ticks(3000);
    assert!(roots_agree(&internet, &[a, c, b], root));

    // Until c hears from a again, it claims to be root on b's root port
    internet.device_mut(c).power_off();
    internet.device_mut(c).power_on();
    for _ in 0..1000 {
        internet.tick();
        let b_stp = stp(&internet, b).expect("spanning tree is running");
        assert_eq!(b_stp.root_bid(), root, "b gave up the root at {}", internet.now());
        assert_eq!(b_stp.root_port(), Some(PortId(0)));
    }

    assert!(roots_agree(&internet, &[a, c, b], root));
    let c_stp = stp(&internet, c).expect("spanning tree is running");
    assert_eq!(c_stp.root_port(), Some(PortId(0)));
    assert_eq!(c_stp.distance_to_root(), DEFAULT_LINK_COST);
    let b_stp = stp(&internet, b).expect("spanning tree is running");
    assert_eq!(b_stp.distance_to_root(), 2 * DEFAULT_LINK_COST);
}

#[test]
fn own_bpdus_are_ignored() {
    let mut internet = Internet::new();
    let a = internet.add_switch("a");
    // A cable from the switch back into itself
    internet.link(a, a);
    internet.device_mut(a).start_spanning_tree(quick());
    internet.run_ticks(100);

    let stp = stp(&internet, a).expect("spanning tree is running");
    assert!(stp.is_root());
    assert!(stp.ports().is_empty());
}
