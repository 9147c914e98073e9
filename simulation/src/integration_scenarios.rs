//! Integration scenarios driving the full SHINGO stack
//!
//! These scenarios run many engines together over the simulated medium:
//! - shingo-routing (zone updates, route discovery, forwarding decisions)
//! - shingo-core (event queue, packet continuations)
//! - shingo-logging (per-node log context)

use std::time::Duration;

use shingo_routing::{DropReason, RouterConfig, WireFraming};
use tokio_test::assert_ok;

use crate::scenarios::{self, CONVERGENCE_TIME};
use crate::simulation::{SimConfig, Simulation};
use crate::topology::{TopologyBuilder, from_edges};
use crate::types::{NodeId, PacketFate};

fn make_line(nodes: u16) -> Simulation {
    Simulation::new(TopologyBuilder::new(nodes).line(), SimConfig::fast()).unwrap()
}

fn fate_of(sim: &Simulation, uid: u64) -> Option<PacketFate> {
    sim.packet(uid).and_then(|p| p.fate).map(|(fate, _)| fate)
}

#[test]
fn test_line_zone_convergence() {
    let mut sim = make_line(6);
    sim.run_for(CONVERGENCE_TIME);

    assert!(sim.zones_converged(2), "missing: {:?}", sim.missing_zone_routes(2));
    // Two-hop route goes through the neighbor in between
    let route = sim.zone_route(NodeId(1), NodeId(3)).unwrap().unwrap();
    assert_eq!(route.gateway, NodeId(2).address());
    // The far end lies outside every zone of node 1
    assert!(sim.zone_route(NodeId(1), NodeId(6)).unwrap().is_none());
}

#[test]
fn test_out_of_zone_discovery_delivers() {
    let mut sim = make_line(8);
    sim.run_for(CONVERGENCE_TIME);
    assert!(sim.zone_route(NodeId(1), NodeId(8)).unwrap().is_none());

    let first = assert_ok!(sim.send_data(NodeId(1), NodeId(8), &b"far"[..]));
    assert_eq!(fate_of(&sim, first), None);
    sim.run_for(Duration::from_secs(3));

    assert_eq!(fate_of(&sim, first), Some(PacketFate::Delivered { at: NodeId(8), hops: 7 }));
    let stats = sim.router_stats();
    assert!(stats.requests_originated >= 1);
    assert!(stats.replies_sent >= 1);

    // The discovered route is reused without a new request
    let originated = stats.requests_originated;
    let second = assert_ok!(sim.send_data(NodeId(1), NodeId(8), &b"again"[..]));
    sim.run_for(Duration::from_millis(200));
    assert_eq!(fate_of(&sim, second), Some(PacketFate::Delivered { at: NodeId(8), hops: 7 }));
    assert_eq!(sim.router_stats().requests_originated, originated);
}

#[test]
fn test_unreachable_island_drops_after_retries() {
    let config = SimConfig::fast().with_router(
        RouterConfig::default()
            .with_periodic_update_interval(Duration::from_secs(1))
            .with_rreq_retries(1)
            .with_net_diameter(8),
    );
    let mut sim = Simulation::new(from_edges(&[(1, 2), (3, 4)]), config).unwrap();
    sim.run_for(CONVERGENCE_TIME);

    let uid = sim.send_data(NodeId(1), NodeId(4), &b"lost"[..]).unwrap();
    sim.run_for(Duration::from_secs(30));

    assert_eq!(
        fate_of(&sim, uid),
        Some(PacketFate::Dropped {
            at: NodeId(1),
            reason: DropReason::DiscoveryFailed
        })
    );
    assert_eq!(sim.stats.packets_dropped, 1);
}

#[test]
fn test_broken_link_withdraws_zone_routes() {
    let mut sim = make_line(3);
    sim.run_for(CONVERGENCE_TIME);
    assert!(sim.zone_route(NodeId(1), NodeId(3)).unwrap().is_some());

    sim.link_down(NodeId(2), NodeId(3)).unwrap();
    let hold_down = sim.config.router.hold_down_time();
    sim.run_for(hold_down + Duration::from_secs(3));

    assert!(sim.zone_route(NodeId(1), NodeId(3)).unwrap().is_none());
    assert!(sim.zone_route(NodeId(2), NodeId(3)).unwrap().is_none());
    assert!(sim.zone_route(NodeId(1), NodeId(2)).unwrap().is_some());
}

#[test]
fn test_restored_link_relearns_routes() {
    let mut sim = make_line(3);
    sim.link_down(NodeId(2), NodeId(3)).unwrap();
    sim.run_for(CONVERGENCE_TIME);
    assert!(sim.zone_route(NodeId(1), NodeId(3)).unwrap().is_none());

    sim.link_up(NodeId(2), NodeId(3)).unwrap();
    sim.run_for(CONVERGENCE_TIME);
    assert!(sim.zones_converged(2));
}

#[test]
fn test_total_loss_learns_nothing() {
    let mut sim = Simulation::new(TopologyBuilder::new(3).line(), SimConfig::fast().with_loss(1.0)).unwrap();
    sim.run_for(Duration::from_secs(3));

    assert!(sim.stats.control_frames_lost > 0);
    assert_eq!(sim.stats.control_frames, 0);
    assert!(sim.zone_route(NodeId(1), NodeId(2)).unwrap().is_none());
}

#[test]
fn test_legacy_framing_neighbors_converge() {
    let config = SimConfig::fast().with_router(
        RouterConfig::default()
            .with_periodic_update_interval(Duration::from_secs(1))
            .with_framing(WireFraming::Legacy),
    );
    let mut sim = Simulation::new(TopologyBuilder::new(2).line(), config).unwrap();
    sim.run_for(Duration::from_secs(2));

    assert!(sim.zone_route(NodeId(1), NodeId(2)).unwrap().is_some());
    assert_eq!(sim.router_stats().malformed_received, 0);
}

#[test]
fn test_runs_are_deterministic() {
    let run = || {
        let mut sim = Simulation::new(
            TopologyBuilder::new(10).random(0.25, 3),
            SimConfig::fast().with_seed(3),
        )
        .unwrap();
        sim.run_for(Duration::from_secs(3));
        sim.send_data(NodeId(1), NodeId(10), &b"x"[..]).unwrap();
        sim.send_data(NodeId(4), NodeId(7), &b"y"[..]).unwrap();
        sim.run_for(Duration::from_secs(5));
        (sim.stats.clone(), sim.event_log.clone(), sim.router_stats())
    };
    assert_eq!(run(), run());
}

#[test]
fn test_discovery_scenario_delivers_both_packets() {
    let sim = scenarios::run_discovery_scenario(SimConfig::fast()).unwrap();
    assert_eq!(sim.stats.packets_sent, 2);
    assert_eq!(sim.stats.packets_delivered, 2);
    assert_eq!(sim.stats.average_hops(), Some(7.0));
}

#[test]
fn test_convergence_scenario() {
    let sim = scenarios::run_zone_convergence_scenario(5, SimConfig::fast()).unwrap();
    assert!(sim.zones_converged(2));
}
