//! Pre-defined simulation scenarios for SHINGO
//!
//! Each scenario narrates its steps on stdout and returns the finished
//! simulation so callers can inspect tables and statistics.

use std::time::Duration;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::info;

use crate::simulation::{SimConfig, Simulation};
use crate::topology::TopologyBuilder;
use crate::types::{NodeId, SimResult};

/// Time given to the zones to settle before traffic starts
pub const CONVERGENCE_TIME: Duration = Duration::from_secs(5);

fn print_fate(sim: &Simulation, uid: u64) {
    match sim.packet(uid).and_then(|p| p.fate.map(|fate| (p, fate))) {
        Some((record, (fate, at))) => {
            println!("  packet {uid}: {fate:?} at {at}");
            if let Some(latency) = record.latency() {
                println!("  latency {latency:?}");
            }
        }
        None => println!("  packet {uid}: still in flight"),
    }
}

/// Zone maintenance on a line
///
/// ```text
/// 1 - 2 - 3 - ... - n
/// ```
///
/// Every node should end up with a zone route to each node within the
/// zone radius.
pub fn run_zone_convergence_scenario(nodes: u16, config: SimConfig) -> SimResult<Simulation> {
    info!(nodes, "=== Running zone convergence scenario ===");
    let radius = config.router.zone_radius;
    let topology = TopologyBuilder::new(nodes).line();
    println!("{}", topology.visualize());

    let mut sim = Simulation::new(topology, config)?;
    for second in 1..=CONVERGENCE_TIME.as_secs() {
        sim.run_for(Duration::from_secs(1));
        let missing = sim.missing_zone_routes(radius).len();
        println!("  t={second}s: {missing} zone routes missing");
    }

    println!("\n{}", sim.dump(NodeId(1))?);
    println!("  {}", sim.state_summary());
    println!("  Zones converged: {}", sim.zones_converged(radius));
    Ok(sim)
}

/// Route discovery beyond the zone
///
/// Node 1 sends to the far end of an eight-node line. No zone covers both
/// ends, so the packet waits for a route request to be bordercast to a
/// node that knows the destination and for the reply to come back.
pub fn run_discovery_scenario(config: SimConfig) -> SimResult<Simulation> {
    info!("=== Running discovery scenario ===");
    let topology = TopologyBuilder::new(8).line();
    println!("{}", topology.visualize());

    let mut sim = Simulation::new(topology, config)?;
    println!("--- Step 1: zones converge ---");
    sim.run_for(CONVERGENCE_TIME);
    println!("  {}", sim.state_summary());

    println!("\n--- Step 2: node 1 sends to node 8 ---");
    let uid = sim.send_data(NodeId(1), NodeId(8), &b"beyond the zone"[..])?;
    sim.run_for(Duration::from_secs(5));
    print_fate(&sim, uid);

    println!("\n--- Step 3: a second packet uses the discovered route ---");
    let uid = sim.send_data(NodeId(1), NodeId(8), &b"again"[..])?;
    sim.run_for(Duration::from_secs(1));
    print_fate(&sim, uid);

    let stats = sim.router_stats();
    println!(
        "\n  requests originated {}, forwarded {}, replies {}",
        stats.requests_originated, stats.requests_forwarded, stats.replies_sent
    );
    Ok(sim)
}

/// Link failure on a grid
///
/// ```text
/// 1 - 2 - 3
/// |   |   |
/// 4 - 5 - 6
/// |   |   |
/// 7 - 8 - 9
/// ```
///
/// Node 5 loses every link. Zone routes through it age out and traffic
/// between the corners finds a way around.
pub fn run_link_failure_scenario(config: SimConfig) -> SimResult<Simulation> {
    info!("=== Running link failure scenario ===");
    let topology = TopologyBuilder::new(9).grid(3);
    println!("{}", topology.visualize());

    let mut sim = Simulation::new(topology, config)?;
    sim.run_for(CONVERGENCE_TIME);

    println!("--- Step 1: node 1 sends to node 9 ---");
    let uid = sim.send_data(NodeId(1), NodeId(9), &b"before"[..])?;
    sim.run_for(Duration::from_secs(3));
    print_fate(&sim, uid);

    println!("\n--- Step 2: node 5 goes silent ---");
    let cut = sim.isolate(NodeId(5))?;
    println!("  {cut} links cut");
    let hold_down = sim.config.router.hold_down_time();
    sim.run_for(hold_down + sim.config.router.periodic_update_interval * 2);
    println!("  {}", sim.state_summary());

    println!("\n--- Step 3: node 1 sends to node 9 again ---");
    let uid = sim.send_data(NodeId(1), NodeId(9), &b"after"[..])?;
    sim.run_for(Duration::from_secs(3));
    print_fate(&sim, uid);
    Ok(sim)
}

/// Random traffic over a random topology
pub fn run_random_traffic_scenario(
    nodes: u16,
    probability: f64,
    packets: u32,
    config: SimConfig,
) -> SimResult<Simulation> {
    info!(nodes, probability, packets, "=== Running random traffic scenario ===");
    let topology = TopologyBuilder::new(nodes).random(probability, config.seed);
    println!("{}", topology.visualize());

    let mut rng = StdRng::seed_from_u64(config.seed);
    let mut sim = Simulation::new(topology, config)?;
    sim.run_for(CONVERGENCE_TIME);

    for _ in 0..packets {
        let from = NodeId(rng.random_range(1..=nodes));
        let to = NodeId(rng.random_range(1..=nodes));
        if from != to {
            sim.send_data(from, to, &b"payload"[..])?;
        }
        sim.run_for(Duration::from_millis(rng.random_range(50..500)));
    }
    sim.run_for(Duration::from_secs(10));

    let stats = &sim.stats;
    println!("  {}", sim.state_summary());
    println!(
        "  sent {}, delivered {}, dropped {} (ratio {:.2})",
        stats.packets_sent,
        stats.packets_delivered,
        stats.packets_dropped,
        stats.delivery_ratio()
    );
    if let (Some(latency), Some(hops)) = (stats.average_latency(), stats.average_hops()) {
        println!("  average latency {latency:?}, average hops {hops:.2}");
    }
    Ok(sim)
}
