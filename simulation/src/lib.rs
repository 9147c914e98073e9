//! # SHINGO Simulation
//!
//! Discrete-event simulation of hybrid zone routing over a shared radio
//! medium.
//!
//! ## Overview
//!
//! Each simulated node runs an unmodified [`ShingoRouter`](shingo_routing::ShingoRouter)
//! on its own virtual clock. The simulation owns the medium: it decides
//! which nodes hear a transmission, delays frames by the link delay and
//! loses them with a configurable probability. Key features:
//!
//! - **Topologies**: line, ring, grid, star, seeded random, or an edge list
//! - **Zone maintenance**: periodic and triggered zone updates between neighbors
//! - **Route discovery**: packets beyond the zone trigger bordercast requests
//! - **Data plane**: packets follow each engine's forwarding decision hop by hop
//! - **Link dynamics**: links can be cut and restored mid-run
//!
//! ## Architecture
//!
//! - **Types** (`types.rs`): node ids and addressing, frames, packet fates
//! - **Topology** (`topology.rs`): radio graphs and hop distances
//! - **Simulation** (`simulation.rs`): the medium and the event loop
//! - **Scenarios** (`scenarios.rs`): narrated, ready-made runs
//!
//! ## Example
//!
//! ```rust,ignore
//! use std::time::Duration;
//! use shingo_simulation::*;
//!
//! // 1 - 2 - 3 - 4 - 5 - 6 - 7 - 8
//! let topology = TopologyBuilder::new(8).line();
//! let mut sim = Simulation::new(topology, SimConfig::fast())?;
//!
//! // Let the zones settle, then send past the zone radius
//! sim.run_for(Duration::from_secs(5));
//! let uid = sim.send_data(NodeId(1), NodeId(8), b"hello".to_vec())?;
//! sim.run_for(Duration::from_secs(3));
//!
//! assert!(sim.packet(uid).unwrap().fate.unwrap().0.is_delivered());
//! ```

pub mod scenarios;
pub mod simulation;
pub mod topology;
pub mod types;

#[cfg(test)]
mod integration_scenarios;

// Re-export main types
pub use simulation::{RADIO_INTERFACE, RadioEndpoint, SimConfig, SimNode, SimRouter, SimStats, Simulation};
pub use topology::{Topology, TopologyBuilder, from_edges};
pub use types::{Frame, NodeId, PacketFate, PacketRecord, SUBNET_PREFIX, SimError, SimEvent, SimResult};
