//! Radio topologies for the SHINGO simulation
//!
//! A [`Topology`] is an undirected graph of nodes in radio range of each
//! other. It can be built in several shapes:
//! - Line: each node hears its predecessor and successor
//! - Ring: a line closed into a loop
//! - Grid: nodes on a rectangle, four-neighborhood
//! - Star: one hub in range of everyone
//! - Random: seeded connection probability, patched to stay connected
//! - Custom: built from an edge list
//!
//! Links can be cut and restored while a simulation runs.

use std::collections::{BTreeMap, BTreeSet, VecDeque};

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::types::{NodeId, SimError, SimResult};

/// An undirected radio topology
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Topology {
    adjacency: BTreeMap<NodeId, BTreeSet<NodeId>>,
}

impl Topology {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_node(&mut self, id: NodeId) {
        self.adjacency.entry(id).or_default();
    }

    /// Put two nodes in radio range of each other
    pub fn connect(&mut self, a: NodeId, b: NodeId) {
        if a == b {
            return;
        }
        self.adjacency.entry(a).or_default().insert(b);
        self.adjacency.entry(b).or_default().insert(a);
    }

    /// Take two nodes out of range, returning whether they were linked
    pub fn disconnect(&mut self, a: NodeId, b: NodeId) -> bool {
        let removed = self.adjacency.get_mut(&a).is_some_and(|n| n.remove(&b));
        if let Some(neighbors) = self.adjacency.get_mut(&b) {
            neighbors.remove(&a);
        }
        removed
    }

    pub fn contains(&self, id: NodeId) -> bool {
        self.adjacency.contains_key(&id)
    }

    pub fn neighbors(&self, id: NodeId) -> impl Iterator<Item = NodeId> + '_ {
        self.adjacency.get(&id).into_iter().flatten().copied()
    }

    pub fn are_connected(&self, a: NodeId, b: NodeId) -> bool {
        self.adjacency.get(&a).is_some_and(|n| n.contains(&b))
    }

    pub fn node_ids(&self) -> Vec<NodeId> {
        self.adjacency.keys().copied().collect()
    }

    pub fn node_count(&self) -> usize {
        self.adjacency.len()
    }

    pub fn edge_count(&self) -> usize {
        self.adjacency.values().map(BTreeSet::len).sum::<usize>() / 2
    }

    /// Hop distance from `from` to every reachable node, `from` included
    pub fn distances_from(&self, from: NodeId) -> BTreeMap<NodeId, u32> {
        let mut distances = BTreeMap::new();
        if !self.contains(from) {
            return distances;
        }
        distances.insert(from, 0);
        let mut frontier = VecDeque::from([from]);
        while let Some(node) = frontier.pop_front() {
            let hops = distances[&node];
            for neighbor in self.neighbors(node) {
                if !distances.contains_key(&neighbor) {
                    distances.insert(neighbor, hops + 1);
                    frontier.push_back(neighbor);
                }
            }
        }
        distances
    }

    /// Shortest hop count between two nodes
    pub fn hop_distance(&self, a: NodeId, b: NodeId) -> Option<u32> {
        self.distances_from(a).get(&b).copied()
    }

    /// Nodes at most `radius` hops from `center`, `center` excluded
    pub fn zone_of(&self, center: NodeId, radius: u32) -> BTreeSet<NodeId> {
        self.distances_from(center)
            .into_iter()
            .filter(|&(node, hops)| node != center && hops <= radius)
            .map(|(node, _)| node)
            .collect()
    }

    pub fn is_connected(&self) -> bool {
        match self.adjacency.keys().next() {
            Some(&first) => self.distances_from(first).len() == self.node_count(),
            None => true,
        }
    }

    /// Check that ids are usable as simulation addresses
    pub fn validate(&self) -> SimResult<()> {
        if self.adjacency.is_empty() {
            return Err(SimError::InvalidTopology("no nodes".into()));
        }
        if let Some(bad) = self.adjacency.keys().find(|id| id.0 == 0 || id.0 == u16::MAX) {
            return Err(SimError::InvalidTopology(format!("{bad} has no valid address")));
        }
        Ok(())
    }

    /// ASCII listing of the adjacency
    pub fn visualize(&self) -> String {
        let mut output = String::from("Radio topology:\n");
        output.push_str(&format!("  Nodes: {}\n", self.node_count()));
        output.push_str(&format!("  Links: {}\n\n", self.edge_count()));
        for (node, neighbors) in &self.adjacency {
            let names: Vec<String> = neighbors.iter().map(ToString::to_string).collect();
            output.push_str(&format!("  {} ({}) -> [{}]\n", node, node.address(), names.join(", ")));
        }
        output
    }
}

/// Builder for the common topology shapes
pub struct TopologyBuilder {
    node_count: u16,
}

impl TopologyBuilder {
    /// A builder for nodes `1..=node_count`
    pub fn new(node_count: u16) -> Self {
        Self {
            node_count: node_count.min(u16::MAX - 1),
        }
    }

    fn nodes(&self) -> Topology {
        let mut topology = Topology::new();
        for id in NodeId::range(self.node_count) {
            topology.add_node(id);
        }
        topology
    }

    /// 1 - 2 - 3 - ... - n
    pub fn line(self) -> Topology {
        let mut topology = self.nodes();
        for i in 1..self.node_count {
            topology.connect(NodeId(i), NodeId(i + 1));
        }
        topology
    }

    /// A line whose ends are in range of each other
    pub fn ring(self) -> Topology {
        let count = self.node_count;
        let mut topology = self.line();
        if count > 2 {
            topology.connect(NodeId(count), NodeId(1));
        }
        topology
    }

    /// Row-major grid `columns` wide; the last row may be partial
    pub fn grid(self, columns: u16) -> Topology {
        let columns = columns.max(1);
        let mut topology = self.nodes();
        for i in 1..=self.node_count {
            let index = i - 1;
            if (index + 1) % columns != 0 && i < self.node_count {
                topology.connect(NodeId(i), NodeId(i + 1));
            }
            if let Some(below) = i.checked_add(columns).filter(|&b| b <= self.node_count) {
                topology.connect(NodeId(i), NodeId(below));
            }
        }
        topology
    }

    /// Node 1 in range of every other node
    pub fn star(self) -> Topology {
        let mut topology = self.nodes();
        for i in 2..=self.node_count {
            topology.connect(NodeId(1), NodeId(i));
        }
        topology
    }

    /// Each pair linked with `probability`, then chained together until
    /// the whole graph is connected
    pub fn random(self, probability: f64, seed: u64) -> Topology {
        let mut rng = StdRng::seed_from_u64(seed);
        let mut topology = self.nodes();
        for i in 1..=self.node_count {
            for j in (i + 1)..=self.node_count {
                if rng.random::<f64>() < probability {
                    topology.connect(NodeId(i), NodeId(j));
                }
            }
        }

        // Link every stray component to a random node already reached
        let mut reached = topology.distances_from(NodeId(1));
        for id in NodeId::range(self.node_count) {
            if reached.contains_key(&id) {
                continue;
            }
            let anchors: Vec<NodeId> = reached.keys().copied().collect();
            let anchor = anchors[rng.random_range(0..anchors.len())];
            topology.connect(id, anchor);
            reached = topology.distances_from(NodeId(1));
        }
        topology
    }
}

/// Build a topology from an edge list of node numbers
pub fn from_edges(edges: &[(u16, u16)]) -> Topology {
    let mut topology = Topology::new();
    for &(a, b) in edges {
        topology.add_node(NodeId(a));
        topology.add_node(NodeId(b));
        topology.connect(NodeId(a), NodeId(b));
    }
    topology
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_line_topology() {
        let topology = TopologyBuilder::new(5).line();
        assert_eq!(topology.node_count(), 5);
        assert_eq!(topology.edge_count(), 4);
        assert!(topology.are_connected(NodeId(2), NodeId(3)));
        assert!(!topology.are_connected(NodeId(1), NodeId(3)));
        assert_eq!(topology.hop_distance(NodeId(1), NodeId(5)), Some(4));
    }

    #[test]
    fn test_ring_topology() {
        let topology = TopologyBuilder::new(6).ring();
        assert_eq!(topology.edge_count(), 6);
        assert!(topology.are_connected(NodeId(6), NodeId(1)));
        assert_eq!(topology.hop_distance(NodeId(1), NodeId(4)), Some(3));
        assert_eq!(topology.hop_distance(NodeId(1), NodeId(5)), Some(2));
    }

    #[test]
    fn test_grid_topology() {
        // 1 2 3
        // 4 5 6
        // 7
        let topology = TopologyBuilder::new(7).grid(3);
        assert!(topology.are_connected(NodeId(1), NodeId(2)));
        assert!(!topology.are_connected(NodeId(3), NodeId(4)));
        assert!(topology.are_connected(NodeId(3), NodeId(6)));
        assert!(topology.are_connected(NodeId(4), NodeId(7)));
        assert!(!topology.are_connected(NodeId(6), NodeId(7)));
        assert_eq!(topology.edge_count(), 8);
        assert!(topology.is_connected());
    }

    #[test]
    fn test_star_topology() {
        let topology = TopologyBuilder::new(5).star();
        assert_eq!(topology.neighbors(NodeId(1)).count(), 4);
        assert_eq!(topology.hop_distance(NodeId(2), NodeId(5)), Some(2));
    }

    #[test]
    fn test_random_topology_is_connected_and_seeded() {
        let a = TopologyBuilder::new(12).random(0.1, 7);
        let b = TopologyBuilder::new(12).random(0.1, 7);
        assert!(a.is_connected());
        assert_eq!(a, b);
    }

    #[test]
    fn test_zone_of() {
        let topology = TopologyBuilder::new(6).line();
        let zone = topology.zone_of(NodeId(3), 2);
        assert_eq!(
            zone.into_iter().collect::<Vec<_>>(),
            vec![NodeId(1), NodeId(2), NodeId(4), NodeId(5)]
        );
    }

    #[test]
    fn test_disconnect() {
        let mut topology = from_edges(&[(1, 2), (2, 3)]);
        assert!(topology.disconnect(NodeId(2), NodeId(3)));
        assert!(!topology.disconnect(NodeId(2), NodeId(3)));
        assert!(!topology.is_connected());
        assert_eq!(topology.hop_distance(NodeId(1), NodeId(3)), None);
    }

    #[test]
    fn test_validate() {
        assert!(Topology::new().validate().is_err());
        assert!(from_edges(&[(0, 1)]).validate().is_err());
        from_edges(&[(1, 2)]).validate().unwrap();
    }
}
