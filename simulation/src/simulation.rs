//! Discrete-event simulation engine for SHINGO
//!
//! Every node runs its own [`ShingoRouter`] on a virtual-clock
//! [`EventQueue`]. A shared radio medium carries frames between nodes in
//! range of each other:
//! - Control datagrams a node sends land in a shared outbox and are turned
//!   into one frame per receiver, delivered after the link delay
//! - Data packets follow the engine's forwarding decisions hop by hop
//! - Global time always jumps to the earliest pending deadline, across
//!   all engines and the medium
//!
//! Runs are deterministic for a given [`SimConfig::seed`].

use std::collections::BTreeMap;
use std::net::Ipv4Addr;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use shingo_core::{
    DataPacket, DropReason, Endpoint, EndpointError, EventQueue, InputCallbacks, InputDevice,
    InterfaceAddress, InterfaceId, PacketHeader, Route, Scheduler, Timestamp,
};
use shingo_logging::NodeContextGuard;
use shingo_routing::{OutputRoute, RouterConfig, RouterStats, RouterTimer, ShingoRouter};
use tracing::{debug, info, trace};

use crate::topology::Topology;
use crate::types::{
    Frame, NodeId, PacketFate, PacketRecord, SUBNET_PREFIX, SimError, SimEvent, SimResult,
};

/// The single radio interface of every simulated node
pub const RADIO_INTERFACE: InterfaceId = InterfaceId(1);

pub type SimRouter = ShingoRouter<RadioEndpoint, EventQueue<RouterTimer>>;

/// Configuration for the simulation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimConfig {
    /// Engine configuration shared by every node
    pub router: RouterConfig,
    /// Propagation delay of one radio hop
    pub link_delay: Duration,
    /// Probability that a single frame is lost
    pub loss_probability: f64,
    /// Seeds the medium and, unless the router config fixes one, each engine
    pub seed: u64,
    /// Log every frame at trace level
    pub trace_frames: bool,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            router: RouterConfig::default(),
            link_delay: Duration::from_millis(2),
            loss_probability: 0.0,
            seed: 42,
            trace_frames: false,
        }
    }
}

impl SimConfig {
    /// Short update intervals so small topologies converge in a few seconds
    pub fn fast() -> Self {
        Self {
            router: RouterConfig::default().with_periodic_update_interval(Duration::from_secs(1)),
            ..Self::default()
        }
    }

    pub fn with_router(mut self, router: RouterConfig) -> Self {
        self.router = router;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    pub fn with_loss(mut self, probability: f64) -> Self {
        self.loss_probability = probability;
        self
    }

    pub fn with_link_delay(mut self, delay: Duration) -> Self {
        self.link_delay = delay;
        self
    }

    pub fn validate(&self) -> SimResult<()> {
        if !(0.0..=1.0).contains(&self.loss_probability) {
            return Err(SimError::Config(format!(
                "loss probability {} outside 0..=1",
                self.loss_probability
            )));
        }
        if self.link_delay.is_zero() {
            return Err(SimError::Config("link delay must be non-zero".into()));
        }
        self.router.validate()?;
        Ok(())
    }

    /// Engine configuration of one node
    fn router_for(&self, id: NodeId) -> RouterConfig {
        let seed = self.router.rng_seed.unwrap_or(self.seed);
        self.router.clone().with_rng_seed(seed.wrapping_add(u64::from(id.0)))
    }
}

/// A control datagram waiting to enter the medium
#[derive(Debug, Clone)]
struct Transmission {
    from: NodeId,
    destination: Ipv4Addr,
    datagram: Bytes,
    ttl: u8,
}

type Outbox = Arc<Mutex<Vec<Transmission>>>;

/// Radio interface of a simulated node
///
/// Transmissions go to the simulation's shared outbox; the medium decides
/// who hears them.
#[derive(Debug, Clone)]
pub struct RadioEndpoint {
    node: NodeId,
    outbox: Outbox,
    closed: bool,
}

impl RadioEndpoint {
    fn new(node: NodeId, outbox: Outbox) -> Self {
        Self {
            node,
            outbox,
            closed: false,
        }
    }

    pub fn node(&self) -> NodeId {
        self.node
    }
}

impl Endpoint for RadioEndpoint {
    fn send_to(&mut self, destination: Ipv4Addr, datagram: Bytes, ttl: u8) -> Result<(), EndpointError> {
        if self.closed {
            return Err(EndpointError::Closed);
        }
        self.outbox.lock().push(Transmission {
            from: self.node,
            destination,
            datagram,
            ttl,
        });
        Ok(())
    }

    fn close(&mut self) {
        self.closed = true;
    }
}

/// A continuation an engine ran for a data packet
#[derive(Debug)]
enum DataAction {
    Forward {
        at: NodeId,
        route: Route,
        packet: DataPacket,
        header: PacketHeader,
    },
    Deliver {
        at: NodeId,
        packet: DataPacket,
    },
    Drop {
        at: NodeId,
        packet: DataPacket,
        reason: DropReason,
    },
}

type ActionSink = Arc<Mutex<Vec<DataAction>>>;

/// Continuations recording into `sink` on behalf of node `at`
fn make_callbacks(at: NodeId, sink: &ActionSink) -> InputCallbacks {
    let (forward_sink, deliver_sink, error_sink) = (sink.clone(), sink.clone(), sink.clone());
    InputCallbacks {
        forward: Box::new(move |route, packet, header| {
            forward_sink.lock().push(DataAction::Forward {
                at,
                route,
                packet,
                header,
            });
        }),
        local_deliver: Box::new(move |packet, _, _| {
            deliver_sink.lock().push(DataAction::Deliver { at, packet });
        }),
        error: Box::new(move |packet, _, reason| {
            error_sink.lock().push(DataAction::Drop { at, packet, reason });
        }),
    }
}

/// One simulated node
#[derive(Debug)]
pub struct SimNode {
    pub id: NodeId,
    pub address: Ipv4Addr,
    pub router: SimRouter,
}

/// Simulation statistics
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SimStats {
    /// Control frames put on the medium, one per receiver
    pub control_frames: u64,
    pub control_frames_lost: u64,
    /// Unicast control datagrams addressed to a node out of range
    pub control_unreachable: u64,
    pub packets_sent: u64,
    pub packets_delivered: u64,
    pub packets_dropped: u64,
    /// Data frames put on the medium
    pub data_frames: u64,
    pub total_hops: u64,
    pub total_delivery_latency: Duration,
}

impl SimStats {
    /// Share of sent packets that arrived
    pub fn delivery_ratio(&self) -> f64 {
        if self.packets_sent == 0 {
            return 0.0;
        }
        self.packets_delivered as f64 / self.packets_sent as f64
    }

    pub fn average_latency(&self) -> Option<Duration> {
        u32::try_from(self.packets_delivered)
            .ok()
            .filter(|&n| n > 0)
            .map(|n| self.total_delivery_latency / n)
    }

    pub fn average_hops(&self) -> Option<f64> {
        (self.packets_delivered > 0).then(|| self.total_hops as f64 / self.packets_delivered as f64)
    }
}

/// The simulation state
#[derive(Debug)]
pub struct Simulation {
    pub topology: Topology,
    pub config: SimConfig,
    nodes: BTreeMap<NodeId, SimNode>,
    medium: EventQueue<Frame>,
    outbox: Outbox,
    actions: ActionSink,
    now: Timestamp,
    rng: StdRng,
    next_uid: u64,
    packets: BTreeMap<u64, PacketRecord>,
    /// Everything that happened, in order
    pub event_log: Vec<SimEvent>,
    pub stats: SimStats,
    started: bool,
}

impl Simulation {
    /// Create one engine per topology node, interfaces up but not started
    pub fn new(topology: Topology, config: SimConfig) -> SimResult<Self> {
        topology.validate()?;
        config.validate()?;

        let outbox: Outbox = Arc::default();
        let mut nodes = BTreeMap::new();
        for id in topology.node_ids() {
            let address = id.address();
            let _context = NodeContextGuard::simulated(id);
            let mut router = ShingoRouter::new(config.router_for(id), EventQueue::new())?;
            router.notify_interface_up(
                RADIO_INTERFACE,
                InterfaceAddress::with_prefix(address, SUBNET_PREFIX),
                RadioEndpoint::new(id, outbox.clone()),
            );
            nodes.insert(id, SimNode { id, address, router });
        }

        Ok(Self {
            rng: StdRng::seed_from_u64(config.seed),
            topology,
            config,
            nodes,
            medium: EventQueue::new(),
            outbox,
            actions: Arc::default(),
            now: Timestamp::ZERO,
            next_uid: 0,
            packets: BTreeMap::new(),
            event_log: Vec::new(),
            stats: SimStats::default(),
            started: false,
        })
    }

    /// Start every engine; does nothing when already started
    pub fn start(&mut self) {
        if self.started {
            return;
        }
        self.started = true;
        for (id, node) in &mut self.nodes {
            let _context = NodeContextGuard::simulated(*id);
            node.router.start();
        }
        info!(nodes = self.nodes.len(), links = self.topology.edge_count(), "Simulation started");
        self.process_pending();
    }

    pub fn now(&self) -> Timestamp {
        self.now
    }

    pub fn node(&self, id: NodeId) -> SimResult<&SimNode> {
        self.nodes.get(&id).ok_or(SimError::UnknownNode(id))
    }

    pub fn router(&self, id: NodeId) -> SimResult<&SimRouter> {
        self.node(id).map(|n| &n.router)
    }

    pub fn nodes(&self) -> impl Iterator<Item = &SimNode> {
        self.nodes.values()
    }

    pub fn packet(&self, uid: u64) -> Option<&PacketRecord> {
        self.packets.get(&uid)
    }

    pub fn packets(&self) -> impl Iterator<Item = &PacketRecord> {
        self.packets.values()
    }

    /// Send a data packet from `from` to node `to`
    pub fn send_data(&mut self, from: NodeId, to: NodeId, payload: impl Into<Bytes>) -> SimResult<u64> {
        self.send_to_address(from, to.address(), payload)
    }

    /// Send a data packet from `from` to any address
    ///
    /// Returns the packet uid; its fate shows up in [`packet`](Self::packet)
    /// once the simulation has run long enough.
    pub fn send_to_address(
        &mut self,
        from: NodeId,
        destination: Ipv4Addr,
        payload: impl Into<Bytes>,
    ) -> SimResult<u64> {
        self.start();
        self.next_uid += 1;
        let uid = self.next_uid;
        let node = self.nodes.get_mut(&from).ok_or(SimError::UnknownNode(from))?;
        let mut packet = DataPacket::new(uid, payload);
        let mut header = PacketHeader::new(node.address, destination);

        self.packets.insert(
            uid,
            PacketRecord {
                uid,
                from,
                destination,
                sent_at: self.now,
                hops: 0,
                fate: None,
            },
        );
        self.stats.packets_sent += 1;
        self.event_log.push(SimEvent::PacketSent {
            uid,
            from,
            destination,
            time: self.now,
        });
        debug!(uid, %from, %destination, "Packet sent");

        let _context = NodeContextGuard::simulated(from);
        match node.router.route_output(&mut packet, &header, None) {
            Ok(OutputRoute::Resolved(route)) => self.transmit_data(from, route, packet, header),
            Ok(OutputRoute::Loopback(route)) => {
                // The loopback pass costs a hop, as it would in a host stack
                header.source = route.source;
                header.ttl = header.ttl.saturating_sub(1);
                let callbacks = make_callbacks(from, &self.actions);
                if !node.router.route_input(packet, header, InputDevice::Loopback, callbacks) {
                    self.finish(uid, PacketFate::Unroutable { at: from });
                }
            }
            Err(e) => {
                debug!(uid, error = %e, "No route for packet");
                self.finish(uid, PacketFate::Unroutable { at: from });
            }
        }
        self.process_pending();
        Ok(uid)
    }

    /// Run until virtual time `until`
    pub fn run_until(&mut self, until: Timestamp) {
        self.start();
        while let Some(next) = self.next_event_time().filter(|&t| t <= until) {
            self.step_to(next);
        }
        if until > self.now {
            self.medium.advance_to(until);
            for (id, node) in &mut self.nodes {
                let _context = NodeContextGuard::simulated(*id);
                node.router.advance_to(until);
            }
            self.now = until;
        }
    }

    /// Run for `duration` of virtual time
    pub fn run_for(&mut self, duration: Duration) {
        self.run_until(self.now + duration);
    }

    /// Earliest deadline across the medium and every engine
    pub fn next_event_time(&mut self) -> Option<Timestamp> {
        let medium = self.medium.next_deadline();
        self.nodes
            .values_mut()
            .filter_map(|n| n.router.next_deadline())
            .chain(medium)
            .min()
    }

    /// Advance everything to `at` and deliver the frames due then
    fn step_to(&mut self, at: Timestamp) {
        self.now = self.now.max(at);
        self.medium.advance_to(self.now);
        for (id, node) in &mut self.nodes {
            let _context = NodeContextGuard::simulated(*id);
            node.router.advance_to(at);
        }
        self.process_pending();
        while let Some((_, frame)) = self.medium.pop_due() {
            self.deliver(frame);
            self.process_pending();
        }
    }

    /// Take two nodes out of radio range
    pub fn link_down(&mut self, a: NodeId, b: NodeId) -> SimResult<bool> {
        self.node(a)?;
        self.node(b)?;
        let removed = self.topology.disconnect(a, b);
        if removed {
            info!(%a, %b, "Link down");
            self.event_log.push(SimEvent::LinkDown { a, b, time: self.now });
        }
        Ok(removed)
    }

    /// Put two nodes back in radio range
    pub fn link_up(&mut self, a: NodeId, b: NodeId) -> SimResult<()> {
        self.node(a)?;
        self.node(b)?;
        if !self.topology.are_connected(a, b) {
            self.topology.connect(a, b);
            info!(%a, %b, "Link up");
            self.event_log.push(SimEvent::LinkUp { a, b, time: self.now });
        }
        Ok(())
    }

    /// Cut every link of `id`
    pub fn isolate(&mut self, id: NodeId) -> SimResult<usize> {
        let neighbors: Vec<NodeId> = self.topology.neighbors(id).collect();
        for neighbor in &neighbors {
            self.link_down(id, *neighbor)?;
        }
        Ok(neighbors.len())
    }

    /// Valid zone route from `from` to `to`
    pub fn zone_route(&self, from: NodeId, to: NodeId) -> SimResult<Option<Route>> {
        Ok(self
            .router(from)?
            .proactive_table()
            .lookup(to.address())
            .filter(|e| e.is_valid() && !e.is_self())
            .map(|e| e.route()))
    }

    /// Pairs `(node, peer)` where `peer` is within `radius` hops of `node`
    /// but `node` holds no zone route to it
    pub fn missing_zone_routes(&self, radius: u32) -> Vec<(NodeId, NodeId)> {
        let mut missing = Vec::new();
        for node in self.nodes.values() {
            for peer in self.topology.zone_of(node.id, radius) {
                let known = node
                    .router
                    .proactive_table()
                    .lookup(peer.address())
                    .is_some_and(|e| e.is_valid());
                if !known {
                    missing.push((node.id, peer));
                }
            }
        }
        missing
    }

    /// Whether every node knows every other node within `radius` hops
    pub fn zones_converged(&self, radius: u32) -> bool {
        self.missing_zone_routes(radius).is_empty()
    }

    /// Engine counters summed over every node
    pub fn router_stats(&self) -> RouterStats {
        self.nodes.values().map(|n| n.router.stats()).fold(RouterStats::default(), |mut total, s| {
            total.control_sent += s.control_sent;
            total.control_received += s.control_received;
            total.malformed_received += s.malformed_received;
            total.zone_updates_sent += s.zone_updates_sent;
            total.requests_originated += s.requests_originated;
            total.requests_forwarded += s.requests_forwarded;
            total.replies_sent += s.replies_sent;
            total.discoveries_failed += s.discoveries_failed;
            total
        })
    }

    /// Table dump of one node
    pub fn dump(&self, id: NodeId) -> SimResult<String> {
        Ok(self.router(id)?.dump_tables())
    }

    /// One-line summary of the current state
    pub fn state_summary(&self) -> String {
        let zone_routes: usize = self.nodes.values().map(|n| n.router.proactive_table().len()).sum();
        let reactive_routes: usize = self.nodes.values().map(|n| n.router.reactive_table().len()).sum();
        let in_flight = self.packets.values().filter(|p| p.fate.is_none()).count();
        format!(
            "Time {}: {} nodes, {} zone routes, {} discovered routes, {} packets in flight",
            self.now,
            self.nodes.len(),
            zone_routes,
            reactive_routes,
            in_flight
        )
    }

    /// Drain the outbox and the data continuations until both are empty
    fn process_pending(&mut self) {
        loop {
            let transmissions = std::mem::take(&mut *self.outbox.lock());
            let actions = std::mem::take(&mut *self.actions.lock());
            if transmissions.is_empty() && actions.is_empty() {
                break;
            }
            for transmission in transmissions {
                self.broadcast_control(transmission);
            }
            for action in actions {
                self.handle_action(action);
            }
        }
    }

    /// Put a control datagram on the medium for every node that hears it
    fn broadcast_control(&mut self, transmission: Transmission) {
        let Transmission {
            from,
            destination,
            datagram,
            ttl,
        } = transmission;
        let subnet = InterfaceAddress::with_prefix(from.address(), SUBNET_PREFIX);
        let receivers: Vec<NodeId> = if subnet.is_broadcast_for(destination) {
            self.topology.neighbors(from).collect()
        } else {
            match NodeId::from_address(destination).filter(|to| self.topology.are_connected(from, *to)) {
                Some(to) => vec![to],
                None => {
                    trace!(%from, %destination, "Unicast control out of range");
                    self.stats.control_unreachable += 1;
                    return;
                }
            }
        };

        for to in receivers {
            if self.frame_lost() {
                self.stats.control_frames_lost += 1;
                continue;
            }
            if self.config.trace_frames {
                trace!(%from, %to, len = datagram.len(), ttl, "Control frame");
            }
            self.stats.control_frames += 1;
            self.medium.schedule(
                self.config.link_delay,
                Frame::Control {
                    from,
                    to,
                    datagram: datagram.clone(),
                    ttl,
                },
            );
        }
    }

    fn frame_lost(&mut self) -> bool {
        self.config.loss_probability > 0.0 && self.rng.random::<f64>() < self.config.loss_probability
    }

    fn deliver(&mut self, frame: Frame) {
        let receiver = frame.receiver();
        let Some(node) = self.nodes.get_mut(&receiver) else {
            return;
        };
        let _context = NodeContextGuard::simulated(receiver);
        match frame {
            Frame::Control {
                from, datagram, ttl, ..
            } => {
                node.router.recv_control(RADIO_INTERFACE, from.address(), &datagram, ttl);
            }
            Frame::Data { packet, header, .. } => {
                let uid = packet.uid();
                let callbacks = make_callbacks(receiver, &self.actions);
                let input = InputDevice::Interface(RADIO_INTERFACE);
                if !node.router.route_input(packet, header, input, callbacks) {
                    self.finish(uid, PacketFate::Unroutable { at: receiver });
                }
            }
        }
    }

    fn handle_action(&mut self, action: DataAction) {
        match action {
            DataAction::Forward {
                at,
                route,
                packet,
                mut header,
            } => {
                if header.ttl <= 1 {
                    self.finish(packet.uid(), PacketFate::TtlExpired { at });
                    return;
                }
                header.ttl -= 1;
                self.transmit_data(at, route, packet, header);
            }
            DataAction::Deliver { at, packet } => {
                let hops = self.packets.get(&packet.uid()).map_or(0, |p| p.hops);
                self.finish(packet.uid(), PacketFate::Delivered { at, hops });
            }
            DataAction::Drop { at, packet, reason } => {
                self.finish(packet.uid(), PacketFate::Dropped { at, reason });
            }
        }
    }

    /// Send a data packet one hop along `route`
    fn transmit_data(&mut self, at: NodeId, route: Route, packet: DataPacket, header: PacketHeader) {
        let uid = packet.uid();
        let next_hop = route.gateway;
        let Some(to) = NodeId::from_address(next_hop).filter(|to| self.topology.are_connected(at, *to)) else {
            debug!(uid, %at, %next_hop, "Next hop out of range");
            self.finish(uid, PacketFate::LinkLost { at, next_hop });
            return;
        };
        if self.frame_lost() {
            debug!(uid, %at, %next_hop, "Data frame lost");
            self.finish(uid, PacketFate::LinkLost { at, next_hop });
            return;
        }

        if let Some(record) = self.packets.get_mut(&uid) {
            record.hops += 1;
        }
        self.stats.data_frames += 1;
        self.event_log.push(SimEvent::PacketForwarded {
            uid,
            at,
            next_hop,
            time: self.now,
        });
        trace!(uid, %at, %to, "Data frame");
        self.medium.schedule(
            self.config.link_delay,
            Frame::Data {
                from: at,
                to,
                packet,
                header,
            },
        );
    }

    /// Record the final fate of a packet; later fates are ignored
    fn finish(&mut self, uid: u64, fate: PacketFate) {
        let Some(record) = self.packets.get_mut(&uid) else {
            return;
        };
        if record.fate.is_some() {
            return;
        }
        record.fate = Some((fate, self.now));
        match fate {
            PacketFate::Delivered { at, hops } => {
                self.stats.packets_delivered += 1;
                self.stats.total_hops += u64::from(hops);
                self.stats.total_delivery_latency += self.now.saturating_duration_since(record.sent_at);
                info!(uid, %at, hops, "Packet delivered");
            }
            _ => {
                self.stats.packets_dropped += 1;
                info!(uid, ?fate, "Packet lost");
            }
        }
        self.event_log.push(SimEvent::PacketFinished {
            uid,
            fate,
            time: self.now,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::topology::{TopologyBuilder, from_edges};

    fn make_sim(topology: Topology) -> Simulation {
        Simulation::new(topology, SimConfig::fast()).unwrap()
    }

    #[test]
    fn test_new_rejects_bad_config() {
        let topology = TopologyBuilder::new(2).line();
        let result = Simulation::new(topology.clone(), SimConfig::default().with_loss(1.5));
        assert!(matches!(result, Err(SimError::Config(_))));
        let result = Simulation::new(topology, SimConfig::default().with_link_delay(Duration::ZERO));
        assert!(matches!(result, Err(SimError::Config(_))));
    }

    #[test]
    fn test_nodes_get_subnet_addresses() {
        let sim = make_sim(TopologyBuilder::new(3).line());
        let node = sim.node(NodeId(2)).unwrap();
        assert_eq!(node.address, Ipv4Addr::new(10, 0, 0, 2));
        assert_eq!(node.router.main_address(), Some(node.address));
        assert!(matches!(sim.node(NodeId(9)), Err(SimError::UnknownNode(_))));
    }

    #[test]
    fn test_neighbors_learn_each_other() {
        let mut sim = make_sim(TopologyBuilder::new(2).line());
        sim.run_for(Duration::from_millis(500));

        let route = sim.zone_route(NodeId(1), NodeId(2)).unwrap().unwrap();
        assert_eq!(route.gateway, NodeId(2).address());
        assert!(sim.zone_route(NodeId(2), NodeId(1)).unwrap().is_some());
        assert!(sim.stats.control_frames > 0);
    }

    #[test]
    fn test_broadcast_reaches_only_neighbors() {
        let mut sim = make_sim(TopologyBuilder::new(3).line());
        sim.start();
        sim.outbox.lock().push(Transmission {
            from: NodeId(1),
            destination: Ipv4Addr::new(10, 0, 255, 255),
            datagram: Bytes::from_static(&[0]),
            ttl: 1,
        });
        let before = sim.stats.control_frames;
        sim.process_pending();
        assert_eq!(sim.stats.control_frames, before + 1);
    }

    #[test]
    fn test_unicast_out_of_range_is_counted() {
        let mut sim = make_sim(TopologyBuilder::new(3).line());
        sim.outbox.lock().push(Transmission {
            from: NodeId(1),
            destination: NodeId(3).address(),
            datagram: Bytes::from_static(&[0]),
            ttl: 1,
        });
        sim.process_pending();
        assert_eq!(sim.stats.control_unreachable, 1);
    }

    #[test]
    fn test_zone_delivery_after_convergence() {
        let mut sim = make_sim(TopologyBuilder::new(4).line());
        sim.run_for(Duration::from_secs(3));

        let uid = sim.send_data(NodeId(1), NodeId(3), &b"hello"[..]).unwrap();
        sim.run_for(Duration::from_millis(100));

        let record = sim.packet(uid).unwrap();
        assert_eq!(
            record.fate.map(|(fate, _)| fate),
            Some(PacketFate::Delivered { at: NodeId(3), hops: 2 })
        );
        assert_eq!(record.latency(), Some(Duration::from_millis(4)));
    }

    #[test]
    fn test_unknown_destination_fails_discovery() {
        let config = SimConfig::fast().with_router(
            RouterConfig::default()
                .with_periodic_update_interval(Duration::from_secs(1))
                .with_rreq_retries(0),
        );
        let mut sim = Simulation::new(TopologyBuilder::new(3).line(), config).unwrap();
        sim.run_for(Duration::from_secs(1));

        let uid = sim
            .send_to_address(NodeId(1), Ipv4Addr::new(10, 0, 9, 9), Bytes::new())
            .unwrap();
        sim.run_for(Duration::from_secs(2));

        assert_eq!(
            sim.packet(uid).unwrap().fate.map(|(fate, _)| fate),
            Some(PacketFate::Dropped {
                at: NodeId(1),
                reason: DropReason::DiscoveryFailed
            })
        );
        assert_eq!(sim.router_stats().discoveries_failed, 1);
        assert_eq!(sim.stats.packets_dropped, 1);
    }

    #[test]
    fn test_link_down_loses_next_hop() {
        let mut sim = make_sim(from_edges(&[(1, 2), (2, 3)]));
        sim.run_for(Duration::from_secs(2));
        assert!(sim.link_down(NodeId(1), NodeId(2)).unwrap());
        assert!(!sim.link_down(NodeId(1), NodeId(2)).unwrap());

        let uid = sim.send_data(NodeId(1), NodeId(3), Bytes::new()).unwrap();
        assert!(matches!(
            sim.packet(uid).unwrap().fate,
            Some((PacketFate::LinkLost { at: NodeId(1), .. }, _))
        ));
        assert!(sim.event_log.iter().any(|e| matches!(e, SimEvent::LinkDown { .. })));
    }

    #[test]
    fn test_run_until_advances_every_clock() {
        let mut sim = make_sim(TopologyBuilder::new(3).line());
        sim.run_until(Timestamp::from_millis(750));
        assert_eq!(sim.now(), Timestamp::from_millis(750));
        for node in sim.nodes() {
            assert_eq!(node.router.now(), Timestamp::from_millis(750));
        }
    }

    #[test]
    fn test_stats_averages() {
        let stats = SimStats {
            packets_sent: 4,
            packets_delivered: 2,
            total_hops: 6,
            total_delivery_latency: Duration::from_millis(20),
            ..SimStats::default()
        };
        assert_eq!(stats.delivery_ratio(), 0.5);
        assert_eq!(stats.average_hops(), Some(3.0));
        assert_eq!(stats.average_latency(), Some(Duration::from_millis(10)));
        assert_eq!(SimStats::default().average_latency(), None);
    }
}
