//! The hybrid routing engine
//!
//! [`ShingoRouter`] owns both proactive tables, the reactive table, both
//! packet queues and the request-id cache. It is driven by three kinds of
//! input, all delivered by the host through `&mut self` methods:
//!
//! - control datagrams received on an interface ([`ShingoRouter::recv_control`])
//! - data packets needing a route ([`ShingoRouter::route_output`],
//!   [`ShingoRouter::route_input`])
//! - timers coming due ([`ShingoRouter::handle_timer`])
//!
//! The engine never reads a clock or touches a socket: time and timers come
//! from the injected [`Scheduler`], transmissions go through each
//! interface's [`Endpoint`](shingo_core::Endpoint).

mod discovery;
mod iarp;
mod input;
mod interface;
mod output;
mod timers;

use std::collections::BTreeMap;
use std::net::Ipv4Addr;
use std::time::Duration;

use bytes::Bytes;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use shingo_core::{Endpoint, InterfaceId, Route, Scheduler, TimerId, Timestamp};
use tracing::{trace, warn};

use crate::config::RouterConfig;
use crate::error::RoutingResult;
use crate::id_cache::IdCache;
use crate::proactive::ProactiveTable;
use crate::queue::{PacketQueue, RequestQueue};
use crate::reactive::ReactiveTable;
use crate::wire::ControlMessage;

pub use interface::Interface;
pub use timers::RouterTimer;

/// Result of [`ShingoRouter::route_output`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputRoute {
    /// A zone route exists; send the packet along it
    Resolved(Route),
    /// No route yet; the packet was tagged and must be looped back into
    /// [`ShingoRouter::route_input`] with [`InputDevice::Loopback`](shingo_core::InputDevice)
    Loopback(Route),
}

impl OutputRoute {
    pub fn route(&self) -> &Route {
        match self {
            Self::Resolved(route) | Self::Loopback(route) => route,
        }
    }

    pub fn is_loopback(&self) -> bool {
        matches!(self, Self::Loopback(_))
    }
}

/// Control traffic counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RouterStats {
    pub control_sent: u64,
    pub control_received: u64,
    pub malformed_received: u64,
    pub zone_updates_sent: u64,
    pub requests_originated: u64,
    pub requests_forwarded: u64,
    pub replies_sent: u64,
    pub discoveries_failed: u64,
}

/// Sequence number `a` is newer than `b` under wrap-around
pub(crate) fn seq_newer(a: u32, b: u32) -> bool {
    (a.wrapping_sub(b) as i32) > 0
}

/// Sequence number `a` is at least as new as `b` under wrap-around
pub(crate) fn seq_at_least(a: u32, b: u32) -> bool {
    (a.wrapping_sub(b) as i32) >= 0
}

/// Hybrid zone routing engine for one node
pub struct ShingoRouter<E: Endpoint, S: Scheduler<RouterTimer>> {
    config: RouterConfig,
    scheduler: S,
    interfaces: BTreeMap<InterfaceId, Interface<E>>,
    main_address: Option<Ipv4Addr>,

    /// Forwarding zone table
    proactive: ProactiveTable,
    /// Changes waiting for their settling time
    advertise: ProactiveTable,
    reactive: ReactiveTable,

    queue: PacketQueue,
    request_queue: RequestQueue,
    id_cache: IdCache,

    request_timers: BTreeMap<Ipv4Addr, TimerId>,
    ack_timers: BTreeMap<Ipv4Addr, TimerId>,
    /// Requests waiting for the next rate-limit budget
    postponed_requests: BTreeMap<Ipv4Addr, TimerId>,
    periodic_timer: Option<TimerId>,
    rate_limit_timer: Option<TimerId>,

    rreq_count: u32,
    seq_no: u32,
    request_id: u32,
    rng: StdRng,
    stats: RouterStats,
}

impl<E: Endpoint, S: Scheduler<RouterTimer>> ShingoRouter<E, S> {
    /// Create an engine; call [`start`](Self::start) once interfaces are up
    pub fn new(config: RouterConfig, scheduler: S) -> RoutingResult<Self> {
        config.validate()?;
        let rng = match config.rng_seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_os_rng(),
        };
        let hold_down = config.hold_down_time();
        Ok(Self {
            queue: PacketQueue::new(
                config.max_queue_len,
                config.max_queue_len_per_dst,
                config.max_queue_time,
            ),
            request_queue: RequestQueue::new(config.reactive_queue_len, config.max_queue_time),
            id_cache: IdCache::new(config.path_discovery_time()),
            proactive: ProactiveTable::new(hold_down),
            advertise: ProactiveTable::new(hold_down),
            reactive: ReactiveTable::new(config.bad_link_lifetime),
            interfaces: BTreeMap::new(),
            main_address: None,
            request_timers: BTreeMap::new(),
            ack_timers: BTreeMap::new(),
            postponed_requests: BTreeMap::new(),
            periodic_timer: None,
            rate_limit_timer: None,
            rreq_count: 0,
            seq_no: 0,
            request_id: 0,
            rng,
            stats: RouterStats::default(),
            config,
            scheduler,
        })
    }

    /// Apply queue bounds and hold-down times, then arm the first periodic
    /// update and the request rate-limit timer
    pub fn start(&mut self) {
        self.queue
            .set_bounds(self.config.max_queue_len, self.config.max_queue_len_per_dst);
        self.queue.set_timeout(self.config.max_queue_time);
        let hold_down = self.config.hold_down_time();
        self.proactive.set_hold_down(hold_down);
        self.advertise.set_hold_down(hold_down);

        let first = Duration::from_micros(self.rng.random_range(0..=1000));
        if let Some(old) = self.periodic_timer.replace(self.scheduler.schedule(first, RouterTimer::PeriodicUpdate)) {
            self.scheduler.cancel(old);
        }
        if let Some(old) = self
            .rate_limit_timer
            .replace(self.scheduler.schedule(Duration::from_secs(1), RouterTimer::RateLimitReset))
        {
            self.scheduler.cancel(old);
        }
    }

    pub fn config(&self) -> &RouterConfig {
        &self.config
    }

    pub fn scheduler(&self) -> &S {
        &self.scheduler
    }

    pub fn scheduler_mut(&mut self) -> &mut S {
        &mut self.scheduler
    }

    pub fn now(&self) -> Timestamp {
        self.scheduler.now()
    }

    /// First address registered, used to tag log lines
    pub fn main_address(&self) -> Option<Ipv4Addr> {
        self.main_address
    }

    pub fn proactive_table(&self) -> &ProactiveTable {
        &self.proactive
    }

    pub fn advertise_table(&self) -> &ProactiveTable {
        &self.advertise
    }

    pub fn reactive_table(&self) -> &ReactiveTable {
        &self.reactive
    }

    pub fn reactive_table_mut(&mut self) -> &mut ReactiveTable {
        &mut self.reactive
    }

    pub fn stats(&self) -> RouterStats {
        self.stats
    }

    /// Own destination sequence number used in route replies
    pub fn seq_no(&self) -> u32 {
        self.seq_no
    }

    /// Packets waiting for route discovery
    pub fn discovery_queue_len(&mut self) -> usize {
        let now = self.now();
        self.request_queue.size(now)
    }

    /// Packets waiting in the zone queue
    pub fn zone_queue_len(&mut self) -> usize {
        let now = self.now();
        self.queue.size(now)
    }

    /// Whether a route request retry is armed for `dst`
    pub fn has_request_timer(&self, dst: Ipv4Addr) -> bool {
        self.request_timers
            .get(&dst)
            .is_some_and(|id| self.scheduler.is_pending(*id))
    }

    /// Whether a rate-limited route request for `dst` is waiting to go out
    pub fn has_postponed_request(&self, dst: Ipv4Addr) -> bool {
        self.postponed_requests
            .get(&dst)
            .is_some_and(|id| self.scheduler.is_pending(*id))
    }

    /// Whether an acknowledgment is awaited from `neighbor`
    pub fn has_ack_timer(&self, neighbor: Ipv4Addr) -> bool {
        self.ack_timers
            .get(&neighbor)
            .is_some_and(|id| self.scheduler.is_pending(*id))
    }

    /// Decode and dispatch a control datagram received on `interface`
    ///
    /// `ttl` is the IP time-to-live the datagram arrived with.
    pub fn recv_control(&mut self, interface: InterfaceId, sender: Ipv4Addr, datagram: &[u8], ttl: u8) {
        if !self.interfaces.contains_key(&interface) {
            warn!(%interface, %sender, "Control datagram on unknown interface");
            return;
        }
        if self.is_my_own_address(sender) {
            trace!(%sender, "Ignoring own control datagram");
            return;
        }
        let message = match ControlMessage::decode(datagram, self.config.framing) {
            Ok(message) => message,
            Err(e) => {
                self.stats.malformed_received += 1;
                warn!(%sender, error = %e, "Dropping malformed control datagram");
                return;
            }
        };
        self.stats.control_received += 1;
        self.update_route_to_neighbor(sender, interface);

        match message {
            ControlMessage::Iarp(records) => self.recv_iarp(&records, interface, sender),
            ControlMessage::Request(rreq) => self.recv_request(rreq, interface, sender, ttl),
            ControlMessage::Reply(rrep) => self.recv_reply(rrep, interface, sender),
            ControlMessage::ReplyAck => self.recv_reply_ack(sender),
        }
    }

    /// Human-readable dump of the forwarding tables
    pub fn print_routing_table(&self) -> String {
        let now = self.now();
        let mut out = format!(
            "Node: {} Time: {}",
            self.main_address.map_or_else(|| "-".to_string(), |a| a.to_string()),
            now
        );
        out.push_str(&self.proactive.dump("Zone routing table", now));
        out.push_str(&self.reactive.dump(now));
        out
    }

    /// Dump of every table including pending advertisements
    pub fn dump_tables(&self) -> String {
        let mut out = self.print_routing_table();
        out.push_str(&self.advertise.dump("Pending advertisements", self.now()));
        out
    }

    /// Encode and send a control message immediately
    fn send_control(&mut self, interface: InterfaceId, destination: Ipv4Addr, message: &ControlMessage, ttl: u8) {
        let datagram = message.encode(self.config.framing);
        self.transmit(interface, destination, datagram, ttl);
    }

    /// Encode and send a control message after `jitter`
    fn send_control_later(
        &mut self,
        interface: InterfaceId,
        destination: Ipv4Addr,
        message: &ControlMessage,
        ttl: u8,
        jitter: Duration,
    ) {
        let datagram = message.encode(self.config.framing);
        self.scheduler.schedule(
            jitter,
            RouterTimer::Transmit {
                interface,
                destination,
                datagram,
                ttl,
            },
        );
    }

    fn transmit(&mut self, interface: InterfaceId, destination: Ipv4Addr, datagram: Bytes, ttl: u8) {
        let Some(iface) = self.interfaces.get_mut(&interface) else {
            trace!(%interface, %destination, "Interface gone, dropping control datagram");
            return;
        };
        match iface.endpoint_mut().send_to(destination, datagram, ttl) {
            Ok(()) => self.stats.control_sent += 1,
            Err(e) => warn!(%interface, %destination, error = %e, "Control transmission failed"),
        }
    }

    /// Uniform jitter of 0..=`max_ms` milliseconds
    fn jitter_ms(&mut self, max_ms: u64) -> Duration {
        Duration::from_millis(self.rng.random_range(0..=max_ms))
    }

    /// Uniform jitter of 0..=`max_us` microseconds
    fn jitter_us(&mut self, max_us: u64) -> Duration {
        Duration::from_micros(self.rng.random_range(0..=max_us))
    }
}

impl<E: Endpoint, S: Scheduler<RouterTimer>> std::fmt::Debug for ShingoRouter<E, S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ShingoRouter")
            .field("main_address", &self.main_address)
            .field("interfaces", &self.interfaces.len())
            .field("zone_routes", &self.proactive.len())
            .field("reactive_routes", &self.reactive.len())
            .field("stats", &self.stats)
            .finish_non_exhaustive()
    }
}
