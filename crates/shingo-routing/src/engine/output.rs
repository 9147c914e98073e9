//! Locally originated packets and packet buffering

use std::net::Ipv4Addr;

use shingo_core::{
    Completion, DataPacket, DeferredRouteTag, DropReason, Endpoint, InterfaceId, PacketHeader,
    Route, Scheduler,
};
use tracing::{debug, trace};

use super::{OutputRoute, RouterTimer, ShingoRouter};
use crate::error::{RoutingError, RoutingResult};
use crate::proactive::ProactiveEntry;
use crate::queue::QueueEntry;

impl<E: Endpoint, S: Scheduler<RouterTimer>> ShingoRouter<E, S> {
    /// Route a locally originated packet
    ///
    /// Returns the zone route when one resolves. Otherwise the packet is
    /// tagged with its requested output interface and a loopback route is
    /// returned; the host must hand the packet back through
    /// [`route_input`](Self::route_input) on the loopback device, where it
    /// is buffered and a route discovery starts.
    pub fn route_output(
        &mut self,
        packet: &mut DataPacket,
        header: &PacketHeader,
        oif: Option<InterfaceId>,
    ) -> RoutingResult<OutputRoute> {
        let dst = header.destination;
        if self.interfaces.is_empty() {
            debug!(%dst, "No interface up, no route");
            return Err(RoutingError::NoRoute(dst));
        }
        self.purge_zone_table();

        if let Some(entry) = self.proactive.lookup(dst).cloned() {
            if self.config.enable_buffering {
                self.look_for_queued_packets();
            }
            if let Some(route) = self.resolve_zone_route(&entry) {
                if oif.is_some_and(|o| route.interface != Some(o)) {
                    debug!(%dst, ?oif, "Zone route leaves through another interface");
                    return Err(RoutingError::NoRoute(dst));
                }
                trace!(%route, "Zone route found");
                return Ok(OutputRoute::Resolved(route));
            }
        }

        packet.add_deferred_tag(DeferredRouteTag { oif });
        let source = self
            .address_or_primary(oif)
            .map(|a| a.local)
            .ok_or(RoutingError::NoRoute(dst))?;
        trace!(%dst, "No zone route, deferring through loopback");
        Ok(OutputRoute::Loopback(Route::loopback(dst, source)))
    }

    /// Buffer a looped-back packet until a route is found
    pub(super) fn deferred_route_output(
        &mut self,
        packet: DataPacket,
        header: PacketHeader,
        completion: Completion,
    ) {
        let now = self.now();
        let dst = header.destination;

        if let Some(route) = self.reactive.lookup_valid(dst, now).map(|e| e.route()) {
            forward_buffered(QueueEntry::new(packet, header, completion), route);
            return;
        }

        if self.proactive.lookup(dst).is_some() {
            let entry = QueueEntry::new(packet, header, completion);
            match self.queue.enqueue(entry, now) {
                Ok(()) => self.look_for_queued_packets(),
                Err(rejected) => {
                    debug!(%dst, error = %rejected.error, "Zone queue rejected packet");
                    rejected.drop_entry();
                }
            }
            return;
        }

        let entry = QueueEntry::new(packet, header, completion);
        match self.request_queue.enqueue(entry, now) {
            Ok(()) => {
                let searching = self
                    .reactive
                    .lookup(dst, now)
                    .is_some_and(|e| e.status.is_searching());
                if !searching {
                    debug!(%dst, "Starting route discovery");
                    self.send_request(dst);
                }
            }
            Err(rejected) => {
                debug!(%dst, error = %rejected.error, "Discovery queue rejected packet");
                rejected.drop_entry();
            }
        }
    }

    /// Route through a zone entry: direct for one hop, otherwise through the
    /// entry of its next hop
    pub(super) fn resolve_zone_route(&self, entry: &ProactiveEntry) -> Option<Route> {
        if entry.hop_count == 1 {
            return Some(entry.route());
        }
        let via = self.proactive.lookup(entry.next_hop)?;
        Some(Route::new(
            entry.destination,
            via.local.local,
            via.next_hop,
            via.interface,
        ))
    }

    /// Age out stale zone routes and queue their unreachable markers
    pub(super) fn purge_zone_table(&mut self) {
        let now = self.now();
        let removed = self.proactive.purge(now);
        if removed.is_empty() {
            return;
        }
        for mut entry in removed {
            debug!(dst = %entry.destination, "Zone route expired");
            entry.changed = true;
            entry.seq = entry.seq.wrapping_add(1);
            self.advertise.insert(entry);
        }
        let jitter = self.jitter_us(1000);
        self.scheduler.schedule(jitter, RouterTimer::TriggeredUpdate);
    }

    /// Release one buffered packet for every destination with a valid zone route
    pub(super) fn look_for_queued_packets(&mut self) {
        let now = self.now();
        if self.queue.size(now) == 0 {
            return;
        }
        for entry in self.proactive.valid_routes() {
            if !self.queue.find(entry.destination, now) {
                continue;
            }
            if let Some(route) = self.resolve_zone_route(&entry) {
                self.send_packet_from_queue(entry.destination, route);
            }
        }
    }

    /// Release the next buffered packet for `dst`, if its zone route still resolves
    pub(super) fn release_queued(&mut self, dst: Ipv4Addr) {
        let route = self
            .proactive
            .lookup(dst)
            .cloned()
            .and_then(|entry| self.resolve_zone_route(&entry));
        match route {
            Some(route) => self.send_packet_from_queue(dst, route),
            None => trace!(%dst, "Zone route gone, packets stay queued"),
        }
    }

    /// Send one packet from the zone queue, pacing the rest
    fn send_packet_from_queue(&mut self, dst: Ipv4Addr, route: Route) {
        let now = self.now();
        let Some(entry) = self.queue.dequeue(dst, now) else {
            return;
        };
        forward_buffered(entry, route);
        if self.queue.find(dst, now) {
            let delay = self.jitter_ms(100);
            self.scheduler.schedule(delay, RouterTimer::ReleaseQueued { dst });
        }
    }

    /// Flush the whole discovery queue for `dst` through `route`
    pub(super) fn flush_request_queue(&mut self, dst: Ipv4Addr, route: Route) {
        let now = self.now();
        while let Some(entry) = self.request_queue.dequeue(dst, now) {
            if !forward_buffered(entry, route) {
                break;
            }
        }
    }
}

/// Forward a buffered packet, returning `false` on an interface mismatch
///
/// The loopback pass already consumed one hop of TTL, so it is restored
/// here along with the real source address.
fn forward_buffered(entry: QueueEntry, route: Route) -> bool {
    let (mut packet, mut header, completion) = entry.into_parts();
    let tag = packet.take_deferred_tag();
    if let Some(oif) = tag.and_then(|t| t.oif) {
        if route.interface != Some(oif) {
            debug!(dst = %header.destination, %oif, "Buffered packet bound to another interface");
            completion.fail(packet, header, DropReason::InterfaceMismatch);
            return false;
        }
    }
    header.source = route.source;
    header.ttl = header.ttl.saturating_add(1);
    trace!(uid = packet.uid(), %route, "Forwarding buffered packet");
    completion.forward(route, packet, header);
    true
}
