//! On-demand route discovery
//!
//! Route requests flood outward in an expanding ring. A node that holds a
//! zone route to the requested destination bordercasts the request toward
//! it instead of flooding. Replies travel back along the reverse routes the
//! request left behind.

use std::net::Ipv4Addr;
use std::time::Duration;

use shingo_core::{Endpoint, InterfaceId, Scheduler};
use tracing::{debug, info, trace};

use super::{RouterTimer, ShingoRouter, seq_at_least, seq_newer};
use crate::reactive::{ReactiveEntry, ReactiveStatus};
use crate::wire::{ControlMessage, RouteReply, RouteRequest, RrepFlags, RreqFlags};

/// Unicast replies and acknowledgments only cross one link
const UNICAST_TTL: u8 = 1;

/// Maximum jitter before a route request leaves, in milliseconds
const REQUEST_JITTER_MS: u64 = 10;

impl<E: Endpoint, S: Scheduler<RouterTimer>> ShingoRouter<E, S> {
    /// Refresh the one-hop route to the sender of any control datagram
    pub(super) fn update_route_to_neighbor(&mut self, sender: Ipv4Addr, interface: InterfaceId) {
        let Some(local) = self.interface(interface).map(|i| i.address) else {
            return;
        };
        let now = self.now();
        let active = self.config.active_route_timeout;
        match self.reactive.lookup_mut(sender, now) {
            None => {
                let entry = ReactiveEntry::new(sender, interface, local, 0, false, 1, sender, now + active);
                self.reactive.add_route(entry, now);
            }
            Some(entry) if entry.status.is_searching() => {}
            Some(entry) => {
                entry.next_hop = sender;
                entry.hop_count = 1;
                entry.interface = interface;
                entry.local = local;
                entry.status = ReactiveStatus::Valid;
                entry.extend_lifetime(now, active);
            }
        }
    }

    /// Originate a route request for `dst`
    pub(super) fn send_request(&mut self, dst: Ipv4Addr) {
        if self.rreq_count >= self.config.rreq_rate_limit {
            let left = self
                .rate_limit_timer
                .and_then(|id| self.scheduler.delay_left(id))
                .unwrap_or(Duration::ZERO);
            if self
                .postponed_requests
                .get(&dst)
                .is_some_and(|id| self.scheduler.is_pending(*id))
            {
                trace!(%dst, "Route request already postponed");
                return;
            }
            trace!(%dst, ?left, "Route request rate limit reached, postponing");
            let id = self
                .scheduler
                .schedule(left + Duration::from_micros(100), RouterTimer::SendRequest(dst));
            self.postponed_requests.insert(dst, id);
            return;
        }
        let Some((primary, primary_addr)) = self.primary_interface() else {
            return;
        };
        self.rreq_count += 1;

        let now = self.now();
        let config = &self.config;
        let diameter = config.net_diameter;
        let path_discovery = config.path_discovery_time();
        let mut flags = RreqFlags::empty();
        let mut dst_seq = 0;

        let ttl = match self.reactive.lookup_mut(dst, now) {
            Some(entry) => {
                let ttl = if entry.status.is_searching() {
                    let ttl = entry.hop_count.saturating_add(config.ttl_increment);
                    if ttl > config.ttl_threshold { diameter } else { ttl }
                } else {
                    entry.hop_count.saturating_add(config.ttl_increment).min(diameter)
                };
                if ttl == diameter {
                    entry.retries += 1;
                }
                if entry.valid_seq {
                    dst_seq = entry.seq;
                } else {
                    flags |= RreqFlags::UNKNOWN_SEQ;
                }
                entry.hop_count = ttl;
                entry.status = ReactiveStatus::InSearch;
                entry.set_lifetime(now, path_discovery);
                ttl
            }
            None => {
                flags |= RreqFlags::UNKNOWN_SEQ;
                let ttl = config.ttl_start;
                let mut entry = ReactiveEntry::new(
                    dst,
                    primary,
                    primary_addr,
                    0,
                    false,
                    ttl,
                    Ipv4Addr::UNSPECIFIED,
                    now + path_discovery,
                );
                entry.status = ReactiveStatus::InSearch;
                if ttl == diameter {
                    entry.retries = 1;
                }
                self.reactive.add_route(entry, now);
                ttl
            }
        };

        if self.config.gratuitous_reply {
            flags |= RreqFlags::GRATUITOUS_REPLY;
        }
        if self.config.destination_only {
            flags |= RreqFlags::DESTINATION_ONLY;
        }
        self.seq_no = self.seq_no.wrapping_add(1);
        self.request_id = self.request_id.wrapping_add(1);
        self.stats.requests_originated += 1;
        debug!(%dst, ttl, id = self.request_id, "Sending route request");

        for (id, address) in self.interface_snapshot() {
            let rreq = RouteRequest {
                flags,
                hop_count: 0,
                request_id: self.request_id,
                destination: dst,
                dst_seq,
                origin: address.local,
                origin_seq: self.seq_no,
            };
            self.id_cache.is_duplicate(address.local, self.request_id, now);
            let jitter = self.jitter_ms(REQUEST_JITTER_MS);
            self.send_control_later(id, address.broadcast_target(), &ControlMessage::Request(rreq), ttl, jitter);
        }
        self.schedule_rreq_retry(dst);
    }

    /// Arm the retry timer of the discovery for `dst`
    fn schedule_rreq_retry(&mut self, dst: Ipv4Addr) {
        let now = self.now();
        let Some(entry) = self.reactive.lookup(dst, now) else {
            return;
        };
        let wait = if entry.hop_count < self.config.net_diameter {
            self.config.node_traversal_time * 2 * (u32::from(entry.hop_count) + self.config.timeout_buffer)
        } else {
            let backoff = entry.retries.saturating_sub(1).min(16);
            self.config.net_traversal_time() * (1u32 << backoff)
        };
        if let Some(old) = self.request_timers.remove(&dst) {
            self.scheduler.cancel(old);
        }
        trace!(%dst, ?wait, "Route request retry armed");
        let id = self.scheduler.schedule(wait, RouterTimer::RreqRetry(dst));
        self.request_timers.insert(dst, id);
    }

    /// Retry timer of the discovery for `dst` expired
    pub(super) fn route_request_timer_expire(&mut self, dst: Ipv4Addr) {
        let now = self.now();
        if let Some(route) = self.reactive.lookup_valid(dst, now).map(|e| e.route()) {
            self.flush_request_queue(dst, route);
            return;
        }
        let entry = self.reactive.lookup(dst, now).cloned();
        match entry {
            Some(entry) if entry.retries < self.config.rreq_retries && entry.status.is_searching() => {
                self.send_request(dst);
            }
            _ => {
                info!(%dst, "Route discovery failed");
                self.stats.discoveries_failed += 1;
                self.request_timers.remove(&dst);
                self.reactive.delete(dst);
                self.request_queue.drop_packets_with_dst(dst);
            }
        }
    }

    pub(super) fn recv_request(&mut self, mut rreq: RouteRequest, interface: InterfaceId, sender: Ipv4Addr, ttl: u8) {
        let Some(local) = self.interface(interface).map(|i| i.address) else {
            return;
        };
        let now = self.now();
        if self.reactive.lookup(sender, now).is_some_and(|e| e.is_blacklisted(now)) {
            debug!(%sender, "Ignoring route request from blacklisted neighbor");
            return;
        }
        if self.id_cache.is_duplicate(rreq.origin, rreq.request_id, now) {
            trace!(origin = %rreq.origin, id = rreq.request_id, "Duplicate route request");
            return;
        }
        let hops = rreq.hop_count.saturating_add(1);
        rreq.hop_count = hops;
        if hops > self.config.max_request_hops {
            trace!(origin = %rreq.origin, hops, "Route request exceeded hop limit");
            return;
        }
        let dst = rreq.destination;
        let origin = rreq.origin;
        let zone_next_hop = self
            .proactive
            .lookup(dst)
            .filter(|e| e.is_valid())
            .map(|e| (e.interface, e.next_hop));

        // Reverse route toward the originator
        let reverse_lifetime = (self.config.net_traversal_time() * 2)
            .saturating_sub(self.config.node_traversal_time * 2 * u32::from(hops));
        match self.reactive.lookup_mut(origin, now) {
            None => {
                let entry = ReactiveEntry::new(
                    origin,
                    interface,
                    local,
                    rreq.origin_seq,
                    true,
                    hops,
                    sender,
                    now + reverse_lifetime,
                );
                self.reactive.add_route(entry, now);
            }
            Some(entry) => {
                if !entry.valid_seq || seq_newer(rreq.origin_seq, entry.seq) {
                    entry.seq = rreq.origin_seq;
                }
                entry.valid_seq = true;
                entry.next_hop = sender;
                entry.interface = interface;
                entry.local = local;
                entry.hop_count = hops;
                entry.extend_lifetime(now, reverse_lifetime);
            }
        }

        // One-hop route to the neighbor it came from
        let active = self.config.active_route_timeout;
        match self.reactive.lookup_mut(sender, now) {
            None => {
                let entry = ReactiveEntry::new(sender, interface, local, rreq.origin_seq, false, 1, sender, now + active);
                self.reactive.add_route(entry, now);
            }
            Some(entry) => {
                entry.set_lifetime(now, active);
                entry.valid_seq = false;
                entry.seq = rreq.origin_seq;
                entry.status = ReactiveStatus::Valid;
                entry.interface = interface;
                entry.local = local;
                entry.hop_count = 1;
                entry.next_hop = sender;
            }
        }

        if self.is_my_own_address(dst) {
            debug!(%origin, "Route request for us, replying");
            self.send_reply(&rreq);
            return;
        }

        if let Some(to_dst) = self.reactive.lookup(dst, now).cloned() {
            if to_dst.next_hop == sender {
                trace!(%dst, %sender, "Request came from our next hop, dropping");
                return;
            }
            if (rreq.unknown_seq() || seq_at_least(to_dst.seq, rreq.dst_seq)) && to_dst.valid_seq {
                if !rreq.destination_only() && to_dst.is_valid() {
                    debug!(%dst, %origin, "Replying from our own route");
                    self.send_reply_by_intermediate(&to_dst, origin, rreq.gratuitous_reply());
                    return;
                }
                rreq.dst_seq = to_dst.seq;
                rreq.flags.remove(RreqFlags::UNKNOWN_SEQ);
            }
        }

        if ttl < 2 {
            trace!(%dst, %origin, "Route request TTL exhausted");
            return;
        }
        let forward_ttl = ttl - 1;
        let message = ControlMessage::Request(rreq);
        self.stats.requests_forwarded += 1;

        match zone_next_hop {
            Some((zone_interface, next_hop)) => {
                if let Some(entry) = self.reactive.lookup_mut(dst, now) {
                    if entry.status.is_searching() {
                        entry.status = ReactiveStatus::Discover;
                    }
                }
                debug!(%dst, %next_hop, "Bordercasting route request into zone");
                let jitter = self.jitter_ms(REQUEST_JITTER_MS);
                self.send_control_later(zone_interface, next_hop, &message, forward_ttl, jitter);
            }
            None => {
                trace!(%dst, %origin, ttl = forward_ttl, "Rebroadcasting route request");
                for (id, address) in self.interface_snapshot() {
                    let jitter = self.jitter_ms(REQUEST_JITTER_MS);
                    self.send_control_later(id, address.broadcast_target(), &message, forward_ttl, jitter);
                }
            }
        }
    }

    /// Answer a request addressed to this node
    fn send_reply(&mut self, rreq: &RouteRequest) {
        if !rreq.unknown_seq() && rreq.dst_seq == self.seq_no.wrapping_add(1) {
            self.seq_no = self.seq_no.wrapping_add(1);
        }
        let now = self.now();
        let Some(to_origin) = self.reactive.lookup(rreq.origin, now).cloned() else {
            return;
        };
        let rrep = RouteReply {
            flags: RrepFlags::empty(),
            prefix_size: 0,
            hop_count: 0,
            destination: rreq.destination,
            dst_seq: self.seq_no,
            origin: to_origin.destination,
            lifetime: self.config.my_route_timeout(),
        };
        self.stats.replies_sent += 1;
        self.send_control(to_origin.interface, to_origin.next_hop, &ControlMessage::Reply(rrep), UNICAST_TTL);
    }

    /// Answer a request from our own fresh route to its destination
    fn send_reply_by_intermediate(&mut self, to_dst: &ReactiveEntry, origin: Ipv4Addr, gratuitous: bool) {
        let now = self.now();
        let Some(to_origin) = self.reactive.lookup(origin, now).cloned() else {
            return;
        };
        let mut rrep = RouteReply {
            flags: RrepFlags::empty(),
            prefix_size: 0,
            hop_count: to_dst.hop_count,
            destination: to_dst.destination,
            dst_seq: to_dst.seq,
            origin: to_origin.destination,
            lifetime: to_dst.lifetime_left(now),
        };

        if to_dst.hop_count == 1 {
            rrep.set_ack_required(true);
            let neighbor = to_origin.next_hop;
            if let Some(old) = self.ack_timers.remove(&neighbor) {
                self.scheduler.cancel(old);
            }
            let id = self
                .scheduler
                .schedule(self.config.next_hop_wait(), RouterTimer::AckTimeout(neighbor));
            self.ack_timers.insert(neighbor, id);
        }

        if let Some(entry) = self.reactive.lookup_mut(to_dst.destination, now) {
            entry.insert_precursor(to_origin.next_hop);
        }
        if let Some(entry) = self.reactive.lookup_mut(origin, now) {
            entry.insert_precursor(to_dst.next_hop);
        }

        self.stats.replies_sent += 1;
        self.send_control(to_origin.interface, to_origin.next_hop, &ControlMessage::Reply(rrep), UNICAST_TTL);

        if gratuitous {
            let notice = RouteReply {
                flags: RrepFlags::empty(),
                prefix_size: 0,
                hop_count: to_origin.hop_count,
                destination: to_origin.destination,
                dst_seq: to_origin.seq,
                origin: to_dst.destination,
                lifetime: to_origin.lifetime_left(now),
            };
            debug!(dst = %to_dst.destination, %origin, "Sending gratuitous reply");
            self.stats.replies_sent += 1;
            self.send_control(to_dst.interface, to_dst.next_hop, &ControlMessage::Reply(notice), UNICAST_TTL);
        }
    }

    pub(super) fn recv_reply(&mut self, mut rrep: RouteReply, interface: InterfaceId, sender: Ipv4Addr) {
        let Some(local) = self.interface(interface).map(|i| i.address) else {
            return;
        };
        let now = self.now();
        let dst = rrep.destination;
        let hops = rrep.hop_count.saturating_add(1);
        rrep.hop_count = hops;
        let dst_seq = rrep.dst_seq;
        let expiry = now + rrep.lifetime;

        let adopt = |entry: &mut ReactiveEntry| {
            entry.next_hop = sender;
            entry.interface = interface;
            entry.local = local;
            entry.seq = dst_seq;
            entry.valid_seq = true;
            entry.hop_count = hops;
            entry.lifetime = expiry;
            entry.status = ReactiveStatus::Valid;
        };

        let previous = self.reactive.lookup(dst, now).cloned();
        match &previous {
            Some(existing) => {
                let same_seq = dst_seq == existing.seq;
                let fresher = !existing.valid_seq
                    || seq_newer(dst_seq, existing.seq)
                    || (same_seq && !existing.is_valid())
                    || (same_seq && hops < existing.hop_count);
                if fresher {
                    let mut updated = existing.clone();
                    adopt(&mut updated);
                    self.reactive.update(updated);
                }
            }
            None => {
                let mut entry = ReactiveEntry::new(dst, interface, local, 0, true, hops, sender, now);
                adopt(&mut entry);
                self.reactive.add_route(entry, now);
            }
        }

        if rrep.ack_required() {
            self.send_reply_ack(sender, interface);
            rrep.set_ack_required(false);
        }

        if self.is_my_own_address(rrep.origin) {
            if previous.is_some_and(|e| e.status.is_searching()) {
                if let Some(entry) = self.reactive.lookup_mut(dst, now) {
                    if entry.status.is_searching() {
                        adopt(entry);
                        entry.retries = 0;
                    }
                }
                if let Some(id) = self.request_timers.remove(&dst) {
                    self.scheduler.cancel(id);
                }
            }
            if let Some(route) = self.reactive.lookup_valid(dst, now).map(|e| e.route()) {
                info!(%dst, via = %route.gateway, hops, "Route discovered");
                self.flush_request_queue(dst, route);
            }
            return;
        }

        let Some(to_origin) = self.reactive.lookup(rrep.origin, now).cloned() else {
            trace!(origin = %rrep.origin, "No reverse route for reply");
            return;
        };
        if to_origin.status.is_searching() {
            trace!(origin = %rrep.origin, "Reverse route still in search, dropping reply");
            return;
        }
        let active = self.config.active_route_timeout;
        if let Some(entry) = self.reactive.lookup_mut(rrep.origin, now) {
            entry.extend_lifetime(now, active);
        }

        if let Some(to_dst) = self.reactive.lookup_valid(dst, now).cloned() {
            let origin_hop = to_origin.next_hop;
            let dst_hop = to_dst.next_hop;
            for (addr, precursor) in [
                (dst, origin_hop),
                (dst_hop, origin_hop),
                (rrep.origin, dst_hop),
                (origin_hop, dst_hop),
            ] {
                if let Some(entry) = self.reactive.lookup_mut(addr, now) {
                    entry.insert_precursor(precursor);
                }
            }
        }

        trace!(%dst, origin = %rrep.origin, next_hop = %to_origin.next_hop, "Relaying route reply");
        self.send_control(to_origin.interface, to_origin.next_hop, &ControlMessage::Reply(rrep), UNICAST_TTL);
    }

    fn send_reply_ack(&mut self, neighbor: Ipv4Addr, interface: InterfaceId) {
        trace!(%neighbor, "Acknowledging route reply");
        self.send_control(interface, neighbor, &ControlMessage::ReplyAck, UNICAST_TTL);
    }

    pub(super) fn recv_reply_ack(&mut self, sender: Ipv4Addr) {
        if let Some(id) = self.ack_timers.remove(&sender) {
            self.scheduler.cancel(id);
        }
        self.reactive.set_status(sender, ReactiveStatus::Valid);
        if self.reactive.clear_blacklist(sender) {
            debug!(%sender, "Reply acknowledged, neighbor no longer blacklisted");
        }
    }

    /// No acknowledgment arrived: the link to `neighbor` only works one way
    pub(super) fn ack_timeout(&mut self, neighbor: Ipv4Addr) {
        let now = self.now();
        let timeout = self.config.blacklist_timeout();
        if self.reactive.mark_link_unidirectional(neighbor, timeout, now) {
            info!(%neighbor, ?timeout, "No reply acknowledgment, blacklisting neighbor");
        }
    }
}
