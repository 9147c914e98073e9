//! Zone updates: receiving, settling and advertising
//!
//! A zone update carries `(destination, hop count, sequence)` records. Even
//! sequence numbers announce reachability, odd ones withdraw it. Metric
//! changes go to the forwarding table at once but are only re-advertised
//! after their settling time, so a burst of changes for one destination
//! produces a single advertisement.

use std::net::Ipv4Addr;
use std::time::Duration;

use shingo_core::{Endpoint, InterfaceId, Scheduler};
use tracing::{debug, trace};

use super::{RouterTimer, ShingoRouter, seq_newer};
use crate::proactive::{ProactiveEntry, RouteStatus};
use crate::wire::{ControlMessage, IarpRecord};

/// Zone updates are only exchanged between neighbors
const ZONE_UPDATE_TTL: u8 = 1;

impl<E: Endpoint, S: Scheduler<RouterTimer>> ShingoRouter<E, S> {
    pub(super) fn recv_iarp(&mut self, records: &[IarpRecord], interface: InterfaceId, sender: Ipv4Addr) {
        let Some(local) = self.interface(interface).map(|i| i.address) else {
            return;
        };
        let now = self.now();
        let max_hops = self.config.zone_radius.saturating_add(1);
        trace!(%sender, records = records.len(), "Zone update received");

        for record in records {
            let dst = record.destination;
            if self.is_my_own_address(dst) {
                if record.is_infinite_metric() {
                    trace!(%dst, seq = record.seq, "Infinite-metric echo of own address");
                } else {
                    trace!(%dst, seq = record.seq, "Echo of own address");
                }
                continue;
            }
            if self.is_own_broadcast(dst) {
                trace!(%dst, %sender, "Zone record for own broadcast address");
                continue;
            }
            // Nothing a neighbor advertises is closer than one hop, and
            // reachability reaches at most one hop past the zone radius
            if record.hop_count == 0 || (!record.is_infinite_metric() && record.hop_count > max_hops) {
                debug!(%dst, %sender, hops = record.hop_count, "Zone record hop count out of range");
                continue;
            }

            let Some(main) = self.proactive.lookup(dst).cloned() else {
                if record.is_infinite_metric() {
                    trace!(%dst, "Withdrawal for unknown destination");
                    continue;
                }
                let entry = ProactiveEntry {
                    destination: dst,
                    next_hop: sender,
                    interface,
                    local,
                    seq: record.seq,
                    hop_count: record.hop_count,
                    last_update: now,
                    settling_time: self.config.settling_time,
                    changed: true,
                    status: RouteStatus::Valid,
                };
                debug!(%dst, via = %sender, hops = record.hop_count, "New zone route");
                self.proactive.insert(entry.clone());
                self.advertise.insert(entry);
                continue;
            };

            if self.advertise.lookup(dst).is_none() {
                self.advertise.insert(main.clone());
            }
            let Some(mut adv) = self.advertise.lookup(dst).cloned() else {
                continue;
            };

            if !record.is_infinite_metric() {
                if seq_newer(record.seq, adv.seq)
                    || (record.seq == adv.seq && record.hop_count < adv.hop_count)
                {
                    let metric_changed = record.hop_count != adv.hop_count;
                    self.advertise.force_delete_event(dst, &mut self.scheduler);
                    adv.seq = record.seq;
                    adv.next_hop = sender;
                    adv.interface = interface;
                    adv.local = local;
                    adv.last_update = now;
                    adv.status = RouteStatus::Valid;
                    adv.changed = true;
                    if metric_changed {
                        adv.hop_count = record.hop_count;
                        let settling = self.settling_time_for(dst);
                        adv.settling_time = settling;
                        let id = self.scheduler.schedule(settling, RouterTimer::Settling(dst));
                        self.advertise.add_event(dst, id, &mut self.scheduler);
                        debug!(%dst, via = %sender, hops = record.hop_count, ?settling, "Zone metric changed");
                        self.proactive.update(adv.clone());
                    }
                    self.advertise.update(adv);
                } else if record.seq == adv.seq {
                    if !self.advertise.any_running_event(dst, &self.scheduler) {
                        if adv.next_hop == sender {
                            adv.last_update = now;
                            self.proactive.update(adv);
                        }
                        self.advertise.delete(dst);
                    }
                } else if !self.advertise.any_running_event(dst, &self.scheduler) {
                    trace!(%dst, seq = record.seq, "Stale zone record");
                    self.advertise.delete(dst);
                }
            } else if sender == adv.next_hop {
                debug!(%dst, via = %sender, "Zone route withdrawn");
                let dependents = self.proactive.routes_via(dst);
                self.proactive.delete(dst);
                adv.seq = record.seq;
                adv.changed = true;
                self.advertise.update(adv);
                for mut dependent in dependents {
                    if dependent.destination == dst {
                        continue;
                    }
                    dependent.seq = dependent.seq.wrapping_add(1);
                    dependent.changed = true;
                    self.proactive.delete(dependent.destination);
                    self.advertise.upsert(dependent);
                }
            } else if !self.advertise.any_running_event(dst, &self.scheduler) {
                self.advertise.delete(dst);
            }
        }

        let delay = if self.config.enable_route_aggregation && !self.advertise.is_empty() {
            self.config.route_aggregation_time
        } else {
            self.jitter_us(1000)
        };
        self.scheduler.schedule(delay, RouterTimer::TriggeredUpdate);

        if self.config.enable_buffering {
            self.look_for_queued_packets();
        }
    }

    /// Settling time for a metric change of `dst`
    ///
    /// With weighted settling the stored value is blended with the age of
    /// the current route, so routes that change often settle longer.
    pub(super) fn settling_time_for(&self, dst: Ipv4Addr) -> Duration {
        let Some(entry) = self.proactive.lookup(dst) else {
            return self.config.settling_time;
        };
        if !self.config.enable_weighted_settling {
            return entry.settling_time;
        }
        if entry.settling_time.is_zero() {
            return Duration::ZERO;
        }
        let wf = self.config.weighted_factor;
        let age = entry.age(self.now());
        Duration::from_secs_f64(wf * entry.settling_time.as_secs_f64() + (1.0 - wf) * age.as_secs_f64())
    }

    /// Advertise every settled change inside the zone
    pub(super) fn send_triggered_update(&mut self) {
        let pending: Vec<ProactiveEntry> = self.advertise.iter().cloned().collect();
        if pending.is_empty() {
            return;
        }
        let radius = self.config.zone_radius;

        for (id, address) in self.interface_snapshot() {
            let mut records = Vec::new();
            for entry in pending.iter().filter(|e| e.hop_count < radius) {
                let dst = entry.destination;
                if !entry.changed || self.advertise.any_running_event(dst, &self.scheduler) {
                    trace!(%dst, "Still settling");
                    continue;
                }
                records.push(IarpRecord::new(dst, entry.hop_count.saturating_add(1), entry.seq));

                let mut settled = entry.clone();
                settled.status = RouteStatus::Valid;
                settled.changed = false;
                self.advertise.delete_event_if_not_running(dst, &self.scheduler);
                if !settled.is_infinite_metric() {
                    self.proactive.update(settled);
                }
                self.advertise.delete(dst);
            }
            if records.is_empty() {
                continue;
            }

            let own_seq = self.proactive.lookup(address.broadcast()).map_or(0, |e| e.seq);
            records.push(IarpRecord::new(address.local, 1, own_seq));
            debug!(interface = %id, records = records.len(), "Sending triggered zone update");
            self.stats.zone_updates_sent += 1;
            self.send_control(id, address.broadcast_target(), &ControlMessage::Iarp(records), ZONE_UPDATE_TTL);
        }
    }

    /// Advertise the whole zone and reschedule
    pub(super) fn send_periodic_update(&mut self) {
        let now = self.now();
        let removed = self.proactive.purge(now);
        self.merge_trigger_periodic_updates();

        let routes = self.proactive.valid_routes();
        let radius = self.config.zone_radius;
        if !routes.is_empty() {
            for (id, address) in self.interface_snapshot() {
                let mut records = Vec::with_capacity(routes.len() + removed.len());
                for entry in &routes {
                    if entry.is_self() {
                        let seq = entry.seq.wrapping_add(2);
                        records.push(IarpRecord::new(entry.local.local, 1, seq));
                        if let Some(own) = self.proactive.lookup_mut(entry.destination) {
                            own.seq = seq;
                        }
                    } else if entry.hop_count <= radius {
                        records.push(IarpRecord::new(entry.destination, entry.hop_count.saturating_add(1), entry.seq));
                    }
                }
                for entry in &removed {
                    records.push(IarpRecord::new(
                        entry.destination,
                        entry.hop_count.saturating_add(1),
                        entry.seq.wrapping_add(1),
                    ));
                }
                trace!(interface = %id, records = records.len(), "Sending periodic zone update");
                self.stats.zone_updates_sent += 1;
                self.send_control(id, address.broadcast_target(), &ControlMessage::Iarp(records), ZONE_UPDATE_TTL);
            }
        }

        let jitter = Duration::from_micros(25 * self.jitter_us(1000).as_micros() as u64);
        let next = self.config.periodic_update_interval + jitter;
        self.periodic_timer = Some(self.scheduler.schedule(next, RouterTimer::PeriodicUpdate));
    }

    /// Fold settled changes into the forwarding table before a periodic update
    fn merge_trigger_periodic_updates(&mut self) {
        let pending: Vec<ProactiveEntry> = self.advertise.iter().cloned().collect();
        for mut entry in pending {
            if !entry.changed || self.advertise.any_running_event(entry.destination, &self.scheduler) {
                continue;
            }
            if !entry.is_infinite_metric() {
                entry.status = RouteStatus::Valid;
                entry.changed = false;
                self.proactive.update(entry.clone());
            }
            self.advertise.delete(entry.destination);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shingo_core::{EventQueue, InterfaceAddress, RecordingEndpoint};

    use crate::config::RouterConfig;

    type TestRouter = ShingoRouter<RecordingEndpoint, EventQueue<RouterTimer>>;

    fn addr(n: u8) -> Ipv4Addr {
        Ipv4Addr::new(10, 0, 0, n)
    }

    fn make_router(config: RouterConfig) -> TestRouter {
        let mut router = ShingoRouter::new(config, EventQueue::new()).unwrap();
        let local = InterfaceAddress::with_prefix(addr(1), 24);
        router.notify_interface_up(InterfaceId(1), local, RecordingEndpoint::new(addr(1)));
        router
    }

    /// Install a one-hop route to `dst` learned now, with a stored settling time
    fn make_route(router: &mut TestRouter, dst: Ipv4Addr, stored: Duration) {
        let entry = ProactiveEntry {
            destination: dst,
            next_hop: dst,
            interface: InterfaceId(1),
            local: InterfaceAddress::with_prefix(addr(1), 24),
            seq: 2,
            hop_count: 1,
            last_update: router.now(),
            settling_time: stored,
            changed: false,
            status: RouteStatus::Valid,
        };
        router.proactive.insert(entry);
    }

    #[test]
    fn test_settling_time_unweighted_returns_stored() {
        let mut router = make_router(RouterConfig::testing(1).with_weighted_settling(false));
        make_route(&mut router, addr(2), Duration::from_secs(5));
        router.advance_by(Duration::from_secs(20));
        assert_eq!(router.settling_time_for(addr(2)), Duration::from_secs(5));
    }

    #[test]
    fn test_settling_time_zero_stays_zero() {
        let mut router = make_router(RouterConfig::testing(1));
        make_route(&mut router, addr(2), Duration::ZERO);
        router.advance_by(Duration::from_secs(20));
        assert_eq!(router.settling_time_for(addr(2)), Duration::ZERO);
    }

    #[test]
    fn test_settling_time_blends_stored_and_age() {
        let mut router = make_router(RouterConfig::testing(1));
        assert_eq!(router.config.weighted_factor, 0.875);
        make_route(&mut router, addr(2), Duration::from_secs(8));
        router.advance_by(Duration::from_secs(16));
        // 0.875 * 8 s + 0.125 * 16 s
        assert_eq!(router.settling_time_for(addr(2)), Duration::from_secs(9));
    }

    #[test]
    fn test_settling_time_unknown_destination_uses_config() {
        let router = make_router(RouterConfig::testing(1).with_settling_time(Duration::from_secs(3)));
        assert_eq!(router.settling_time_for(addr(9)), Duration::from_secs(3));
    }
}
