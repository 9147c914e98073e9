//! Proactive zone routing table
//!
//! The [`ProactiveTable`] holds one entry per destination learned through
//! zone updates. The engine keeps two instances: the main table used for
//! forwarding and an advertise table holding changes that wait for their
//! settling time before they are broadcast. The settling events of the
//! advertise table live in its event map, at most one per destination.

use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::net::Ipv4Addr;
use std::time::Duration;

use shingo_core::{InterfaceAddress, InterfaceId, LOOPBACK, Route, Scheduler, TimerId, Timestamp};
use tracing::trace;

/// Validity of a proactive entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RouteStatus {
    Valid,
    Invalid,
}

/// A zone route
#[derive(Debug, Clone, PartialEq)]
pub struct ProactiveEntry {
    pub destination: Ipv4Addr,
    pub next_hop: Ipv4Addr,
    pub interface: InterfaceId,
    /// Address of the output interface
    pub local: InterfaceAddress,
    /// Even: reachable, odd: unreachable marker
    pub seq: u32,
    /// 0 for self entries
    pub hop_count: u32,
    pub last_update: Timestamp,
    pub settling_time: Duration,
    /// Pending advertisement
    pub changed: bool,
    pub status: RouteStatus,
}

impl ProactiveEntry {
    /// Self entry of a local interface, keyed by its broadcast address
    pub fn self_entry(interface: InterfaceId, local: InterfaceAddress, now: Timestamp) -> Self {
        let broadcast = local.broadcast();
        Self {
            destination: broadcast,
            next_hop: broadcast,
            interface,
            local,
            seq: 0,
            hop_count: 0,
            last_update: now,
            settling_time: Duration::ZERO,
            changed: false,
            status: RouteStatus::Valid,
        }
    }

    /// Self entries are keyed by the broadcast address of their own interface
    pub fn is_self(&self) -> bool {
        self.hop_count == 0 && self.destination == self.local.broadcast()
    }

    pub fn is_valid(&self) -> bool {
        self.status == RouteStatus::Valid
    }

    pub fn is_infinite_metric(&self) -> bool {
        self.seq % 2 == 1
    }

    /// Time since the last accepted update
    pub fn age(&self, now: Timestamp) -> Duration {
        now - self.last_update
    }

    /// Forwarding decision through this entry
    pub fn route(&self) -> Route {
        Route::new(self.destination, self.local.local, self.next_hop, self.interface)
    }
}

/// Destination-keyed zone routing table
#[derive(Debug, Default)]
pub struct ProactiveTable {
    entries: BTreeMap<Ipv4Addr, ProactiveEntry>,
    events: BTreeMap<Ipv4Addr, TimerId>,
    hold_down: Duration,
}

impl ProactiveTable {
    pub fn new(hold_down: Duration) -> Self {
        Self {
            entries: BTreeMap::new(),
            events: BTreeMap::new(),
            hold_down,
        }
    }

    pub fn set_hold_down(&mut self, hold_down: Duration) {
        self.hold_down = hold_down;
    }

    pub fn hold_down(&self) -> Duration {
        self.hold_down
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ProactiveEntry> {
        self.entries.values()
    }

    pub fn lookup(&self, dst: Ipv4Addr) -> Option<&ProactiveEntry> {
        self.entries.get(&dst)
    }

    pub fn lookup_mut(&mut self, dst: Ipv4Addr) -> Option<&mut ProactiveEntry> {
        self.entries.get_mut(&dst)
    }

    /// Lookup used on the input path, which never matches `excluded`
    /// (the primary interface's broadcast address)
    pub fn lookup_for_input(&self, dst: Ipv4Addr, excluded: Ipv4Addr) -> Option<&ProactiveEntry> {
        if dst == excluded {
            return None;
        }
        self.lookup(dst)
    }

    /// Insert if absent
    pub fn insert(&mut self, entry: ProactiveEntry) -> bool {
        if self.entries.contains_key(&entry.destination) {
            return false;
        }
        self.entries.insert(entry.destination, entry);
        true
    }

    /// Replace if present
    pub fn update(&mut self, entry: ProactiveEntry) -> bool {
        match self.entries.get_mut(&entry.destination) {
            Some(existing) => {
                *existing = entry;
                true
            }
            None => false,
        }
    }

    /// Insert or replace
    pub fn upsert(&mut self, entry: ProactiveEntry) {
        self.entries.insert(entry.destination, entry);
    }

    pub fn delete(&mut self, dst: Ipv4Addr) -> Option<ProactiveEntry> {
        self.entries.remove(&dst)
    }

    /// Delete every route through `interface`, returning the removed destinations
    pub fn delete_interface(&mut self, interface: InterfaceId) -> Vec<Ipv4Addr> {
        let removed: Vec<Ipv4Addr> = self
            .entries
            .values()
            .filter(|e| e.interface == interface)
            .map(|e| e.destination)
            .collect();
        for dst in &removed {
            self.entries.remove(dst);
        }
        removed
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Snapshot of every valid entry except loopback
    pub fn valid_routes(&self) -> Vec<ProactiveEntry> {
        self.entries
            .values()
            .filter(|e| e.is_valid() && e.destination != LOOPBACK)
            .cloned()
            .collect()
    }

    /// Snapshot of every entry whose next hop is `next_hop`
    pub fn routes_via(&self, next_hop: Ipv4Addr) -> Vec<ProactiveEntry> {
        self.entries
            .values()
            .filter(|e| e.next_hop == next_hop)
            .cloned()
            .collect()
    }

    /// Remove stale entries and everything routed through them
    ///
    /// An entry is stale when it is older than the hold-down time and is not
    /// a self entry. Removal cascades to every entry whose next hop is a
    /// removed destination, transitively.
    pub fn purge(&mut self, now: Timestamp) -> Vec<ProactiveEntry> {
        let hold_down = self.hold_down;
        let mut frontier: Vec<Ipv4Addr> = self
            .entries
            .values()
            .filter(|e| !e.is_self() && e.age(now) > hold_down)
            .map(|e| e.destination)
            .collect();

        let mut removed = Vec::new();
        while let Some(dst) = frontier.pop() {
            let Some(entry) = self.entries.remove(&dst) else {
                continue;
            };
            trace!(dst = %dst, age = ?entry.age(now), "Purging zone route");
            frontier.extend(
                self.entries
                    .values()
                    .filter(|e| !e.is_self() && e.next_hop == dst)
                    .map(|e| e.destination),
            );
            removed.push(entry);
        }
        removed
    }

    /// Record the settling event of `dst`, cancelling any previous one
    pub fn add_event<T>(&mut self, dst: Ipv4Addr, id: TimerId, scheduler: &mut impl Scheduler<T>) {
        if let Some(old) = self.events.insert(dst, id) {
            if old != id {
                scheduler.cancel(old);
            }
        }
    }

    /// Whether the settling event of `dst` is still pending
    pub fn any_running_event<T>(&self, dst: Ipv4Addr, scheduler: &impl Scheduler<T>) -> bool {
        self.events
            .get(&dst)
            .is_some_and(|id| scheduler.is_pending(*id))
    }

    /// Cancel and forget the settling event of `dst`
    pub fn force_delete_event<T>(&mut self, dst: Ipv4Addr, scheduler: &mut impl Scheduler<T>) -> bool {
        match self.events.remove(&dst) {
            Some(id) => {
                scheduler.cancel(id);
                true
            }
            None => false,
        }
    }

    /// Forget the settling event of `dst` unless it is still pending
    pub fn delete_event_if_not_running<T>(
        &mut self,
        dst: Ipv4Addr,
        scheduler: &impl Scheduler<T>,
    ) -> bool {
        match self.events.get(&dst) {
            Some(id) if scheduler.is_pending(*id) => false,
            Some(_) => {
                self.events.remove(&dst);
                true
            }
            None => false,
        }
    }

    pub fn event_id(&self, dst: Ipv4Addr) -> Option<TimerId> {
        self.events.get(&dst).copied()
    }

    /// Human-readable listing of all entries
    pub fn dump(&self, title: &str, now: Timestamp) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "\n{title}");
        let _ = writeln!(
            out,
            "{:<16}{:<16}{:<20}{:<6}{:<8}{:<10}{:<10}Changed",
            "Destination", "Gateway", "Interface", "Hops", "SeqNum", "Age", "Settling"
        );
        for e in self.entries.values() {
            let _ = writeln!(
                out,
                "{:<16}{:<16}{:<20}{:<6}{:<8}{:<10}{:<10}{}",
                e.destination.to_string(),
                e.next_hop.to_string(),
                format!("{} {}", e.interface, e.local.local),
                e.hop_count,
                e.seq,
                format!("{:.3}s", e.age(now).as_secs_f64()),
                format!("{:.3}s", e.settling_time.as_secs_f64()),
                e.changed
            );
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shingo_core::EventQueue;

    fn addr(n: u8) -> Ipv4Addr {
        Ipv4Addr::new(10, 0, 0, n)
    }

    fn make_entry(dst: u8, next_hop: u8, hops: u32, last_update: Timestamp) -> ProactiveEntry {
        ProactiveEntry {
            destination: addr(dst),
            next_hop: addr(next_hop),
            interface: InterfaceId(1),
            local: InterfaceAddress::with_prefix(addr(1), 24),
            seq: 2,
            hop_count: hops,
            last_update,
            settling_time: Duration::from_secs(5),
            changed: false,
            status: RouteStatus::Valid,
        }
    }

    #[test]
    fn test_insert_is_unique_per_destination() {
        let mut table = ProactiveTable::new(Duration::from_secs(45));
        assert!(table.insert(make_entry(2, 2, 1, Timestamp::ZERO)));
        assert!(!table.insert(make_entry(2, 3, 2, Timestamp::ZERO)));
        assert_eq!(table.len(), 1);
        assert_eq!(table.lookup(addr(2)).unwrap().next_hop, addr(2));

        assert!(table.update(make_entry(2, 3, 2, Timestamp::ZERO)));
        assert_eq!(table.lookup(addr(2)).unwrap().hop_count, 2);
        assert!(!table.update(make_entry(9, 3, 2, Timestamp::ZERO)));
    }

    #[test]
    fn test_purge_cascades_through_next_hops() {
        let mut table = ProactiveTable::new(Duration::from_secs(45));
        let local = InterfaceAddress::with_prefix(addr(1), 24);
        table.insert(ProactiveEntry::self_entry(InterfaceId(1), local, Timestamp::ZERO));
        // 2 is stale; 3 routes via 2; 4 routes via 3; 5 is fresh and direct
        table.insert(make_entry(2, 2, 1, Timestamp::ZERO));
        table.insert(make_entry(3, 2, 2, Timestamp::from_secs(40)));
        table.insert(make_entry(4, 3, 3, Timestamp::from_secs(40)));
        table.insert(make_entry(5, 5, 1, Timestamp::from_secs(40)));

        let mut removed: Vec<_> = table
            .purge(Timestamp::from_secs(50))
            .into_iter()
            .map(|e| e.destination)
            .collect();
        removed.sort();

        assert_eq!(removed, vec![addr(2), addr(3), addr(4)]);
        assert!(table.lookup(addr(5)).is_some());
        assert!(table.lookup(local.broadcast()).is_some(), "self entries never age out");
    }

    #[test]
    fn test_hop_zero_foreign_entry_is_not_self() {
        let mut table = ProactiveTable::new(Duration::from_secs(45));
        let local = InterfaceAddress::with_prefix(addr(1), 24);
        assert!(ProactiveEntry::self_entry(InterfaceId(1), local, Timestamp::ZERO).is_self());

        table.insert(make_entry(7, 2, 0, Timestamp::ZERO));
        assert!(!table.lookup(addr(7)).unwrap().is_self());
        let removed = table.purge(Timestamp::from_secs(50));
        assert_eq!(removed.len(), 1);
        assert!(table.is_empty());
    }

    #[test]
    fn test_routes_via_and_valid_routes() {
        let mut table = ProactiveTable::new(Duration::from_secs(45));
        table.insert(make_entry(2, 2, 1, Timestamp::ZERO));
        table.insert(make_entry(3, 2, 2, Timestamp::ZERO));
        let mut invalid = make_entry(4, 4, 1, Timestamp::ZERO);
        invalid.status = RouteStatus::Invalid;
        table.insert(invalid);

        assert_eq!(table.routes_via(addr(2)).len(), 2);
        assert_eq!(table.valid_routes().len(), 2);
    }

    #[test]
    fn test_event_map() {
        let mut table = ProactiveTable::new(Duration::from_secs(45));
        let mut scheduler: EventQueue<u8> = EventQueue::new();

        let first = scheduler.schedule(Duration::from_secs(5), 1);
        table.add_event(addr(2), first, &mut scheduler);
        assert!(table.any_running_event(addr(2), &scheduler));
        assert!(!table.delete_event_if_not_running(addr(2), &scheduler));

        let second = scheduler.schedule(Duration::from_secs(3), 2);
        table.add_event(addr(2), second, &mut scheduler);
        assert!(!scheduler.is_pending(first), "replaced event is cancelled");
        assert_eq!(table.event_id(addr(2)), Some(second));

        scheduler.pop_next();
        assert!(!table.any_running_event(addr(2), &scheduler));
        assert!(table.delete_event_if_not_running(addr(2), &scheduler));
        assert_eq!(table.event_id(addr(2)), None);

        let third = scheduler.schedule(Duration::from_secs(1), 3);
        table.add_event(addr(3), third, &mut scheduler);
        assert!(table.force_delete_event(addr(3), &mut scheduler));
        assert!(!scheduler.is_pending(third));
    }

    #[test]
    fn test_delete_interface() {
        let mut table = ProactiveTable::new(Duration::from_secs(45));
        table.insert(make_entry(2, 2, 1, Timestamp::ZERO));
        let mut other = make_entry(3, 3, 1, Timestamp::ZERO);
        other.interface = InterfaceId(2);
        table.insert(other);

        assert_eq!(table.delete_interface(InterfaceId(1)), vec![addr(2)]);
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn test_dump_lists_entries() {
        let mut table = ProactiveTable::new(Duration::from_secs(45));
        table.insert(make_entry(2, 2, 1, Timestamp::ZERO));
        let dump = table.dump("Zone routing table", Timestamp::from_secs(2));
        assert!(dump.contains("Zone routing table"));
        assert!(dump.contains("10.0.0.2"));
        assert!(dump.contains("2.000s"));
    }
}
