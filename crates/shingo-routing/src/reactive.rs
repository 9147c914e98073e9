//! Reactive (on-demand) routing table
//!
//! Routes found by route discovery. Entries expire in two phases: a VALID
//! entry whose lifetime elapses turns INVALID for the bad-link lifetime, and
//! an elapsed INVALID entry is deleted. Entries in search keep their state
//! until the discovery resolves or is abandoned.

use std::collections::BTreeMap;
use std::fmt::{self, Write as _};
use std::net::Ipv4Addr;
use std::time::Duration;

use shingo_core::{InterfaceAddress, InterfaceId, Route, Timestamp};
use tracing::trace;

/// State of a reactive entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReactiveStatus {
    Valid,
    Invalid,
    /// Route request outstanding
    InSearch,
    /// Request bordercast into a zone, search still outstanding
    Discover,
}

impl ReactiveStatus {
    /// Whether a discovery is outstanding
    pub fn is_searching(self) -> bool {
        matches!(self, Self::InSearch | Self::Discover)
    }
}

impl fmt::Display for ReactiveStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Valid => write!(f, "UP"),
            Self::Invalid => write!(f, "DOWN"),
            Self::InSearch => write!(f, "IN_SEARCH"),
            Self::Discover => write!(f, "DISCOVER"),
        }
    }
}

/// A discovered route
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReactiveEntry {
    pub destination: Ipv4Addr,
    pub next_hop: Ipv4Addr,
    pub interface: InterfaceId,
    pub local: InterfaceAddress,
    pub seq: u32,
    pub valid_seq: bool,
    pub hop_count: u8,
    /// Absolute expiry instant
    pub lifetime: Timestamp,
    pub status: ReactiveStatus,
    /// Route requests sent at the network diameter
    pub retries: u32,
    precursors: Vec<Ipv4Addr>,
    blacklisted: bool,
    blacklist_until: Timestamp,
}

impl ReactiveEntry {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        destination: Ipv4Addr,
        interface: InterfaceId,
        local: InterfaceAddress,
        seq: u32,
        valid_seq: bool,
        hop_count: u8,
        next_hop: Ipv4Addr,
        lifetime: Timestamp,
    ) -> Self {
        Self {
            destination,
            next_hop,
            interface,
            local,
            seq,
            valid_seq,
            hop_count,
            lifetime,
            status: ReactiveStatus::Valid,
            retries: 0,
            precursors: Vec::new(),
            blacklisted: false,
            blacklist_until: Timestamp::ZERO,
        }
    }

    pub fn is_valid(&self) -> bool {
        self.status == ReactiveStatus::Valid
    }

    /// Time until expiry
    pub fn lifetime_left(&self, now: Timestamp) -> Duration {
        self.lifetime - now
    }

    /// Expire `lifetime` from now
    pub fn set_lifetime(&mut self, now: Timestamp, lifetime: Duration) {
        self.lifetime = now + lifetime;
    }

    /// Extend the lifetime to at least `lifetime` from now
    pub fn extend_lifetime(&mut self, now: Timestamp, lifetime: Duration) {
        self.lifetime = self.lifetime.max(now + lifetime);
    }

    pub fn route(&self) -> Route {
        Route::new(self.destination, self.local.local, self.next_hop, self.interface)
    }

    /// Turn INVALID for `bad_link_lifetime`
    pub fn invalidate(&mut self, now: Timestamp, bad_link_lifetime: Duration) {
        if self.status == ReactiveStatus::Invalid {
            return;
        }
        self.status = ReactiveStatus::Invalid;
        self.retries = 0;
        self.lifetime = now + bad_link_lifetime;
    }

    /// Whether the neighbor is blacklisted at `now`
    pub fn is_blacklisted(&self, now: Timestamp) -> bool {
        self.blacklisted && now <= self.blacklist_until
    }

    pub fn insert_precursor(&mut self, addr: Ipv4Addr) -> bool {
        if self.precursors.contains(&addr) {
            return false;
        }
        self.precursors.push(addr);
        true
    }

    pub fn lookup_precursor(&self, addr: Ipv4Addr) -> bool {
        self.precursors.contains(&addr)
    }

    pub fn delete_precursor(&mut self, addr: Ipv4Addr) -> bool {
        let before = self.precursors.len();
        self.precursors.retain(|p| *p != addr);
        self.precursors.len() != before
    }

    pub fn delete_all_precursors(&mut self) {
        self.precursors.clear();
    }

    pub fn precursors(&self) -> &[Ipv4Addr] {
        &self.precursors
    }
}

/// Destination-keyed reactive routing table
#[derive(Debug)]
pub struct ReactiveTable {
    entries: BTreeMap<Ipv4Addr, ReactiveEntry>,
    bad_link_lifetime: Duration,
}

impl ReactiveTable {
    pub fn new(bad_link_lifetime: Duration) -> Self {
        Self {
            entries: BTreeMap::new(),
            bad_link_lifetime,
        }
    }

    pub fn bad_link_lifetime(&self) -> Duration {
        self.bad_link_lifetime
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ReactiveEntry> {
        self.entries.values()
    }

    /// Insert if absent; the retry counter restarts unless the entry is in search
    pub fn add_route(&mut self, mut entry: ReactiveEntry, now: Timestamp) -> bool {
        self.purge(now);
        if self.entries.contains_key(&entry.destination) {
            return false;
        }
        if entry.status != ReactiveStatus::InSearch {
            entry.retries = 0;
        }
        self.entries.insert(entry.destination, entry);
        true
    }

    pub fn lookup(&mut self, dst: Ipv4Addr, now: Timestamp) -> Option<&ReactiveEntry> {
        self.purge(now);
        self.entries.get(&dst)
    }

    pub fn lookup_mut(&mut self, dst: Ipv4Addr, now: Timestamp) -> Option<&mut ReactiveEntry> {
        self.purge(now);
        self.entries.get_mut(&dst)
    }

    /// Lookup that only matches VALID entries
    pub fn lookup_valid(&mut self, dst: Ipv4Addr, now: Timestamp) -> Option<&ReactiveEntry> {
        self.lookup(dst, now).filter(|e| e.is_valid())
    }

    /// Replace if present; the retry counter restarts unless the entry is in search
    pub fn update(&mut self, mut entry: ReactiveEntry) -> bool {
        let Some(existing) = self.entries.get_mut(&entry.destination) else {
            return false;
        };
        if entry.status != ReactiveStatus::InSearch {
            entry.retries = 0;
        }
        *existing = entry;
        true
    }

    pub fn set_status(&mut self, dst: Ipv4Addr, status: ReactiveStatus) -> bool {
        match self.entries.get_mut(&dst) {
            Some(entry) => {
                entry.status = status;
                entry.retries = 0;
                true
            }
            None => false,
        }
    }

    pub fn delete(&mut self, dst: Ipv4Addr) -> bool {
        self.entries.remove(&dst).is_some()
    }

    /// Valid destinations reachable through `next_hop`, with their sequence numbers
    pub fn destinations_via(&mut self, next_hop: Ipv4Addr, now: Timestamp) -> Vec<(Ipv4Addr, u32)> {
        self.purge(now);
        self.entries
            .values()
            .filter(|e| e.next_hop == next_hop && e.is_valid())
            .map(|e| (e.destination, e.seq))
            .collect()
    }

    /// Invalidate every VALID entry for the given destinations
    pub fn invalidate_destinations(&mut self, unreachable: &[(Ipv4Addr, u32)], now: Timestamp) {
        self.purge(now);
        let lifetime = self.bad_link_lifetime;
        for (dst, _) in unreachable {
            if let Some(entry) = self.entries.get_mut(dst) {
                if entry.is_valid() {
                    entry.invalidate(now, lifetime);
                }
            }
        }
    }

    pub fn delete_interface(&mut self, interface: InterfaceId) {
        self.entries.retain(|_, e| e.interface != interface);
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Blacklist `neighbor` for `timeout`
    pub fn mark_link_unidirectional(
        &mut self,
        neighbor: Ipv4Addr,
        timeout: Duration,
        now: Timestamp,
    ) -> bool {
        let Some(entry) = self.entries.get_mut(&neighbor) else {
            return false;
        };
        entry.blacklisted = true;
        entry.blacklist_until = now + timeout;
        entry.retries = 0;
        true
    }

    /// Lift the blacklist of `neighbor`, returning whether it was set
    pub fn clear_blacklist(&mut self, neighbor: Ipv4Addr) -> bool {
        match self.entries.get_mut(&neighbor) {
            Some(entry) if entry.blacklisted => {
                entry.blacklisted = false;
                entry.blacklist_until = Timestamp::ZERO;
                true
            }
            _ => false,
        }
    }

    /// Expire entries and elapsed blacklist flags
    pub fn purge(&mut self, now: Timestamp) {
        let lifetime = self.bad_link_lifetime;
        self.entries.retain(|dst, entry| {
            if entry.blacklisted && now > entry.blacklist_until {
                entry.blacklisted = false;
            }
            if entry.lifetime >= now {
                return true;
            }
            match entry.status {
                ReactiveStatus::Invalid => {
                    trace!(dst = %dst, "Deleting expired route");
                    false
                }
                ReactiveStatus::Valid => {
                    trace!(dst = %dst, "Invalidating expired route");
                    entry.invalidate(now, lifetime);
                    true
                }
                _ => true,
            }
        });
    }

    /// Human-readable listing of all entries
    pub fn dump(&self, now: Timestamp) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "\nDiscovery routing table");
        let _ = writeln!(
            out,
            "{:<16}{:<16}{:<16}{:<10}{:<10}Hops",
            "Destination", "Gateway", "Interface", "Flag", "Expire"
        );
        for e in self.entries.values() {
            let _ = writeln!(
                out,
                "{:<16}{:<16}{:<16}{:<10}{:<10}{}",
                e.destination.to_string(),
                e.next_hop.to_string(),
                e.local.local.to_string(),
                e.status.to_string(),
                format!("{:.2}", e.lifetime_left(now).as_secs_f64()),
                e.hop_count
            );
        }
        out
    }
}
