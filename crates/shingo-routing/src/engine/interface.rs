//! Interface lifecycle
//!
//! Each local interface owns one [`Endpoint`] bound to the routing control
//! port, plus a self entry in the zone table keyed by its broadcast address.

use std::net::Ipv4Addr;

use shingo_core::{Endpoint, InterfaceAddress, InterfaceId, LOOPBACK, Scheduler};
use tracing::{debug, info};

use super::{RouterTimer, ShingoRouter};
use crate::proactive::ProactiveEntry;

/// A registered local interface
#[derive(Debug)]
pub struct Interface<E> {
    pub id: InterfaceId,
    pub address: InterfaceAddress,
    /// Whether data packets received here may be forwarded
    pub forwarding: bool,
    endpoint: E,
}

impl<E: Endpoint> Interface<E> {
    pub fn new(id: InterfaceId, address: InterfaceAddress, endpoint: E) -> Self {
        Self {
            id,
            address,
            forwarding: true,
            endpoint,
        }
    }

    pub fn endpoint(&self) -> &E {
        &self.endpoint
    }

    pub(super) fn endpoint_mut(&mut self) -> &mut E {
        &mut self.endpoint
    }
}

impl<E: Endpoint, S: Scheduler<RouterTimer>> ShingoRouter<E, S> {
    /// Register an interface that came up
    pub fn notify_interface_up(&mut self, id: InterfaceId, address: InterfaceAddress, endpoint: E) {
        if address.local == LOOPBACK {
            return;
        }
        let now = self.now();
        if let Some(mut old) = self.interfaces.insert(id, Interface::new(id, address, endpoint)) {
            old.endpoint_mut().close();
            if old.address != address {
                self.proactive.delete(old.address.broadcast());
            }
        }
        self.proactive
            .upsert(ProactiveEntry::self_entry(id, address, now));
        if self.main_address.is_none() {
            self.main_address = Some(address.local);
        }
        info!(interface = %id, address = %address, "Interface up");
    }

    /// Unregister an interface and every route through it
    pub fn notify_interface_down(&mut self, id: InterfaceId) {
        let Some(mut iface) = self.interfaces.remove(&id) else {
            return;
        };
        iface.endpoint_mut().close();
        info!(interface = %id, address = %iface.address, "Interface down");

        if self.interfaces.is_empty() {
            debug!("No interfaces left, clearing routing tables");
            self.proactive.clear();
            for dst in self.advertise.iter().map(|e| e.destination).collect::<Vec<_>>() {
                self.advertise.force_delete_event(dst, &mut self.scheduler);
            }
            self.advertise.clear();
            self.reactive.clear();
            self.main_address = None;
            return;
        }

        self.proactive.delete_interface(id);
        for dst in self.advertise.delete_interface(id) {
            self.advertise.force_delete_event(dst, &mut self.scheduler);
        }
        self.reactive.delete_interface(id);
        if self.main_address == Some(iface.address.local) {
            self.main_address = self.interfaces.values().next().map(|i| i.address.local);
        }
    }

    /// An address was added to `id`; registers the interface if unknown
    pub fn notify_add_address(&mut self, id: InterfaceId, address: InterfaceAddress, endpoint: E) {
        if self.interfaces.contains_key(&id) {
            debug!(interface = %id, address = %address, "Interface already bound, ignoring new address");
            return;
        }
        self.notify_interface_up(id, address, endpoint);
    }

    /// An address was removed from `id`
    ///
    /// The interface is rebound to `remaining` when the host still has an
    /// address on it, otherwise it is unregistered.
    pub fn notify_remove_address(
        &mut self,
        id: InterfaceId,
        address: InterfaceAddress,
        remaining: Option<InterfaceAddress>,
    ) {
        let now = self.now();
        let Some(iface) = self.interfaces.get_mut(&id) else {
            return;
        };
        if iface.address != address {
            return;
        }
        match remaining {
            Some(next) => {
                info!(interface = %id, from = %address, to = %next, "Rebinding interface");
                iface.address = next;
                self.proactive.delete(address.broadcast());
                self.proactive
                    .upsert(ProactiveEntry::self_entry(id, next, now));
                if self.main_address == Some(address.local) {
                    self.main_address = Some(next.local);
                }
            }
            None => {
                if let Some(mut iface) = self.interfaces.remove(&id) {
                    iface.endpoint_mut().close();
                }
                self.proactive.delete(address.broadcast());
                if self.main_address == Some(address.local) {
                    self.main_address = self.interfaces.values().next().map(|i| i.address.local);
                }
                info!(interface = %id, address = %address, "Interface unregistered");
            }
        }
    }

    /// Enable or disable forwarding of data packets received on `id`
    pub fn set_forwarding(&mut self, id: InterfaceId, enabled: bool) {
        if let Some(iface) = self.interfaces.get_mut(&id) {
            iface.forwarding = enabled;
        }
    }

    pub fn interface(&self, id: InterfaceId) -> Option<&Interface<E>> {
        self.interfaces.get(&id)
    }

    pub fn interfaces(&self) -> impl Iterator<Item = &Interface<E>> {
        self.interfaces.values()
    }

    /// Whether `addr` is the local address of any interface
    pub fn is_my_own_address(&self, addr: Ipv4Addr) -> bool {
        self.interfaces.values().any(|i| i.address.local == addr)
    }

    /// Whether `addr` keys the self entry of one of our interfaces
    pub(super) fn is_own_broadcast(&self, addr: Ipv4Addr) -> bool {
        self.interfaces.values().any(|i| i.address.broadcast() == addr)
    }

    fn interface_address(&self, id: InterfaceId) -> Option<InterfaceAddress> {
        self.interfaces.get(&id).map(|i| i.address)
    }

    /// (id, address) of every interface, in id order
    pub(super) fn interface_snapshot(&self) -> Vec<(InterfaceId, InterfaceAddress)> {
        self.interfaces.values().map(|i| (i.id, i.address)).collect()
    }

    /// First interface, used when an entry needs an interface before any route exists
    pub(super) fn primary_interface(&self) -> Option<(InterfaceId, InterfaceAddress)> {
        self.interfaces.values().next().map(|i| (i.id, i.address))
    }

    /// Address of `id`, falling back to the primary interface
    pub(super) fn address_or_primary(&self, id: Option<InterfaceId>) -> Option<InterfaceAddress> {
        id.and_then(|id| self.interface_address(id))
            .or_else(|| self.primary_interface().map(|(_, addr)| addr))
    }
}
