//! Received data packets

use shingo_core::{
    DataPacket, DropReason, Endpoint, InputCallbacks, InputDevice, PacketHeader, Route, Scheduler,
};
use tracing::{debug, trace};

use super::{RouterTimer, ShingoRouter};

impl<E: Endpoint, S: Scheduler<RouterTimer>> ShingoRouter<E, S> {
    /// Handle a received data packet
    ///
    /// Returns `true` when the packet was handled: delivered, forwarded,
    /// buffered or dropped through `callbacks.error`. On `false` nothing
    /// was called and the host drops the packet.
    pub fn route_input(
        &mut self,
        packet: DataPacket,
        header: PacketHeader,
        input: InputDevice,
        callbacks: InputCallbacks,
    ) -> bool {
        if self.interfaces.is_empty() {
            return false;
        }
        let dst = header.destination;
        if dst.is_multicast() {
            trace!(%dst, "Multicast is not routed");
            return false;
        }

        let interface = match input {
            InputDevice::Loopback => {
                if packet.deferred_tag().is_none() {
                    return false;
                }
                if !self.config.enable_buffering {
                    debug!(%dst, "Buffering disabled, dropping deferred packet");
                    (callbacks.error)(packet, header, DropReason::NoRoute);
                    return true;
                }
                self.deferred_route_output(packet, header, callbacks.into_completion());
                return true;
            }
            InputDevice::Interface(id) => id,
        };

        if self.is_my_own_address(header.source) {
            trace!(src = %header.source, "Own packet echoed back");
            return true;
        }
        let Some(iface) = self.interfaces.get(&interface) else {
            return false;
        };
        let receiver = iface.address;
        let forwarding = iface.forwarding;

        if receiver.is_broadcast_for(dst) {
            trace!(%dst, %interface, "Broadcast delivered locally");
            let InputCallbacks {
                forward,
                local_deliver,
                ..
            } = callbacks;
            local_deliver(packet.clone(), header, interface);
            if header.ttl > 1 {
                let excluded = self
                    .primary_interface()
                    .map_or(receiver.broadcast(), |(_, a)| a.broadcast());
                match self.proactive.lookup_for_input(dst, excluded) {
                    Some(entry) => forward(entry.route(), packet, header),
                    None => trace!(%dst, "No route to rebroadcast"),
                }
            }
            return true;
        }

        if self.is_my_own_address(dst) {
            trace!(%dst, %interface, "Delivered locally");
            (callbacks.local_deliver)(packet, header, interface);
            return true;
        }

        if !forwarding {
            debug!(%dst, %interface, "Forwarding disabled on receiving interface");
            (callbacks.error)(packet, header, DropReason::NoRoute);
            return true;
        }

        let zone_route = self.proactive.lookup(dst).and_then(|entry| {
            self.proactive.lookup(entry.next_hop).map(|via| {
                Route::new(dst, via.local.local, via.next_hop, via.interface)
            })
        });
        if let Some(route) = zone_route {
            trace!(%route, "Forwarding through zone");
            (callbacks.forward)(route, packet, header);
            return true;
        }

        self.forward_reactive(packet, header, callbacks)
    }

    /// Forward through a discovered route, refreshing every route the
    /// packet's path depends on
    fn forward_reactive(&mut self, packet: DataPacket, header: PacketHeader, callbacks: InputCallbacks) -> bool {
        let now = self.now();
        let dst = header.destination;
        let origin = header.source;
        self.reactive.purge(now);

        let Some(to_dst) = self.reactive.lookup_valid(dst, now).cloned() else {
            trace!(%dst, "No route to forward");
            return false;
        };
        let origin_next_hop = self.reactive.lookup(origin, now).map(|e| e.next_hop);

        let active = self.config.active_route_timeout;
        let mut refresh = vec![origin, dst, to_dst.next_hop];
        refresh.extend(origin_next_hop);
        for addr in refresh {
            if let Some(entry) = self.reactive.lookup_mut(addr, now) {
                if entry.is_valid() {
                    entry.retries = 0;
                    entry.extend_lifetime(now, active);
                }
            }
        }

        let route = to_dst.route();
        trace!(%route, "Forwarding through discovered route");
        (callbacks.forward)(route, packet, header);
        true
    }
}
