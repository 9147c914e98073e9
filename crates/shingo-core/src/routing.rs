//! Routing decisions and packet continuations

use std::fmt;
use std::net::Ipv4Addr;

use serde::{Deserialize, Serialize};

use crate::address::{InterfaceId, LOOPBACK};
use crate::packet::{DataPacket, PacketHeader};

/// A resolved forwarding decision
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Route {
    /// Final destination
    pub destination: Ipv4Addr,
    /// Local address to use as source
    pub source: Ipv4Addr,
    /// Next hop (gateway)
    pub gateway: Ipv4Addr,
    /// Output interface, `None` for the loopback device
    pub interface: Option<InterfaceId>,
}

impl Route {
    /// Create a route through a real interface
    pub fn new(
        destination: Ipv4Addr,
        source: Ipv4Addr,
        gateway: Ipv4Addr,
        interface: InterfaceId,
    ) -> Self {
        Self {
            destination,
            source,
            gateway,
            interface: Some(interface),
        }
    }

    /// Create the loopback route used while a packet waits for discovery
    pub fn loopback(destination: Ipv4Addr, source: Ipv4Addr) -> Self {
        Self {
            destination,
            source,
            gateway: LOOPBACK,
            interface: None,
        }
    }

    /// Check if this is the loopback route
    pub fn is_loopback(&self) -> bool {
        self.interface.is_none() && self.gateway == LOOPBACK
    }
}

impl fmt::Display for Route {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.interface {
            Some(iface) => write!(
                f,
                "{} via {} dev {} src {}",
                self.destination, self.gateway, iface, self.source
            ),
            None => write!(f, "{} via lo src {}", self.destination, self.source),
        }
    }
}

/// The device a packet arrived on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InputDevice {
    /// Looped back by a deferred route-output
    Loopback,
    /// Received on a real interface
    Interface(InterfaceId),
}

/// Reasons for dropping a data packet
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DropReason {
    /// No route available to destination
    NoRoute,
    /// Queue capacity exceeded
    QueueFull,
    /// Waited longer than the queue timeout
    QueueTimeout,
    /// Route discovery exhausted its retries
    DiscoveryFailed,
    /// Resolved route uses a different interface than requested
    InterfaceMismatch,
    /// Same packet already queued for this destination
    Duplicate,
}

impl fmt::Display for DropReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoRoute => write!(f, "No route to host"),
            Self::QueueFull => write!(f, "Queue full"),
            Self::QueueTimeout => write!(f, "Queue timeout"),
            Self::DiscoveryFailed => write!(f, "Route discovery failed"),
            Self::InterfaceMismatch => write!(f, "Output interface mismatch"),
            Self::Duplicate => write!(f, "Duplicate packet"),
        }
    }
}

/// Forward a packet along a route
pub type ForwardFn = Box<dyn FnOnce(Route, DataPacket, PacketHeader) + Send>;

/// Deliver a packet to the local host
pub type LocalDeliverFn = Box<dyn FnOnce(DataPacket, PacketHeader, InterfaceId) + Send>;

/// Report a dropped packet
pub type ErrorFn = Box<dyn FnOnce(DataPacket, PacketHeader, DropReason) + Send>;

/// Forward and drop continuations for a packet whose fate is not yet known
///
/// Exactly one of the two continuations runs: consuming `self` enforces it.
pub struct Completion {
    forward: ForwardFn,
    error: ErrorFn,
}

impl Completion {
    /// Bundle a forward and an error continuation
    pub fn new(forward: ForwardFn, error: ErrorFn) -> Self {
        Self { forward, error }
    }

    /// Forward the packet along `route`
    pub fn forward(self, route: Route, packet: DataPacket, header: PacketHeader) {
        (self.forward)(route, packet, header)
    }

    /// Drop the packet with `reason`
    pub fn fail(self, packet: DataPacket, header: PacketHeader, reason: DropReason) {
        (self.error)(packet, header, reason)
    }
}

impl fmt::Debug for Completion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Completion").finish_non_exhaustive()
    }
}

/// Continuations supplied by the caller of route-input
pub struct InputCallbacks {
    /// Unicast forward
    pub forward: ForwardFn,
    /// Local delivery
    pub local_deliver: LocalDeliverFn,
    /// Error / drop notification
    pub error: ErrorFn,
}

impl InputCallbacks {
    /// Split into the completion used when the packet is queued
    pub fn into_completion(self) -> Completion {
        Completion::new(self.forward, self.error)
    }
}

impl fmt::Debug for InputCallbacks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InputCallbacks").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn make_packet() -> (DataPacket, PacketHeader) {
        (
            DataPacket::new(1, &b"x"[..]),
            PacketHeader::new(Ipv4Addr::new(10, 0, 0, 1), Ipv4Addr::new(10, 0, 0, 2)),
        )
    }

    #[test]
    fn test_loopback_route() {
        let route = Route::loopback(Ipv4Addr::new(10, 0, 0, 2), Ipv4Addr::new(10, 0, 0, 1));
        assert!(route.is_loopback());
        assert_eq!(route.gateway, LOOPBACK);

        let route = Route::new(
            Ipv4Addr::new(10, 0, 0, 2),
            Ipv4Addr::new(10, 0, 0, 1),
            Ipv4Addr::new(10, 0, 0, 2),
            InterfaceId(1),
        );
        assert!(!route.is_loopback());
    }

    #[test]
    fn test_completion_runs_one_continuation() {
        let forwarded = Arc::new(AtomicUsize::new(0));
        let failed = Arc::new(AtomicUsize::new(0));

        let f = forwarded.clone();
        let e = failed.clone();
        let completion = Completion::new(
            Box::new(move |_, _, _| {
                f.fetch_add(1, Ordering::SeqCst);
            }),
            Box::new(move |_, _, _| {
                e.fetch_add(1, Ordering::SeqCst);
            }),
        );

        let (packet, header) = make_packet();
        completion.fail(packet, header, DropReason::QueueTimeout);

        assert_eq!(forwarded.load(Ordering::SeqCst), 0);
        assert_eq!(failed.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_drop_reason_display() {
        assert_eq!(DropReason::NoRoute.to_string(), "No route to host");
        assert_eq!(DropReason::DiscoveryFailed.to_string(), "Route discovery failed");
    }
}
