//! Data packets awaiting a route

use std::net::Ipv4Addr;

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::address::InterfaceId;

/// Network-layer header of a data packet
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PacketHeader {
    /// Source address (may be rewritten once a route is chosen)
    pub source: Ipv4Addr,
    /// Final destination
    pub destination: Ipv4Addr,
    /// IP time-to-live
    pub ttl: u8,
    /// Upper-layer protocol number
    pub protocol: u8,
}

impl PacketHeader {
    /// Create a header with the default TTL of 64 and UDP as protocol
    pub fn new(source: Ipv4Addr, destination: Ipv4Addr) -> Self {
        Self {
            source,
            destination,
            ttl: 64,
            protocol: 17,
        }
    }

    /// Set the TTL
    pub fn with_ttl(mut self, ttl: u8) -> Self {
        self.ttl = ttl;
        self
    }
}

/// Marks a packet whose route-output was deferred to route discovery
///
/// Records the output interface the caller originally asked for, if any.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeferredRouteTag {
    /// Requested output interface
    pub oif: Option<InterfaceId>,
}

/// An opaque data packet
///
/// The payload is never inspected by the routing engine. Identity for
/// duplicate detection is the `uid`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataPacket {
    uid: u64,
    payload: Bytes,
    deferred: Option<DeferredRouteTag>,
}

impl DataPacket {
    /// Create a packet
    pub fn new(uid: u64, payload: impl Into<Bytes>) -> Self {
        Self {
            uid,
            payload: payload.into(),
            deferred: None,
        }
    }

    /// Unique packet identifier
    pub fn uid(&self) -> u64 {
        self.uid
    }

    /// Packet payload
    pub fn payload(&self) -> &Bytes {
        &self.payload
    }

    /// Payload length in bytes
    pub fn len(&self) -> usize {
        self.payload.len()
    }

    /// Whether the payload is empty
    pub fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }

    /// Attach a deferred-route tag unless one is already present
    pub fn add_deferred_tag(&mut self, tag: DeferredRouteTag) {
        if self.deferred.is_none() {
            self.deferred = Some(tag);
        }
    }

    /// Peek at the deferred-route tag
    pub fn deferred_tag(&self) -> Option<DeferredRouteTag> {
        self.deferred
    }

    /// Remove and return the deferred-route tag
    pub fn take_deferred_tag(&mut self) -> Option<DeferredRouteTag> {
        self.deferred.take()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deferred_tag_is_set_once() {
        let mut packet = DataPacket::new(7, &b"payload"[..]);
        assert!(packet.deferred_tag().is_none());

        packet.add_deferred_tag(DeferredRouteTag { oif: Some(InterfaceId(1)) });
        packet.add_deferred_tag(DeferredRouteTag { oif: None });
        assert_eq!(
            packet.deferred_tag(),
            Some(DeferredRouteTag { oif: Some(InterfaceId(1)) })
        );

        assert!(packet.take_deferred_tag().is_some());
        assert!(packet.deferred_tag().is_none());
    }

    #[test]
    fn test_header_defaults() {
        let header = PacketHeader::new(Ipv4Addr::new(10, 0, 0, 1), Ipv4Addr::new(10, 0, 0, 9));
        assert_eq!(header.ttl, 64);
        assert_eq!(header.with_ttl(3).ttl, 3);
    }
}
