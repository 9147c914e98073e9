//! Interface identity and addressing

use std::fmt;
use std::net::Ipv4Addr;

use serde::{Deserialize, Serialize};

/// Loopback address used as the gateway of deferred (looped back) routes
pub const LOOPBACK: Ipv4Addr = Ipv4Addr::LOCALHOST;

/// Limited broadcast address (255.255.255.255)
pub const LIMITED_BROADCAST: Ipv4Addr = Ipv4Addr::BROADCAST;

/// UDP port reserved for routing control traffic
pub const CONTROL_PORT: u16 = 5555;

/// Identifier of a local network interface
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct InterfaceId(pub u32);

impl InterfaceId {
    /// Create a new interface identifier
    pub const fn new(index: u32) -> Self {
        Self(index)
    }

    /// Get the raw interface index
    pub const fn index(self) -> u32 {
        self.0
    }
}

impl fmt::Display for InterfaceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "if{}", self.0)
    }
}

/// An IPv4 address bound to a local interface
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct InterfaceAddress {
    /// Local unicast address
    pub local: Ipv4Addr,
    /// Subnet mask
    pub mask: Ipv4Addr,
}

impl InterfaceAddress {
    /// Create an interface address from a local address and mask
    pub fn new(local: Ipv4Addr, mask: Ipv4Addr) -> Self {
        Self { local, mask }
    }

    /// Create an interface address from a local address and prefix length
    pub fn with_prefix(local: Ipv4Addr, prefix_len: u8) -> Self {
        let bits = if prefix_len == 0 {
            0
        } else {
            u32::MAX << (32 - u32::from(prefix_len.min(32)))
        };
        Self {
            local,
            mask: Ipv4Addr::from(bits),
        }
    }

    /// Subnet-directed broadcast address
    pub fn broadcast(&self) -> Ipv4Addr {
        Ipv4Addr::from(u32::from(self.local) | !u32::from(self.mask))
    }

    /// Whether the mask is /32 (host route only)
    pub fn is_host_mask(&self) -> bool {
        self.mask == Ipv4Addr::BROADCAST
    }

    /// Address control broadcasts are sent to from this interface
    ///
    /// Limited broadcast on /32 addresses, subnet-directed otherwise.
    pub fn broadcast_target(&self) -> Ipv4Addr {
        if self.is_host_mask() {
            LIMITED_BROADCAST
        } else {
            self.broadcast()
        }
    }

    /// Whether `addr` is a broadcast address for this interface
    pub fn is_broadcast_for(&self, addr: Ipv4Addr) -> bool {
        addr == self.broadcast() || addr == LIMITED_BROADCAST
    }

    /// Whether `addr` lies inside this interface's subnet
    pub fn contains(&self, addr: Ipv4Addr) -> bool {
        let mask = u32::from(self.mask);
        u32::from(self.local) & mask == u32::from(addr) & mask
    }
}

impl fmt::Display for InterfaceAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let prefix = u32::from(self.mask).count_ones();
        write!(f, "{}/{}", self.local, prefix)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_subnet_broadcast() {
        let addr = InterfaceAddress::with_prefix(Ipv4Addr::new(10, 1, 1, 3), 24);
        assert_eq!(addr.broadcast(), Ipv4Addr::new(10, 1, 1, 255));
        assert_eq!(addr.broadcast_target(), Ipv4Addr::new(10, 1, 1, 255));
        assert!(addr.is_broadcast_for(Ipv4Addr::new(10, 1, 1, 255)));
        assert!(addr.is_broadcast_for(LIMITED_BROADCAST));
        assert!(!addr.is_broadcast_for(Ipv4Addr::new(10, 1, 1, 4)));
    }

    #[test]
    fn test_host_mask_uses_limited_broadcast() {
        let addr = InterfaceAddress::with_prefix(Ipv4Addr::new(192, 168, 0, 7), 32);
        assert!(addr.is_host_mask());
        assert_eq!(addr.broadcast_target(), LIMITED_BROADCAST);
    }

    #[test]
    fn test_contains() {
        let addr = InterfaceAddress::with_prefix(Ipv4Addr::new(10, 0, 0, 1), 16);
        assert!(addr.contains(Ipv4Addr::new(10, 0, 200, 9)));
        assert!(!addr.contains(Ipv4Addr::new(10, 1, 0, 1)));
    }

    #[test]
    fn test_display() {
        let addr = InterfaceAddress::with_prefix(Ipv4Addr::new(10, 1, 1, 1), 24);
        assert_eq!(addr.to_string(), "10.1.1.1/24");
        assert_eq!(InterfaceId(2).to_string(), "if2");
    }
}
