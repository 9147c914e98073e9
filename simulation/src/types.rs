//! Core types for the SHINGO simulation

use std::fmt;
use std::net::Ipv4Addr;
use std::time::Duration;

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use shingo_core::{DataPacket, DropReason, PacketHeader, Timestamp};
use thiserror::Error;

/// Identifier of a simulated node, 1-based
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct NodeId(pub u16);

impl NodeId {
    /// Address of the node's single radio interface
    ///
    /// Node `n` is `10.0.hi.lo`, so up to 65 534 nodes share one /16.
    pub fn address(self) -> Ipv4Addr {
        let [hi, lo] = self.0.to_be_bytes();
        Ipv4Addr::new(10, 0, hi, lo)
    }

    /// Node owning `address`, if it is a simulation address
    pub fn from_address(address: Ipv4Addr) -> Option<Self> {
        match address.octets() {
            [10, 0, hi, lo] => {
                let id = u16::from_be_bytes([hi, lo]);
                (id != 0 && id != u16::MAX).then_some(Self(id))
            }
            _ => None,
        }
    }

    /// Ids `1..=count`
    pub fn range(count: u16) -> impl Iterator<Item = NodeId> {
        (1..=count).map(NodeId)
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "n{}", self.0)
    }
}

/// Prefix length of the shared radio subnet
pub const SUBNET_PREFIX: u8 = 16;

/// Something travelling over the radio medium
#[derive(Debug, Clone)]
pub enum Frame {
    /// A control datagram
    Control {
        from: NodeId,
        to: NodeId,
        datagram: Bytes,
        ttl: u8,
    },
    /// A data packet on one hop of its path
    Data {
        from: NodeId,
        to: NodeId,
        packet: DataPacket,
        header: PacketHeader,
    },
}

impl Frame {
    pub fn receiver(&self) -> NodeId {
        match self {
            Self::Control { to, .. } | Self::Data { to, .. } => *to,
        }
    }

    pub fn sender(&self) -> NodeId {
        match self {
            Self::Control { from, .. } | Self::Data { from, .. } => *from,
        }
    }
}

/// What finally happened to a data packet
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PacketFate {
    Delivered { at: NodeId, hops: u32 },
    /// The engine dropped it
    Dropped { at: NodeId, reason: DropReason },
    /// Its TTL ran out while forwarding
    TtlExpired { at: NodeId },
    /// The next hop was out of radio range or the frame was lost
    LinkLost { at: NodeId, next_hop: Ipv4Addr },
    /// No node would route it
    Unroutable { at: NodeId },
}

impl PacketFate {
    pub fn is_delivered(&self) -> bool {
        matches!(self, Self::Delivered { .. })
    }
}

/// Events recorded during a simulation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum SimEvent {
    PacketSent {
        uid: u64,
        from: NodeId,
        destination: Ipv4Addr,
        time: Timestamp,
    },
    PacketForwarded {
        uid: u64,
        at: NodeId,
        next_hop: Ipv4Addr,
        time: Timestamp,
    },
    PacketFinished {
        uid: u64,
        fate: PacketFate,
        time: Timestamp,
    },
    LinkDown {
        a: NodeId,
        b: NodeId,
        time: Timestamp,
    },
    LinkUp {
        a: NodeId,
        b: NodeId,
        time: Timestamp,
    },
}

/// Tracking record of a data packet in flight
#[derive(Debug, Clone)]
pub struct PacketRecord {
    pub uid: u64,
    pub from: NodeId,
    pub destination: Ipv4Addr,
    pub sent_at: Timestamp,
    pub hops: u32,
    pub fate: Option<(PacketFate, Timestamp)>,
}

impl PacketRecord {
    /// Time from send to delivery
    pub fn latency(&self) -> Option<Duration> {
        match self.fate {
            Some((PacketFate::Delivered { .. }, at)) => Some(at.saturating_duration_since(self.sent_at)),
            _ => None,
        }
    }
}

/// Errors raised while building or driving a simulation
#[derive(Debug, Error)]
pub enum SimError {
    #[error("Unknown node: {0}")]
    UnknownNode(NodeId),

    #[error("Invalid topology: {0}")]
    InvalidTopology(String),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Routing error: {0}")]
    Routing(#[from] shingo_routing::RoutingError),
}

pub type SimResult<T> = Result<T, SimError>;
