//! Configuration for the node runtime

use std::collections::BTreeSet;
use std::net::{Ipv4Addr, SocketAddr};
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use shingo_core::{CONTROL_PORT, InterfaceAddress, InterfaceId};
use shingo_routing::RouterConfig;

use crate::error::{NodeError, NodeResult};

/// One routed interface
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InterfaceConfig {
    pub id: u32,
    /// Local address; the control socket binds to it
    pub address: Ipv4Addr,
    pub prefix_len: u8,
    /// Bind port, the node's control port when `None`
    #[serde(default)]
    pub port: Option<u16>,
    /// Static neighbors for links without broadcast
    ///
    /// When set, broadcasts are sent to each peer instead and unicasts to a
    /// listed peer use its port.
    #[serde(default)]
    pub peers: Vec<SocketAddr>,
    #[serde(default = "default_forwarding")]
    pub forwarding: bool,
}

fn default_forwarding() -> bool {
    true
}

impl InterfaceConfig {
    pub fn new(id: u32, address: Ipv4Addr, prefix_len: u8) -> Self {
        Self {
            id,
            address,
            prefix_len,
            port: None,
            peers: Vec::new(),
            forwarding: true,
        }
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }

    pub fn with_peer(mut self, peer: SocketAddr) -> Self {
        self.peers.push(peer);
        self
    }

    pub fn interface_id(&self) -> InterfaceId {
        InterfaceId(self.id)
    }

    pub fn interface_address(&self) -> InterfaceAddress {
        InterfaceAddress::with_prefix(self.address, self.prefix_len)
    }
}

/// Configuration for a [`ShingoNode`](crate::ShingoNode)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    pub interfaces: Vec<InterfaceConfig>,
    /// Port control datagrams are sent to
    pub control_port: u16,
    pub router: RouterConfig,
    /// Command channel capacity
    pub command_channel_capacity: usize,
    /// Event broadcast channel capacity
    pub event_channel_capacity: usize,
    /// Largest control datagram accepted
    pub receive_buffer_size: usize,
    /// Log the routing tables at this interval
    pub dump_interval: Option<Duration>,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            interfaces: Vec::new(),
            control_port: CONTROL_PORT,
            router: RouterConfig::default(),
            command_channel_capacity: 256,
            event_channel_capacity: 1024,
            receive_buffer_size: 2048,
            dump_interval: None,
        }
    }
}

impl NodeConfig {
    /// Parse a configuration from JSON
    pub fn from_json(json: &str) -> NodeResult<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Load a JSON configuration file
    pub fn load(path: impl AsRef<Path>) -> NodeResult<Self> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json(&json)
    }

    pub fn with_interface(mut self, interface: InterfaceConfig) -> Self {
        self.interfaces.push(interface);
        self
    }

    pub fn with_router(mut self, router: RouterConfig) -> Self {
        self.router = router;
        self
    }

    pub fn with_control_port(mut self, port: u16) -> Self {
        self.control_port = port;
        self
    }

    pub fn with_dump_interval(mut self, interval: Duration) -> Self {
        self.dump_interval = Some(interval);
        self
    }

    /// Check the configuration for inconsistent values
    pub fn validate(&self) -> NodeResult<()> {
        if self.interfaces.is_empty() {
            return Err(NodeError::Config("at least one interface is required".into()));
        }
        let mut ids = BTreeSet::new();
        for interface in &self.interfaces {
            if !ids.insert(interface.id) {
                return Err(NodeError::Config(format!("duplicate interface id {}", interface.id)));
            }
            if interface.prefix_len > 32 {
                return Err(NodeError::Config(format!(
                    "prefix length {} of {} exceeds 32",
                    interface.prefix_len, interface.address
                )));
            }
            if let Some(peer) = interface.peers.iter().find(|p| !p.is_ipv4()) {
                return Err(NodeError::NotIpv4(*peer));
            }
        }
        if self.command_channel_capacity == 0 || self.event_channel_capacity == 0 {
            return Err(NodeError::Config("channel capacities must be non-zero".into()));
        }
        if self.dump_interval.is_some_and(|interval| interval.is_zero()) {
            return Err(NodeError::Config("dump_interval must be non-zero".into()));
        }
        self.router.validate()?;
        Ok(())
    }
}
