//! # Shingo Node
//!
//! Runs the hybrid routing engine on real UDP sockets.
//!
//! [`ShingoNode`] binds one control socket per configured interface;
//! [`ShingoNode::start`] hands the engine to a tokio task and returns a
//! [`NodeHandle`] for resolving routes, inspecting the tables and shutting
//! down. The node is a control plane: it decides next hops and leaves data
//! forwarding to the host.
//!
//! ## Example
//!
//! ```rust,ignore
//! use shingo_node::{InterfaceConfig, NodeConfig, ShingoNode};
//!
//! let config = NodeConfig::default()
//!     .with_interface(InterfaceConfig::new(1, "10.0.0.1".parse()?, 24));
//! let node = ShingoNode::bind(config).await?;
//! let handle = node.start()?;
//!
//! // Waits for a discovery when the destination is outside the zone
//! let route = handle.resolve("10.0.7.3".parse()?).await?;
//! println!("next hop {}", route.gateway);
//!
//! handle.shutdown().await?;
//! ```

mod config;
mod endpoint;
mod error;
mod runtime;

pub use config::{InterfaceConfig, NodeConfig};
pub use endpoint::{UdpEndpoint, decode_frame, encode_frame};
pub use error::{NodeError, NodeResult};
pub use runtime::NodeEvent;

use std::collections::BTreeMap;
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::sync::Arc;

use shingo_core::{EventQueue, InterfaceId, Route};
use shingo_logging::{NodeContextGuard, node_span};
use shingo_routing::{RouterStats, ShingoRouter};
use tokio::net::UdpSocket;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{Instrument, info, instrument};

use runtime::{NodeCommand, Runtime, spawn_receiver};

/// A node with bound sockets, not yet running
pub struct ShingoNode {
    config: NodeConfig,
    sockets: Vec<(InterfaceConfig, Arc<UdpSocket>)>,
}

impl ShingoNode {
    /// Validate the configuration and bind every control socket
    #[instrument(skip(config), fields(interfaces = config.interfaces.len()))]
    pub async fn bind(config: NodeConfig) -> NodeResult<Self> {
        config.validate()?;
        let mut sockets = Vec::with_capacity(config.interfaces.len());
        for interface in &config.interfaces {
            let port = interface.port.unwrap_or(config.control_port);
            let socket = UdpSocket::bind(SocketAddrV4::new(interface.address, port)).await?;
            socket.set_broadcast(true)?;
            info!(interface = interface.id, local = %socket.local_addr()?, "Control socket bound");
            sockets.push((interface.clone(), Arc::new(socket)));
        }
        Ok(Self { config, sockets })
    }

    pub fn config(&self) -> &NodeConfig {
        &self.config
    }

    /// Address the control socket of `interface` is bound to
    pub fn local_addr(&self, interface: InterfaceId) -> NodeResult<SocketAddr> {
        let (_, socket) = self.socket(interface)?;
        Ok(socket.local_addr()?)
    }

    /// Add a static neighbor to `interface`
    pub fn add_peer(&mut self, interface: InterfaceId, peer: SocketAddr) -> NodeResult<()> {
        if !peer.is_ipv4() {
            return Err(NodeError::NotIpv4(peer));
        }
        let (config, _) = self
            .sockets
            .iter_mut()
            .find(|(c, _)| c.interface_id() == interface)
            .ok_or(NodeError::InterfaceNotFound(interface))?;
        config.peers.push(peer);
        Ok(())
    }

    fn socket(&self, interface: InterfaceId) -> NodeResult<&(InterfaceConfig, Arc<UdpSocket>)> {
        self.sockets
            .iter()
            .find(|(c, _)| c.interface_id() == interface)
            .ok_or(NodeError::InterfaceNotFound(interface))
    }

    /// Bring the interfaces up and spawn the runtime
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(self) -> NodeResult<NodeHandle> {
        let mut router = ShingoRouter::new(self.config.router.clone(), EventQueue::new())?;

        let capacity = self.config.command_channel_capacity;
        let (inbound_tx, inbound_rx) = mpsc::channel(capacity);
        let (command_tx, command_rx) = mpsc::channel(capacity);
        let (events_tx, _) = broadcast::channel(self.config.event_channel_capacity);
        let (shutdown_tx, _) = broadcast::channel(1);

        let mut receivers = BTreeMap::new();
        for (interface, socket) in self.sockets {
            let id = interface.interface_id();
            let address = interface.interface_address();
            let endpoint = UdpEndpoint::new(
                socket.clone(),
                self.config.control_port,
                address.broadcast_target(),
                &interface.peers,
            );
            router.notify_interface_up(id, address, endpoint);
            if !interface.forwarding {
                router.set_forwarding(id, false);
            }
            let receiver = spawn_receiver(
                id,
                socket,
                self.config.receive_buffer_size,
                inbound_tx.clone(),
                shutdown_tx.subscribe(),
            );
            receivers.insert(id, receiver);
        }

        let main_address = router.main_address();
        let span = {
            let _context = NodeContextGuard::live(main_address.map_or_else(|| "-".to_string(), |a| a.to_string()));
            node_span()
        };
        let runtime = Runtime::new(
            router,
            inbound_rx,
            command_rx,
            events_tx.clone(),
            shutdown_tx.subscribe(),
            receivers,
            self.config.dump_interval,
        );
        let task = tokio::spawn(runtime.run().instrument(span));

        Ok(NodeHandle {
            main_address,
            commands: command_tx,
            events: events_tx,
            shutdown: shutdown_tx,
            task,
        })
    }
}

/// Handle to a running node
pub struct NodeHandle {
    main_address: Option<Ipv4Addr>,
    commands: mpsc::Sender<NodeCommand>,
    events: broadcast::Sender<NodeEvent>,
    shutdown: broadcast::Sender<()>,
    task: JoinHandle<NodeResult<()>>,
}

impl NodeHandle {
    /// Main address of the node
    pub fn main_address(&self) -> Option<Ipv4Addr> {
        self.main_address
    }

    /// Route to `destination`
    ///
    /// Resolves immediately for zone destinations. Otherwise waits until a
    /// discovery succeeds or gives up.
    pub async fn resolve(&self, destination: Ipv4Addr) -> NodeResult<Route> {
        let (reply, rx) = oneshot::channel();
        self.commands.send(NodeCommand::Resolve { destination, reply }).await?;
        rx.await?
    }

    /// Dump of every routing table, stamped with the wall clock
    pub async fn dump_tables(&self) -> NodeResult<String> {
        let (reply, rx) = oneshot::channel();
        self.commands.send(NodeCommand::DumpTables { reply }).await?;
        Ok(rx.await?)
    }

    /// Control traffic counters
    pub async fn stats(&self) -> NodeResult<RouterStats> {
        let (reply, rx) = oneshot::channel();
        self.commands.send(NodeCommand::Stats { reply }).await?;
        Ok(rx.await?)
    }

    /// Take an interface down, dropping every route through it
    pub async fn interface_down(&self, interface: InterfaceId) -> NodeResult<()> {
        let (reply, rx) = oneshot::channel();
        self.commands.send(NodeCommand::InterfaceDown { interface, reply }).await?;
        rx.await?
    }

    /// Subscribe to node events
    pub fn events(&self) -> broadcast::Receiver<NodeEvent> {
        self.events.subscribe()
    }

    /// Stop the runtime and wait for it to finish
    pub async fn shutdown(self) -> NodeResult<()> {
        let _ = self.shutdown.send(());
        self.task.await?
    }
}
