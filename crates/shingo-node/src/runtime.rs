//! The node event loop
//!
//! One task owns the engine. Received control frames, commands and timer
//! deadlines are serialized through a single `select!`, so the engine is
//! never shared and needs no locks. Protocol time is the elapsed time since
//! the loop started; the engine's event queue is advanced to it before
//! every input.

use std::collections::BTreeMap;
use std::net::{Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use chrono::Utc;
use parking_lot::Mutex;
use shingo_core::{
    DataPacket, DropReason, EventQueue, InputCallbacks, InputDevice, InterfaceId, PacketHeader,
    Route, Timestamp,
};
use shingo_routing::{OutputRoute, RouterStats, RouterTimer, RoutingError, ShingoRouter};
use tokio::net::UdpSocket;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{Instant, Interval};
use tracing::{debug, info, trace, warn};

use crate::endpoint::{UdpEndpoint, decode_frame};
use crate::error::{NodeError, NodeResult};

pub(crate) type Router = ShingoRouter<UdpEndpoint, EventQueue<RouterTimer>>;

type PendingReply = Arc<Mutex<Option<oneshot::Sender<NodeResult<Route>>>>>;

/// Requests from a [`NodeHandle`](crate::NodeHandle)
#[derive(Debug)]
pub(crate) enum NodeCommand {
    Resolve {
        destination: Ipv4Addr,
        reply: oneshot::Sender<NodeResult<Route>>,
    },
    DumpTables {
        reply: oneshot::Sender<String>,
    },
    Stats {
        reply: oneshot::Sender<RouterStats>,
    },
    InterfaceDown {
        interface: InterfaceId,
        reply: oneshot::Sender<NodeResult<()>>,
    },
}

/// Something the node observed
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeEvent {
    /// A route was handed to a waiting resolver
    RouteResolved(Route),
    /// A destination could not be reached
    Unreachable {
        destination: Ipv4Addr,
        reason: DropReason,
    },
    InterfaceDown(InterfaceId),
}

/// A control frame read from an interface socket
#[derive(Debug)]
pub(crate) struct Inbound {
    pub interface: InterfaceId,
    pub sender: Ipv4Addr,
    pub ttl: u8,
    pub datagram: Bytes,
}

pub(crate) struct Runtime {
    router: Router,
    epoch: Instant,
    inbound: mpsc::Receiver<Inbound>,
    commands: mpsc::Receiver<NodeCommand>,
    events: broadcast::Sender<NodeEvent>,
    shutdown: broadcast::Receiver<()>,
    receivers: BTreeMap<InterfaceId, JoinHandle<()>>,
    dump_interval: Option<Duration>,
    next_uid: u64,
}

impl Runtime {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        router: Router,
        inbound: mpsc::Receiver<Inbound>,
        commands: mpsc::Receiver<NodeCommand>,
        events: broadcast::Sender<NodeEvent>,
        shutdown: broadcast::Receiver<()>,
        receivers: BTreeMap<InterfaceId, JoinHandle<()>>,
        dump_interval: Option<Duration>,
    ) -> Self {
        Self {
            router,
            epoch: Instant::now(),
            inbound,
            commands,
            events,
            shutdown,
            receivers,
            dump_interval,
            next_uid: 0,
        }
    }

    pub(crate) async fn run(mut self) -> NodeResult<()> {
        self.epoch = Instant::now();
        self.router.start();
        info!(main = ?self.router.main_address(), "Node runtime started");

        let mut dump = self.dump_interval.map(tokio::time::interval);
        loop {
            let deadline = self
                .router
                .next_deadline()
                .map(|due| self.epoch + due.as_duration());

            tokio::select! {
                _ = self.shutdown.recv() => break,
                Some(inbound) = self.inbound.recv() => {
                    self.sync_clock();
                    trace!(interface = %inbound.interface, sender = %inbound.sender, ttl = inbound.ttl, "Control frame received");
                    self.router.recv_control(inbound.interface, inbound.sender, &inbound.datagram, inbound.ttl);
                }
                command = self.commands.recv() => match command {
                    Some(command) => {
                        self.sync_clock();
                        self.handle_command(command);
                    }
                    None => break,
                },
                _ = sleep_until(deadline) => self.sync_clock(),
                _ = tick(&mut dump) => {
                    self.sync_clock();
                    debug!(at = %Utc::now().to_rfc3339(), tables = %self.router.print_routing_table(), "Routing tables");
                }
            }
        }

        for (_, receiver) in std::mem::take(&mut self.receivers) {
            receiver.abort();
        }
        info!(stats = ?self.router.stats(), "Node runtime stopped");
        Ok(())
    }

    /// Advance protocol time to the wall clock, firing due timers
    fn sync_clock(&mut self) {
        let elapsed = self.epoch.elapsed().as_micros();
        let now = Timestamp::from_micros(u64::try_from(elapsed).unwrap_or(u64::MAX));
        self.router.advance_to(now);
    }

    fn handle_command(&mut self, command: NodeCommand) {
        match command {
            NodeCommand::Resolve { destination, reply } => self.resolve(destination, reply),
            NodeCommand::DumpTables { reply } => {
                let dump = format!("Wall clock: {}\n{}", Utc::now().to_rfc3339(), self.router.dump_tables());
                let _ = reply.send(dump);
            }
            NodeCommand::Stats { reply } => {
                let _ = reply.send(self.router.stats());
            }
            NodeCommand::InterfaceDown { interface, reply } => {
                if self.router.interface(interface).is_none() {
                    let _ = reply.send(Err(NodeError::InterfaceNotFound(interface)));
                    return;
                }
                self.router.notify_interface_down(interface);
                if let Some(receiver) = self.receivers.remove(&interface) {
                    receiver.abort();
                }
                let _ = self.events.send(NodeEvent::InterfaceDown(interface));
                let _ = reply.send(Ok(()));
            }
        }
    }

    /// Find a route, starting a discovery when no zone route exists
    ///
    /// The discovery is driven by an empty probe packet looped back into
    /// the engine; whichever continuation runs answers the caller.
    fn resolve(&mut self, destination: Ipv4Addr, reply: oneshot::Sender<NodeResult<Route>>) {
        let source = self.router.main_address().unwrap_or(Ipv4Addr::UNSPECIFIED);
        let mut header = PacketHeader::new(source, destination);
        self.next_uid += 1;
        let mut probe = DataPacket::new(self.next_uid, Bytes::new());

        match self.router.route_output(&mut probe, &header, None) {
            Ok(OutputRoute::Resolved(route)) => {
                let _ = self.events.send(NodeEvent::RouteResolved(route));
                let _ = reply.send(Ok(route));
            }
            Ok(OutputRoute::Loopback(route)) => {
                header.source = route.source;
                let pending: PendingReply = Arc::new(Mutex::new(Some(reply)));
                let callbacks = probe_callbacks(&pending, &self.events);
                if !self.router.route_input(probe, header, InputDevice::Loopback, callbacks) {
                    if let Some(reply) = pending.lock().take() {
                        let _ = reply.send(Err(RoutingError::NoRoute(destination).into()));
                    }
                }
            }
            Err(e) => {
                debug!(%destination, error = %e, "Route output failed");
                let _ = reply.send(Err(e.into()));
            }
        }
    }
}

/// Continuations answering a pending resolve; only the first one to run replies
fn probe_callbacks(pending: &PendingReply, events: &broadcast::Sender<NodeEvent>) -> InputCallbacks {
    let (on_forward, on_deliver, on_error) = (pending.clone(), pending.clone(), pending.clone());
    let (forward_events, error_events) = (events.clone(), events.clone());

    InputCallbacks {
        forward: Box::new(move |route, _, _| {
            let _ = forward_events.send(NodeEvent::RouteResolved(route));
            if let Some(reply) = on_forward.lock().take() {
                let _ = reply.send(Ok(route));
            }
        }),
        local_deliver: Box::new(move |_, header, interface| {
            let own = header.destination;
            if let Some(reply) = on_deliver.lock().take() {
                let _ = reply.send(Ok(Route::new(own, own, own, interface)));
            }
        }),
        error: Box::new(move |_, header, reason| {
            let destination = header.destination;
            let _ = error_events.send(NodeEvent::Unreachable { destination, reason });
            if let Some(reply) = on_error.lock().take() {
                let _ = reply.send(Err(NodeError::Unreachable { destination, reason }));
            }
        }),
    }
}

/// Read control frames from one socket into the runtime
pub(crate) fn spawn_receiver(
    interface: InterfaceId,
    socket: Arc<UdpSocket>,
    buffer_size: usize,
    inbound: mpsc::Sender<Inbound>,
    mut shutdown: broadcast::Receiver<()>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut buf = vec![0u8; buffer_size];
        loop {
            tokio::select! {
                _ = shutdown.recv() => break,
                result = socket.recv_from(&mut buf) => match result {
                    Ok((len, SocketAddr::V4(from))) => {
                        let Some((ttl, datagram)) = decode_frame(&buf[..len]) else {
                            trace!(%from, "Empty control frame");
                            continue;
                        };
                        let message = Inbound {
                            interface,
                            sender: *from.ip(),
                            ttl,
                            datagram: Bytes::copy_from_slice(datagram),
                        };
                        if inbound.send(message).await.is_err() {
                            break;
                        }
                    }
                    Ok((_, from)) => trace!(%from, "Ignoring non-IPv4 frame"),
                    Err(e) => warn!(%interface, error = %e, "Control socket receive error"),
                }
            }
        }
    })
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

async fn tick(interval: &mut Option<Interval>) {
    match interval {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_header() -> PacketHeader {
        PacketHeader::new(Ipv4Addr::new(10, 0, 0, 1), Ipv4Addr::new(10, 0, 0, 9))
    }

    #[test]
    fn test_probe_callbacks_reply_once() {
        let (tx, mut rx) = oneshot::channel();
        let (events, mut event_rx) = broadcast::channel(4);
        let pending: PendingReply = Arc::new(Mutex::new(Some(tx)));
        let callbacks = probe_callbacks(&pending, &events);

        let route = Route::new(
            Ipv4Addr::new(10, 0, 0, 9),
            Ipv4Addr::new(10, 0, 0, 1),
            Ipv4Addr::new(10, 0, 0, 2),
            InterfaceId(1),
        );
        (callbacks.forward)(route, DataPacket::new(1, Bytes::new()), make_header());

        assert_eq!(rx.try_recv().unwrap().unwrap(), route);
        assert_eq!(event_rx.try_recv().unwrap(), NodeEvent::RouteResolved(route));
        assert!(pending.lock().is_none());
    }

    #[test]
    fn test_probe_error_reports_unreachable() {
        let (tx, mut rx) = oneshot::channel();
        let (events, mut event_rx) = broadcast::channel(4);
        let pending: PendingReply = Arc::new(Mutex::new(Some(tx)));
        let callbacks = probe_callbacks(&pending, &events);

        (callbacks.error)(DataPacket::new(1, Bytes::new()), make_header(), DropReason::DiscoveryFailed);

        assert!(matches!(
            rx.try_recv().unwrap(),
            Err(NodeError::Unreachable {
                reason: DropReason::DiscoveryFailed,
                ..
            })
        ));
        assert!(matches!(event_rx.try_recv().unwrap(), NodeEvent::Unreachable { .. }));
    }

    #[tokio::test]
    async fn test_sleep_until_none_never_fires() {
        let never = sleep_until(None);
        let result = tokio::time::timeout(Duration::from_millis(20), never).await;
        assert!(result.is_err());
    }
}
