//! UDP endpoint and control framing
//!
//! tokio sockets do not report the IP TTL a datagram arrived with, and the
//! engine needs it for route requests. Every control datagram is therefore
//! carried in a frame whose first byte is the TTL it was sent with; the IP
//! TTL is set to the same value.

use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::sync::Arc;

use bytes::{BufMut, Bytes, BytesMut};
use shingo_core::{Endpoint, EndpointError, LIMITED_BROADCAST};
use tokio::net::UdpSocket;
use tracing::trace;

/// Prepend the TTL byte
pub fn encode_frame(ttl: u8, datagram: &[u8]) -> Bytes {
    let mut frame = BytesMut::with_capacity(datagram.len() + 1);
    frame.put_u8(ttl);
    frame.put_slice(datagram);
    frame.freeze()
}

/// Split a frame into its TTL and control datagram
pub fn decode_frame(frame: &[u8]) -> Option<(u8, &[u8])> {
    let (&ttl, datagram) = frame.split_first()?;
    Some((ttl, datagram))
}

/// [`Endpoint`] over a tokio UDP socket bound to one interface
#[derive(Debug, Clone)]
pub struct UdpEndpoint {
    socket: Arc<UdpSocket>,
    control_port: u16,
    broadcast: Ipv4Addr,
    peers: Vec<SocketAddrV4>,
    closed: bool,
}

impl UdpEndpoint {
    /// Wrap a bound socket
    ///
    /// `broadcast` is the interface's broadcast target. Non-IPv4 peers are
    /// skipped.
    pub fn new(socket: Arc<UdpSocket>, control_port: u16, broadcast: Ipv4Addr, peers: &[SocketAddr]) -> Self {
        let peers = peers
            .iter()
            .filter_map(|peer| match peer {
                SocketAddr::V4(v4) => Some(*v4),
                SocketAddr::V6(_) => None,
            })
            .collect();
        Self {
            socket,
            control_port,
            broadcast,
            peers,
            closed: false,
        }
    }

    /// Socket addresses a datagram for `destination` goes to
    pub fn targets(&self, destination: Ipv4Addr) -> Vec<SocketAddrV4> {
        let is_broadcast = destination == self.broadcast || destination == LIMITED_BROADCAST;
        if is_broadcast && !self.peers.is_empty() {
            return self.peers.clone();
        }
        let peer = self.peers.iter().find(|p| *p.ip() == destination);
        vec![peer.copied().unwrap_or_else(|| SocketAddrV4::new(destination, self.control_port))]
    }
}

impl Endpoint for UdpEndpoint {
    fn send_to(&mut self, destination: Ipv4Addr, datagram: Bytes, ttl: u8) -> Result<(), EndpointError> {
        if self.closed {
            return Err(EndpointError::Closed);
        }
        self.socket.set_ttl(u32::from(ttl.max(1)))?;
        let frame = encode_frame(ttl, &datagram);
        for target in self.targets(destination) {
            match self.socket.try_send_to(&frame, SocketAddr::V4(target)) {
                Ok(_) => trace!(%target, ttl, len = frame.len(), "Control frame sent"),
                Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => return Err(EndpointError::WouldBlock),
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }

    fn close(&mut self) {
        self.closed = true;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn make_socket(ip: Ipv4Addr) -> Arc<UdpSocket> {
        let socket = UdpSocket::bind(SocketAddrV4::new(ip, 0)).await.unwrap();
        socket.set_broadcast(true).unwrap();
        Arc::new(socket)
    }

    #[test]
    fn test_frame_round_trip() {
        let frame = encode_frame(7, b"\x01abc");
        assert_eq!(decode_frame(&frame), Some((7, &b"\x01abc"[..])));
        assert_eq!(decode_frame(&[]), None);
        assert_eq!(decode_frame(&[3]), Some((3, &[][..])));
    }

    #[tokio::test]
    async fn test_targets_fan_out_broadcast_to_peers() {
        let socket = make_socket(Ipv4Addr::LOCALHOST).await;
        let peers: Vec<SocketAddr> = vec!["127.0.0.2:7001".parse().unwrap(), "127.0.0.3:7002".parse().unwrap()];
        let endpoint = UdpEndpoint::new(socket, 5555, Ipv4Addr::new(127, 255, 255, 255), &peers);

        assert_eq!(endpoint.targets(Ipv4Addr::new(127, 255, 255, 255)).len(), 2);
        assert_eq!(endpoint.targets(LIMITED_BROADCAST).len(), 2);
        assert_eq!(
            endpoint.targets(Ipv4Addr::new(127, 0, 0, 3)),
            vec!["127.0.0.3:7002".parse::<SocketAddrV4>().unwrap()]
        );
        assert_eq!(
            endpoint.targets(Ipv4Addr::new(127, 0, 0, 9)),
            vec![SocketAddrV4::new(Ipv4Addr::new(127, 0, 0, 9), 5555)]
        );
    }

    #[tokio::test]
    async fn test_send_reaches_peer_with_ttl_prefix() {
        let receiver = make_socket(Ipv4Addr::LOCALHOST).await;
        let peer = receiver.local_addr().unwrap();
        let mut endpoint = UdpEndpoint::new(
            make_socket(Ipv4Addr::LOCALHOST).await,
            5555,
            Ipv4Addr::new(127, 255, 255, 255),
            &[peer],
        );

        endpoint
            .send_to(Ipv4Addr::new(127, 255, 255, 255), Bytes::from_static(b"\x00zone"), 1)
            .unwrap();

        let mut buf = [0u8; 64];
        let (len, _) = receiver.recv_from(&mut buf).await.unwrap();
        assert_eq!(decode_frame(&buf[..len]), Some((1, &b"\x00zone"[..])));
    }

    #[tokio::test]
    async fn test_closed_endpoint_refuses() {
        let mut endpoint = UdpEndpoint::new(make_socket(Ipv4Addr::LOCALHOST).await, 5555, LIMITED_BROADCAST, &[]);
        endpoint.close();
        assert!(matches!(
            endpoint.send_to(Ipv4Addr::LOCALHOST, Bytes::new(), 1),
            Err(EndpointError::Closed)
        ));
    }
}
