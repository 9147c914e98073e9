//! Recording endpoint for testing
//!
//! Captures every transmission instead of putting it on a wire, so tests
//! can assert on what the routing engine sent, to whom, and with which TTL.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use shingo_core::RecordingEndpoint;
//!
//! let endpoint = RecordingEndpoint::new(local_addr);
//! let probe = endpoint.clone();
//! router.notify_interface_up(InterfaceId(1), address, endpoint);
//!
//! // ... drive the router ...
//! let sent = probe.take_sent();
//! ```

use std::net::Ipv4Addr;
use std::sync::Arc;

use bytes::Bytes;
use parking_lot::Mutex;

use crate::error::EndpointError;
use crate::traits::Endpoint;

/// One captured transmission
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentDatagram {
    /// Local address of the sending interface
    pub from: Ipv4Addr,
    /// Destination (unicast next hop or broadcast)
    pub destination: Ipv4Addr,
    /// IP time-to-live requested by the engine
    pub ttl: u8,
    /// Encoded control message
    pub datagram: Bytes,
}

#[derive(Debug, Default)]
struct Shared {
    sent: Vec<SentDatagram>,
    closed: bool,
}

/// An [`Endpoint`] that records transmissions
///
/// Clones share the same log.
#[derive(Debug, Clone)]
pub struct RecordingEndpoint {
    local: Ipv4Addr,
    shared: Arc<Mutex<Shared>>,
}

impl RecordingEndpoint {
    /// Create an endpoint for the interface with address `local`
    pub fn new(local: Ipv4Addr) -> Self {
        Self {
            local,
            shared: Arc::new(Mutex::new(Shared::default())),
        }
    }

    /// Local address of this endpoint
    pub fn local(&self) -> Ipv4Addr {
        self.local
    }

    /// Snapshot of all captured transmissions
    pub fn sent(&self) -> Vec<SentDatagram> {
        self.shared.lock().sent.clone()
    }

    /// Drain the captured transmissions
    pub fn take_sent(&self) -> Vec<SentDatagram> {
        std::mem::take(&mut self.shared.lock().sent)
    }

    /// Number of captured transmissions
    pub fn sent_count(&self) -> usize {
        self.shared.lock().sent.len()
    }

    /// Whether the engine closed this endpoint
    pub fn is_closed(&self) -> bool {
        self.shared.lock().closed
    }
}

impl Endpoint for RecordingEndpoint {
    fn send_to(
        &mut self,
        destination: Ipv4Addr,
        datagram: Bytes,
        ttl: u8,
    ) -> Result<(), EndpointError> {
        let mut shared = self.shared.lock();
        if shared.closed {
            return Err(EndpointError::Closed);
        }
        shared.sent.push(SentDatagram {
            from: self.local,
            destination,
            ttl,
            datagram,
        });
        Ok(())
    }

    fn close(&mut self) {
        self.shared.lock().closed = true;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_records_and_drains() {
        let mut endpoint = RecordingEndpoint::new(Ipv4Addr::new(10, 0, 0, 1));
        let probe = endpoint.clone();

        endpoint
            .send_to(Ipv4Addr::new(10, 0, 0, 255), Bytes::from_static(&[1, 2]), 1)
            .unwrap();
        assert_eq!(probe.sent_count(), 1);

        let sent = probe.take_sent();
        assert_eq!(sent[0].destination, Ipv4Addr::new(10, 0, 0, 255));
        assert_eq!(sent[0].ttl, 1);
        assert_eq!(probe.sent_count(), 0);
    }

    #[test]
    fn test_closed_endpoint_rejects_sends() {
        let mut endpoint = RecordingEndpoint::new(Ipv4Addr::new(10, 0, 0, 1));
        endpoint.close();
        let result = endpoint.send_to(Ipv4Addr::new(10, 0, 0, 2), Bytes::new(), 1);
        assert!(matches!(result, Err(EndpointError::Closed)));
        assert!(endpoint.is_closed());
    }
}
