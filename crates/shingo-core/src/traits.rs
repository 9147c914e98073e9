//! Core traits for the SHINGO stack
//!
//! This module defines the capabilities the routing engine consumes from
//! its host:
//!
//! - [`Endpoint`]: Datagram transmission on one local interface
//! - [`Scheduler`]: One-shot delayed events with cancellation

use std::fmt;
use std::net::Ipv4Addr;
use std::time::Duration;

use bytes::Bytes;

use crate::error::EndpointError;
use crate::time::Timestamp;

/// Transmission capability of one local interface
///
/// Implementations send to the routing control port of `destination`,
/// which is either a next-hop unicast address or a broadcast address on
/// the interface's link.
pub trait Endpoint {
    /// Send a datagram with the given IP time-to-live
    fn send_to(&mut self, destination: Ipv4Addr, datagram: Bytes, ttl: u8)
    -> Result<(), EndpointError>;

    /// Release the underlying resources
    fn close(&mut self) {}
}

impl<E: Endpoint + ?Sized> Endpoint for Box<E> {
    fn send_to(
        &mut self,
        destination: Ipv4Addr,
        datagram: Bytes,
        ttl: u8,
    ) -> Result<(), EndpointError> {
        (**self).send_to(destination, datagram, ttl)
    }

    fn close(&mut self) {
        (**self).close()
    }
}

/// Handle of a scheduled event
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TimerId(pub u64);

impl fmt::Display for TimerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "timer#{}", self.0)
    }
}

/// Event scheduling substrate
///
/// Events are plain values of type `T`. The host pops due events and hands
/// them back to their owner; an event is no longer pending once popped.
pub trait Scheduler<T> {
    /// Current time
    fn now(&self) -> Timestamp;

    /// Schedule `event` to fire after `delay`
    fn schedule(&mut self, delay: Duration, event: T) -> TimerId;

    /// Schedule `event` to fire as soon as possible
    fn schedule_now(&mut self, event: T) -> TimerId {
        self.schedule(Duration::ZERO, event)
    }

    /// Cancel a pending event, returning whether it was pending
    fn cancel(&mut self, id: TimerId) -> bool;

    /// Whether the event is still waiting to fire
    fn is_pending(&self, id: TimerId) -> bool;

    /// Time left until the event fires, `None` if it is not pending
    fn delay_left(&self, id: TimerId) -> Option<Duration>;
}
