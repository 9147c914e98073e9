//! # Shingo Core
//!
//! Core traits, types, and errors for the SHINGO hybrid MANET routing stack.
//!
//! This crate provides the boundary abstractions that let the same routing
//! engine run inside a deterministic simulation, inside unit tests, and on
//! top of real UDP sockets.
//!
//! ## Key Traits
//!
//! - [`Endpoint`]: Per-interface datagram transmission (injected link layer)
//! - [`Scheduler`]: Delayed event scheduling with cancel / pending queries
//!
//! ## Key Types
//!
//! - [`InterfaceId`] / [`InterfaceAddress`]: Local interface identity and addressing
//! - [`Route`]: A resolved next-hop decision
//! - [`DataPacket`] / [`PacketHeader`]: Opaque data packets awaiting a route
//! - [`Completion`]: Owned forward / drop continuations for a queued packet
//! - [`EventQueue`]: Virtual-clock [`Scheduler`] implementation
//! - [`Timestamp`]: Explicit protocol time

pub mod address;
pub mod error;
pub mod mock_endpoint;
pub mod packet;
pub mod routing;
pub mod time;
pub mod timer;
pub mod traits;

// Re-export main types
pub use address::*;
pub use error::*;
pub use mock_endpoint::*;
pub use packet::*;
pub use routing::*;
pub use time::*;
pub use timer::*;
pub use traits::*;
