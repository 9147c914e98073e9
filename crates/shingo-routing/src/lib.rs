//! # Shingo Routing
//!
//! Hybrid zone routing engine for mobile ad hoc networks.
//!
//! Every node keeps a proactive view of its neighborhood (its *zone*, all
//! nodes within a configurable hop radius) and discovers routes beyond it
//! on demand. The engine is sans-IO: it never reads a clock or touches a
//! socket, so the same code runs in unit tests, in the discrete-event
//! simulator and on real UDP sockets.
//!
//! ## Core Components
//!
//! - [`ShingoRouter`]: The engine, one per node
//! - [`ProactiveTable`]: Zone routes, plus pending advertisements
//! - [`ReactiveTable`]: Discovered routes with two-phase expiry
//! - [`PacketQueue`] / [`RequestQueue`]: Packets waiting for a route
//! - [`ControlMessage`]: Wire codec for zone updates and route discovery
//! - [`RouterConfig`]: Every protocol knob with standard defaults
//!
//! ## Routing Algorithm
//!
//! 1. **ZONE**: Neighbors exchange zone updates periodically and on change.
//!    Metric changes are applied at once but re-advertised only after a
//!    settling time, damping route flaps.
//! 2. **DEFER**: A packet with no zone route is handed back through the
//!    loopback device and buffered.
//! 3. **DISCOVER**: The engine floods a route request in an expanding ring.
//!    Nodes holding a zone route to the destination bordercast the request
//!    toward it instead of flooding further.
//! 4. **REPLY**: The destination, or an intermediate node with a fresh
//!    route, answers along the reverse path and the buffered packets flow.
//!
//! ## Example
//!
//! ```rust,ignore
//! use shingo_core::{EventQueue, InterfaceAddress, InterfaceId, RecordingEndpoint};
//! use shingo_routing::{OutputRoute, RouterConfig, ShingoRouter};
//!
//! let mut router = ShingoRouter::new(RouterConfig::default(), EventQueue::new())?;
//! router.notify_interface_up(InterfaceId(1), address, endpoint);
//! router.start();
//!
//! match router.route_output(&mut packet, &header, None)? {
//!     OutputRoute::Resolved(route) => { /* send via route.gateway */ }
//!     OutputRoute::Loopback(_) => { /* feed back into route_input */ }
//! }
//!
//! // host loop
//! router.recv_control(InterfaceId(1), sender, &datagram, ttl);
//! router.advance_to(now);
//! ```

pub mod config;
pub mod engine;
pub mod error;
pub mod id_cache;
pub mod proactive;
pub mod queue;
pub mod reactive;
pub mod wire;

// Re-export main types
pub use config::RouterConfig;
pub use engine::{Interface, OutputRoute, RouterStats, RouterTimer, ShingoRouter};
pub use error::{QueueError, RoutingError, RoutingResult, WireError};
pub use id_cache::IdCache;
pub use proactive::{ProactiveEntry, ProactiveTable, RouteStatus};
pub use queue::{PacketQueue, QueueEntry, Rejected, RequestQueue};
pub use reactive::{ReactiveEntry, ReactiveStatus, ReactiveTable};
pub use wire::{
    ControlMessage, IarpRecord, MessageType, RouteReply, RouteRequest, RrepFlags, RreqFlags,
    WireFraming,
};

// Re-export core routing types for convenience
pub use shingo_core::{DropReason, InputCallbacks, InputDevice, Route};
