//! Node context for multi-node logging
//!
//! A simulation runs many routers on one thread, so the identity of the
//! node currently handling an event lives in thread-local storage and is
//! picked up by [`NodeContextLayer`](crate::layers::NodeContextLayer) and
//! [`node_span`].

use std::cell::RefCell;
use std::fmt;

use chrono::{DateTime, Utc};
use tracing::Span;
use uuid::Uuid;

/// Node context data stored in thread-local storage
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeContextData {
    /// Node label, usually its main address
    pub node_id: String,
    pub kind: NodeKind,
    /// Unique per node session
    pub instance_id: Uuid,
    pub started_at: DateTime<Utc>,
}

/// Where the node runs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeKind {
    /// Inside the discrete-event simulator
    Simulated,
    /// On real sockets
    Live,
}

impl fmt::Display for NodeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NodeKind::Simulated => write!(f, "simulated"),
            NodeKind::Live => write!(f, "live"),
        }
    }
}

thread_local! {
    static NODE_CONTEXT: RefCell<Option<NodeContextData>> = const { RefCell::new(None) };
}

/// RAII guard for node context
///
/// Sets the node context for the current thread and restores the previous
/// one on drop, so guards nest.
///
/// ```ignore
/// let _guard = NodeContextGuard::simulated(Ipv4Addr::new(10, 0, 0, 1));
/// tracing::info!("Zone update sent"); // tagged with node = 10.0.0.1
/// ```
pub struct NodeContextGuard {
    previous: Option<NodeContextData>,
}

impl NodeContextGuard {
    /// Enter the context of a live node
    pub fn live(node: impl fmt::Display) -> Self {
        Self::enter(node, NodeKind::Live, Uuid::new_v4())
    }

    /// Enter the context of a simulated node
    pub fn simulated(node: impl fmt::Display) -> Self {
        Self::enter(node, NodeKind::Simulated, Uuid::new_v4())
    }

    /// Enter a context with a fixed instance id
    pub fn with_instance_id(node: impl fmt::Display, kind: NodeKind, instance_id: Uuid) -> Self {
        Self::enter(node, kind, instance_id)
    }

    fn enter(node: impl fmt::Display, kind: NodeKind, instance_id: Uuid) -> Self {
        let data = NodeContextData {
            node_id: node.to_string(),
            kind,
            instance_id,
            started_at: Utc::now(),
        };
        let previous = NODE_CONTEXT.with(|ctx| ctx.borrow_mut().replace(data));
        Self { previous }
    }

    /// The current node context, if any
    pub fn current() -> Option<NodeContextData> {
        NODE_CONTEXT.with(|ctx| ctx.borrow().clone())
    }

    pub fn current_node_id() -> Option<String> {
        Self::current().map(|ctx| ctx.node_id)
    }

    pub fn current_instance_id() -> Option<Uuid> {
        Self::current().map(|ctx| ctx.instance_id)
    }
}

impl Drop for NodeContextGuard {
    fn drop(&mut self) {
        NODE_CONTEXT.with(|ctx| *ctx.borrow_mut() = self.previous.take());
    }
}

/// A `node` span carrying the current node context
///
/// Events inside the entered span carry `node`, `kind` and `instance` in
/// their JSON span list. Returns a disabled span outside any context.
pub fn node_span() -> Span {
    match NodeContextGuard::current() {
        Some(ctx) => tracing::info_span!(
            "node",
            node = %ctx.node_id,
            kind = %ctx.kind,
            instance = %ctx.instance_id,
        ),
        None => Span::none(),
    }
}

/// Run `$body` inside the context of `$node`
///
/// ```ignore
/// with_node_context!(addr, {
///     router.advance_to(now);
/// });
/// ```
#[macro_export]
macro_rules! with_node_context {
    ($node:expr, $body:block) => {{
        let _guard = $crate::context::NodeContextGuard::simulated($node);
        $body
    }};
}
