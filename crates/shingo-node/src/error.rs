//! Error types for the node runtime

use std::net::{Ipv4Addr, SocketAddr};

use shingo_core::{DropReason, InterfaceId};
use shingo_routing::RoutingError;
use thiserror::Error;

/// Errors that can occur in the node runtime
#[derive(Debug, Error)]
pub enum NodeError {
    /// Socket or file error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Configuration file could not be parsed
    #[error("Invalid configuration file: {0}")]
    ConfigFormat(#[from] serde_json::Error),

    /// Routing engine error
    #[error("Routing error: {0}")]
    Routing(#[from] RoutingError),

    /// Discovery gave up, or the packet was dropped while waiting
    #[error("Route to {destination} unavailable: {reason}")]
    Unreachable {
        destination: Ipv4Addr,
        reason: DropReason,
    },

    /// No such interface
    #[error("Interface not found: {0}")]
    InterfaceNotFound(InterfaceId),

    /// IPv6 peers are not supported
    #[error("Not an IPv4 socket address: {0}")]
    NotIpv4(SocketAddr),

    /// The runtime task is gone
    #[error("Node stopped")]
    Stopped,

    /// The runtime task panicked or was cancelled
    #[error("Runtime task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

impl<T> From<tokio::sync::mpsc::error::SendError<T>> for NodeError {
    fn from(_: tokio::sync::mpsc::error::SendError<T>) -> Self {
        NodeError::Stopped
    }
}

impl From<tokio::sync::oneshot::error::RecvError> for NodeError {
    fn from(_: tokio::sync::oneshot::error::RecvError) -> Self {
        NodeError::Stopped
    }
}

/// Result type alias for node operations
pub type NodeResult<T> = Result<T, NodeError>;
