//! Routing error types

use std::net::Ipv4Addr;

use shingo_core::CoreError;
use thiserror::Error;

/// Errors raised while decoding control messages
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum WireError {
    /// Datagram carried no bytes at all
    #[error("Empty datagram")]
    Empty,

    /// Record shorter than its fixed layout
    #[error("Truncated {kind} record: expected {expected} bytes, got {actual}")]
    Truncated {
        kind: &'static str,
        expected: usize,
        actual: usize,
    },

    /// Consumed byte count differs from the fixed layout
    #[error("Malformed {kind} record: expected {expected} bytes, got {actual}")]
    MalformedRecord {
        kind: &'static str,
        expected: usize,
        actual: usize,
    },

    /// Tagged framing with an unknown discriminant
    #[error("Unknown message type: {0}")]
    UnknownMessageType(u8),
}

/// Reasons a queue refuses an entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum QueueError {
    #[error("Queue full")]
    Full,

    #[error("Packet already queued for this destination")]
    Duplicate,
}

/// Errors of the routing engine
#[derive(Debug, Error)]
pub enum RoutingError {
    /// No route to the destination and none can be deferred
    #[error("No route to {0}")]
    NoRoute(Ipv4Addr),

    /// Rejected configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Wire error: {0}")]
    Wire(#[from] WireError),

    #[error("Queue error: {0}")]
    Queue(#[from] QueueError),

    #[error("Core error: {0}")]
    Core(#[from] CoreError),
}

/// Result type for routing operations
pub type RoutingResult<T> = Result<T, RoutingError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_nested_conversion() {
        let err: RoutingError = WireError::UnknownMessageType(9).into();
        assert!(matches!(err, RoutingError::Wire(WireError::UnknownMessageType(9))));
        assert_eq!(err.to_string(), "Wire error: Unknown message type: 9");
    }
}
