//! Error types for the SHINGO stack

use thiserror::Error;

use crate::address::InterfaceId;

/// Top-level error type for core operations
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("Endpoint error: {0}")]
    Endpoint(#[from] EndpointError),

    #[error("Unknown interface: {0}")]
    UnknownInterface(InterfaceId),

    #[error("Invalid address: {0}")]
    InvalidAddress(String),
}

/// Errors raised by an [`Endpoint`](crate::Endpoint) while transmitting
#[derive(Debug, Error)]
pub enum EndpointError {
    #[error("Endpoint closed")]
    Closed,

    #[error("Send failed: {0}")]
    SendFailed(String),

    #[error("Socket would block")]
    WouldBlock,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for core operations
pub type CoreResult<T> = Result<T, CoreError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = CoreError::UnknownInterface(InterfaceId(3));
        assert_eq!(err.to_string(), "Unknown interface: if3");

        let err: CoreError = EndpointError::Closed.into();
        assert_eq!(err.to_string(), "Endpoint error: Endpoint closed");
    }

    #[test]
    fn test_io_conversion() {
        let io = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied");
        let err: EndpointError = io.into();
        assert!(matches!(err, EndpointError::Io(_)));
    }
}
