//! Error types for logging setup

use thiserror::Error;

/// Errors raised while configuring or installing the subscriber
#[derive(Debug, Error)]
pub enum LoggingError {
    /// Configuration could not be parsed
    #[error("Configuration error: {0}")]
    Config(#[from] serde_json::Error),

    /// Invalid filter directive
    #[error("Invalid filter: {0}")]
    Filter(#[from] tracing_subscriber::filter::ParseError),

    /// Rolling file appender could not be created
    #[error("Log file error: {0}")]
    Appender(#[from] tracing_appender::rolling::InitError),

    /// A global subscriber is already installed
    #[error("Subscriber already initialized: {0}")]
    AlreadyInitialized(#[from] tracing_subscriber::util::TryInitError),
}

/// Result type alias for logging setup
pub type LoggingResult<T> = Result<T, LoggingError>;
