//! Structured logging for SHINGO nodes and simulations
//!
//! Many routers often share one process, so every log line should say
//! which node produced it.
//!
//! # Features
//!
//! - **JSONL Output**: Structured JSON lines for log aggregation (default)
//! - **Node Context**: Tag spans with the node handling the current event
//! - **File Rotation**: Daily/hourly log rotation via tracing-appender
//! - **RUST_LOG**: `EnvFilter` directives override the configured level
//!
//! # Quick Start
//!
//! ```ignore
//! use shingo_logging::{LogConfig, ShingoSubscriberBuilder};
//!
//! // JSONL to console
//! let _guard = ShingoSubscriberBuilder::new().init();
//!
//! // Pretty output while developing
//! let _guard = ShingoSubscriberBuilder::new()
//!     .with_config(LogConfig::development())
//!     .init();
//! ```
//!
//! # Node Context
//!
//! ```ignore
//! use shingo_logging::{NodeContextGuard, node_span};
//!
//! let _ctx = NodeContextGuard::simulated(addr);
//! let _span = node_span().entered();
//! tracing::debug!("Route request sent");
//! ```

pub mod config;
pub mod context;
pub mod error;
pub mod layers;

pub use config::{ConsoleConfig, FileConfig, JsonlConfig, LogConfig, RotationStrategy};
pub use context::{NodeContextData, NodeContextGuard, NodeKind, node_span};
pub use error::{LoggingError, LoggingResult};
pub use layers::NodeContextLayer;
pub use tracing_appender::non_blocking::WorkerGuard;

use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{
    EnvFilter, Layer, Registry, fmt, fmt::MakeWriter, layer::SubscriberExt,
    util::SubscriberInitExt,
};

type BoxedLayer = Box<dyn Layer<Registry> + Send + Sync>;

/// Builder for configuring and installing the global subscriber
///
/// Console output is JSONL unless the configuration asks for pretty
/// output. File output is always JSONL.
pub struct ShingoSubscriberBuilder {
    config: LogConfig,
}

impl ShingoSubscriberBuilder {
    /// Builder with the default configuration
    pub fn new() -> Self {
        Self {
            config: LogConfig::default(),
        }
    }

    pub fn with_config(mut self, config: LogConfig) -> Self {
        self.config = config;
        self
    }

    /// Set the default level
    pub fn with_level(mut self, level: impl Into<String>) -> Self {
        self.config.default_level = level.into();
        self
    }

    pub fn with_console(mut self, enabled: bool) -> Self {
        self.config.console.enabled = enabled;
        self
    }

    pub fn with_file_output(mut self, config: FileConfig) -> Self {
        self.config.file = Some(config);
        self
    }

    pub fn config(&self) -> &LogConfig {
        &self.config
    }

    /// Install the subscriber globally
    ///
    /// The returned guard flushes file output on drop and must be kept
    /// alive for the duration of the program.
    pub fn try_init(self) -> LoggingResult<Option<WorkerGuard>> {
        let filter = match EnvFilter::try_from_default_env() {
            Ok(filter) => filter,
            Err(_) => EnvFilter::try_new(self.config.filter_directive())?,
        };

        let mut layers: Vec<BoxedLayer> = vec![NodeContextLayer::new().boxed()];
        if self.config.console.enabled {
            let console = if self.config.console.pretty {
                fmt::layer()
                    .with_ansi(self.config.console.ansi)
                    .with_target(true)
                    .boxed()
            } else {
                self.jsonl_layer(std::io::stdout)
            };
            layers.push(console);
        }

        let mut guard = None;
        if let Some(file) = &self.config.file {
            let (writer, worker) = tracing_appender::non_blocking(file_appender(file)?);
            guard = Some(worker);
            layers.push(self.jsonl_layer(writer));
        }

        Registry::default().with(layers).with(filter).try_init()?;
        Ok(guard)
    }

    /// Install the subscriber, reporting failure on stderr
    pub fn init(self) -> Option<WorkerGuard> {
        match self.try_init() {
            Ok(guard) => guard,
            Err(e) => {
                eprintln!("Warning: logging not initialized: {e}");
                None
            }
        }
    }

    fn jsonl_layer<W>(&self, writer: W) -> BoxedLayer
    where
        W: for<'writer> MakeWriter<'writer> + Send + Sync + 'static,
    {
        let jsonl = &self.config.jsonl;
        fmt::layer()
            .json()
            .with_current_span(true)
            .with_span_list(jsonl.include_spans)
            .flatten_event(jsonl.flatten_events)
            .with_file(jsonl.include_location)
            .with_line_number(jsonl.include_location)
            .with_thread_ids(jsonl.include_thread_info)
            .with_thread_names(jsonl.include_thread_info)
            .with_writer(writer)
            .boxed()
    }
}

impl Default for ShingoSubscriberBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Rolling appender for a file configuration
pub fn file_appender(file: &FileConfig) -> LoggingResult<RollingFileAppender> {
    let rotation = match file.rotation {
        RotationStrategy::Daily => Rotation::DAILY,
        RotationStrategy::Hourly => Rotation::HOURLY,
        RotationStrategy::Never => Rotation::NEVER,
    };
    let mut builder = RollingFileAppender::builder()
        .rotation(rotation)
        .filename_prefix(file.prefix.clone())
        .filename_suffix("log");
    if let Some(max) = file.max_files {
        builder = builder.max_log_files(max);
    }
    Ok(builder.build(&file.directory)?)
}

/// JSONL to console
pub fn init_default() -> Option<WorkerGuard> {
    ShingoSubscriberBuilder::new().init()
}

/// Pretty console output at debug level
pub fn init_development() -> Option<WorkerGuard> {
    ShingoSubscriberBuilder::new()
        .with_config(LogConfig::development())
        .init()
}

/// Quiet output for tests; a second call is a no-op
pub fn init_testing() {
    let _ = ShingoSubscriberBuilder::new()
        .with_config(LogConfig::testing())
        .try_init();
}
