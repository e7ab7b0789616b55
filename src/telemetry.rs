//! Structured logging setup.
//!
//! Built on `tracing` and `tracing-subscriber`: structured events with
//! async-aware context, an environment-based filter, and pretty, compact,
//! or JSON output. Initialization is idempotent so tests and embedding
//! applications can call it freely.

use crate::config::SyncConfig;
use crate::error::{SyncError, SyncResult};
use tracing::Level;
use tracing_subscriber::{
    fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer,
};

/// Output format for log events.
#[derive(Debug, Clone, Copy)]
pub enum OutputFormat {
    /// Pretty-printed with colors, for development.
    Pretty,
    /// Compact single-line, for production consoles.
    Compact,
    /// JSON, for log aggregation.
    Json,
}

/// Logging options.
#[derive(Debug, Clone)]
pub struct TelemetryConfig {
    /// Log level (trace, debug, info, warn, error).
    pub level: Level,
    /// Output format.
    pub format: OutputFormat,
    /// Include file and line numbers.
    pub with_file_and_line: bool,
    /// Enable ANSI colors (pretty format only).
    pub with_ansi: bool,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            level: Level::INFO,
            format: OutputFormat::Compact,
            with_file_and_line: false,
            with_ansi: true,
        }
    }
}

impl TelemetryConfig {
    /// Derive logging options from the engine configuration.
    pub fn from_config(config: &SyncConfig) -> SyncResult<Self> {
        Ok(Self {
            level: parse_log_level(&config.log_level)?,
            ..Default::default()
        })
    }

    /// Options at a specific level.
    pub fn new(level: Level) -> Self {
        Self {
            level,
            ..Default::default()
        }
    }

    /// Set the output format.
    pub fn with_format(mut self, format: OutputFormat) -> Self {
        self.format = format;
        self
    }
}

/// Initialize logging from the engine configuration.
pub fn init_from_config(config: &SyncConfig) -> SyncResult<()> {
    init(TelemetryConfig::from_config(config)?)
}

/// Initialize logging with explicit options.
///
/// Idempotent: if a global subscriber is already installed this returns
/// `Ok(())`, so repeated calls across tests are harmless.
pub fn init(config: TelemetryConfig) -> SyncResult<()> {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.level.as_str().to_lowercase()));

    let result = match config.format {
        OutputFormat::Pretty => {
            let layer = fmt::layer()
                .pretty()
                .with_file(config.with_file_and_line)
                .with_line_number(config.with_file_and_line)
                .with_ansi(config.with_ansi)
                .with_filter(env_filter);
            tracing_subscriber::registry().with(layer).try_init()
        }
        OutputFormat::Compact => {
            let layer = fmt::layer()
                .compact()
                .with_file(config.with_file_and_line)
                .with_line_number(config.with_file_and_line)
                .with_ansi(false)
                .with_filter(env_filter);
            tracing_subscriber::registry().with(layer).try_init()
        }
        OutputFormat::Json => {
            let layer = fmt::layer()
                .json()
                .with_file(config.with_file_and_line)
                .with_line_number(config.with_file_and_line)
                .with_filter(env_filter);
            tracing_subscriber::registry().with(layer).try_init()
        }
    };

    match result {
        Ok(()) => Ok(()),
        Err(e) if e.to_string().contains("already been set") => Ok(()),
        Err(e) => Err(SyncError::Config(format!(
            "failed to initialize logging: {e}"
        ))),
    }
}

/// Parse a log level string into a tracing [`Level`].
fn parse_log_level(level: &str) -> SyncResult<Level> {
    match level.to_lowercase().as_str() {
        "trace" => Ok(Level::TRACE),
        "debug" => Ok(Level::DEBUG),
        "info" => Ok(Level::INFO),
        "warn" => Ok(Level::WARN),
        "error" => Ok(Level::ERROR),
        other => Err(SyncError::Config(format!(
            "invalid log level '{other}'; must be one of: trace, debug, info, warn, error"
        ))),
    }
}
