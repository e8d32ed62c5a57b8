//! Unified logging setup for docflow
//!
//! - Minimum log level configuration with `RUST_LOG` taking precedence
//! - Single global `tracing` subscriber, safe to initialise more than once
//! - Error cause-chain formatting

use std::str::FromStr;

use thiserror::Error;
use tracing_subscriber::EnvFilter;

/// Log levels accepted in configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LogLevel {
    /// Per-task queue and packing detail
    Trace = 0,
    /// Snapshot writes and batch decisions
    Debug = 1,
    /// Step transitions and run outcomes
    Info = 2,
    /// Rejected transitions and blocked runs
    Warn = 3,
    /// Failures only
    Error = 4,
}

impl LogLevel {
    /// Convert to the directive string understood by `EnvFilter`
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Trace => "trace",
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }
}

impl FromStr for LogLevel {
    type Err = LoggingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "TRACE" => Ok(LogLevel::Trace),
            "DEBUG" => Ok(LogLevel::Debug),
            "INFO" => Ok(LogLevel::Info),
            "WARN" | "WARNING" => Ok(LogLevel::Warn),
            "ERROR" => Ok(LogLevel::Error),
            _ => Err(LoggingError::InvalidLevel(s.to_string())),
        }
    }
}

/// Logging errors
#[derive(Debug, Error)]
pub enum LoggingError {
    /// Level name outside trace, debug, info, warn and error
    #[error("Invalid log level: {0}")]
    InvalidLevel(String),

    /// `EnvFilter` rejected a directive
    #[error("Invalid filter directive: {0}")]
    InvalidFilter(String),
}

/// Logging configuration options
#[derive(Debug, Clone)]
pub struct LogOptions {
    /// Minimum log level when `RUST_LOG` is not set
    pub level: LogLevel,
    /// Emit ANSI colour codes
    pub ansi: bool,
    /// Include the event target (module path) in each line
    pub with_target: bool,
}

impl Default for LogOptions {
    fn default() -> Self {
        Self {
            level: LogLevel::Info,
            ansi: true,
            with_target: false,
        }
    }
}

/// Build the filter for the given options; `RUST_LOG` wins when present.
pub fn build_filter(options: &LogOptions) -> Result<EnvFilter, LoggingError> {
    match std::env::var(EnvFilter::DEFAULT_ENV) {
        Ok(directives) if !directives.trim().is_empty() => EnvFilter::try_new(&directives)
            .map_err(|e| LoggingError::InvalidFilter(e.to_string())),
        _ => EnvFilter::try_new(options.level.as_str())
            .map_err(|e| LoggingError::InvalidFilter(e.to_string())),
    }
}

/// Initialize the global subscriber.
///
/// Returns `Ok(false)` when a subscriber was already installed, which happens
/// routinely in tests.
pub fn init(options: LogOptions) -> Result<bool, LoggingError> {
    let filter = build_filter(&options)?;

    let installed = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_ansi(options.ansi)
        .with_target(options.with_target)
        .try_init()
        .is_ok();

    if installed {
        tracing::debug!(level = options.level.as_str(), "Logging initialised");
    }

    Ok(installed)
}

/// Format an error with its cause chain
pub fn format_error(error: &dyn std::error::Error) -> String {
    format_error_recursive(error, 0)
}

fn format_error_recursive(error: &dyn std::error::Error, depth: usize) -> String {
    const MAX_DEPTH: usize = 10;

    if depth >= MAX_DEPTH {
        return error.to_string();
    }

    let base = error.to_string();

    if let Some(source) = error.source() {
        format!("{} Caused by: {}", base, format_error_recursive(source, depth + 1))
    } else {
        base
    }
}
