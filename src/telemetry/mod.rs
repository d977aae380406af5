//! Logging setup
//!
//! The relay logs through `tracing`; this module installs the fmt subscriber
//! used by the `siumai-relay` binary. Library users can install their own
//! subscriber instead and skip this module entirely.
//!
//! ```rust,ignore
//! use siumai_relay::telemetry::{OutputFormat, SubscriberConfig, init_subscriber};
//!
//! let _guard = init_subscriber(SubscriberConfig {
//!     log_level: tracing::Level::DEBUG,
//!     output_format: OutputFormat::Json,
//!     log_file: None,
//! })?;
//! ```

use std::path::{Path, PathBuf};
use std::str::FromStr;

use crate::error::{RelayError, Result};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt::writer::BoxMakeWriter;

/// Log line layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutputFormat {
    #[default]
    Text,
    /// One JSON object per event, with span context nested
    Json,
    /// One JSON object per event, event fields at the top level
    JsonCompact,
}

impl FromStr for OutputFormat {
    type Err = RelayError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "text" => Ok(Self::Text),
            "json" => Ok(Self::Json),
            "json-compact" => Ok(Self::JsonCompact),
            other => Err(RelayError::ConfigurationError(format!(
                "unknown log format '{other}' (expected text, json or json-compact)"
            ))),
        }
    }
}

#[derive(Debug, Clone)]
pub struct SubscriberConfig {
    pub log_level: tracing::Level,
    pub output_format: OutputFormat,
    /// Append to this file instead of writing to stderr.
    pub log_file: Option<PathBuf>,
}

impl Default for SubscriberConfig {
    fn default() -> Self {
        Self {
            log_level: tracing::Level::INFO,
            output_format: OutputFormat::Text,
            log_file: None,
        }
    }
}

impl SubscriberConfig {
    /// Read `SIUMAI_RELAY_LOG_LEVEL`, `SIUMAI_RELAY_LOG_FORMAT` and
    /// `SIUMAI_RELAY_LOG_FILE` through `lookup`. Unset variables keep defaults.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();
        if let Some(level) = lookup("SIUMAI_RELAY_LOG_LEVEL") {
            config.log_level = level.trim().parse().map_err(|_| {
                RelayError::ConfigurationError(format!(
                    "SIUMAI_RELAY_LOG_LEVEL must be one of trace, debug, info, warn, error; got '{level}'"
                ))
            })?;
        }
        if let Some(format) = lookup("SIUMAI_RELAY_LOG_FORMAT") {
            config.output_format = format.parse()?;
        }
        config.log_file = lookup("SIUMAI_RELAY_LOG_FILE")
            .filter(|p| !p.trim().is_empty())
            .map(PathBuf::from);
        Ok(config)
    }

    fn writer(&self) -> Result<(BoxMakeWriter, Option<WorkerGuard>)> {
        let Some(path) = &self.log_file else {
            return Ok((BoxMakeWriter::new(std::io::stderr), None));
        };
        let file_name = path.file_name().ok_or_else(|| {
            RelayError::ConfigurationError(format!("invalid log file path: {}", path.display()))
        })?;
        let dir = path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        let (writer, guard) =
            tracing_appender::non_blocking(tracing_appender::rolling::never(dir, file_name));
        Ok((BoxMakeWriter::new(writer), Some(guard)))
    }
}

/// Install the global subscriber.
///
/// Returns the file writer guard when logging to a file; it must outlive all
/// logging. An already installed subscriber is left in place.
pub fn init_subscriber(config: SubscriberConfig) -> Result<Option<WorkerGuard>> {
    let level = config.log_level.as_str().to_ascii_lowercase();
    let filter = EnvFilter::try_new(format!("siumai_relay={level}"))
        .map_err(|e| RelayError::ConfigurationError(format!("invalid log filter: {e}")))?;
    let (writer, guard) = config.writer()?;
    let fmt = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(writer)
        .with_target(true);

    let installed = match config.output_format {
        OutputFormat::Text => fmt.try_init(),
        OutputFormat::Json => fmt.json().try_init(),
        OutputFormat::JsonCompact => fmt.json().flatten_event(true).try_init(),
    };
    match installed {
        Ok(()) => Ok(guard),
        Err(e) => {
            tracing::debug!(error = %e, "tracing subscriber already installed");
            Ok(None)
        }
    }
}

/// [`init_subscriber`] with [`SubscriberConfig::from_lookup`] over the process environment.
pub fn init_from_env() -> Result<Option<WorkerGuard>> {
    init_subscriber(SubscriberConfig::from_lookup(|key| std::env::var(key).ok())?)
}
