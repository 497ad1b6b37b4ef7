//! src/logging.rs
//! ============================================================================
//! # Logging: tracing subscriber installation
//!
//! Installs a `tracing-subscriber` registry with an `EnvFilter`, a JSON-lines
//! file layer behind a non-blocking `tracing-appender` rolling writer, and an
//! optional human readable stderr layer. Every module of the core logs
//! through `tracing` with `marker` / `operation_type` fields, so the JSON
//! output can be grouped per operation.

use std::{
    path::{Path, PathBuf},
    str::FromStr,
    sync::atomic::{AtomicBool, Ordering},
};

use compact_str::CompactString;
use serde::{Deserialize, Serialize};
use tracing::Subscriber;
use tracing_appender::{
    non_blocking::WorkerGuard,
    rolling::{RollingFileAppender, Rotation},
};
use tracing_subscriber::{
    EnvFilter, Layer, filter::Directive, fmt::time::ChronoUtc, layer::SubscriberExt,
    registry::LookupSpan, util::SubscriberInitExt,
};

static INITIALIZED: AtomicBool = AtomicBool::new(false);

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggerConfig {
    pub log_dir: PathBuf,
    pub log_file_prefix: CompactString,
    pub log_level: CompactString,
    pub max_log_files: usize,
    pub rotation: LogRotation,

    /// Mirror events to stderr in the compact text format.
    pub stderr: bool,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub enum LogRotation {
    Never,
    Hourly,
    Daily,
}

impl From<LogRotation> for Rotation {
    fn from(value: LogRotation) -> Self {
        match value {
            LogRotation::Never => Self::NEVER,
            LogRotation::Hourly => Self::HOURLY,
            LogRotation::Daily => Self::DAILY,
        }
    }
}

impl Default for LoggerConfig {
    fn default() -> Self {
        Self {
            log_dir: PathBuf::from("./logs"),
            log_file_prefix: CompactString::const_new("manager"),
            log_level: CompactString::const_new("info"),
            max_log_files: 10,
            rotation: LogRotation::Daily,
            stderr: false,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum LoggingError {
    #[error("Logger already initialized")]
    AlreadyInitialized,

    #[error("Invalid log directory: {0}")]
    InvalidLogDirectory(String),

    #[error("Failed to create log directory: {0}")]
    DirectoryCreationFailed(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    ConfigError(String),
}

fn validate_config(config: &LoggerConfig) -> Result<(), LoggingError> {
    if config.log_file_prefix.is_empty() {
        return Err(LoggingError::ConfigError(
            "log_file_prefix must not be empty".to_string(),
        ));
    }

    if config.max_log_files == 0 {
        return Err(LoggingError::ConfigError(
            "max_log_files must be at least 1".to_string(),
        ));
    }

    Ok(())
}

fn setup_log_directory(dir: &Path) -> Result<(), LoggingError> {
    if dir.as_os_str().is_empty() {
        return Err(LoggingError::InvalidLogDirectory(
            "empty log directory".to_string(),
        ));
    }

    std::fs::create_dir_all(dir)?;

    if !dir.is_dir() {
        return Err(LoggingError::InvalidLogDirectory(dir.display().to_string()));
    }

    Ok(())
}

fn make_filter(level: &str) -> Result<EnvFilter, LoggingError> {
    let directive: Directive = Directive::from_str(level)
        .map_err(|e| LoggingError::ConfigError(format!("invalid log level {level}: {e}")))?;

    Ok(EnvFilter::from_default_env().add_directive(directive))
}

/// Compact stderr mirror, filtered at the same level as the file layer.
fn stderr_layer<S>(config: &LoggerConfig) -> Result<Option<impl Layer<S>>, LoggingError>
where
    S: Subscriber + for<'a> LookupSpan<'a>,
{
    if !config.stderr {
        return Ok(None);
    }

    let layer = tracing_subscriber::fmt::layer()
        .compact()
        .with_writer(std::io::stderr)
        .with_filter(make_filter(&config.log_level)?);

    Ok(Some(layer))
}

/// Install the global subscriber. Keep the returned guard alive for as long
/// as logs should be flushed to disk.
pub fn init_logging(config: &LoggerConfig) -> Result<WorkerGuard, LoggingError> {
    validate_config(config)?;

    if INITIALIZED.swap(true, Ordering::SeqCst) {
        return Err(LoggingError::AlreadyInitialized);
    }

    let result = install(config);

    if result.is_err() {
        INITIALIZED.store(false, Ordering::SeqCst);
    }

    result
}

fn install(config: &LoggerConfig) -> Result<WorkerGuard, LoggingError> {
    setup_log_directory(&config.log_dir)?;

    let file_appender = RollingFileAppender::builder()
        .rotation(config.rotation.into())
        .filename_prefix(config.log_file_prefix.as_str())
        .filename_suffix("jsonl")
        .max_log_files(config.max_log_files)
        .build(&config.log_dir)
        .map_err(|e| LoggingError::ConfigError(format!("failed to create file appender: {e}")))?;

    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    let json_layer = tracing_subscriber::fmt::layer()
        .json()
        .with_timer(ChronoUtc::rfc_3339())
        .with_current_span(true)
        .with_span_list(false)
        .with_target(true)
        .with_writer(non_blocking)
        .with_filter(make_filter(&config.log_level)?);

    tracing_subscriber::registry()
        .with(json_layer)
        .with(stderr_layer(config)?)
        .try_init()
        .map_err(|e| LoggingError::ConfigError(format!("failed to install subscriber: {e}")))?;

    tracing::info!(
        marker = "LOGGING_INITIALIZED",
        operation_type = "logging",
        log_dir = %config.log_dir.display(),
        level = %config.log_level,
        "Logging initialized"
    );

    Ok(guard)
}
