//! Logging setup
//!
//! The library itself only emits `tracing` events (targets `cmdrdata::*`).
//! Applications that have no subscriber of their own can install one here;
//! its writer redacts credential-looking text from every line.
//!
//! ## Example
//!
//! ```rust,no_run
//! use cmdrdata_anthropic::logging::{init_logging, LogConfig, LogFormat};
//!
//! # fn example() -> cmdrdata_anthropic::Result<()> {
//! init_logging(LogConfig {
//!     level: tracing::Level::DEBUG,
//!     format: LogFormat::Json,
//! })?;
//! # Ok(())
//! # }
//! ```

use std::io;

use tracing_subscriber::fmt::MakeWriter;

use crate::error::{Result, TrackerError};
use crate::sanitize::sanitize_log_line;

/// Log level variable read by [`init_from_env`].
pub const ENV_LOG_LEVEL: &str = "CMDRDATA_LOG_LEVEL";
/// Log format variable read by [`init_from_env`] (`text` or `json`).
pub const ENV_LOG_FORMAT: &str = "CMDRDATA_LOG_FORMAT";

/// Output format for log lines
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

/// Subscriber configuration
#[derive(Debug, Clone)]
pub struct LogConfig {
    pub level: tracing::Level,
    pub format: LogFormat,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: tracing::Level::INFO,
            format: LogFormat::Text,
        }
    }
}

impl LogConfig {
    pub fn debug() -> Self {
        Self {
            level: tracing::Level::DEBUG,
            ..Default::default()
        }
    }
}

/// Writer that redacts credentials before bytes reach `inner`.
///
/// The fmt layer hands over one formatted event per write, so redaction
/// patterns are never split across calls.
#[derive(Debug)]
pub struct SanitizingWriter<W> {
    inner: W,
}

impl<W> SanitizingWriter<W> {
    pub fn new(inner: W) -> Self {
        Self { inner }
    }

    pub fn into_inner(self) -> W {
        self.inner
    }
}

impl<W: io::Write> io::Write for SanitizingWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let text = String::from_utf8_lossy(buf);
        self.inner.write_all(sanitize_log_line(&text).as_bytes())?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

/// [`MakeWriter`] wrapper producing [`SanitizingWriter`]s.
#[derive(Debug, Clone)]
pub struct SanitizingMakeWriter<M> {
    inner: M,
}

impl<M> SanitizingMakeWriter<M> {
    pub fn new(inner: M) -> Self {
        Self { inner }
    }
}

impl<'a, M: MakeWriter<'a>> MakeWriter<'a> for SanitizingMakeWriter<M> {
    type Writer = SanitizingWriter<M::Writer>;

    fn make_writer(&'a self) -> Self::Writer {
        SanitizingWriter::new(self.inner.make_writer())
    }
}

fn level_name(level: tracing::Level) -> &'static str {
    match level {
        tracing::Level::TRACE => "trace",
        tracing::Level::DEBUG => "debug",
        tracing::Level::INFO => "info",
        tracing::Level::WARN => "warn",
        tracing::Level::ERROR => "error",
    }
}

/// Install a global fmt subscriber writing sanitized lines to stderr.
///
/// A subscriber that is already installed is left in place and this returns
/// `Ok(())`.
pub fn init_logging(config: LogConfig) -> Result<()> {
    let level = level_name(config.level);
    let filter = format!("cmdrdata_anthropic={level},cmdrdata={level}");
    let writer = SanitizingMakeWriter::new(io::stderr);

    let init_result = match config.format {
        LogFormat::Json => tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(true)
            .with_writer(writer)
            .json()
            .try_init(),
        LogFormat::Text => tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(true)
            .with_ansi(false)
            .with_writer(writer)
            .try_init(),
    };

    match init_result {
        Ok(()) => Ok(()),
        Err(e) if e.to_string().contains("already") => Ok(()),
        Err(e) => Err(TrackerError::Configuration(format!(
            "failed to initialize logging: {e}"
        ))),
    }
}

/// Configure from `CMDRDATA_LOG_LEVEL` and `CMDRDATA_LOG_FORMAT`, then install.
pub fn init_from_env() -> Result<()> {
    init_logging(config_from(|name| std::env::var(name).ok())?)
}

fn config_from<F: Fn(&str) -> Option<String>>(lookup: F) -> Result<LogConfig> {
    let mut config = LogConfig::default();
    if let Some(level) = lookup(ENV_LOG_LEVEL) {
        config.level = level.trim().parse::<tracing::Level>().map_err(|_| {
            TrackerError::Configuration(format!(
                "Invalid log level: {level}. Valid options: trace, debug, info, warn, error"
            ))
        })?;
    }
    if let Some(format) = lookup(ENV_LOG_FORMAT) {
        config.format = match format.trim().to_ascii_lowercase().as_str() {
            "text" => LogFormat::Text,
            "json" => LogFormat::Json,
            _ => {
                return Err(TrackerError::Configuration(format!(
                    "Invalid log format: {format}. Valid options: text, json"
                )));
            }
        };
    }
    Ok(config)
}
