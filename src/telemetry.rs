//! Shared logging bootstrap for readygate binaries.

use crate::{Error, Result};

use tracing::{info, Level};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

/// Filter directives that override `--log-level`, e.g. `readygate=debug,reqwest=warn`
pub const LOG_FILTER_ENV: &str = "READYGATE_LOG";

/// Output format of the fmt subscriber.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Pretty,
    Json,
}

impl LogFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogFormat::Pretty => "pretty",
            LogFormat::Json => "json",
        }
    }

    /// Read `READYGATE_LOG_FORMAT` (default: pretty).
    pub fn from_env() -> Result<Self> {
        match std::env::var("READYGATE_LOG_FORMAT") {
            Ok(raw) => parse_log_format(&raw),
            Err(_) => Ok(LogFormat::Pretty),
        }
    }
}

/// Install the global subscriber for a binary.
///
/// Logs go to stderr so stdout stays free for command results.
pub fn init_for_component(component: &str, log_level: &str) -> Result<()> {
    let level = parse_log_level(log_level)?;
    let format = LogFormat::from_env()?;
    let filter = EnvFilter::try_from_env(LOG_FILTER_ENV).unwrap_or_else(|_| default_filter(level));

    let builder = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(true)
        .with_writer(std::io::stderr);

    let installed = match format {
        LogFormat::Json => builder.json().try_init(),
        LogFormat::Pretty => builder.try_init(),
    };
    installed.map_err(|e| Error::Config(format!("failed to initialize log subscriber: {e}")))?;

    info!(
        component,
        log_level = %level,
        log_format = format.as_str(),
        "Logging initialized"
    );

    Ok(())
}

fn default_filter(level: Level) -> EnvFilter {
    EnvFilter::new(level.to_string().to_ascii_lowercase())
}

fn parse_log_format(raw: &str) -> Result<LogFormat> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "pretty" | "text" | "" => Ok(LogFormat::Pretty),
        "json" => Ok(LogFormat::Json),
        other => Err(Error::Config(format!(
            "READYGATE_LOG_FORMAT must be one of [pretty, json], got '{other}'"
        ))),
    }
}

fn parse_log_level(raw: &str) -> Result<Level> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "trace" => Ok(Level::TRACE),
        "debug" => Ok(Level::DEBUG),
        "info" => Ok(Level::INFO),
        "warn" => Ok(Level::WARN),
        "error" => Ok(Level::ERROR),
        other => Err(Error::Config(format!(
            "invalid log level '{other}', expected one of [trace, debug, info, warn, error]"
        ))),
    }
}
