/*!
 * Tracing setup for applications embedding the client
 *
 * Every event the client emits is under the `upyun` target, so the default
 * filter is `upyun=<level>`. `RUST_LOG` overrides it when set.
 */

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Mutex;
use tracing::Level;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::protocol::upyun::{UpyunError, UpyunResult};

/// Log verbosity
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Error,
    Warn,
    #[default]
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    pub fn to_tracing_level(self) -> Level {
        match self {
            LogLevel::Error => Level::ERROR,
            LogLevel::Warn => Level::WARN,
            LogLevel::Info => Level::INFO,
            LogLevel::Debug => Level::DEBUG,
            LogLevel::Trace => Level::TRACE,
        }
    }
}

/// Line format of emitted events
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Single-line human readable output
    #[default]
    Compact,
    /// One JSON object per event
    Json,
}

/// Where and how much to log
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub log_level: LogLevel,

    /// Append events to this file instead of stdout
    pub log_file: Option<PathBuf>,

    /// Output format; files default to JSON when unset
    pub format: Option<LogFormat>,

    /// Shorthand for debug level
    pub verbose: bool,
}

impl LoggingConfig {
    fn effective_level(&self) -> Level {
        if self.verbose {
            Level::DEBUG
        } else {
            self.log_level.to_tracing_level()
        }
    }

    fn effective_format(&self) -> LogFormat {
        match (self.format, &self.log_file) {
            (Some(format), _) => format,
            (None, Some(_)) => LogFormat::Json,
            (None, None) => LogFormat::Compact,
        }
    }

    fn filter(&self) -> UpyunResult<EnvFilter> {
        match EnvFilter::try_from_default_env() {
            Ok(filter) => Ok(filter),
            Err(_) => EnvFilter::try_new(format!("upyun={}", self.effective_level()))
                .map_err(|e| UpyunError::Config(format!("invalid log filter: {}", e))),
        }
    }
}

/// Install the global subscriber described by `config`
///
/// Fails if a subscriber is already installed or the log file cannot be
/// opened.
pub fn init_logging(config: &LoggingConfig) -> UpyunResult<()> {
    let filter = config.filter()?;
    let to_file = config.log_file.is_some();

    let writer = match &config.log_file {
        Some(path) => {
            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .map_err(|e| {
                    UpyunError::Config(format!("cannot open log file {}: {}", path.display(), e))
                })?;
            fmt::writer::BoxMakeWriter::new(Mutex::new(file))
        }
        None => fmt::writer::BoxMakeWriter::new(std::io::stdout),
    };

    let layer = fmt::layer()
        .with_writer(writer)
        .with_ansi(!to_file)
        .with_target(true)
        .with_thread_ids(to_file)
        .with_file(to_file)
        .with_line_number(to_file);

    let registry = tracing_subscriber::registry().with(filter);
    let installed = match config.effective_format() {
        LogFormat::Compact => registry.with(layer.compact()).try_init(),
        LogFormat::Json => registry.with(layer.json()).try_init(),
    };
    installed.map_err(|e| UpyunError::Config(format!("logging already initialized: {}", e)))
}

/// Route events to the test harness output, once per process
pub fn init_test_logging() {
    static INIT: std::sync::Once = std::sync::Once::new();

    INIT.call_once(|| {
        let filter =
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("upyun=debug"));
        // Another harness may have installed a subscriber first
        let _ = tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_test_writer().with_target(false).compact())
            .try_init();
    });
}
