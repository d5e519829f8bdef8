//! Structured logging for the `tunedeck` binary.
//!
//! Two layers share one registry:
//! - Console output, human-readable, filtered by `RUST_LOG` or the CLI
//!   verbosity flags
//! - JSON file output through a rolling appender

use std::path::PathBuf;

use tracing::Level;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{
    EnvFilter, Layer,
    filter::Directive,
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
};

/// Crates whose events are raised by verbosity flags.
const OWN_TARGETS: [&str; 2] = ["tunedeck", "tunedeck_core"];

/// Logging configuration options.
#[derive(Debug, Clone)]
pub struct LoggingConfig {
    /// Directory where log files are written.
    pub log_directory: PathBuf,
    /// Log file name prefix ("tunedeck" -> "tunedeck.2026-01-15").
    pub log_file_prefix: String,
    /// Console level for our own crates when `RUST_LOG` is unset.
    pub console_level: Level,
    /// File level for our own crates.
    pub file_level: Level,
    /// How often to start a new log file.
    pub rotation: LogRotation,
    /// Whether to colour console output.
    pub console_ansi: bool,
    /// Whether to include file/line info in console output.
    pub include_file_line: bool,
    /// Whether to log span open/close events.
    pub log_span_events: bool,
}

/// Log rotation frequency.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogRotation {
    /// Create a new log file every hour.
    Hourly,
    /// Create a new log file every day.
    Daily,
    /// Never rotate (single log file).
    Never,
}

impl From<LogRotation> for Rotation {
    fn from(rotation: LogRotation) -> Self {
        match rotation {
            LogRotation::Hourly => Self::HOURLY,
            LogRotation::Daily => Self::DAILY,
            LogRotation::Never => Self::NEVER,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self::production()
    }
}

impl LoggingConfig {
    /// Verbose configuration for debug builds.
    #[must_use]
    pub fn development() -> Self {
        Self {
            log_directory: default_log_directory(),
            log_file_prefix: "tunedeck".to_string(),
            console_level: Level::DEBUG,
            file_level: Level::TRACE,
            rotation: LogRotation::Hourly,
            console_ansi: true,
            include_file_line: true,
            log_span_events: true,
        }
    }

    /// Quiet console, daily files.
    #[must_use]
    pub fn production() -> Self {
        Self {
            log_directory: default_log_directory(),
            log_file_prefix: "tunedeck".to_string(),
            console_level: Level::INFO,
            file_level: Level::DEBUG,
            rotation: LogRotation::Daily,
            console_ansi: true,
            include_file_line: false,
            log_span_events: false,
        }
    }

    /// Pick by build type.
    #[must_use]
    pub fn auto() -> Self {
        if cfg!(debug_assertions) {
            Self::development()
        } else {
            Self::production()
        }
    }

    /// Raise the console level by the number of `-v` flags, or silence it
    /// down to warnings with `--quiet`.
    #[must_use]
    pub const fn with_verbosity(mut self, verbose: u8, quiet: bool) -> Self {
        self.console_level = if quiet {
            Level::WARN
        } else {
            match verbose {
                0 => self.console_level,
                1 => Level::DEBUG,
                _ => Level::TRACE,
            }
        };
        self
    }

    /// Set the log directory.
    #[must_use]
    pub fn with_log_directory(mut self, path: PathBuf) -> Self {
        self.log_directory = path;
        self
    }
}

/// Keeps the file writer alive. Dropping it flushes pending entries.
pub struct LoggingGuard {
    _file_guard: tracing_appender::non_blocking::WorkerGuard,
}

/// Install the global subscriber.
///
/// # Errors
///
/// Fails if the log directory cannot be created or a subscriber is already
/// installed.
pub fn init(config: &LoggingConfig) -> Result<LoggingGuard, LoggingError> {
    std::fs::create_dir_all(&config.log_directory).map_err(|e| {
        LoggingError::DirectoryCreationFailed {
            path: config.log_directory.clone(),
            reason: e.to_string(),
        }
    })?;

    let file_appender = RollingFileAppender::new(
        config.rotation.into(),
        &config.log_directory,
        &config.log_file_prefix,
    );
    let (non_blocking, file_guard) = tracing_appender::non_blocking(file_appender);

    // RUST_LOG wins for the console; otherwise dependencies stay at warn.
    let console_filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => own_crates_filter(Level::WARN, config.console_level)?,
    };
    let file_filter = own_crates_filter(Level::INFO, config.file_level)?;

    let span_events = if config.log_span_events {
        FmtSpan::NEW | FmtSpan::CLOSE
    } else {
        FmtSpan::NONE
    };

    let console_layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_ansi(config.console_ansi)
        .with_target(config.include_file_line)
        .with_file(config.include_file_line)
        .with_line_number(config.include_file_line)
        .with_span_events(span_events.clone())
        .with_filter(console_filter);

    let file_layer = fmt::layer()
        .with_writer(non_blocking)
        .with_ansi(false)
        .with_target(true)
        .with_file(true)
        .with_line_number(true)
        .with_span_events(span_events)
        .json()
        .with_filter(file_filter);

    tracing_subscriber::registry()
        .with(console_layer)
        .with(file_layer)
        .try_init()
        .map_err(|e| LoggingError::AlreadyInitialized(e.to_string()))?;

    Ok(LoggingGuard {
        _file_guard: file_guard,
    })
}

fn own_crates_filter(default: Level, own: Level) -> Result<EnvFilter, LoggingError> {
    let mut filter = EnvFilter::new(level_to_directive(default));
    for target in OWN_TARGETS {
        let directive = format!("{target}={}", level_to_directive(own));
        let parsed: Directive = directive
            .parse()
            .map_err(|_| LoggingError::InvalidDirective(directive.clone()))?;
        filter = filter.add_directive(parsed);
    }
    Ok(filter)
}

/// Default log directory under the platform data dir.
#[must_use]
pub fn default_log_directory() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("tunedeck")
        .join("logs")
}

const fn level_to_directive(level: Level) -> &'static str {
    match level {
        Level::TRACE => "trace",
        Level::DEBUG => "debug",
        Level::INFO => "info",
        Level::WARN => "warn",
        Level::ERROR => "error",
    }
}

/// Errors raised while installing logging.
#[derive(Debug, thiserror::Error)]
pub enum LoggingError {
    /// The log directory could not be created.
    #[error("Failed to create log directory {path}: {reason}")]
    DirectoryCreationFailed {
        /// Directory that was attempted.
        path: PathBuf,
        /// Underlying cause.
        reason: String,
    },

    /// A filter directive did not parse.
    #[error("Invalid log filter directive '{0}'")]
    InvalidDirective(String),

    /// Another global subscriber is installed.
    #[error("Logging already initialized: {0}")]
    AlreadyInitialized(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_production() {
        let config = LoggingConfig::default();
        assert_eq!(config.console_level, Level::INFO);
        assert_eq!(config.rotation, LogRotation::Daily);
    }

    #[test]
    fn test_verbosity_flags() {
        let base = LoggingConfig::production();
        assert_eq!(base.clone().with_verbosity(0, false).console_level, Level::INFO);
        assert_eq!(base.clone().with_verbosity(1, false).console_level, Level::DEBUG);
        assert_eq!(base.clone().with_verbosity(3, false).console_level, Level::TRACE);
        assert_eq!(base.with_verbosity(2, true).console_level, Level::WARN);
    }

    #[test]
    fn test_own_crates_filter_parses() {
        let filter = own_crates_filter(Level::WARN, Level::DEBUG).unwrap();
        let rendered = filter.to_string();
        assert!(rendered.contains("tunedeck_core=debug"));
        assert!(rendered.contains("tunedeck=debug"));
    }

    #[test]
    fn test_log_rotation_conversion() {
        assert!(matches!(Rotation::from(LogRotation::Hourly), Rotation::HOURLY));
        assert!(matches!(Rotation::from(LogRotation::Never), Rotation::NEVER));
    }

    #[test]
    fn test_init_writes_into_configured_directory() {
        let temp = tempfile::TempDir::new().unwrap();
        let dir = temp.path().join("logs");
        let config = LoggingConfig::production().with_log_directory(dir.clone());

        // Another test may already have installed a subscriber; the directory
        // is created either way.
        let _guard = init(&config);
        assert!(dir.is_dir());
    }
}
