//! Logging setup for the mute service
//!
//! Hosts pick a [`LoggingMode`] once at startup. Interactive front ends that
//! draw their own output should stay [`LoggingMode::Silent`].
//!
//! [`init_logging_with_file`] additionally appends plain-text logs to a
//! dated file, one per day, for diagnosing problems after the fact.

use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};

use chrono::{Local, NaiveDate};
use tracing_subscriber::{fmt, EnvFilter, Layer, Registry};

/// Environment variable selecting the logging mode
pub const LOG_MODE_ENV: &str = "SONOS_MUTE_LOG_MODE";

/// Environment variable overriding the log filter
pub const LOG_LEVEL_ENV: &str = "SONOS_MUTE_LOG_LEVEL";

/// Logging mode for different use cases
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoggingMode {
    /// No subscriber is installed
    Silent,
    /// Compact stderr output
    Development,
    /// Verbose output with threads and source locations
    Debug,
}

impl LoggingMode {
    /// Parse a mode name, case-insensitively
    pub fn from_name(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "silent" => Some(Self::Silent),
            "development" | "dev" => Some(Self::Development),
            "debug" => Some(Self::Debug),
            _ => None,
        }
    }

    fn default_level(self) -> &'static str {
        match self {
            Self::Silent => "off",
            Self::Development => "info",
            Self::Debug => "debug",
        }
    }
}

/// Logging configuration error
#[derive(Debug, thiserror::Error)]
pub enum LoggingError {
    #[error("Failed to initialize tracing subscriber: {0}")]
    TracingInit(String),

    #[error("Invalid environment variable: {0}")]
    InvalidEnv(String),

    #[error("Failed to open log file {path}: {source}")]
    LogFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Initialize logging with the specified mode
///
/// # Environment Variables
///
/// - `SONOS_MUTE_LOG_LEVEL`: filter directive (e.g. `sonos_mute=debug`)
/// - `RUST_LOG`: used when the above is unset
pub fn init_logging(mode: LoggingMode) -> Result<(), LoggingError> {
    install(mode, None)
}

/// Initialize logging like [`init_logging`], also appending to today's log
/// file in `dir`
///
/// The directory is created if needed. In [`LoggingMode::Silent`] only the
/// file is written, at `info` unless the environment says otherwise.
/// Returns the path of the file.
pub fn init_logging_with_file(mode: LoggingMode, dir: &Path) -> Result<PathBuf, LoggingError> {
    let (path, file) = open_log_file(dir, Local::now().date_naive())?;
    install(mode, Some(file))?;
    Ok(path)
}

/// Name of the log file for `date`
pub fn log_file_name(date: NaiveDate) -> String {
    format!("sonos-mute-{}.log", date.format("%Y-%m-%d"))
}

fn open_log_file(dir: &Path, date: NaiveDate) -> Result<(PathBuf, File), LoggingError> {
    let path = dir.join(log_file_name(date));
    let file = std::fs::create_dir_all(dir)
        .and_then(|_| OpenOptions::new().create(true).append(true).open(&path))
        .map_err(|source| LoggingError::LogFile {
            path: path.clone(),
            source,
        })?;
    Ok((path, file))
}

fn install(mode: LoggingMode, file: Option<File>) -> Result<(), LoggingError> {
    use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

    let default_level = match (mode, &file) {
        (LoggingMode::Silent, None) => return Ok(()),
        (LoggingMode::Silent, Some(_)) => "info",
        _ => mode.default_level(),
    };
    let filter = create_env_filter(default_level)?;

    let console = match mode {
        LoggingMode::Silent => None,
        LoggingMode::Development => Some(
            fmt::layer()
                .with_target(false)
                .with_writer(std::io::stderr)
                .compact()
                .boxed(),
        ),
        LoggingMode::Debug => Some(
            fmt::layer()
                .pretty()
                .with_writer(std::io::stderr)
                .with_thread_names(true)
                .with_file(true)
                .with_line_number(true)
                .boxed(),
        ),
    };

    let file = file.map(|file| {
        fmt::layer()
            .with_ansi(false)
            .with_writer(std::sync::Mutex::new(file))
    });

    Registry::default()
        .with(console)
        .with(file)
        .with(filter)
        .try_init()
        .map_err(|e| LoggingError::TracingInit(e.to_string()))
}

/// Initialize logging from `SONOS_MUTE_LOG_MODE`
///
/// Unset means silent. An unrecognized value is an error rather than a
/// silent fallback.
pub fn init_logging_from_env() -> Result<(), LoggingError> {
    let mode = match std::env::var(LOG_MODE_ENV) {
        Ok(value) => LoggingMode::from_name(&value)
            .ok_or_else(|| LoggingError::InvalidEnv(format!("{}={}", LOG_MODE_ENV, value)))?,
        Err(_) => LoggingMode::Silent,
    };

    init_logging(mode)
}

fn create_env_filter(default_level: &str) -> Result<EnvFilter, LoggingError> {
    let directive = std::env::var(LOG_LEVEL_ENV)
        .or_else(|_| std::env::var("RUST_LOG"))
        .unwrap_or_else(|_| default_level.to_string());

    EnvFilter::try_new(&directive)
        .map_err(|e| LoggingError::InvalidEnv(format!("{}: {}", directive, e)))
}

/// Check if a global subscriber has been installed
pub fn is_initialized() -> bool {
    tracing::dispatcher::has_been_set()
}
