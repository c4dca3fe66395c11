//! File logging for panemux.
//!
//! Logs go to timestamped files in ~/.panemux/logs/, old files are removed
//! according to the configured retention. When file logging is disabled the
//! binary can fall back to [`init_stderr`].

use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use tracing_subscriber::fmt::writer::MakeWriterExt;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, fmt};

/// Default log retention in hours.
pub const DEFAULT_LOG_RETENTION_HOURS: u32 = 24;

/// Default log level.
pub const DEFAULT_LOG_LEVEL: &str = "info";

/// Prefix of every log file name.
const LOG_FILE_PREFIX: &str = "panemux_";

/// Logging configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogConfig {
    /// Log retention period in hours.
    pub retention_hours: u32,
    /// Log level (trace, debug, info, warn, error, off).
    pub level: String,
    /// Whether file logging is enabled.
    pub enabled: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            retention_hours: DEFAULT_LOG_RETENTION_HOURS,
            level: DEFAULT_LOG_LEVEL.to_string(),
            enabled: true,
        }
    }
}

impl LogConfig {
    /// Parses a log level, falling back to the default for unknown names.
    #[must_use]
    pub fn parse_level(value: &str) -> String {
        let level = match value.to_lowercase().as_str() {
            "trace" => "trace",
            "debug" => "debug",
            "info" => "info",
            "warn" | "warning" => "warn",
            "error" => "error",
            "off" | "none" | "disabled" => "off",
            _ => DEFAULT_LOG_LEVEL,
        };
        level.to_string()
    }

    /// Parses retention hours.
    #[must_use]
    pub fn parse_retention(value: &str) -> u32 {
        value.parse().unwrap_or(DEFAULT_LOG_RETENTION_HOURS)
    }

    /// Returns true if log output should be produced at all.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.enabled && self.level != "off"
    }
}

/// Returns the log directory path (~/.panemux/logs/).
#[must_use]
pub fn log_directory() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".panemux")
        .join("logs")
}

/// Returns a fresh timestamped log file path inside `dir`.
#[must_use]
pub fn log_path_in(dir: &Path) -> PathBuf {
    let now = chrono::Local::now();
    let filename = format!(
        "{}{}_{}.log",
        LOG_FILE_PREFIX,
        now.format("%Y-%m-%d_%H-%M-%S"),
        std::process::id()
    );
    dir.join(filename)
}

/// Deletes panemux log files in `dir` older than the retention period.
///
/// # Errors
/// Returns error if the directory cannot be read.
pub fn cleanup_old_logs(dir: &Path, retention_hours: u32) -> io::Result<u32> {
    if !dir.exists() {
        return Ok(0);
    }

    let retention = Duration::from_secs(u64::from(retention_hours) * 3600);
    let now = SystemTime::now();
    let mut deleted = 0;

    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        if !is_log_file(&path) {
            continue;
        }

        let age = entry
            .metadata()
            .and_then(|metadata| metadata.modified())
            .ok()
            .and_then(|modified| now.duration_since(modified).ok());
        if age.is_some_and(|age| age > retention) && fs::remove_file(&path).is_ok() {
            deleted += 1;
        }
    }

    Ok(deleted)
}

fn is_log_file(path: &Path) -> bool {
    let is_log = path.extension().and_then(|e| e.to_str()) == Some("log");
    let ours = path
        .file_name()
        .and_then(|name| name.to_str())
        .is_some_and(|name| name.starts_with(LOG_FILE_PREFIX));
    is_log && ours
}

fn env_filter(level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level))
}

/// Initializes file logging.
///
/// Returns the path of the log file, or `None` when logging is disabled.
///
/// # Errors
/// Returns error if the log directory or file cannot be created.
pub fn init(config: &LogConfig) -> io::Result<Option<PathBuf>> {
    if !config.is_active() {
        return Ok(None);
    }

    let log_dir = log_directory();
    fs::create_dir_all(&log_dir)?;
    let deleted = cleanup_old_logs(&log_dir, config.retention_hours)?;

    let log_path = log_path_in(&log_dir);
    let log_file = File::create(&log_path)?;

    let file_layer = fmt::layer()
        .with_writer(log_file.with_max_level(tracing::Level::TRACE))
        .with_ansi(false)
        .with_target(true)
        .with_thread_names(true)
        .with_line_number(false);

    tracing_subscriber::registry()
        .with(env_filter(&config.level))
        .with(file_layer)
        .try_init()
        .map_err(io::Error::other)?;

    tracing::info!("panemux logging initialized");
    tracing::info!("Log file: {}", log_path.display());
    tracing::info!(
        "Log level: {}, retention: {} hours",
        config.level,
        config.retention_hours
    );
    if deleted > 0 {
        tracing::info!("Cleaned up {} old log file(s)", deleted);
    }

    Ok(Some(log_path))
}

/// Initializes logging to stderr.
///
/// Used when file logging is disabled or unavailable. Stdout is never used
/// because `--stdio` mode speaks the protocol on it.
///
/// # Errors
/// Returns error if a global subscriber is already installed.
pub fn init_stderr(level: &str) -> io::Result<()> {
    let level = if level == "off" { "warn" } else { level };
    tracing_subscriber::registry()
        .with(env_filter(level))
        .with(fmt::layer().with_writer(io::stderr).with_target(false))
        .try_init()
        .map_err(io::Error::other)
}
