//! Configuration module for panemux.
//!
//! Handles loading and parsing the .panemuxrc configuration file.

pub mod shell;

use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::layout::{
    CellMetrics, DEFAULT_MIN_RATIO, GridSize, LayoutSettings, MAX_MIN_RATIO, Rect,
};
use crate::logging::LogConfig;

/// Default columns for a new tab when the container size is unknown.
pub const DEFAULT_COLS: u16 = 80;

/// Default rows for a new tab when the container size is unknown.
pub const DEFAULT_ROWS: u16 = 24;

/// Default resize coalescing interval in milliseconds (about one frame).
pub const DEFAULT_RESIZE_DEBOUNCE_MS: u64 = 16;

/// Default time to wait for a host response in milliseconds.
pub const DEFAULT_RESPONSE_TIMEOUT_MS: u64 = 5000;

/// Default .panemuxrc file content with all settings documented.
const DEFAULT_PANEMUXRC: &str = r#"# panemux Configuration File
# ===========================
# This file is read on startup.
# Lines starting with '#' are comments.
#
# Shell
# -----
# Shell for new panes: system, a name found in PATH (bash, zsh, fish),
# or an absolute path.
shell = system

# Terminal Geometry
# -----------------
# Size of a new tab when the window size is not known yet.
# default_cols = 80
# default_rows = 24
#
# Pixel size of one terminal cell, used to turn pane geometry into
# columns and rows.
# cell_width = 1
# cell_height = 1
#
# Width of the divider between split panes, in pixels.
# divider_width = 0

# Splits
# ------
# Smallest share of a split either side may shrink to (0.01 - 0.45).
# min_split_ratio = 0.1
#
# Milliseconds to coalesce divider drags and window resizes before the
# panes' terminals are resized.
# resize_debounce_ms = 16

# Host Connection
# ---------------
# Unix socket the host listens on (default: runtime dir/panemux.sock).
# socket_path = /run/user/1000/panemux.sock
#
# Milliseconds to wait for the host to answer a create or kill request.
# response_timeout_ms = 5000

# Logging Configuration
# ---------------------
# Logs are stored in ~/.panemux/logs/ with automatic cleanup.
#
# log_enabled = true       # Enable/disable file logging (true/false)
# log_level = info         # Log level: trace, debug, info, warn, error, off
# log_retention = 24       # Hours to keep log files (default: 24)
"#;

/// Application configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Shell for new panes (None = system default).
    pub shell: Option<String>,
    /// Columns of a new tab when the container size is unknown.
    pub default_cols: u16,
    /// Rows of a new tab when the container size is unknown.
    pub default_rows: u16,
    /// Pixel width of one cell.
    pub cell_width: f32,
    /// Pixel height of one cell.
    pub cell_height: f32,
    /// Divider width in pixels.
    pub divider_width: f32,
    /// Minimum split share on either side.
    pub min_split_ratio: f32,
    /// Resize coalescing interval in milliseconds.
    pub resize_debounce_ms: u64,
    /// Host response timeout in milliseconds.
    pub response_timeout_ms: u64,
    /// Host socket path (None = platform default).
    pub socket_path: Option<PathBuf>,
    /// Path to config file.
    pub config_path: PathBuf,
    /// Logging configuration.
    pub log_config: LogConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            shell: None,
            default_cols: DEFAULT_COLS,
            default_rows: DEFAULT_ROWS,
            cell_width: 1.0,
            cell_height: 1.0,
            divider_width: 0.0,
            min_split_ratio: DEFAULT_MIN_RATIO,
            resize_debounce_ms: DEFAULT_RESIZE_DEBOUNCE_MS,
            response_timeout_ms: DEFAULT_RESPONSE_TIMEOUT_MS,
            socket_path: None,
            config_path: Self::default_config_path(),
            log_config: LogConfig::default(),
        }
    }
}

impl Config {
    /// Returns the default config file path (~/.panemuxrc).
    #[must_use]
    pub fn default_config_path() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".panemuxrc")
    }

    /// Loads configuration from the default path, creating it if it doesn't exist.
    ///
    /// # Errors
    /// Returns error if config cannot be read or created.
    pub fn load() -> io::Result<Self> {
        let path = Self::default_config_path();
        Self::load_from(&path)
    }

    /// Loads configuration from a specific path.
    ///
    /// # Errors
    /// Returns error if config cannot be read or created.
    pub fn load_from(path: &Path) -> io::Result<Self> {
        if !path.exists() {
            Self::create_default_config(path)?;
        }

        let content = fs::read_to_string(path)?;
        let mut config = Self::from_str_content(&content);
        config.config_path = path.to_path_buf();
        Ok(config)
    }

    /// Builds a configuration from file content, without touching disk.
    #[must_use]
    pub fn from_str_content(content: &str) -> Self {
        let mut config = Self::default();
        config.parse(content);
        config
    }

    /// Creates the default config file.
    fn create_default_config(path: &Path) -> io::Result<()> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                fs::create_dir_all(parent)?;
            }
        }
        let mut file = fs::File::create(path)?;
        file.write_all(DEFAULT_PANEMUXRC.as_bytes())?;
        Ok(())
    }

    /// Parses the config file content.
    fn parse(&mut self, content: &str) {
        for line in content.lines() {
            let line = line.trim();

            // Skip comments and empty lines
            if line.is_empty() || line.starts_with('#') {
                continue;
            }

            if let Some((key, value)) = line.split_once('=') {
                let key = key.trim();
                let value = value.trim();

                // Remove inline comments
                let value = value.split('#').next().unwrap_or(value).trim();

                self.apply_setting(key, value);
            }
        }
    }

    /// Applies a single setting. Unparsable values keep the current value.
    fn apply_setting(&mut self, key: &str, value: &str) {
        match key {
            "shell" => {
                self.shell = shell::resolve_shell(value);
            }
            "default_cols" => {
                self.default_cols = parse_positive(value).unwrap_or(self.default_cols);
            }
            "default_rows" => {
                self.default_rows = parse_positive(value).unwrap_or(self.default_rows);
            }
            "cell_width" => {
                self.cell_width = parse_pixels(value, 1.0).unwrap_or(self.cell_width);
            }
            "cell_height" => {
                self.cell_height = parse_pixels(value, 1.0).unwrap_or(self.cell_height);
            }
            "divider_width" => {
                self.divider_width = parse_pixels(value, 0.0).unwrap_or(self.divider_width);
            }
            "min_split_ratio" => {
                if let Ok(ratio) = value.parse::<f32>() {
                    if ratio.is_finite() && ratio > 0.0 && ratio <= MAX_MIN_RATIO {
                        self.min_split_ratio = ratio;
                    }
                }
            }
            "resize_debounce_ms" => {
                self.resize_debounce_ms = value.parse().unwrap_or(self.resize_debounce_ms);
            }
            "response_timeout_ms" => {
                self.response_timeout_ms = value
                    .parse()
                    .ok()
                    .filter(|ms| *ms > 0)
                    .unwrap_or(self.response_timeout_ms);
            }
            "socket_path" => {
                self.socket_path = if value.is_empty() {
                    None
                } else {
                    Some(PathBuf::from(value))
                };
            }
            "log_level" => {
                self.log_config.level = LogConfig::parse_level(value);
            }
            "log_retention" | "log_retention_hours" => {
                self.log_config.retention_hours = LogConfig::parse_retention(value);
            }
            "log_enabled" | "logging" => {
                self.log_config.enabled = parse_bool(value);
            }
            _ => {
                tracing::debug!("Ignoring unknown config key: {}", key);
            }
        }
    }

    /// Returns the geometry settings for the layout engine.
    #[must_use]
    pub fn layout_settings(&self) -> LayoutSettings {
        LayoutSettings {
            cell: CellMetrics::new(self.cell_width, self.cell_height),
            divider_width: self.divider_width,
            min_ratio: self.min_split_ratio,
        }
    }

    /// Returns the grid size of a tab opened before its container is known.
    #[must_use]
    pub fn default_grid(&self) -> GridSize {
        GridSize::new(self.default_cols, self.default_rows)
    }

    /// Returns the pixel area covering [`Config::default_grid`].
    #[must_use]
    pub fn default_area(&self) -> Rect {
        Rect::from_grid(self.default_grid(), self.layout_settings().cell)
    }

    /// Returns the resize coalescing interval.
    #[must_use]
    pub fn resize_debounce(&self) -> Duration {
        Duration::from_millis(self.resize_debounce_ms)
    }

    /// Returns the host response timeout.
    #[must_use]
    pub fn response_timeout(&self) -> Duration {
        Duration::from_millis(self.response_timeout_ms)
    }

    /// Reloads the configuration from disk.
    ///
    /// # Errors
    /// Returns error if config cannot be read.
    pub fn reload(&mut self) -> io::Result<()> {
        let path = self.config_path.clone();
        *self = Self::load_from(&path)?;
        Ok(())
    }
}

fn parse_bool(value: &str) -> bool {
    matches!(value.to_lowercase().as_str(), "true" | "yes" | "1" | "on")
}

fn parse_positive(value: &str) -> Option<u16> {
    value.parse::<u16>().ok().filter(|n| *n > 0)
}

fn parse_pixels(value: &str, min: f32) -> Option<f32> {
    value
        .parse::<f32>()
        .ok()
        .filter(|px| px.is_finite() && *px >= min)
}
