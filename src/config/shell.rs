//! Shell resolution.
//!
//! Turns the `shell` config value into a program path and supplies the
//! defaults used when a session request names no shell or directory.

use std::path::PathBuf;

/// Config values that select the user's default shell.
const SYSTEM_SHELL_NAMES: [&str; 3] = ["system", "default", ""];

/// Returns the user's default shell.
///
/// Uses `$SHELL` on Unix and `%COMSPEC%` on Windows, falling back to the
/// platform's basic shell.
#[must_use]
pub fn default_shell() -> String {
    #[cfg(windows)]
    {
        if let Ok(comspec) = std::env::var("COMSPEC") {
            return comspec;
        }
        "cmd.exe".to_string()
    }

    #[cfg(not(windows))]
    {
        if let Ok(shell) = std::env::var("SHELL") {
            if !shell.is_empty() && PathBuf::from(&shell).exists() {
                return shell;
            }
        }
        "/bin/sh".to_string()
    }
}

/// Returns the directory new sessions start in when none is requested.
#[must_use]
pub fn default_working_dir() -> PathBuf {
    dirs::home_dir()
        .or_else(|| std::env::current_dir().ok())
        .unwrap_or_else(|| PathBuf::from("."))
}

/// Resolves a `shell` config value.
///
/// Returns `None` for "system" (use [`default_shell`]), the value itself for
/// paths, and the PATH lookup result for bare names such as `zsh`.
#[must_use]
pub fn resolve_shell(value: &str) -> Option<String> {
    let value = value.trim();
    if SYSTEM_SHELL_NAMES.contains(&value.to_lowercase().as_str()) {
        return None;
    }
    if value.contains('/') || value.contains('\\') {
        return Some(value.to_string());
    }
    Some(
        find_in_path(value)
            .map(|path| path.to_string_lossy().to_string())
            .unwrap_or_else(|| value.to_string()),
    )
}

/// Finds an executable in PATH.
fn find_in_path(name: &str) -> Option<PathBuf> {
    let path_var = std::env::var_os("PATH")?;
    std::env::split_paths(&path_var)
        .map(|dir| dir.join(name))
        .find(|candidate| candidate.is_file())
}
