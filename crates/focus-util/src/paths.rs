//! Default paths for focusd components
//!
//! Paths are user-writable by default (no root required):
//! - Config: `$XDG_CONFIG_HOME/focusd/config.toml` or `~/.config/focusd/config.toml`
//! - Data: `$XDG_DATA_HOME/focusd` or `~/.local/share/focusd`
//! - Logs: `$XDG_STATE_HOME/focusd` or `~/.local/state/focusd`

use std::path::PathBuf;

/// Environment variable for overriding the data directory
pub const FOCUS_DATA_DIR_ENV: &str = "FOCUS_DATA_DIR";

/// Environment variable for overriding the config file
pub const FOCUS_CONFIG_ENV: &str = "FOCUS_CONFIG";

/// Application subdirectory name
const APP_DIR: &str = "focusd";

/// Database filename within the data directory
pub const STORE_FILENAME: &str = "sessions.db";

/// Get the default config file path.
///
/// Order of precedence:
/// 1. `$FOCUS_CONFIG` environment variable (if set)
/// 2. `$XDG_CONFIG_HOME/focusd/config.toml`
/// 3. `~/.config/focusd/config.toml`
pub fn default_config_path() -> PathBuf {
    if let Ok(path) = std::env::var(FOCUS_CONFIG_ENV) {
        return PathBuf::from(path);
    }

    xdg_dir("XDG_CONFIG_HOME", &[".config"], "config")
        .join("config.toml")
}

/// Get the default data directory.
///
/// Order of precedence:
/// 1. `$FOCUS_DATA_DIR` environment variable (if set)
/// 2. `$XDG_DATA_HOME/focusd` (if XDG_DATA_HOME is set)
/// 3. `~/.local/share/focusd` (fallback)
pub fn default_data_dir() -> PathBuf {
    if let Ok(path) = std::env::var(FOCUS_DATA_DIR_ENV) {
        return PathBuf::from(path);
    }

    data_dir_without_env()
}

/// Get the data directory without checking FOCUS_DATA_DIR.
/// Used for default values in configs where the env var is checked separately.
pub fn data_dir_without_env() -> PathBuf {
    xdg_dir("XDG_DATA_HOME", &[".local", "share"], "data")
}

/// Get the default log directory.
pub fn default_log_dir() -> PathBuf {
    xdg_dir("XDG_STATE_HOME", &[".local", "state"], "logs")
}

/// Path of the shared session database inside a data directory
pub fn store_path(data_dir: &std::path::Path) -> PathBuf {
    data_dir.join(STORE_FILENAME)
}

fn xdg_dir(var: &str, home_fallback: &[&str], last_resort: &str) -> PathBuf {
    if let Ok(base) = std::env::var(var) {
        return PathBuf::from(base).join(APP_DIR);
    }

    if let Ok(home) = std::env::var("HOME") {
        let mut path = PathBuf::from(home);
        for part in home_fallback {
            path.push(part);
        }
        return path.join(APP_DIR);
    }

    PathBuf::from("/tmp").join(APP_DIR).join(last_resort)
}
