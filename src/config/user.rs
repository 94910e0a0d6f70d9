//! User configuration loading for passgraph.
//!
//! This module handles loading user-wide settings from the XDG config directory.
//! User config location: $XDG_CONFIG_HOME/passgraph/passgraph.toml
//! Fallback: the platform config directory (~/.config/passgraph/passgraph.toml on Linux)

use std::path::{Path, PathBuf};

use super::DaemonSettings;
use crate::error::ConfigError;

const CONFIG_DIR: &str = "passgraph";
const CONFIG_FILE: &str = "passgraph.toml";

/// Returns the path to the user configuration file.
///
/// The path is determined by:
/// 1. If $XDG_CONFIG_HOME is set: $XDG_CONFIG_HOME/passgraph/passgraph.toml
/// 2. Otherwise: `dirs::config_dir()`/passgraph/passgraph.toml
///
/// Returns None if no config directory can be determined.
pub fn user_config_path() -> Option<PathBuf> {
    if let Ok(xdg_config) = std::env::var("XDG_CONFIG_HOME") {
        if !xdg_config.is_empty() {
            return Some(PathBuf::from(xdg_config).join(CONFIG_DIR).join(CONFIG_FILE));
        }
    }

    dirs::config_dir().map(|dir| dir.join(CONFIG_DIR).join(CONFIG_FILE))
}

/// Load settings from `path`; a missing file yields the defaults.
pub fn load_settings(path: &Path) -> Result<DaemonSettings, ConfigError> {
    match std::fs::read_to_string(path) {
        Ok(text) => DaemonSettings::from_toml(&text),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            log::debug!(
                target: "passgraph::config",
                "No settings at {}, using defaults",
                path.display()
            );
            Ok(DaemonSettings::default())
        }
        Err(err) => Err(err.into()),
    }
}

/// Load the user's settings, or the defaults when there is no config directory.
pub fn load_user_settings() -> Result<DaemonSettings, ConfigError> {
    match user_config_path() {
        Some(path) => load_settings(&path),
        None => Ok(DaemonSettings::default()),
    }
}
