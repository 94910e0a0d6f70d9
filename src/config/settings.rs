use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Default delay between the last invalidation and the replacement batch.
pub const DEFAULT_AUTOREPARSE_DELAY_MS: u64 = 300;

/// Scheduler settings, read from `passgraph.toml`.
///
/// ```toml
/// enabled = true
/// update_by_timer = true
/// autoreparse_delay_ms = 300
/// worker_threads = 4
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct DaemonSettings {
    /// Master switch; a disabled scheduler never restarts batches on its own.
    pub enabled: bool,
    /// Whether cancellations reschedule a replacement batch.
    pub update_by_timer: bool,
    /// Debounce window for replacement batches.
    pub autoreparse_delay_ms: u64,
    /// Size of a dedicated worker pool; the shared pool when unset.
    pub worker_threads: Option<usize>,
}

impl Default for DaemonSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            update_by_timer: true,
            autoreparse_delay_ms: DEFAULT_AUTOREPARSE_DELAY_MS,
            worker_threads: None,
        }
    }
}

impl DaemonSettings {
    /// Parse and validate settings from TOML text.
    pub fn from_toml(text: &str) -> Result<Self, ConfigError> {
        let settings: DaemonSettings = toml::from_str(text)?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.worker_threads == Some(0) {
            return Err(ConfigError::invalid("worker_threads must be at least 1"));
        }
        Ok(())
    }

    pub fn autoreparse_delay(&self) -> Duration {
        Duration::from_millis(self.autoreparse_delay_ms)
    }
}
