use serde::{Deserialize, Serialize};

/// Top-level configuration, stored as `reload.yaml`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReloadConfig {
    pub reload: ReloadSettings,
    pub logging: LoggingSettings,
}

/// Tuning for the reload manager and the change notifier.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReloadSettings {
    /// Quiet period before queued state change events are delivered.
    pub coalesce_window_ms: u64,

    /// How many times a load may be restarted before it fails.
    pub max_retries: u32,

    /// Capacity of the reload event broadcast channel.
    pub event_buffer: usize,
}

impl Default for ReloadSettings {
    fn default() -> Self {
        Self {
            coalesce_window_ms: 100,
            max_retries: 1,
            event_buffer: 64,
        }
    }
}

impl ReloadSettings {
    pub fn coalesce_window(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.coalesce_window_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSettings {
    pub directory: String,
    pub prefix: String,
    pub debug: bool,
    pub console: bool,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            directory: "logs".to_string(),
            prefix: "project-reload".to_string(),
            debug: false,
            console: true,
        }
    }
}
