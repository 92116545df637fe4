use crate::dashboard::config::GridConfig;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Settings {
    /// When enabled logging is initialised at debug level.
    /// Defaults to `false` when the field is missing in the settings file.
    #[serde(default)]
    pub debug_logging: bool,
    /// Optional log file. Logs go to stderr when unset.
    #[serde(default)]
    pub log_file: Option<PathBuf>,
    /// How long a bus request waits for its response, in milliseconds.
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
    /// Maximum number of layout changes kept in the history.
    #[serde(default = "default_history_limit")]
    pub history_limit: usize,
    /// Directory for saved layouts. Layouts are kept in memory when unset.
    #[serde(default)]
    pub layout_dir: Option<PathBuf>,
    /// Save the layout under the dashboard id after every change.
    #[serde(default)]
    pub auto_save: bool,
    #[serde(default)]
    pub grid: GridConfig,
}

fn default_request_timeout_ms() -> u64 {
    5000
}

fn default_history_limit() -> usize {
    100
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            debug_logging: false,
            log_file: None,
            request_timeout_ms: default_request_timeout_ms(),
            history_limit: default_history_limit(),
            layout_dir: None,
            auto_save: false,
            grid: GridConfig::default(),
        }
    }
}

impl Settings {
    pub fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path).unwrap_or_default();
        if content.trim().is_empty() {
            return Ok(Self::default());
        }
        Ok(serde_json::from_str(&content)?)
    }

    pub fn save(&self, path: impl AsRef<Path>) -> anyhow::Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, json)?;
        Ok(())
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}
