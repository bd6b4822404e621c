use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::{Result, StewardError};

/// Top-level configuration for Steward.
///
/// Loaded from `~/.steward/config.toml` by default (override with the
/// `STEWARD_CONFIG` environment variable). Every section falls back to its
/// defaults when absent.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StewardConfig {
    #[serde(default)]
    pub general: GeneralConfig,
    #[serde(default)]
    pub engine: EngineConfig,
    #[serde(default)]
    pub tool: ToolConfig,
    #[serde(default)]
    pub safety: SafetyConfig,
}

impl StewardConfig {
    /// Load configuration from a TOML file.
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: StewardConfig = toml::from_str(&content)?;
        info!("Configuration loaded from {}", path.display());
        Ok(config)
    }

    /// Load configuration from a TOML file, falling back to defaults if the
    /// file does not exist or cannot be parsed.
    pub fn load_or_default(path: &Path) -> Self {
        match Self::load(path) {
            Ok(config) => config,
            Err(e) => {
                warn!(
                    "Failed to load config from {}: {}. Using defaults.",
                    path.display(),
                    e
                );
                Self::default()
            }
        }
    }

    /// Save the current configuration to a TOML file.
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, self.to_toml_string()?)?;
        info!("Configuration saved to {}", path.display());
        Ok(())
    }

    /// Render the configuration as pretty-printed TOML.
    pub fn to_toml_string(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|e| StewardError::Config(e.to_string()))
    }

    /// Resolve the config file path (`STEWARD_CONFIG`, or `~/.steward/config.toml`).
    pub fn default_path() -> PathBuf {
        if let Ok(p) = std::env::var("STEWARD_CONFIG") {
            return PathBuf::from(p);
        }
        #[cfg(target_os = "windows")]
        if let Ok(home) = std::env::var("USERPROFILE") {
            return PathBuf::from(home).join(".steward").join("config.toml");
        }
        #[cfg(not(target_os = "windows"))]
        if let Ok(home) = std::env::var("HOME") {
            return PathBuf::from(home).join(".steward").join("config.toml");
        }
        PathBuf::from("config.toml")
    }
}

/// General application settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// Log level: trace, debug, info, warn, error.
    pub log_level: String,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
        }
    }
}

/// Execution engine and journal settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Number of journal entries kept in memory.
    pub journal_capacity: usize,
    /// Mirror journal entries into the tracing log.
    pub journal_to_log: bool,
    /// Capacity of the domain event broadcast channel.
    pub event_buffer: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            journal_capacity: 1024,
            journal_to_log: true,
            event_buffer: 256,
        }
    }
}

/// Tool controller settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolConfig {
    /// Wait for the page to settle after each tool before reporting back.
    pub wait_for_stability: bool,
    /// Upper bound for a single stability wait.
    pub stability_local_timeout_ms: u64,
    /// Upper bound for one whole invocation, measured from its start.
    pub stability_global_timeout_ms: u64,
}

impl ToolConfig {
    pub fn local_timeout(&self) -> Duration {
        Duration::from_millis(self.stability_local_timeout_ms)
    }

    pub fn global_timeout(&self) -> Duration {
        Duration::from_millis(self.stability_global_timeout_ms)
    }
}

impl Default for ToolConfig {
    fn default() -> Self {
        Self {
            wait_for_stability: true,
            stability_local_timeout_ms: 10_000,
            stability_global_timeout_ms: 30_000,
        }
    }
}

/// Safety evaluator settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SafetyConfig {
    /// Regular expressions matched against the target host; any match blocks the action.
    pub blocked_hosts: Vec<String>,
}
