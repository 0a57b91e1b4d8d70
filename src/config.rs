//! # Configuration
//!
//! `config.toml` in the platform config directory (`xpad-bridge/` under
//! `dirs::config_dir()`), or an explicit path. A missing file is replaced by
//! the defaults, which are written back so there is something to edit.
//!
//! ```toml
//! [driver]
//! poll_interval_ms = 10
//! ring_capacity = 10
//! stats_interval_secs = 30
//! # max_consecutive_transfer_failures = 50
//!
//! [logging]
//! level = "info"
//!
//! [notifications]
//! enabled = true
//!
//! [replay]
//! capture = "capture.hex"
//! format = "wired"
//! frame_interval_ms = 8
//! ```

use crate::driver::{DriverSettings, RetryPolicy};
use crate::protocol::ReportFormat;
use color_eyre::eyre::{eyre, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn, Level};

const CONFIG_DIR: &str = "xpad-bridge";
const CONFIG_FILE: &str = "config.toml";

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq, Eq)]
#[serde(default)]
pub struct DriverConfig {
    pub poll_interval_ms: u64,
    pub ring_capacity: usize,
    /// Stop resubmitting after this many failed transfers in a row
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_consecutive_transfer_failures: Option<u32>,
    pub stats_interval_secs: i64,
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 10,
            ring_capacity: 10,
            max_consecutive_transfer_failures: None,
            stats_interval_secs: 30,
        }
    }
}

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq, Eq)]
#[serde(default)]
pub struct LoggingConfig {
    /// trace, debug, info, warn or error
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq, Eq)]
#[serde(default)]
pub struct NotificationConfig {
    pub enabled: bool,
}

impl Default for NotificationConfig {
    fn default() -> Self {
        Self { enabled: true }
    }
}

/// Feeds a recorded capture through a simulated device.
#[derive(Deserialize, Serialize, Clone, Debug, PartialEq, Eq)]
pub struct ReplayConfig {
    pub capture: PathBuf,
    pub format: ReportFormat,
    #[serde(default = "default_frame_interval")]
    pub frame_interval_ms: u64,
}

fn default_frame_interval() -> u64 {
    8
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, Eq)]
#[serde(default)]
pub struct BridgeConfig {
    pub driver: DriverConfig,
    pub logging: LoggingConfig,
    pub notifications: NotificationConfig,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub replay: Option<ReplayConfig>,
}

impl BridgeConfig {
    pub fn from_toml(content: &str) -> Result<Self> {
        let config: Self =
            toml::from_str(content).map_err(|e| eyre!("Failed to parse config: {}", e))?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|e| eyre!("Failed to serialize config: {}", e))
    }

    fn validate(&self) -> Result<()> {
        if self.driver.poll_interval_ms == 0 {
            return Err(eyre!("driver.poll_interval_ms must be at least 1"));
        }
        if self.driver.ring_capacity == 0 {
            return Err(eyre!("driver.ring_capacity must be at least 1"));
        }
        if self.driver.max_consecutive_transfer_failures == Some(0) {
            return Err(eyre!(
                "driver.max_consecutive_transfer_failures must be at least 1 when set"
            ));
        }
        self.log_level()?;
        Ok(())
    }

    /// Read `path`, or write and return the defaults if it does not exist.
    pub fn load_or_create(path: &Path) -> Result<Self> {
        if !path.exists() {
            warn!(
                "Config file {} does not exist, writing defaults",
                path.display()
            );
            let config = Self::default();
            config.save(path)?;
            return Ok(config);
        }

        let content = fs::read_to_string(path)
            .map_err(|e| eyre!("Failed to read config file {}: {}", path.display(), e))?;
        let config = Self::from_toml(&content)?;
        info!("Loaded config from {}", path.display());
        debug!("Config: {:?}", config);
        Ok(config)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .map_err(|e| eyre!("Failed to create config directory: {}", e))?;
        }
        fs::write(path, self.to_toml()?)
            .map_err(|e| eyre!("Failed to write config file {}: {}", path.display(), e))?;
        Ok(())
    }

    pub fn log_level(&self) -> Result<Level> {
        self.logging
            .level
            .parse::<Level>()
            .map_err(|_| eyre!("Unknown log level: {}", self.logging.level))
    }

    pub fn driver_settings(&self) -> DriverSettings {
        DriverSettings {
            poll_interval_ms: self.driver.poll_interval_ms,
            ring_capacity: self.driver.ring_capacity,
            retry: RetryPolicy {
                max_consecutive_failures: self.driver.max_consecutive_transfer_failures,
            },
            stats_interval_secs: self.driver.stats_interval_secs,
        }
    }
}

/// `<config dir>/xpad-bridge/config.toml`, falling back to the working
/// directory when the platform has no config directory.
pub fn default_config_path() -> PathBuf {
    let mut path = dirs::config_dir().unwrap_or_else(|| {
        warn!("Could not determine config directory, using current directory");
        PathBuf::from(".")
    });
    path.push(CONFIG_DIR);
    path.push(CONFIG_FILE);
    path
}
