//! Engine Configuration
//! Handles loading and saving of engine tunables and driver identity

use crate::error::ConfigError;
use crate::driver::DeviceKind;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};

/// Ring buffer frames per device buffer frame
const DEFAULT_RING_BUFFER_MULTIPLIER: u32 = 1024 * 16;

const DEFAULT_SETTLE_DELAY_MS: u64 = 100;

/// Get config directory path
fn get_config_dir() -> Option<PathBuf> {
    dirs::config_dir().map(|p| p.join("eqflow"))
}

/// Get config file path
fn get_config_path() -> Option<PathBuf> {
    get_config_dir().map(|p| p.join("config.json"))
}

/// Identifiers the driver plugin registers with the OS
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DriverIdentity {
    pub passthrough_uid: String,
    pub ui_uid: String,
    pub null_uid: String,
    /// Bundle identifier of the HAL plugin
    pub bundle_id: String,
    /// Device UIDs published by older driver releases
    pub legacy_uids: Vec<String>,
    pub install_script: String,
    pub uninstall_script: String,
}

impl DriverIdentity {
    pub fn uid_for(&self, kind: DeviceKind) -> &str {
        match kind {
            DeviceKind::Passthrough => &self.passthrough_uid,
            DeviceKind::Ui => &self.ui_uid,
            DeviceKind::Null => &self.null_uid,
        }
    }
}

impl Default for DriverIdentity {
    fn default() -> Self {
        Self {
            passthrough_uid: "EQFlowPassthroughDevice_UID".to_string(),
            ui_uid: "EQFlowUIDevice_UID".to_string(),
            null_uid: "EQFlowNullDevice_UID".to_string(),
            bundle_id: "com.eqflow.driver".to_string(),
            legacy_uids: vec!["EQFlowDevice_UID".to_string()],
            install_script: "install_driver".to_string(),
            uninstall_script: "uninstall_driver".to_string(),
        }
    }
}

/// Complete engine configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Config version (for future migrations)
    pub version: u32,
    /// Pause between stopping the graph and rewiring it
    pub settle_delay_ms: u64,
    /// Ring buffer capacity = device buffer frame size × multiplier
    pub ring_buffer_multiplier: u32,
    /// Output mixer gain (linear)
    pub sink_volume: f32,
    /// Refuse stores that would overwrite unread frames
    pub back_pressure: bool,
    /// Reader slots on the capture ring buffer
    pub max_readers: usize,
    pub driver: DriverIdentity,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            version: 1,
            settle_delay_ms: DEFAULT_SETTLE_DELAY_MS,
            ring_buffer_multiplier: DEFAULT_RING_BUFFER_MULTIPLIER,
            sink_volume: 0.0,
            back_pressure: false,
            max_readers: crate::capture::DEFAULT_MAX_READERS,
            driver: DriverIdentity::default(),
        }
    }
}

impl EngineConfig {
    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_delay_ms)
    }

    /// Load configuration from the user config directory
    ///
    /// Falls back to defaults when the file is missing or unreadable.
    pub fn load() -> Self {
        let Some(path) = get_config_path() else {
            warn!("[Config] Could not determine config path, using defaults");
            return Self::default();
        };

        if !path.exists() {
            info!("[Config] No config file found, using defaults");
            return Self::default();
        }

        match Self::load_from(&path) {
            Ok(config) => {
                info!("[Config] Loaded configuration from {:?}", path);
                config
            }
            Err(e) => {
                warn!("[Config] {}, using defaults", e);
                Self::default()
            }
        }
    }

    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&content)?)
    }

    /// Save configuration to the user config directory
    pub fn save(&self) -> Result<(), ConfigError> {
        let path = get_config_path().ok_or(ConfigError::NoConfigDir)?;
        self.save_to(&path)
    }

    pub fn save_to(&self, path: &Path) -> Result<(), ConfigError> {
        if let Some(dir) = path.parent() {
            if !dir.exists() {
                fs::create_dir_all(dir)?;
            }
        }

        let content = serde_json::to_string_pretty(self)?;
        fs::write(path, content)?;

        info!("[Config] Saved configuration to {:?}", path);
        Ok(())
    }
}
