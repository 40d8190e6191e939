// SPDX-License-Identifier: GPL-3.0-only

//! Persistent user configuration

use crate::backends::camera::CaptureBackendType;
use crate::constants::defaults;
use crate::errors::{AppError, AppResult};
use crate::media::CaptureSettings;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Capture backend to use
    pub backend: CaptureBackendType,
    /// Identifier of the last used device
    pub last_device_id: Option<String>,
    /// Preferred capture settings per device (key = device identifier)
    pub capture_settings: HashMap<String, CaptureSettings>,
    /// Where grabbed frames are written; `None` means the pictures directory
    pub output_dir: Option<PathBuf>,
    /// Application polling cadence
    pub poll_interval_ms: u64,
    /// V4L2 hot-plug scan period
    pub hotplug_poll_interval_ms: u64,
    /// Frames to wait for before saving
    pub warmup_frames: u32,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            backend: CaptureBackendType::default(),
            last_device_id: None,
            capture_settings: HashMap::new(),
            output_dir: None,
            poll_interval_ms: defaults::POLL_INTERVAL_MS,
            hotplug_poll_interval_ms: defaults::HOTPLUG_POLL_INTERVAL_MS,
            warmup_frames: defaults::WARMUP_FRAMES,
        }
    }
}

impl Config {
    /// Default location: `<config dir>/framegrab/config.json`
    pub fn path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join(defaults::APP_DIR).join(defaults::CONFIG_FILE))
    }

    /// Load from the default location, falling back to defaults
    pub fn load() -> Self {
        let Some(path) = Self::path() else {
            warn!("No configuration directory, using defaults");
            return Self::default();
        };
        if !path.exists() {
            debug!(path = %path.display(), "No configuration file, using defaults");
            return Self::default();
        }
        match Self::load_from(&path) {
            Ok(config) => config,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Failed to load configuration, using defaults");
                Self::default()
            }
        }
    }

    pub fn load_from(path: &Path) -> AppResult<Self> {
        let text = std::fs::read_to_string(path)?;
        let config = serde_json::from_str(&text)?;
        debug!(path = %path.display(), "Configuration loaded");
        Ok(config)
    }

    /// Save to the default location
    pub fn save(&self) -> AppResult<()> {
        let path = Self::path()
            .ok_or_else(|| AppError::Config("no configuration directory".to_string()))?;
        self.save_to(&path)
    }

    pub fn save_to(&self, path: &Path) -> AppResult<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let text = serde_json::to_string_pretty(self)?;
        std::fs::write(path, text)?;
        debug!(path = %path.display(), "Configuration saved");
        Ok(())
    }

    /// Directory for grabbed frames
    pub fn output_dir(&self) -> PathBuf {
        self.output_dir.clone().unwrap_or_else(|| {
            dirs::picture_dir()
                .or_else(dirs::home_dir)
                .unwrap_or_else(|| PathBuf::from("."))
                .join(defaults::APP_DIR)
        })
    }

    /// Remember the settings used on a device
    pub fn remember(&mut self, device_id: &str, settings: CaptureSettings) {
        self.last_device_id = Some(device_id.to_string());
        self.capture_settings.insert(device_id.to_string(), settings);
    }
}
