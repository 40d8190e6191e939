// SPDX-License-Identifier: GPL-3.0-only

//! Application-wide constants

/// Backend timestamps are counted in 100 ns ticks
pub const TICKS_PER_SECOND: i64 = 10_000_000;

/// Configuration defaults
pub mod defaults {
    /// Application polling cadence (about 30 polls per second)
    pub const POLL_INTERVAL_MS: u64 = 33;

    /// Period of the V4L2 hot-plug node scan
    pub const HOTPLUG_POLL_INTERVAL_MS: u64 = 500;

    /// Frames to let through before saving, so exposure can settle
    pub const WARMUP_FRAMES: u32 = 5;

    /// Directory name used under the config and pictures directories
    pub const APP_DIR: &str = "framegrab";

    /// Configuration file name
    pub const CONFIG_FILE: &str = "config.json";
}

/// Timing constants
pub mod timing {
    /// Give up waiting for frames after this long in the grab command
    pub const GRAB_TIMEOUT_SECS: u64 = 10;
}

/// Application information utilities
pub mod app_info {
    /// Get the application version from build-time environment
    pub fn version() -> &'static str {
        env!("GIT_VERSION")
    }

    /// Package name from Cargo
    pub fn name() -> &'static str {
        env!("CARGO_PKG_NAME")
    }
}
