// SPDX-License-Identifier: GPL-3.0-only

//! CLI commands for capture operations
//!
//! This module provides command-line functionality for:
//! - Listing devices and their capture settings
//! - Grabbing frames to disk
//! - Watching hot-plug events

use chrono::Local;
use framegrab::backends::camera::{
    Device, DeviceListener, DeviceManager, DeviceManagerListener, SourceInfo, UpdateOutcome,
    default_backend,
};
use framegrab::constants::{app_info, timing};
use framegrab::media::export::{frame_file_stem, write_raw, write_rgb};
use framegrab::{AppError, AppResult, Config};
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Options for the grab command
pub struct GrabOptions {
    pub device: usize,
    pub settings: Option<usize>,
    pub all: bool,
    pub frames: Option<u32>,
    pub output: Option<PathBuf>,
    pub png: bool,
}

/// Open a manager and run the first enumeration
fn open_manager(config: &Config) -> DeviceManager {
    let mut manager = DeviceManager::new(default_backend(config));
    manager.update();
    manager
}

/// List all devices and their capture settings
pub fn list_devices() -> AppResult<()> {
    let config = Config::load();
    let manager = open_manager(&config);

    if manager.devices().is_empty() {
        println!("No devices found.");
        return Ok(());
    }

    println!("Available devices:");
    println!();
    for (index, device) in manager.devices().iter().enumerate() {
        println!("  [{}] {} ({})", index, device.name(), device.id());
        if device.supported_settings().is_empty() {
            println!("      No supported capture settings");
        }
        for (settings_index, supported) in device.supported_settings().iter().enumerate() {
            let native = device
                .native_descriptor(settings_index)
                .map(|d| d.to_string())
                .unwrap_or_default();
            println!(
                "      [{}] {}    ({})",
                settings_index, supported.settings, native
            );
        }
        println!();
    }

    Ok(())
}

/// Reports device lifecycle events at debug level
struct GrabLogger;

impl DeviceListener for GrabLogger {
    fn on_device_started(&self, device: &Device) {
        debug!(device = %device.id(), settings = ?device.started_settings_index(), "Started");
    }

    fn on_device_stopping(&self, device: &Device) {
        debug!(device = %device.id(), "Stopping");
    }
}

/// Capture frames from one device and save them
pub fn grab(options: GrabOptions) -> AppResult<()> {
    let mut config = Config::load();
    let frames = options.frames.unwrap_or(config.warmup_frames).max(1);
    let output_dir = options.output.clone().unwrap_or_else(|| config.output_dir());
    std::fs::create_dir_all(&output_dir)?;

    let mut manager = open_manager(&config);
    let count = manager.devices().len();
    if count == 0 {
        return Err(AppError::Other("No devices found".to_string()));
    }
    let device = manager.device_at_mut(options.device).ok_or_else(|| {
        AppError::Other(format!(
            "Device index {} out of range (0-{})",
            options.device,
            count - 1
        ))
    })?;
    println!("Using device: {}", device.name());

    let logger = Arc::new(GrabLogger);
    device.add_listener(&logger);

    let indices: Vec<usize> = if options.all {
        (0..device.supported_settings().len()).collect()
    } else if let Some(index) = options.settings {
        vec![index]
    } else {
        vec![remembered_settings(&config, device).unwrap_or(0)]
    };
    if indices.is_empty() {
        return Err(AppError::Other("Device has no supported capture settings".to_string()));
    }

    let poll = Duration::from_millis(config.poll_interval_ms);
    let stamp = Local::now().format("%Y%m%d-%H%M%S").to_string();
    let extension = if options.png { "png" } else { "ppm" };

    for index in indices {
        device.start_capture_at(index)?;
        let settings = device.started_settings().copied();
        if let Some(settings) = settings {
            println!("Capturing [{}] {}", index, settings);
        }

        let captured = wait_for_frames(device, frames, poll);
        if captured {
            if let Some(captured) = device.captured_image() {
                let image = captured.image();
                let stem = format!(
                    "{}_{}",
                    stamp,
                    frame_file_stem(device.name(), index, image.format())
                );
                let raw_path = output_dir.join(&stem);
                let rgb_path = output_dir.join(format!("{}.{}", stem, extension));

                write_raw(image, &raw_path)?;
                write_rgb(image, &rgb_path)?;
                println!(
                    "  frame {} at {:.3}s -> {}",
                    captured.sequence_number(),
                    captured.timestamp_secs(),
                    rgb_path.display()
                );
            }
        } else {
            println!("  no frames within {}s, skipping", timing::GRAB_TIMEOUT_SECS);
        }

        let dropped = device.dropped_samples();
        if dropped > 0 {
            warn!(device = %device.id(), dropped, "Samples dropped for size mismatch");
        }

        device.stop_capture();

        if let (true, Some(settings)) = (captured, settings) {
            config.remember(device.id(), settings);
        }
    }

    if let Err(e) = config.save() {
        warn!(error = %e, "Failed to save configuration");
    }
    Ok(())
}

/// Index of the settings last used on this device, if still supported
fn remembered_settings(config: &Config, device: &Device) -> Option<usize> {
    let wanted = config.capture_settings.get(device.id())?;
    device
        .supported_settings()
        .iter()
        .position(|s| s.settings == *wanted)
}

/// Poll until the sequence number reaches `frames`; `false` on timeout
fn wait_for_frames(device: &mut Device, frames: u32, poll: Duration) -> bool {
    let start = Instant::now();
    let timeout = Duration::from_secs(timing::GRAB_TIMEOUT_SECS);

    while start.elapsed() < timeout {
        match device.update() {
            UpdateOutcome::Captured { sequence } if sequence >= frames => return true,
            UpdateOutcome::SizeMismatch { expected, actual } => {
                warn!(expected, actual, "Delivered frame does not match format");
            }
            UpdateOutcome::NotCapturing => return false,
            _ => {}
        }
        std::thread::sleep(poll);
    }
    false
}

/// Prints device arrival and removal
struct WatchPrinter;

impl DeviceManagerListener for WatchPrinter {
    fn on_device_added(&self, _manager: &DeviceManager, device: &Device) {
        println!(
            "{} added   {} ({})",
            Local::now().format("%H:%M:%S"),
            device.name(),
            device.id()
        );
    }

    fn on_device_removed(&self, _manager: &DeviceManager, source: &SourceInfo) {
        println!(
            "{} removed {} ({})",
            Local::now().format("%H:%M:%S"),
            source.name,
            source.id
        );
    }
}

/// Print hot-plug events until Ctrl-C
pub fn watch() -> AppResult<()> {
    let config = Config::load();
    let running = Arc::new(AtomicBool::new(true));
    {
        let running = Arc::clone(&running);
        ctrlc::set_handler(move || running.store(false, Ordering::SeqCst))
            .map_err(|e| AppError::Other(format!("Failed to install Ctrl-C handler: {}", e)))?;
    }

    let mut manager = DeviceManager::new(default_backend(&config));
    let printer = Arc::new(WatchPrinter);
    manager.add_listener(&printer);

    println!("Watching for devices, press Ctrl-C to stop");
    let poll = Duration::from_millis(config.poll_interval_ms);
    while running.load(Ordering::SeqCst) {
        manager.update();
        std::thread::sleep(poll);
    }

    manager.remove_listener(&printer);
    Ok(())
}

/// Print version and configuration details
pub fn info() -> AppResult<()> {
    let config = Config::load();
    println!("{} {}", app_info::name(), app_info::version());
    match Config::path() {
        Some(path) => println!("Config:  {}", path.display()),
        None => println!("Config:  (no configuration directory)"),
    }
    println!("Backend: {}", config.backend);
    println!("Output:  {}", config.output_dir().display());
    if let Some(id) = &config.last_device_id {
        println!("Last device: {}", id);
    }
    Ok(())
}
