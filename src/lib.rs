// SPDX-License-Identifier: GPL-3.0-only

//! framegrab - webcam capture behind a uniform enumerate/start/poll model
//!
//! # Architecture
//!
//! - [`backends`]: Devices, capture sessions, hot-plug and native backends
//! - [`media`]: Image model, pixel conversion, orientation and export
//! - [`config`]: User configuration handling
//! - [`errors`]: Error types
//!
//! # Example
//!
//! ```ignore
//! let backend = framegrab::backends::camera::default_backend(&Config::load());
//! let mut manager = DeviceManager::new(backend);
//! manager.update();
//! if let Some(device) = manager.device_at_mut(0) {
//!     device.start_capture_at(0)?;
//! }
//! loop {
//!     manager.update();
//!     // read manager.devices()[0].captured_image()
//! }
//! ```

pub mod backends;
pub mod config;
pub mod constants;
pub mod errors;
pub mod media;

// Re-export commonly used types
pub use backends::camera::{Device, DeviceManager};
pub use config::Config;
pub use errors::{AppError, AppResult};
pub use media::{CaptureSettings, Encoding, Image, ImageConverter, ImageFormat};
