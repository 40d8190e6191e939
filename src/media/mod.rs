// SPDX-License-Identifier: GPL-3.0-only

//! Image model and CPU pixel processing
//!
//! # Modules
//!
//! - [`image`]: Formats, buffers and the captured frame record
//! - [`converter`]: Encoding conversion (channel swap, YUYV to RGB)
//! - [`transform`]: Vertical flip for bottom-up native frames
//! - [`export`]: Saving frames as raw bytes or encoded images

pub mod converter;
pub mod export;
pub mod image;
pub mod transform;

pub use converter::ImageConverter;
pub use image::{CaptureSettings, CapturedImage, Encoding, Image, ImageFormat, PixelBuffer};
pub use transform::flip_vertically;
