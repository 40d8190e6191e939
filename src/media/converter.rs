// SPDX-License-Identifier: GPL-3.0-only

//! CPU pixel encoding conversion
//!
//! Supported pairs:
//! - BGR24 <-> RGB24 (byte swap of channels 0 and 2)
//! - YUYV -> RGB24 / BGR24 (limited-range BT.601 integer transform)
//!
//! Identical formats are copied verbatim.

use super::{Encoding, Image, ImageFormat};
use crate::errors::ConvertError;

/// Converts source images into a destination image of a fixed format
#[derive(Debug, Clone)]
pub struct ImageConverter {
    image: Image,
}

impl ImageConverter {
    /// Create a converter that produces images in `target` format
    pub fn new(target: ImageFormat) -> Self {
        Self {
            image: Image::new(target),
        }
    }

    pub fn target_format(&self) -> &ImageFormat {
        self.image.format()
    }

    /// The last converted image
    pub fn image(&self) -> &Image {
        &self.image
    }

    /// Hand the destination image to the caller
    pub fn into_image(self) -> Image {
        self.image
    }

    /// Whether a conversion routine exists from `from` to `to`
    pub fn supports(from: Encoding, to: Encoding) -> bool {
        matches!(
            (from, to),
            (Encoding::Bgr24, Encoding::Rgb24)
                | (Encoding::Rgb24, Encoding::Bgr24)
                | (Encoding::Yuyv, Encoding::Rgb24)
                | (Encoding::Yuyv, Encoding::Bgr24)
        ) || from == to
    }

    /// Convert `source` into the destination image
    pub fn convert(&mut self, source: &Image) -> Result<(), ConvertError> {
        let target = *self.image.format();
        if *source.format() == target {
            self.image.buffer_mut().copy_from(source.buffer())?;
            return Ok(());
        }

        match (source.format().encoding(), target.encoding()) {
            (Encoding::Bgr24, Encoding::Rgb24) | (Encoding::Rgb24, Encoding::Bgr24) => {
                swap_red_blue(source, &mut self.image)
            }
            (Encoding::Yuyv, Encoding::Rgb24) => {
                yuyv_to_rgb(source, &mut self.image, ChannelOrder::Rgb)
            }
            (Encoding::Yuyv, Encoding::Bgr24) => {
                yuyv_to_rgb(source, &mut self.image, ChannelOrder::Bgr)
            }
            (from, to) => Err(ConvertError::Unsupported { from, to }),
        }
    }
}

/// Byte order of a 3-byte output pixel
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelOrder {
    Rgb,
    Bgr,
}

fn check_dimensions(source: &Image, destination: &Image) -> Result<(), ConvertError> {
    let (s, d) = (source.format(), destination.format());
    if s.width() != d.width() || s.height() != d.height() {
        return Err(ConvertError::DimensionMismatch);
    }
    Ok(())
}

/// Swap bytes 0 and 2 of every 3-byte pixel
pub fn swap_red_blue(source: &Image, destination: &mut Image) -> Result<(), ConvertError> {
    check_dimensions(source, destination)?;

    let src = source.as_bytes();
    if src.len() % 3 != 0 {
        return Err(ConvertError::ByteCountNotMultipleOfThree(src.len()));
    }
    let dst = destination.buffer_mut().as_mut_slice();
    if dst.len() != src.len() {
        return Err(ConvertError::Image(crate::errors::ImageError::SizeMismatch {
            expected: src.len(),
            actual: dst.len(),
        }));
    }

    for (s, d) in src.chunks_exact(3).zip(dst.chunks_exact_mut(3)) {
        d[0] = s[2];
        d[1] = s[1];
        d[2] = s[0];
    }
    Ok(())
}

/// Convert packed Y0 U Y1 V pairs to 3-byte pixels
pub fn yuyv_to_rgb(
    source: &Image,
    destination: &mut Image,
    order: ChannelOrder,
) -> Result<(), ConvertError> {
    check_dimensions(source, destination)?;

    let from = source.format().encoding();
    let to = destination.format().encoding();
    let expected_to = match order {
        ChannelOrder::Rgb => Encoding::Rgb24,
        ChannelOrder::Bgr => Encoding::Bgr24,
    };
    if from != Encoding::Yuyv || to != expected_to {
        return Err(ConvertError::Unsupported { from, to });
    }

    let width = source.format().width();
    if width % 2 != 0 {
        return Err(ConvertError::OddWidth(width));
    }

    let src = source.as_bytes();
    let dst = destination.buffer_mut().as_mut_slice();

    for (s, d) in src.chunks_exact(4).zip(dst.chunks_exact_mut(6)) {
        let (y0, u, y1, v) = (s[0], s[1], s[2], s[3]);
        write_pixel(&mut d[0..3], yuv_to_rgb(y0, u, v), order);
        write_pixel(&mut d[3..6], yuv_to_rgb(y1, u, v), order);
    }
    Ok(())
}

fn write_pixel(out: &mut [u8], (r, g, b): (u8, u8, u8), order: ChannelOrder) {
    match order {
        ChannelOrder::Rgb => {
            out[0] = r;
            out[1] = g;
            out[2] = b;
        }
        ChannelOrder::Bgr => {
            out[0] = b;
            out[1] = g;
            out[2] = r;
        }
    }
}

/// Limited-range YUV to RGB, integer arithmetic
#[inline]
pub fn yuv_to_rgb(y: u8, u: u8, v: u8) -> (u8, u8, u8) {
    let c = y as i32 - 16;
    let d = u as i32 - 128;
    let e = v as i32 - 128;

    let r = clip((298 * c + 409 * e + 128) >> 8);
    let g = clip((298 * c - 100 * d - 208 * e + 128) >> 8);
    let b = clip((298 * c + 516 * d + 128) >> 8);
    (r, g, b)
}

#[inline]
fn clip(value: i32) -> u8 {
    value.clamp(0, 255) as u8
}
