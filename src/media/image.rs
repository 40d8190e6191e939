// SPDX-License-Identifier: GPL-3.0-only

//! Image model shared by capture and conversion
//!
//! Images are tightly packed: a line is exactly `width * bytes_per_pixel`
//! bytes and the buffer is exactly `bytes_per_line * height` bytes.

use crate::errors::ImageError;
use serde::{Deserialize, Serialize};

/// Pixel layout of an image buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Encoding {
    /// 24-bit RGB, bytes in R G B order
    Rgb24,
    /// 24-bit RGB, bytes in B G R order
    Bgr24,
    /// Packed 4:2:2 YUV (Y0 U Y1 V), two pixels per 4 bytes
    Yuyv,
}

impl Encoding {
    pub const ALL: [Encoding; 3] = [Encoding::Rgb24, Encoding::Bgr24, Encoding::Yuyv];

    /// Bytes used by one pixel (averaged over a chroma pair for YUYV)
    pub fn bytes_per_pixel(&self) -> u32 {
        match self {
            Encoding::Rgb24 | Encoding::Bgr24 => 3,
            Encoding::Yuyv => 2,
        }
    }

    /// Short upper-case name, also used in exported file names
    pub fn name(&self) -> &'static str {
        match self {
            Encoding::Rgb24 => "RGB24",
            Encoding::Bgr24 => "BGR24",
            Encoding::Yuyv => "YUYV",
        }
    }
}

impl std::fmt::Display for Encoding {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Dimensions and encoding of an image
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "RawImageFormat")]
pub struct ImageFormat {
    width: u32,
    height: u32,
    encoding: Encoding,
}

/// Unvalidated serialized form of [`ImageFormat`]
#[derive(Deserialize)]
struct RawImageFormat {
    width: u32,
    height: u32,
    encoding: Encoding,
}

impl TryFrom<RawImageFormat> for ImageFormat {
    type Error = ImageError;

    fn try_from(raw: RawImageFormat) -> Result<Self, Self::Error> {
        Self::new(raw.width, raw.height, raw.encoding)
    }
}

impl ImageFormat {
    /// Create a format; both dimensions must be non-zero
    pub fn new(width: u32, height: u32, encoding: Encoding) -> Result<Self, ImageError> {
        if width == 0 || height == 0 {
            return Err(ImageError::InvalidDimensions { width, height });
        }
        Ok(Self {
            width,
            height,
            encoding,
        })
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn encoding(&self) -> Encoding {
        self.encoding
    }

    pub fn bytes_per_pixel(&self) -> u32 {
        self.encoding.bytes_per_pixel()
    }

    pub fn bytes_per_line(&self) -> usize {
        self.width as usize * self.bytes_per_pixel() as usize
    }

    pub fn size_in_bytes(&self) -> usize {
        self.bytes_per_line() * self.height as usize
    }

    /// Same dimensions, different encoding
    pub fn with_encoding(&self, encoding: Encoding) -> Self {
        Self { encoding, ..*self }
    }
}

impl std::fmt::Display for ImageFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}x{} {}", self.width, self.height, self.encoding)
    }
}

/// Fixed-size owned byte buffer
#[derive(Clone, PartialEq, Eq)]
pub struct PixelBuffer {
    bytes: Box<[u8]>,
}

impl PixelBuffer {
    /// Allocate a zero-filled buffer; the size never changes afterwards
    pub fn new(size: usize) -> Self {
        Self {
            bytes: vec![0u8; size].into_boxed_slice(),
        }
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.bytes
    }

    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        &mut self.bytes
    }

    /// Copy all bytes from a buffer of identical size
    pub fn copy_from(&mut self, other: &PixelBuffer) -> Result<(), ImageError> {
        self.copy_from_slice(other.as_slice())
    }

    /// Copy all bytes from a slice of identical size
    pub fn copy_from_slice(&mut self, bytes: &[u8]) -> Result<(), ImageError> {
        if bytes.len() != self.bytes.len() {
            return Err(ImageError::SizeMismatch {
                expected: self.bytes.len(),
                actual: bytes.len(),
            });
        }
        self.bytes.copy_from_slice(bytes);
        Ok(())
    }
}

impl From<Vec<u8>> for PixelBuffer {
    fn from(bytes: Vec<u8>) -> Self {
        Self {
            bytes: bytes.into_boxed_slice(),
        }
    }
}

impl std::fmt::Debug for PixelBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "PixelBuffer({} bytes)", self.bytes.len())
    }
}

/// An image format paired with a buffer of exactly the format's size
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Image {
    format: ImageFormat,
    buffer: PixelBuffer,
}

impl Image {
    /// Allocate a zero-filled image
    pub fn new(format: ImageFormat) -> Self {
        Self {
            format,
            buffer: PixelBuffer::new(format.size_in_bytes()),
        }
    }

    /// Wrap an existing buffer, which must match the format's size
    pub fn from_buffer(format: ImageFormat, buffer: PixelBuffer) -> Result<Self, ImageError> {
        if buffer.len() != format.size_in_bytes() {
            return Err(ImageError::SizeMismatch {
                expected: format.size_in_bytes(),
                actual: buffer.len(),
            });
        }
        Ok(Self { format, buffer })
    }

    pub fn format(&self) -> &ImageFormat {
        &self.format
    }

    pub fn buffer(&self) -> &PixelBuffer {
        &self.buffer
    }

    /// Mutable access to the pixels; the size stays fixed
    pub fn buffer_mut(&mut self) -> &mut PixelBuffer {
        &mut self.buffer
    }

    pub fn as_bytes(&self) -> &[u8] {
        self.buffer.as_slice()
    }
}

/// A caller-facing capture request: a format and a frame rate
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CaptureSettings {
    format: ImageFormat,
    frame_rate: f32,
}

impl CaptureSettings {
    pub fn new(format: ImageFormat, frame_rate: f32) -> Self {
        Self { format, frame_rate }
    }

    pub fn format(&self) -> &ImageFormat {
        &self.format
    }

    pub fn frame_rate(&self) -> f32 {
        self.frame_rate
    }
}

impl std::fmt::Display for CaptureSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} @ {}fps", self.format, self.frame_rate)
    }
}

/// The most recent frame published by a capturing device
#[derive(Debug, Clone)]
pub struct CapturedImage {
    image: Image,
    sequence_number: u32,
    timestamp_secs: f64,
}

impl CapturedImage {
    pub fn new(format: ImageFormat) -> Self {
        Self {
            image: Image::new(format),
            sequence_number: 0,
            timestamp_secs: 0.0,
        }
    }

    pub fn image(&self) -> &Image {
        &self.image
    }

    pub fn image_mut(&mut self) -> &mut Image {
        &mut self.image
    }

    /// Number of samples delivered since capture started
    pub fn sequence_number(&self) -> u32 {
        self.sequence_number
    }

    /// Capture timestamp in seconds, as reported by the backend clock
    pub fn timestamp_secs(&self) -> f64 {
        self.timestamp_secs
    }

    pub(crate) fn set_frame_info(&mut self, sequence_number: u32, timestamp_secs: f64) {
        self.sequence_number = sequence_number;
        self.timestamp_secs = timestamp_secs;
    }
}
