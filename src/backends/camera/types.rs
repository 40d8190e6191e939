// SPDX-License-Identifier: GPL-3.0-only

//! Shared types for capture backends

use crate::media::Encoding;
use serde::{Deserialize, Serialize};

/// Capture backend type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum CaptureBackendType {
    /// Video4Linux2 via the kernel's mmap streaming interface
    #[default]
    V4l2,
    /// In-memory sources, driven by the caller
    Synthetic,
}

impl std::fmt::Display for CaptureBackendType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CaptureBackendType::V4l2 => write!(f, "V4L2"),
            CaptureBackendType::Synthetic => write!(f, "synthetic"),
        }
    }
}

/// Four-character code identifying a native pixel layout
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct FourCc(pub [u8; 4]);

impl FourCc {
    pub const YUYV: FourCc = FourCc(*b"YUYV");
    pub const YUY2: FourCc = FourCc(*b"YUY2");
    pub const RGB3: FourCc = FourCc(*b"RGB3");
    pub const BGR3: FourCc = FourCc(*b"BGR3");
    pub const MJPG: FourCc = FourCc(*b"MJPG");
    pub const NV12: FourCc = FourCc(*b"NV12");

    pub const fn new(code: &[u8; 4]) -> Self {
        Self(*code)
    }

    /// Image encoding this code maps to, if it is one we can deliver
    pub fn encoding(&self) -> Option<Encoding> {
        match *self {
            FourCc::YUYV | FourCc::YUY2 => Some(Encoding::Yuyv),
            FourCc::RGB3 => Some(Encoding::Rgb24),
            FourCc::BGR3 => Some(Encoding::Bgr24),
            _ => None,
        }
    }

    /// Native code for an image encoding
    pub fn from_encoding(encoding: Encoding) -> Self {
        match encoding {
            Encoding::Yuyv => FourCc::YUYV,
            Encoding::Rgb24 => FourCc::RGB3,
            Encoding::Bgr24 => FourCc::BGR3,
        }
    }
}

impl std::fmt::Display for FourCc {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for byte in self.0 {
            let c = if byte.is_ascii_graphic() || byte == b' ' {
                byte as char
            } else {
                '.'
            };
            write!(f, "{}", c)?;
        }
        Ok(())
    }
}

impl std::fmt::Debug for FourCc {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "FourCc({})", self)
    }
}

/// A capture format as reported by the driver, before filtering
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NativeMediaDescriptor {
    pub width: u32,
    pub height: u32,
    /// Signed line pitch in bytes; negative means bottom-up rows
    pub stride: i32,
    /// Frames per second, rounded to the nearest integer
    pub frame_rate: u32,
    pub fourcc: FourCc,
}

impl NativeMediaDescriptor {
    /// Rows arrive last-to-first and need a vertical flip
    ///
    /// Only a strictly negative stride counts; zero is treated as top-down.
    pub fn is_bottom_up(&self) -> bool {
        self.stride < 0
    }
}

impl std::fmt::Display for NativeMediaDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "width:{} height:{} stride:{} frameRate:{} subType:{}",
            self.width, self.height, self.stride, self.frame_rate, self.fourcc
        )
    }
}

/// Round a `numerator / denominator` frame rate to whole frames per second
///
/// Halves round up. A zero denominator yields 0.
pub fn frame_rate_from_ratio(numerator: u32, denominator: u32) -> u32 {
    if denominator == 0 {
        return 0;
    }
    (numerator as f64 / denominator as f64 + 0.5) as u32
}

/// A capturable source reported by a backend
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SourceInfo {
    /// Human readable name, not guaranteed to be unique
    pub name: String,
    /// Stable identifier used to match sources across enumerations
    pub id: String,
}

impl SourceInfo {
    pub fn new(name: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            id: id.into(),
        }
    }
}

impl std::fmt::Display for SourceInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({})", self.name, self.id)
    }
}

/// One completion of an outstanding sample request
#[derive(Debug)]
pub enum SampleDelivery<'a> {
    /// A sample with its timestamp in 100 ns ticks
    Sample { timestamp: i64, data: &'a [u8] },
    /// The request completed without a sample (stream gap)
    Empty,
    /// The stream failed; no further deliveries follow
    Failed(BackendError),
}

/// Result type for backend operations
pub type BackendResult<T> = Result<T, BackendError>;

/// Backend errors
#[derive(Debug, Clone)]
pub enum BackendError {
    /// Backend is not available on this system
    NotAvailable(String),
    /// Capture device not found
    DeviceNotFound(String),
    /// Failed to open the device for reading
    OpenFailed(String),
    /// Format not supported or rejected by the driver
    FormatNotSupported(String),
    /// Native descriptor index does not exist
    InvalidDescriptor(usize),
    /// Streaming failed
    StreamFailed(String),
    /// General I/O error
    Io(String),
    /// Other errors
    Other(String),
}

impl std::fmt::Display for BackendError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BackendError::NotAvailable(msg) => write!(f, "Backend not available: {}", msg),
            BackendError::DeviceNotFound(msg) => write!(f, "Device not found: {}", msg),
            BackendError::OpenFailed(msg) => write!(f, "Failed to open device: {}", msg),
            BackendError::FormatNotSupported(msg) => write!(f, "Format not supported: {}", msg),
            BackendError::InvalidDescriptor(index) => {
                write!(f, "No native descriptor at index {}", index)
            }
            BackendError::StreamFailed(msg) => write!(f, "Stream failed: {}", msg),
            BackendError::Io(msg) => write!(f, "I/O error: {}", msg),
            BackendError::Other(msg) => write!(f, "Error: {}", msg),
        }
    }
}

impl std::error::Error for BackendError {}

impl From<std::io::Error> for BackendError {
    fn from(err: std::io::Error) -> Self {
        BackendError::Io(err.to_string())
    }
}
