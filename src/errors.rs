// SPDX-License-Identifier: GPL-3.0-only

//! Error types for capture, conversion and export

use crate::backends::camera::BackendError;
use crate::media::Encoding;
use std::fmt;

/// Result type alias using AppError
pub type AppResult<T> = Result<T, AppError>;

/// Top-level error type used by the command line front-end
#[derive(Debug, Clone)]
pub enum AppError {
    /// Device lifecycle errors
    Capture(DeviceError),
    /// Pixel conversion errors
    Convert(ConvertError),
    /// Frame export errors
    Export(String),
    /// Configuration errors
    Config(String),
    /// Filesystem errors
    Io(String),
    /// Generic error with message
    Other(String),
}

/// Image construction and layout errors
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImageError {
    /// Width or height is zero
    InvalidDimensions { width: u32, height: u32 },
    /// Buffer size does not match what the operation requires
    SizeMismatch { expected: usize, actual: usize },
    /// Source and destination formats differ
    FormatMismatch,
}

/// Pixel encoding conversion errors
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConvertError {
    /// No conversion routine exists for this encoding pair
    Unsupported { from: Encoding, to: Encoding },
    /// Source and destination width/height differ
    DimensionMismatch,
    /// Byte-swap conversion needs a byte count divisible by three
    ByteCountNotMultipleOfThree(usize),
    /// 4:2:2 sources need an even width
    OddWidth(u32),
    /// Buffer-level failure
    Image(ImageError),
}

/// Errors from the per-device capture session
#[derive(Debug, Clone)]
pub enum SessionError {
    /// `start` was called while a capture is running
    AlreadyCapturing,
    /// Native descriptor index out of range
    InvalidDescriptor { index: usize, count: usize },
    /// The native backend refused an operation
    Backend(BackendError),
}

/// Outcome of reading the latest sample when none can be returned
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchError {
    /// No sample has been delivered since the capture started
    NoFrame,
    /// The caller's buffer does not match the delivered sample size
    SizeMismatch { expected: usize, actual: usize },
}

/// Device-level capture errors
#[derive(Debug, Clone)]
pub enum DeviceError {
    /// The device is already capturing
    AlreadyCapturing,
    /// The requested settings are not advertised by the device
    SettingsNotSupported,
    /// Settings index out of range
    IndexOutOfRange { index: usize, len: usize },
    /// The capture session failed to start
    Session(SessionError),
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppError::Capture(e) => write!(f, "Capture error: {}", e),
            AppError::Convert(e) => write!(f, "Conversion error: {}", e),
            AppError::Export(msg) => write!(f, "Export error: {}", msg),
            AppError::Config(msg) => write!(f, "Configuration error: {}", msg),
            AppError::Io(msg) => write!(f, "I/O error: {}", msg),
            AppError::Other(msg) => write!(f, "{}", msg),
        }
    }
}

impl fmt::Display for ImageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ImageError::InvalidDimensions { width, height } => {
                write!(f, "Invalid image dimensions {}x{}", width, height)
            }
            ImageError::SizeMismatch { expected, actual } => {
                write!(f, "Buffer size mismatch: expected {} bytes, got {}", expected, actual)
            }
            ImageError::FormatMismatch => write!(f, "Image formats differ"),
        }
    }
}

impl fmt::Display for ConvertError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConvertError::Unsupported { from, to } => {
                write!(f, "No conversion from {} to {}", from, to)
            }
            ConvertError::DimensionMismatch => {
                write!(f, "Source and destination dimensions differ")
            }
            ConvertError::ByteCountNotMultipleOfThree(count) => {
                write!(f, "Byte count {} is not a multiple of 3", count)
            }
            ConvertError::OddWidth(width) => {
                write!(f, "Width {} is odd, 4:2:2 needs pixel pairs", width)
            }
            ConvertError::Image(e) => write!(f, "{}", e),
        }
    }
}

impl fmt::Display for SessionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionError::AlreadyCapturing => write!(f, "Session is already capturing"),
            SessionError::InvalidDescriptor { index, count } => write!(
                f,
                "Native descriptor index {} out of range ({} available)",
                index, count
            ),
            SessionError::Backend(e) => write!(f, "{}", e),
        }
    }
}

impl fmt::Display for FetchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FetchError::NoFrame => write!(f, "No frame delivered yet"),
            FetchError::SizeMismatch { expected, actual } => write!(
                f,
                "Frame size mismatch: sample is {} bytes, buffer is {}",
                expected, actual
            ),
        }
    }
}

impl fmt::Display for DeviceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeviceError::AlreadyCapturing => write!(f, "Device is already capturing"),
            DeviceError::SettingsNotSupported => {
                write!(f, "Capture settings not supported by device")
            }
            DeviceError::IndexOutOfRange { index, len } => {
                write!(f, "Settings index {} out of range ({} available)", index, len)
            }
            DeviceError::Session(e) => write!(f, "Failed to start capture: {}", e),
        }
    }
}

impl std::error::Error for AppError {}
impl std::error::Error for ImageError {}
impl std::error::Error for ConvertError {}
impl std::error::Error for SessionError {}
impl std::error::Error for FetchError {}
impl std::error::Error for DeviceError {}

impl From<ImageError> for ConvertError {
    fn from(err: ImageError) -> Self {
        ConvertError::Image(err)
    }
}

impl From<BackendError> for SessionError {
    fn from(err: BackendError) -> Self {
        SessionError::Backend(err)
    }
}

impl From<SessionError> for DeviceError {
    fn from(err: SessionError) -> Self {
        DeviceError::Session(err)
    }
}

impl From<DeviceError> for AppError {
    fn from(err: DeviceError) -> Self {
        AppError::Capture(err)
    }
}

impl From<ConvertError> for AppError {
    fn from(err: ConvertError) -> Self {
        AppError::Convert(err)
    }
}

impl From<String> for AppError {
    fn from(msg: String) -> Self {
        AppError::Other(msg)
    }
}

impl From<&str> for AppError {
    fn from(msg: &str) -> Self {
        AppError::Other(msg.to_string())
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        AppError::Io(err.to_string())
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::Config(err.to_string())
    }
}

impl From<image::ImageError> for AppError {
    fn from(err: image::ImageError) -> Self {
        AppError::Export(err.to_string())
    }
}
