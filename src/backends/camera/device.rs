// SPDX-License-Identifier: GPL-3.0-only

//! Public per-camera handle
//!
//! A [`Device`] turns the native descriptors of its [`CaptureSession`] into
//! caller-facing [`CaptureSettings`], starts and stops capture, and on each
//! [`Device::update`] publishes the newest frame in top-down orientation.

use super::listeners::ListenerSet;
use super::{CaptureBackend, CaptureSession, NativeMediaDescriptor, SourceInfo};
use crate::errors::{DeviceError, FetchError};
use crate::media::{CaptureSettings, CapturedImage, Image, ImageFormat, flip_vertically};
use std::sync::{Arc, Weak};
use tracing::{debug, info, trace, warn};

/// Observer of a device's capture lifecycle
///
/// Notifications are delivered synchronously on the thread calling into
/// the device, in registration order.
pub trait DeviceListener: Send + Sync {
    fn on_device_started(&self, _device: &Device) {}
    fn on_device_captured_image(&self, _device: &Device) {}
    fn on_device_stopping(&self, _device: &Device) {}
}

/// A capture setting together with the native descriptor it came from
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SupportedSettings {
    pub settings: CaptureSettings,
    pub native_index: usize,
}

/// Result of one [`Device::update`] poll
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateOutcome {
    /// The device is not capturing
    NotCapturing,
    /// Capturing, but no sample has arrived yet
    NoFrame,
    /// The delivered sample does not fit the negotiated format
    SizeMismatch { expected: usize, actual: usize },
    /// A new image was published
    Captured { sequence: u32 },
}

struct ActiveCapture {
    settings_index: usize,
    image: CapturedImage,
    /// Bottom-up samples land here before being flipped into `image`
    scratch: Option<Image>,
}

/// One camera
pub struct Device {
    name: String,
    id: String,
    settings: Vec<SupportedSettings>,
    session: CaptureSession,
    capture: Option<ActiveCapture>,
    listeners: ListenerSet<dyn DeviceListener>,
}

impl Device {
    /// Open a device on a backend source and derive its capture settings
    ///
    /// Descriptors whose native encoding is not supported are skipped.
    pub fn open(backend: Arc<dyn CaptureBackend>, source: SourceInfo) -> Self {
        let session = CaptureSession::new(backend, source.clone());
        let settings = supported_settings(session.descriptors());
        debug!(
            device = %source.id,
            native = session.descriptors().len(),
            supported = settings.len(),
            "Device opened"
        );

        Self {
            name: source.name,
            id: source.id,
            settings,
            session,
            capture: None,
            listeners: ListenerSet::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Stable identifier used for hot-plug matching
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn supported_settings(&self) -> &[SupportedSettings] {
        &self.settings
    }

    /// Native descriptor backing the settings at `settings_index`
    pub fn native_descriptor(&self, settings_index: usize) -> Option<&NativeMediaDescriptor> {
        let native = self.settings.get(settings_index)?.native_index;
        self.session.descriptors().get(native)
    }

    pub fn is_capturing(&self) -> bool {
        self.capture.is_some()
    }

    pub fn started_settings_index(&self) -> Option<usize> {
        self.capture.as_ref().map(|c| c.settings_index)
    }

    pub fn started_settings(&self) -> Option<&CaptureSettings> {
        let index = self.started_settings_index()?;
        self.settings.get(index).map(|s| &s.settings)
    }

    /// Latest published frame while capturing
    pub fn captured_image(&self) -> Option<&CapturedImage> {
        self.capture.as_ref().map(|c| &c.image)
    }

    /// Samples the session discarded because of a size mismatch
    pub fn dropped_samples(&self) -> u64 {
        self.session.dropped_samples()
    }

    /// Start capturing with settings equal to one this device advertises
    pub fn start_capture(&mut self, settings: &CaptureSettings) -> Result<(), DeviceError> {
        if self.is_capturing() {
            return Err(DeviceError::AlreadyCapturing);
        }
        let index = self
            .settings
            .iter()
            .position(|s| s.settings == *settings)
            .ok_or(DeviceError::SettingsNotSupported)?;
        self.start_capture_at(index)
    }

    /// Start capturing with the settings at `index`
    pub fn start_capture_at(&mut self, index: usize) -> Result<(), DeviceError> {
        if self.is_capturing() {
            return Err(DeviceError::AlreadyCapturing);
        }
        let supported = *self
            .settings
            .get(index)
            .ok_or(DeviceError::IndexOutOfRange {
                index,
                len: self.settings.len(),
            })?;

        let format = *supported.settings.format();
        let bottom_up = self
            .session
            .descriptors()
            .get(supported.native_index)
            .is_some_and(NativeMediaDescriptor::is_bottom_up);

        let image = CapturedImage::new(format);
        let scratch = bottom_up.then(|| Image::new(format));

        self.session.start(supported.native_index)?;

        self.capture = Some(ActiveCapture {
            settings_index: index,
            image,
            scratch,
        });
        info!(
            device = %self.id,
            index,
            settings = %supported.settings,
            flip = bottom_up,
            "Capture started"
        );

        self.notify(|l, d| l.on_device_started(d));
        Ok(())
    }

    /// Pull the newest sample and publish it
    ///
    /// Never blocks. `NoFrame` right after start is a normal outcome.
    pub fn update(&mut self) -> UpdateOutcome {
        let Some(capture) = self.capture.as_mut() else {
            return UpdateOutcome::NotCapturing;
        };

        let fetched = match capture.scratch.as_mut() {
            Some(scratch) => self
                .session
                .fetch_latest(scratch.buffer_mut())
                .and_then(|info| {
                    flip_vertically(scratch, capture.image.image_mut())
                        .map(|()| info)
                        .map_err(|e| {
                            warn!(device = %self.id, error = %e, "Vertical flip failed");
                            FetchError::NoFrame
                        })
                }),
            None => self
                .session
                .fetch_latest(capture.image.image_mut().buffer_mut()),
        };

        match fetched {
            Ok(info) => {
                capture
                    .image
                    .set_frame_info(info.sequence, info.timestamp_secs());
                trace!(device = %self.id, sequence = info.sequence, "Frame published");
                let sequence = info.sequence;
                self.notify(|l, d| l.on_device_captured_image(d));
                UpdateOutcome::Captured { sequence }
            }
            Err(FetchError::NoFrame) => UpdateOutcome::NoFrame,
            Err(FetchError::SizeMismatch { expected, actual }) => {
                UpdateOutcome::SizeMismatch { expected, actual }
            }
        }
    }

    /// Stop capturing; no-op when idle
    pub fn stop_capture(&mut self) {
        if !self.is_capturing() {
            return;
        }
        self.notify(|l, d| l.on_device_stopping(d));
        self.session.stop();
        self.capture = None;
        info!(device = %self.id, "Capture stopped");
    }

    /// Register a listener; the device only keeps a weak reference
    pub fn add_listener<L: DeviceListener + 'static>(&mut self, listener: &Arc<L>) {
        let listener: Arc<dyn DeviceListener> = listener.clone();
        let weak: Weak<dyn DeviceListener> = Arc::downgrade(&listener);
        self.listeners.add(weak);
    }

    /// Unregister a listener; `false` if it was not registered
    pub fn remove_listener<L: DeviceListener + 'static>(&mut self, listener: &Arc<L>) -> bool {
        let listener: Arc<dyn DeviceListener> = listener.clone();
        self.listeners.remove(&listener)
    }

    fn notify(&self, f: impl Fn(&dyn DeviceListener, &Device)) {
        self.listeners.for_each(|l| f(l, self));
    }
}

impl Drop for Device {
    fn drop(&mut self) {
        self.stop_capture();
    }
}

impl std::fmt::Debug for Device {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Device")
            .field("name", &self.name)
            .field("id", &self.id)
            .field("settings", &self.settings.len())
            .field("capturing", &self.started_settings_index())
            .finish()
    }
}

/// Pair each descriptor with a supported encoding with its native index
fn supported_settings(descriptors: &[NativeMediaDescriptor]) -> Vec<SupportedSettings> {
    descriptors
        .iter()
        .enumerate()
        .filter_map(|(native_index, descriptor)| {
            let Some(encoding) = descriptor.fourcc.encoding() else {
                debug!(%descriptor, "Skipping descriptor with unsupported encoding");
                return None;
            };
            let format = match ImageFormat::new(descriptor.width, descriptor.height, encoding) {
                Ok(format) => format,
                Err(e) => {
                    debug!(%descriptor, error = %e, "Skipping descriptor with invalid size");
                    return None;
                }
            };
            Some(SupportedSettings {
                settings: CaptureSettings::new(format, descriptor.frame_rate as f32),
                native_index,
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::camera::FourCc;
    use crate::media::Encoding;

    fn descriptor(fourcc: FourCc, width: u32) -> NativeMediaDescriptor {
        NativeMediaDescriptor {
            width,
            height: 2,
            stride: width as i32 * 2,
            frame_rate: 30,
            fourcc,
        }
    }

    #[test]
    fn test_unsupported_descriptors_are_skipped() {
        let descriptors = [
            descriptor(FourCc::MJPG, 640),
            descriptor(FourCc::YUY2, 4),
            descriptor(FourCc::NV12, 640),
            descriptor(FourCc::BGR3, 8),
        ];
        let settings = supported_settings(&descriptors);

        assert_eq!(settings.len(), 2);
        assert_eq!(settings[0].native_index, 1);
        assert_eq!(settings[0].settings.format().encoding(), Encoding::Yuyv);
        assert_eq!(settings[1].native_index, 3);
        assert_eq!(settings[1].settings.format().encoding(), Encoding::Bgr24);
        assert_eq!(settings[1].settings.frame_rate(), 30.0);
    }

    #[test]
    fn test_zero_sized_descriptor_is_skipped() {
        let settings = supported_settings(&[descriptor(FourCc::RGB3, 0)]);
        assert!(settings.is_empty());
    }
}
