// SPDX-License-Identifier: GPL-3.0-only

//! Camera capture layer
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────┐
//! │    DeviceManager    │  ← Hot-plug diffing, per-frame polling
//! └──────────┬──────────┘
//!            │ owns
//!            ▼
//! ┌─────────────────────┐
//! │       Device        │  ← Settings, start/stop, orientation
//! └──────────┬──────────┘
//!            │ owns
//!            ▼
//! ┌─────────────────────┐
//! │   CaptureSession    │  ← Latest-sample slot shared with callbacks
//! └──────────┬──────────┘
//!            │
//!            ▼
//! ┌─────────────────────┐
//! │ CaptureBackend Trait│  ← Native sources and readers
//! └──────────┬──────────┘
//!            │
//!       ┌────┴──────┐
//!       ▼           ▼
//!   ┌──────┐  ┌───────────┐
//!   │ V4L2 │  │ Synthetic │
//!   └──────┘  └───────────┘
//! ```

pub mod device;
pub mod frame_loop;
pub mod hotplug;
pub mod listeners;
pub mod manager;
pub mod session;
pub mod synthetic;
pub mod types;
#[cfg(target_os = "linux")]
pub mod v4l2;

pub use device::{Device, DeviceListener, SupportedSettings, UpdateOutcome};
pub use hotplug::{HotplugNotifier, HotplugRegistration, HotplugRegistry};
pub use manager::{DeviceManager, DeviceManagerListener};
pub use session::{CaptureSession, SampleInfo};
pub use synthetic::SyntheticBackend;
pub use types::*;

use crate::config::Config;
use std::sync::Arc;

/// Native capture backend
///
/// A backend enumerates capturable sources and opens readers on them.
/// Readers deliver samples asynchronously to a [`SampleSink`], one delivery
/// per [`NativeReader::request_next_sample`] call.
pub trait CaptureBackend: Send + Sync {
    /// Get the backend type identifier
    fn backend_type(&self) -> CaptureBackendType;

    /// Enumerate capturable sources currently present
    fn enumerate_sources(&self) -> BackendResult<Vec<SourceInfo>>;

    /// Open a reader on a source
    ///
    /// With `sink == None` the reader is only used to query descriptors.
    fn open_reader(
        &self,
        source: &SourceInfo,
        sink: Option<Arc<dyn SampleSink>>,
    ) -> BackendResult<Box<dyn NativeReader>>;

    /// Start watching for device arrival and removal
    ///
    /// The returned guard stops the watch when dropped. Backends without
    /// platform notifications return `None`.
    fn watch_device_changes(&self, _notifier: HotplugNotifier) -> Option<Box<dyn HotplugWatch>> {
        None
    }
}

/// An open native capture channel; dropping it closes the channel
pub trait NativeReader: Send {
    /// Native media type at `index`, or `None` past the last one
    fn native_descriptor(&self, index: usize) -> Option<NativeMediaDescriptor>;

    /// Make the descriptor at `index` the current capture format
    fn set_current_format(&mut self, index: usize) -> BackendResult<()>;

    /// Ask for one more sample
    ///
    /// Completion is reported later through the reader's sink, never from
    /// within this call.
    fn request_next_sample(&mut self) -> BackendResult<()>;
}

/// Receiver for asynchronous sample completions
pub trait SampleSink: Send + Sync {
    fn on_sample(&self, delivery: SampleDelivery<'_>);
}

/// Guard for a running platform hot-plug watch
pub trait HotplugWatch: Send {}

/// Create the backend selected in the configuration
///
/// V4L2 is only available on Linux; elsewhere the synthetic backend is used.
pub fn default_backend(config: &Config) -> Arc<dyn CaptureBackend> {
    match config.backend {
        #[cfg(target_os = "linux")]
        CaptureBackendType::V4l2 => Arc::new(v4l2::V4l2Backend::new(
            std::time::Duration::from_millis(config.hotplug_poll_interval_ms),
        )),
        #[cfg(not(target_os = "linux"))]
        CaptureBackendType::V4l2 => {
            tracing::warn!("V4L2 is not available on this platform, using synthetic backend");
            Arc::new(SyntheticBackend::new())
        }
        CaptureBackendType::Synthetic => Arc::new(SyntheticBackend::new()),
    }
}
