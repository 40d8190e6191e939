// SPDX-License-Identifier: GPL-3.0-only

//! Video4Linux2 capture backend
//!
//! Sources are `/dev/video*` capture nodes, identified by bus info so the
//! identifier survives node renumbering. A reader streams through an mmap
//! queue on its own thread; each sample request hands that thread one token
//! and each token produces exactly one delivery.

use super::frame_loop::{LoopAction, LoopController};
use super::{
    BackendError, BackendResult, CaptureBackend, CaptureBackendType, FourCc, HotplugNotifier,
    HotplugWatch, NativeMediaDescriptor, NativeReader, SampleDelivery, SampleSink, SourceInfo,
    frame_rate_from_ratio,
};
use crate::constants::TICKS_PER_SECOND;
use std::collections::{BTreeSet, HashMap};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::mpsc::{self, RecvTimeoutError, Sender};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tracing::{debug, info, trace, warn};
use v4l::buffer::Type;
use v4l::capability::Flags;
use v4l::frameinterval::FrameIntervalEnum;
use v4l::framesize::FrameSizeEnum;
use v4l::io::traits::CaptureStream;
use v4l::prelude::*;
use v4l::video::Capture;
use v4l::video::capture::Parameters;

/// Identifier prefix for V4L2 sources
const ID_PREFIX: &str = "v4l2:";

/// Sysfs directory listing every video node
const SYSFS_VIDEO_DIR: &str = "/sys/class/video4linux";

/// Buffers in the mmap queue
const STREAM_BUFFERS: u32 = 4;

/// How long the capture thread waits for a token before rechecking stop
const TOKEN_WAIT: Duration = Duration::from_millis(100);

/// Retries for a node still held by a previous stream
const BUSY_RETRIES: u32 = 10;
const BUSY_RETRY_DELAY: Duration = Duration::from_millis(20);

/// V4L2 backend
pub struct V4l2Backend {
    hotplug_interval: Duration,
    /// Identifier to device node, refreshed on every enumeration
    nodes: Mutex<HashMap<String, PathBuf>>,
}

impl V4l2Backend {
    pub fn new(hotplug_interval: Duration) -> Self {
        Self {
            hotplug_interval,
            nodes: Mutex::new(HashMap::new()),
        }
    }

    fn scan(&self) -> Vec<(SourceInfo, PathBuf)> {
        let mut nodes = v4l::context::enum_devices();
        nodes.sort_by_key(|node| node.index());

        let mut per_bus: HashMap<String, usize> = HashMap::new();
        let mut found = Vec::new();
        for node in nodes {
            let path = node.path().to_path_buf();
            let dev = match Device::with_path(&path) {
                Ok(dev) => dev,
                Err(e) => {
                    debug!(path = %path.display(), error = %e, "Skipping unopenable node");
                    continue;
                }
            };
            let caps = match dev.query_caps() {
                Ok(caps) => caps,
                Err(e) => {
                    debug!(path = %path.display(), error = %e, "Skipping node without capabilities");
                    continue;
                }
            };
            if !caps.capabilities.contains(Flags::VIDEO_CAPTURE) {
                continue;
            }
            // Metadata nodes share the capture capability but list no formats
            if dev.enum_formats().map(|f| f.is_empty()).unwrap_or(true) {
                trace!(path = %path.display(), "Skipping node without capture formats");
                continue;
            }

            let count = per_bus.entry(caps.bus.clone()).or_insert(0);
            let id = if *count == 0 {
                format!("{}{}", ID_PREFIX, caps.bus)
            } else {
                format!("{}{}#{}", ID_PREFIX, caps.bus, count)
            };
            *count += 1;

            debug!(path = %path.display(), id = %id, card = %caps.card, "Found capture node");
            found.push((SourceInfo::new(caps.card.clone(), id), path));
        }
        found
    }

    fn resolve(&self, id: &str) -> Option<PathBuf> {
        if let Some(path) = self
            .nodes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(id)
        {
            return Some(path.clone());
        }
        // Not seen yet, e.g. a reader opened before any enumeration
        let _ = self.enumerate_sources();
        self.nodes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(id)
            .cloned()
    }
}

impl CaptureBackend for V4l2Backend {
    fn backend_type(&self) -> CaptureBackendType {
        CaptureBackendType::V4l2
    }

    fn enumerate_sources(&self) -> BackendResult<Vec<SourceInfo>> {
        if !Path::new("/dev").exists() {
            return Err(BackendError::NotAvailable("/dev is not mounted".into()));
        }
        let found = self.scan();
        let mut nodes = self.nodes.lock().unwrap_or_else(PoisonError::into_inner);
        nodes.clear();
        nodes.extend(found.iter().map(|(s, p)| (s.id.clone(), p.clone())));
        Ok(found.into_iter().map(|(source, _)| source).collect())
    }

    fn open_reader(
        &self,
        source: &SourceInfo,
        sink: Option<Arc<dyn SampleSink>>,
    ) -> BackendResult<Box<dyn NativeReader>> {
        let path = self
            .resolve(&source.id)
            .ok_or_else(|| BackendError::DeviceNotFound(source.id.clone()))?;
        let device = Device::with_path(&path)
            .map_err(|e| BackendError::OpenFailed(format!("{}: {}", path.display(), e)))?;
        let descriptors = enumerate_descriptors(&device);

        Ok(Box::new(V4l2Reader {
            id: source.id.clone(),
            device: Some(device),
            descriptors,
            sink,
            tokens: None,
            capture: None,
        }))
    }

    fn watch_device_changes(&self, notifier: HotplugNotifier) -> Option<Box<dyn HotplugWatch>> {
        let (wake, sleeper) = mpsc::channel::<()>();
        let interval = self.hotplug_interval;
        let mut known = scan_sysfs_nodes();

        let controller = LoopController::start("v4l2-hotplug", move || {
            match sleeper.recv_timeout(interval) {
                Err(RecvTimeoutError::Timeout) => {}
                _ => return LoopAction::Stop,
            }
            let current = scan_sysfs_nodes();
            if current != known {
                debug!(before = known.len(), after = current.len(), "Video nodes changed");
                known = current;
                if !notifier.notify() {
                    return LoopAction::Stop;
                }
            }
            LoopAction::Continue
        });
        let controller = match controller {
            Ok(controller) => controller,
            Err(e) => {
                warn!(error = %e, "Failed to start hot-plug poller");
                return None;
            }
        };

        Some(Box::new(V4l2HotplugWatch {
            _wake: wake,
            _controller: controller,
        }))
    }
}

/// Names of the nodes under `/sys/class/video4linux`
fn scan_sysfs_nodes() -> BTreeSet<String> {
    std::fs::read_dir(SYSFS_VIDEO_DIR)
        .into_iter()
        .flatten()
        .flatten()
        .filter_map(|entry| entry.file_name().into_string().ok())
        .collect()
}

/// Every (fourcc, size, interval) combination the node reports
fn enumerate_descriptors(device: &Device) -> Vec<NativeMediaDescriptor> {
    let mut descriptors = Vec::new();
    let formats = match device.enum_formats() {
        Ok(formats) => formats,
        Err(e) => {
            warn!(error = %e, "Failed to enumerate formats");
            return descriptors;
        }
    };

    for format in formats {
        let fourcc = FourCc(format.fourcc.repr);
        let sizes = device.enum_framesizes(format.fourcc).unwrap_or_default();
        for size in sizes {
            let (width, height) = match size.size {
                FrameSizeEnum::Discrete(d) => (d.width, d.height),
                FrameSizeEnum::Stepwise(s) => (s.max_width, s.max_height),
            };
            let stride = fourcc
                .encoding()
                .map(|e| (width * e.bytes_per_pixel()) as i32)
                .unwrap_or(0);

            let rates: Vec<u32> = device
                .enum_frameintervals(format.fourcc, width, height)
                .unwrap_or_default()
                .into_iter()
                .map(|interval| match interval.interval {
                    FrameIntervalEnum::Discrete(f) => frame_rate_from_ratio(f.denominator, f.numerator),
                    FrameIntervalEnum::Stepwise(s) => {
                        frame_rate_from_ratio(s.min.denominator, s.min.numerator)
                    }
                })
                .collect();

            if rates.is_empty() {
                descriptors.push(NativeMediaDescriptor {
                    width,
                    height,
                    stride,
                    frame_rate: 0,
                    fourcc,
                });
            }
            for frame_rate in rates {
                descriptors.push(NativeMediaDescriptor {
                    width,
                    height,
                    stride,
                    frame_rate,
                    fourcc,
                });
            }
        }
    }
    descriptors
}

/// Check what the driver accepted against the requested descriptor
///
/// Samples are copied without line padding, so a driver that pads its
/// lines would never deliver a sample of the expected size.
fn verify_applied_format(
    descriptor: &NativeMediaDescriptor,
    width: u32,
    height: u32,
    fourcc: FourCc,
    stride: u32,
) -> BackendResult<()> {
    if fourcc != descriptor.fourcc || width != descriptor.width || height != descriptor.height {
        return Err(BackendError::FormatNotSupported(format!(
            "driver chose {}x{} {} instead of {}",
            width, height, fourcc, descriptor
        )));
    }
    if descriptor.stride > 0 && stride != descriptor.stride.unsigned_abs() {
        return Err(BackendError::FormatNotSupported(format!(
            "driver uses {} bytes per line instead of {} for {}",
            stride, descriptor.stride, descriptor
        )));
    }
    Ok(())
}

/// Retry an ioctl while the node is still busy with a closing stream
fn retry_busy<T>(mut op: impl FnMut() -> io::Result<T>) -> io::Result<T> {
    let mut attempt = 0;
    loop {
        match op() {
            Err(e) if e.kind() == io::ErrorKind::ResourceBusy && attempt < BUSY_RETRIES => {
                attempt += 1;
                std::thread::sleep(BUSY_RETRY_DELAY);
            }
            result => return result,
        }
    }
}

struct V4l2Reader {
    id: String,
    /// Moved to the capture thread on the first sample request
    device: Option<Device>,
    descriptors: Vec<NativeMediaDescriptor>,
    sink: Option<Arc<dyn SampleSink>>,
    tokens: Option<Sender<()>>,
    capture: Option<LoopController>,
}

impl V4l2Reader {
    fn spawn_capture(&mut self) -> BackendResult<()> {
        let sink = self
            .sink
            .clone()
            .ok_or_else(|| BackendError::Other("reader has no sample sink".into()))?;
        let device = self
            .device
            .take()
            .ok_or_else(|| BackendError::StreamFailed("capture already ended".into()))?;

        let (tokens, requests) = mpsc::channel::<()>();
        let init_sink = Arc::clone(&sink);
        let id = self.id.clone();

        let controller = LoopController::start_with_init(
            "v4l2-capture",
            move || match MmapStream::with_buffers(&device, Type::VideoCapture, STREAM_BUFFERS) {
                Ok(stream) => {
                    info!(device = %id, "V4L2 stream started");
                    Ok(stream)
                }
                Err(e) => {
                    let message = format!("failed to start stream: {}", e);
                    init_sink.on_sample(SampleDelivery::Failed(BackendError::StreamFailed(
                        message.clone(),
                    )));
                    Err(message)
                }
            },
            move |stream| {
                match requests.recv_timeout(TOKEN_WAIT) {
                    Ok(()) => {}
                    Err(RecvTimeoutError::Timeout) => return LoopAction::Continue,
                    Err(RecvTimeoutError::Disconnected) => return LoopAction::Stop,
                }

                match stream.next() {
                    Ok((buf, meta)) => {
                        let used = (meta.bytesused as usize).min(buf.len());
                        let data = if used > 0 { &buf[..used] } else { buf };
                        let timestamp = meta.timestamp.sec as i64 * TICKS_PER_SECOND
                            + meta.timestamp.usec as i64 * (TICKS_PER_SECOND / 1_000_000);
                        sink.on_sample(SampleDelivery::Sample { timestamp, data });
                        LoopAction::Continue
                    }
                    Err(e) => {
                        sink.on_sample(SampleDelivery::Failed(BackendError::StreamFailed(
                            e.to_string(),
                        )));
                        LoopAction::Stop
                    }
                }
            },
        )?;

        self.tokens = Some(tokens);
        self.capture = Some(controller);
        Ok(())
    }
}

impl NativeReader for V4l2Reader {
    fn native_descriptor(&self, index: usize) -> Option<NativeMediaDescriptor> {
        self.descriptors.get(index).copied()
    }

    fn set_current_format(&mut self, index: usize) -> BackendResult<()> {
        let descriptor = *self
            .descriptors
            .get(index)
            .ok_or(BackendError::InvalidDescriptor(index))?;
        let device = self.device.as_ref().ok_or_else(|| {
            BackendError::FormatNotSupported("format cannot change while streaming".into())
        })?;

        let mut format = device.format()?;
        format.width = descriptor.width;
        format.height = descriptor.height;
        format.fourcc = v4l::FourCC::new(&descriptor.fourcc.0);

        let applied = retry_busy(|| device.set_format(&format))
            .map_err(|e| BackendError::FormatNotSupported(format!("{}: {}", descriptor, e)))?;
        verify_applied_format(
            &descriptor,
            applied.width,
            applied.height,
            FourCc(applied.fourcc.repr),
            applied.stride,
        )?;

        if descriptor.frame_rate > 0 {
            if let Err(e) = device.set_params(&Parameters::with_fps(descriptor.frame_rate)) {
                warn!(device = %self.id, error = %e, "Failed to set frame rate");
            }
        }

        debug!(device = %self.id, index, %descriptor, "Format applied");
        Ok(())
    }

    fn request_next_sample(&mut self) -> BackendResult<()> {
        if self.capture.is_none() {
            self.spawn_capture()?;
        }
        self.tokens
            .as_ref()
            .ok_or_else(|| BackendError::StreamFailed("capture loop not running".into()))?
            .send(())
            .map_err(|_| BackendError::StreamFailed("capture loop ended".into()))
    }
}

impl Drop for V4l2Reader {
    fn drop(&mut self) {
        self.tokens = None;
        // The loop may be waiting on the lock our owner holds; don't join
        if let Some(capture) = self.capture.take() {
            capture.detach();
        }
    }
}

struct V4l2HotplugWatch {
    // Dropped first so the loop wakes and exits before the join
    _wake: Sender<()>,
    _controller: LoopController,
}

impl HotplugWatch for V4l2HotplugWatch {}
