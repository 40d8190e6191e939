// SPDX-License-Identifier: GPL-3.0-only

//! In-memory capture backend
//!
//! Sources, their descriptors and every delivery are driven by the caller.
//! Used by the test suite and on platforms without a native backend.
//! A delivery only reaches a reader that has a request outstanding, so each
//! `request_next_sample` yields at most one delivery.

use super::{
    BackendError, BackendResult, CaptureBackend, CaptureBackendType, HotplugNotifier,
    HotplugWatch, NativeMediaDescriptor, NativeReader, SampleDelivery, SampleSink, SourceInfo,
};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use tracing::debug;

struct SyntheticSource {
    info: SourceInfo,
    descriptors: Vec<NativeMediaDescriptor>,
}

struct ReaderSlot {
    source_id: String,
    sink: Option<Arc<dyn SampleSink>>,
    outstanding: bool,
    current_format: Option<usize>,
}

#[derive(Default)]
struct SyntheticState {
    sources: Vec<SyntheticSource>,
    next_id: u64,
    readers: HashMap<u64, ReaderSlot>,
    enumeration_failure: bool,
    open_failures: HashSet<String>,
    format_failures: HashSet<String>,
    watches: HashMap<u64, HotplugNotifier>,
}

/// Backend whose devices exist only in memory
#[derive(Default)]
pub struct SyntheticBackend {
    state: Arc<Mutex<SyntheticState>>,
}

fn lock(state: &Mutex<SyntheticState>) -> MutexGuard<'_, SyntheticState> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

impl SyntheticBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Plug in a source, replacing one with the same identifier
    pub fn add_source(
        &self,
        name: &str,
        id: &str,
        descriptors: Vec<NativeMediaDescriptor>,
    ) {
        {
            let mut state = lock(&self.state);
            state.sources.retain(|s| s.info.id != id);
            state.sources.push(SyntheticSource {
                info: SourceInfo::new(name, id),
                descriptors,
            });
        }
        debug!(id, "Synthetic source added");
        self.trigger_hotplug();
    }

    /// Unplug a source; open readers stay open but receive nothing
    pub fn remove_source(&self, id: &str) -> bool {
        let removed = {
            let mut state = lock(&self.state);
            let before = state.sources.len();
            state.sources.retain(|s| s.info.id != id);
            state.sources.len() != before
        };
        if removed {
            debug!(id, "Synthetic source removed");
            self.trigger_hotplug();
        }
        removed
    }

    /// Make `enumerate_sources` fail
    pub fn set_enumeration_failure(&self, fail: bool) {
        lock(&self.state).enumeration_failure = fail;
    }

    /// Make `open_reader` fail for a source
    pub fn set_open_failure(&self, id: &str, fail: bool) {
        let mut state = lock(&self.state);
        if fail {
            state.open_failures.insert(id.to_string());
        } else {
            state.open_failures.remove(id);
        }
    }

    /// Make `set_current_format` fail for a source
    pub fn set_format_failure(&self, id: &str, fail: bool) {
        let mut state = lock(&self.state);
        if fail {
            state.format_failures.insert(id.to_string());
        } else {
            state.format_failures.remove(id);
        }
    }

    /// Deliver one sample to every streaming reader of `id` with a request
    /// outstanding; returns whether any reader received it
    pub fn deliver(&self, id: &str, timestamp: i64, data: &[u8]) -> bool {
        self.deliver_with(id, |sink| {
            sink.on_sample(SampleDelivery::Sample { timestamp, data })
        })
    }

    /// Complete the outstanding request without a sample
    pub fn deliver_empty(&self, id: &str) -> bool {
        self.deliver_with(id, |sink| sink.on_sample(SampleDelivery::Empty))
    }

    /// Complete the outstanding request with a stream failure
    pub fn deliver_failure(&self, id: &str, error: BackendError) -> bool {
        self.deliver_with(id, |sink| {
            sink.on_sample(SampleDelivery::Failed(error.clone()))
        })
    }

    fn deliver_with(&self, id: &str, f: impl Fn(&dyn SampleSink)) -> bool {
        let sinks: Vec<Arc<dyn SampleSink>> = {
            let mut state = lock(&self.state);
            state
                .readers
                .values_mut()
                .filter(|slot| slot.source_id == id && slot.outstanding)
                .filter_map(|slot| {
                    slot.outstanding = false;
                    slot.sink.clone()
                })
                .collect()
        };

        // Sinks call back into request_next_sample, so the lock is released
        for sink in &sinks {
            f(sink.as_ref());
        }
        !sinks.is_empty()
    }

    /// Number of readers currently open, transient ones included
    pub fn open_reader_count(&self) -> usize {
        lock(&self.state).readers.len()
    }

    /// Format most recently set on an open reader of `id`
    pub fn current_format(&self, id: &str) -> Option<usize> {
        lock(&self.state)
            .readers
            .values()
            .filter(|slot| slot.source_id == id)
            .find_map(|slot| slot.current_format)
    }

    /// Report a device change to every active hot-plug watch
    pub fn trigger_hotplug(&self) {
        let notifiers: Vec<HotplugNotifier> = lock(&self.state).watches.values().cloned().collect();
        for notifier in notifiers {
            notifier.notify();
        }
    }

    pub fn watch_count(&self) -> usize {
        lock(&self.state).watches.len()
    }
}

impl CaptureBackend for SyntheticBackend {
    fn backend_type(&self) -> CaptureBackendType {
        CaptureBackendType::Synthetic
    }

    fn enumerate_sources(&self) -> BackendResult<Vec<SourceInfo>> {
        let state = lock(&self.state);
        if state.enumeration_failure {
            return Err(BackendError::NotAvailable("enumeration disabled".into()));
        }
        Ok(state
            .sources
            .iter()
            .map(|s| s.info.clone())
            .collect())
    }

    fn open_reader(
        &self,
        source: &SourceInfo,
        sink: Option<Arc<dyn SampleSink>>,
    ) -> BackendResult<Box<dyn NativeReader>> {
        let mut state = lock(&self.state);
        if state.open_failures.contains(&source.id) {
            return Err(BackendError::OpenFailed(source.id.clone()));
        }
        let descriptors = state
            .sources
            .iter()
            .find(|s| s.info.id == source.id)
            .map(|s| s.descriptors.clone())
            .ok_or_else(|| BackendError::DeviceNotFound(source.id.clone()))?;

        let id = state.next_id;
        state.next_id += 1;
        state.readers.insert(
            id,
            ReaderSlot {
                source_id: source.id.clone(),
                sink,
                outstanding: false,
                current_format: None,
            },
        );

        Ok(Box::new(SyntheticReader {
            state: Arc::downgrade(&self.state),
            id,
            source_id: source.id.clone(),
            descriptors,
        }))
    }

    fn watch_device_changes(&self, notifier: HotplugNotifier) -> Option<Box<dyn HotplugWatch>> {
        let mut state = lock(&self.state);
        let id = state.next_id;
        state.next_id += 1;
        state.watches.insert(id, notifier);
        Some(Box::new(SyntheticWatch {
            state: Arc::downgrade(&self.state),
            id,
        }))
    }
}

struct SyntheticReader {
    state: Weak<Mutex<SyntheticState>>,
    id: u64,
    source_id: String,
    descriptors: Vec<NativeMediaDescriptor>,
}

impl SyntheticReader {
    fn with_slot<T>(&self, f: impl FnOnce(&mut SyntheticState, u64) -> T) -> BackendResult<T> {
        let state = self
            .state
            .upgrade()
            .ok_or_else(|| BackendError::NotAvailable("synthetic backend dropped".into()))?;
        let mut state = lock(&state);
        Ok(f(&mut state, self.id))
    }
}

impl NativeReader for SyntheticReader {
    fn native_descriptor(&self, index: usize) -> Option<NativeMediaDescriptor> {
        self.descriptors.get(index).copied()
    }

    fn set_current_format(&mut self, index: usize) -> BackendResult<()> {
        if index >= self.descriptors.len() {
            return Err(BackendError::InvalidDescriptor(index));
        }
        let source_id = self.source_id.clone();
        self.with_slot(|state, id| {
            if state.format_failures.contains(&source_id) {
                return Err(BackendError::FormatNotSupported(format!(
                    "{} rejected descriptor {}",
                    source_id, index
                )));
            }
            if let Some(slot) = state.readers.get_mut(&id) {
                slot.current_format = Some(index);
            }
            Ok(())
        })?
    }

    fn request_next_sample(&mut self) -> BackendResult<()> {
        self.with_slot(|state, id| {
            if let Some(slot) = state.readers.get_mut(&id) {
                slot.outstanding = true;
            }
        })
    }
}

impl Drop for SyntheticReader {
    fn drop(&mut self) {
        let _ = self.with_slot(|state, id| state.readers.remove(&id));
    }
}

struct SyntheticWatch {
    state: Weak<Mutex<SyntheticState>>,
    id: u64,
}

impl HotplugWatch for SyntheticWatch {}

impl Drop for SyntheticWatch {
    fn drop(&mut self) {
        if let Some(state) = self.state.upgrade() {
            lock(&state).watches.remove(&self.id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::camera::FourCc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingSink(AtomicUsize);

    impl SampleSink for CountingSink {
        fn on_sample(&self, _delivery: SampleDelivery<'_>) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn descriptor() -> NativeMediaDescriptor {
        NativeMediaDescriptor {
            width: 2,
            height: 2,
            stride: 6,
            frame_rate: 30,
            fourcc: FourCc::RGB3,
        }
    }

    #[test]
    fn test_one_delivery_per_request() {
        let backend = SyntheticBackend::new();
        backend.add_source("Cam", "cam0", vec![descriptor()]);
        let sink = Arc::new(CountingSink(AtomicUsize::new(0)));

        let mut reader = backend
            .open_reader(&SourceInfo::new("Cam", "cam0"), Some(sink.clone()))
            .unwrap();
        assert!(!backend.deliver("cam0", 0, &[0; 12]));

        reader.request_next_sample().unwrap();
        assert!(backend.deliver("cam0", 0, &[0; 12]));
        assert!(!backend.deliver("cam0", 0, &[0; 12]));
        assert_eq!(sink.0.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_readers_are_counted_and_closed_on_drop() {
        let backend = SyntheticBackend::new();
        backend.add_source("Cam", "cam0", vec![descriptor()]);
        let source = SourceInfo::new("Cam", "cam0");

        let a = backend.open_reader(&source, None).unwrap();
        let b = backend.open_reader(&source, None).unwrap();
        assert_eq!(backend.open_reader_count(), 2);
        drop(a);
        drop(b);
        assert_eq!(backend.open_reader_count(), 0);
    }

    #[test]
    fn test_unknown_source_and_failures() {
        let backend = SyntheticBackend::new();
        assert!(matches!(
            backend.open_reader(&SourceInfo::new("X", "x"), None),
            Err(BackendError::DeviceNotFound(_))
        ));

        backend.add_source("Cam", "cam0", vec![descriptor()]);
        backend.set_format_failure("cam0", true);
        let mut reader = backend
            .open_reader(&SourceInfo::new("Cam", "cam0"), None)
            .unwrap();
        assert!(reader.set_current_format(0).is_err());
        assert!(matches!(
            reader.set_current_format(5),
            Err(BackendError::InvalidDescriptor(5))
        ));

        backend.set_format_failure("cam0", false);
        reader.set_current_format(0).unwrap();
        assert_eq!(backend.current_format("cam0"), Some(0));
    }
}
